//! YARA 규칙 -- 파싱, 직렬화, 탐지 변환

mod imports;
pub mod parser;
pub mod rule;

pub use parser::parse_rules;
pub use rule::{Metadata, YaraRule, rename_for_copy};
