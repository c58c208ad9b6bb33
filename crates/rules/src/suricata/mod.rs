//! Suricata 규칙 -- 한 줄 규칙 파서, 탐지 추출, 필러 병합

pub mod details;
pub mod pillar;
pub mod rule;

pub use details::{
    extract_details, extract_sid, lookup_license, parse_line, parse_rules, severity_of,
    validate_rule,
};
pub use pillar::{PillarLists, PillarMerger};
pub use rule::{MetaData, RuleOption, SuricataRule};
