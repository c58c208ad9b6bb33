//! Sigma 규칙 -- 규칙 모델, 패키지 선택, ElastAlert 래퍼

pub mod elastalert;
pub mod packages;
pub mod rule;

pub use elastalert::{ElastAlertRule, EqlFilter, SIGMA_CONVERT_ARGS, severity_number};
pub use packages::{normalize_packages, parse_package_files};
pub use rule::{LogSource, OneOrMore, RelatedRule, SigmaDetection, SigmaRule, is_valid_rule_id};
