//! Suricata 규칙 파서 -- 한 줄 규칙을 헤더와 옵션 목록으로 분해
//!
//! ```text
//! alert tcp $HOME_NET any -> any 80 (msg:"x"; content:"a\;b"; sid:1;)
//! └────────────── header ──────────┘ └──────────── options ────────────┘
//! ```
//!
//! 옵션 값 안의 `;`는 `\;`로 이스케이프되거나 큰따옴표 안에 있어야 합니다.

use std::fmt;

use crate::error::RuleParseError;

/// 규칙 동작
const ACTIONS: &[&str] = &[
    "alert",
    "pass",
    "drop",
    "reject",
    "rejectsrc",
    "rejectdst",
    "rejectboth",
];

/// 파싱된 Suricata 규칙
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuricataRule {
    pub action: String,
    pub protocol: String,
    pub source: String,
    pub source_port: String,
    /// `->` 또는 `<>`
    pub direction: String,
    pub destination: String,
    pub destination_port: String,
    /// 원문 순서를 유지한 옵션 목록
    pub options: Vec<RuleOption>,
}

/// `name[:value];` 옵션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOption {
    pub name: String,
    /// 값은 원문 그대로 (따옴표, 이스케이프 포함)
    pub value: Option<String>,
}

/// `metadata` 옵션의 `key value` 항목
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    pub key: String,
    pub value: String,
}

impl SuricataRule {
    /// 한 줄 규칙을 파싱합니다.
    pub fn parse(line: &str) -> Result<Self, RuleParseError> {
        let line = line.trim();

        let open = line
            .find('(')
            .ok_or_else(|| RuleParseError::Malformed("missing option list".to_owned()))?;
        let body = line[open + 1..]
            .trim_end()
            .strip_suffix(')')
            .ok_or_else(|| RuleParseError::Malformed("option list is not closed".to_owned()))?;

        let header = split_header(&line[..open]);
        let [action, protocol, source, source_port, direction, destination, destination_port] =
            <[String; 7]>::try_from(header).map_err(|fields| {
                RuleParseError::Malformed(format!(
                    "expected 7 header fields, found {}",
                    fields.len()
                ))
            })?;

        if !ACTIONS.contains(&action.to_lowercase().as_str()) {
            return Err(RuleParseError::Malformed(format!("unknown action: {action}")));
        }
        if direction != "->" && direction != "<>" {
            return Err(RuleParseError::Malformed(format!(
                "unknown direction: {direction}"
            )));
        }

        Ok(Self {
            action,
            protocol,
            source,
            source_port,
            direction,
            destination,
            destination_port,
            options: parse_options(body)?,
        })
    }

    /// 이름이 같은 첫 옵션의 값 (대소문자 무시)
    ///
    /// 옵션이 없거나 값이 없는 플래그 옵션이면 `None`입니다.
    pub fn get_option(&self, name: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
            .and_then(|o| o.value.as_deref())
    }

    /// 값 유무와 관계없이 옵션이 존재하는지 확인합니다.
    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o.name.eq_ignore_ascii_case(name))
    }

    /// 모든 `metadata` 옵션의 `key value` 항목을 펼칩니다.
    pub fn parse_metadata(&self) -> Vec<MetaData> {
        self.options
            .iter()
            .filter(|o| o.name.eq_ignore_ascii_case("metadata"))
            .filter_map(|o| o.value.as_deref())
            .flat_map(|v| v.split(','))
            .filter_map(|entry| {
                let entry = entry.trim();
                if entry.is_empty() {
                    return None;
                }
                let (key, value) = entry.split_once(' ').unwrap_or((entry, ""));
                Some(MetaData {
                    key: key.trim().to_owned(),
                    value: value.trim().to_owned(),
                })
            })
            .collect()
    }
}

impl fmt::Display for SuricataRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} (",
            self.action,
            self.protocol,
            self.source,
            self.source_port,
            self.direction,
            self.destination,
            self.destination_port
        )?;

        for (i, opt) in self.options.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match &opt.value {
                Some(value) => write!(f, "{}:{};", opt.name, value)?,
                None => write!(f, "{};", opt.name)?,
            }
        }

        f.write_str(")")
    }
}

/// 공백으로 헤더를 나누되 `[...]` 목록 안의 공백은 유지합니다.
fn split_header(header: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in header.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    fields.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }

    fields
}

fn parse_options(body: &str) -> Result<Vec<RuleOption>, RuleParseError> {
    let mut options = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in body.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            ';' if !in_quotes => {
                if let Some(opt) = to_option(&current)? {
                    options.push(opt);
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(RuleParseError::Malformed("unterminated quoted value".to_owned()));
    }
    if !current.trim().is_empty() {
        return Err(RuleParseError::Malformed(format!(
            "option is missing a terminating semicolon: {}",
            current.trim()
        )));
    }

    Ok(options)
}

fn to_option(raw: &str) -> Result<Option<RuleOption>, RuleParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let (name, value) = match raw.split_once(':') {
        Some((name, value)) => (name.trim(), Some(value.trim().to_owned())),
        None => (raw, None),
    };

    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(RuleParseError::Malformed(format!("invalid option name: {raw}")));
    }

    Ok(Some(RuleOption {
        name: name.to_owned(),
        value,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULE: &str = r#"alert http $HOME_NET any -> $EXTERNAL_NET any (msg:"ET POLICY \"quoted\" a\;b"; flow:established,to_server; content:"GET"; http_method; metadata:signature_severity Major, created_at 2024_01_01; sid:2000001; rev:3;)"#;

    #[test]
    fn parses_header_and_options() {
        let rule = SuricataRule::parse(RULE).unwrap();
        assert_eq!(rule.action, "alert");
        assert_eq!(rule.protocol, "http");
        assert_eq!(rule.source, "$HOME_NET");
        assert_eq!(rule.direction, "->");
        assert_eq!(rule.destination_port, "any");
        assert_eq!(rule.options.len(), 7);
        assert_eq!(rule.get_option("SID"), Some("2000001"));
        assert_eq!(rule.get_option("msg"), Some(r#""ET POLICY \"quoted\" a\;b""#));
        assert!(rule.has_option("http_method"));
        assert_eq!(rule.get_option("http_method"), None);
    }

    #[test]
    fn metadata_entries_are_split() {
        let rule = SuricataRule::parse(RULE).unwrap();
        let md = rule.parse_metadata();
        assert_eq!(md.len(), 2);
        assert_eq!(md[0].key, "signature_severity");
        assert_eq!(md[0].value, "Major");
        assert_eq!(md[1].key, "created_at");
    }

    #[test]
    fn display_reserializes_equivalently() {
        let rule = SuricataRule::parse(RULE).unwrap();
        let text = rule.to_string();
        assert!(text.starts_with("alert http $HOME_NET any -> $EXTERNAL_NET any (msg:"));
        assert!(text.ends_with("sid:2000001; rev:3;)"));
        assert_eq!(SuricataRule::parse(&text).unwrap(), rule);
    }

    #[test]
    fn bracketed_address_lists_keep_spaces() {
        let rule =
            SuricataRule::parse("alert ip [10.0.0.1, 10.0.0.2] any <> any any (sid:5;)").unwrap();
        assert_eq!(rule.source, "[10.0.0.1, 10.0.0.2]");
        assert_eq!(rule.direction, "<>");
    }

    #[test]
    fn malformed_rules_are_rejected() {
        for line in [
            "alert tcp any any -> any any",
            "alert tcp any any -> any any (sid:1;",
            "alert tcp any any any any (sid:1;)",
            "bogus tcp any any -> any any (sid:1;)",
            "alert tcp any any => any any (sid:1;)",
            "alert tcp any any -> any any (sid:1)",
            "alert tcp any any -> any any (msg:\"open; sid:1;)",
        ] {
            assert!(
                matches!(SuricataRule::parse(line), Err(RuleParseError::Malformed(_))),
                "{line}"
            );
        }
    }
}
