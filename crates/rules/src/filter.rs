//! 허용/거부 정규식 필터
//!
//! 커뮤니티 규칙을 가져올 때 모든 엔진이 같은 규칙을 따릅니다.
//! - deny 정규식에 매칭되면 버림
//! - allow 정규식이 있고 매칭되지 않으면 버림

use regex::Regex;
use tracing::debug;

/// 규칙 원문에 적용하는 허용/거부 필터
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    allow: Option<Regex>,
    deny: Option<Regex>,
}

impl RuleFilter {
    /// 필터가 없는 (모두 통과) 필터
    pub fn none() -> Self {
        Self::default()
    }

    /// 설정 문자열에서 필터를 만듭니다. 빈 문자열은 필터 없음입니다.
    pub fn from_patterns(allow: &str, deny: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    /// 규칙을 유지할지 판단합니다.
    pub fn keep(&self, source: &str) -> bool {
        if let Some(deny) = &self.deny
            && deny.is_match(source)
        {
            debug!("content matched deny regex");
            return false;
        }

        if let Some(allow) = &self.allow
            && !allow.is_match(source)
        {
            debug!("content didn't match allow regex");
            return false;
        }

        true
    }

    /// 설정된 정규식이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.allow.is_none() && self.deny.is_none()
    }
}

fn compile(pattern: &str) -> Result<Option<Regex>, regex::Error> {
    if pattern.is_empty() {
        Ok(None)
    } else {
        Regex::new(pattern).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_keeps_everything() {
        let filter = RuleFilter::from_patterns("", "").unwrap();
        assert!(filter.is_empty());
        assert!(filter.keep("anything"));
    }

    #[test]
    fn deny_wins_over_allow() {
        let filter = RuleFilter::from_patterns("malware", "test").unwrap();
        assert!(filter.keep("malware family"));
        assert!(!filter.keep("malware test"));
        assert!(!filter.keep("benign"));
    }

    #[test]
    fn invalid_pattern_is_error() {
        assert!(RuleFilter::from_patterns("(", "").is_err());
    }
}
