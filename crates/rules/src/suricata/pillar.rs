//! Suricata 필러 병합 -- 로컬 규칙/활성/비활성/수정 목록과 임계치 맵 갱신
//!
//! 네 개의 텍스트 목록은 줄 번호로 색인되며, 기존 줄은 제자리에서 갱신하고
//! 새 항목만 끝에 추가합니다. 같은 배치로 두 번 병합해도 결과가 같습니다.
//!
//! flowbits 규칙은 비활성 목록으로 끄지 않고 수정 목록의
//! `"flowbits" "noalert; flowbits"` 지시어로 알림만 끕니다.

use std::collections::{BTreeMap, HashMap};

use rulekeeper_core::types::{Detection, ErrorMap, Override, OverrideType};

use super::details::extract_sid;
use super::rule::SuricataRule;
use crate::error::RuleParseError;

/// 로컬 규칙 설정 ID
pub const LOCAL_RULES_SETTING: &str = "idstools.rules.local__rules";
/// 활성 SID 목록 설정 ID
pub const ENABLED_SIDS_SETTING: &str = "idstools.sids.enabled";
/// 비활성 SID 목록 설정 ID
pub const DISABLED_SIDS_SETTING: &str = "idstools.sids.disabled";
/// 수정 지시어 목록 설정 ID
pub const MODIFY_SIDS_SETTING: &str = "idstools.sids.modify";
/// 임계치/억제 맵 설정 ID
pub const THRESHOLD_SETTING: &str = "suricata.thresholding.sids__yaml";

/// flowbits 규칙의 알림을 끄는 수정 지시어
pub const MODIFY_FROM_TO: &str = r#""flowbits" "noalert; flowbits""#;

/// 생성기 ID 기본값
const DEFAULT_GEN_ID: u32 = 1;

/// 필러 설정 값 묶음 (각 설정의 원문 텍스트)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PillarLists {
    pub local_rules: String,
    pub enabled: String,
    pub disabled: String,
    pub modify: String,
    /// PublicID → 튜닝 목록 YAML
    pub threshold: String,
}

/// 줄 목록과 키 → 줄 번호 색인
#[derive(Debug)]
struct IndexedLines {
    lines: Vec<String>,
    index: HashMap<String, usize>,
}

impl IndexedLines {
    fn new(text: &str, indexer: fn(&[String]) -> HashMap<String, usize>) -> Self {
        let lines: Vec<String> = text.split('\n').map(str::to_owned).collect();
        let index = indexer(&lines);
        Self { lines, index }
    }

    /// 키의 줄을 교체하거나 끝에 추가합니다.
    fn upsert(&mut self, key: &str, line: String) {
        match self.index.get(key) {
            Some(&i) => self.lines[i] = line,
            None => {
                self.lines.push(line);
                self.index.insert(key.to_owned(), self.lines.len() - 1);
            }
        }
    }

    fn join(&self) -> String {
        self.lines.join("\n")
    }
}

/// 탐지 배치를 필러 목록에 반영하는 병합기
#[derive(Debug)]
pub struct PillarMerger {
    local: IndexedLines,
    enabled: IndexedLines,
    disabled: IndexedLines,
    modify: IndexedLines,
    threshold: BTreeMap<String, Vec<Override>>,
}

impl PillarMerger {
    /// 현재 설정 값으로 병합기를 만듭니다.
    pub fn new(lists: &PillarLists) -> Result<Self, RuleParseError> {
        Ok(Self {
            local: IndexedLines::new(&lists.local_rules, index_local),
            enabled: IndexedLines::new(&lists.enabled, |l| index_enabled(l, false)),
            disabled: IndexedLines::new(&lists.disabled, |l| index_enabled(l, false)),
            modify: IndexedLines::new(&lists.modify, index_modify),
            threshold: index_threshold(&lists.threshold)?,
        })
    }

    /// 탐지 하나를 병합합니다. 실패 사유는 에러 맵에 넣을 메시지입니다.
    pub fn merge(&mut self, det: &Detection) -> Result<(), String> {
        let rule = SuricataRule::parse(&det.content)
            .map_err(|e| format!("unable to parse rule; reason={e}"))?;

        let Some(sid) = rule.get_option("sid") else {
            return Err(format!("rule does not contain a SID; rule={}", det.content));
        };
        let sid = sid.to_owned();
        let is_flowbits = rule.has_option("flowbits");

        self.local.upsert(&sid, det.content.clone());

        let enabled_line = if !det.is_enabled && !is_flowbits {
            format!("# {}", det.public_id)
        } else {
            det.public_id.clone()
        };
        self.enabled.upsert(&sid, enabled_line);

        if is_flowbits {
            self.merge_flowbits(&sid, det);
        } else {
            let disabled_line = if det.is_enabled {
                format!("# {}", det.public_id)
            } else {
                det.public_id.clone()
            };
            self.disabled.upsert(&sid, disabled_line);
        }

        self.merge_overrides(&rule, det);
        Ok(())
    }

    /// 배치 전체를 병합하고 실패한 탐지의 에러 맵을 반환합니다.
    pub fn merge_all<'a>(&mut self, detections: impl IntoIterator<Item = &'a Detection>) -> ErrorMap {
        let mut errors = ErrorMap::new();
        for det in detections {
            if let Err(reason) = self.merge(det) {
                errors.insert(det.public_id.clone(), reason);
            }
        }
        errors
    }

    /// 병합 결과를 설정 값으로 직렬화합니다.
    pub fn finish(self) -> Result<PillarLists, RuleParseError> {
        Ok(PillarLists {
            local_rules: self.local.join(),
            enabled: self.enabled.join(),
            disabled: self.disabled.join(),
            modify: self.modify.join(),
            threshold: serde_yaml::to_string(&self.threshold)?,
        })
    }

    fn merge_flowbits(&mut self, sid: &str, det: &Detection) {
        match self.modify.index.get(sid).copied() {
            None if !det.is_enabled => {
                self.modify
                    .upsert(sid, format!("{} {}", det.public_id, MODIFY_FROM_TO));
            }
            Some(line) if det.is_enabled => {
                self.modify.lines.remove(line);
                self.modify.index = index_modify(&self.modify.lines);
            }
            _ => {}
        }
    }

    /// 활성화된 suppress/threshold 튜닝만 임계치 맵에 남깁니다.
    fn merge_overrides(&mut self, rule: &SuricataRule, det: &Detection) {
        self.threshold.remove(&det.public_id);

        let mut overrides: Vec<Override> = det.enabled_overrides().cloned().collect();
        if overrides.is_empty() {
            return;
        }

        let gen_id = rule
            .get_option("gid")
            .and_then(|g| g.trim().parse::<u32>().ok())
            .unwrap_or(DEFAULT_GEN_ID);

        for o in &mut overrides {
            if matches!(o.kind, OverrideType::Suppress | OverrideType::Threshold) {
                o.gen_id = Some(gen_id);
            }
        }

        self.threshold.insert(det.public_id.clone(), overrides);
    }
}

// ─── Indexers ────────────────────────────────────────────────────────

/// 로컬 규칙 줄을 sid로 색인합니다.
pub fn index_local(lines: &[String]) -> HashMap<String, usize> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| extract_sid(line).map(|sid| (sid, i)))
        .collect()
}

/// SID 목록을 색인합니다. 주석 처리(`#`)된 줄도 SID로 색인하며,
/// `ignore_comments`이면 주석 줄을 건너뜁니다.
pub fn index_enabled(lines: &[String], ignore_comments: bool) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if ignore_comments && line.starts_with('#') {
            continue;
        }
        let sid = line.trim_start_matches(['#', ' ', '\t']);
        if !sid.is_empty() {
            index.insert(sid.to_owned(), i);
        }
    }
    index
}

/// flowbits 수정 지시어를 첫 토큰(SID)으로 색인합니다.
pub fn index_modify(lines: &[String]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim_start_matches(['#', ' ', '\t']).trim();
        if line.ends_with(MODIFY_FROM_TO) {
            let sid = line.split(' ').next().unwrap_or_default();
            index.insert(sid.to_owned(), i);
        }
    }
    index
}

/// 임계치 YAML을 읽습니다. 빈 값은 빈 맵입니다.
pub fn index_threshold(content: &str) -> Result<BTreeMap<String, Vec<Override>>, RuleParseError> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_yaml::from_str::<Option<BTreeMap<String, Vec<Override>>>>(content)?
        .unwrap_or_default())
}
