//! 외부 협력자 계약 -- 탐지 저장소, 설정(pillar) 저장소, 권한 검사
//!
//! 저장소는 read-after-write 지연이 있을 수 있다고 가정합니다.
//! 쓰기 직후 읽히지 않으면 실패로 단정하지 말고 다음 주기에 다시 확인해야 합니다.
//!
//! 기본 구현:
//! - [`MemoryDetectionStore`]: 메모리 + 선택적 JSON 파일 영속화
//! - [`MemorySettingsStore`]: 메모리 + 선택적 JSON 파일 영속화

mod memory;
mod settings;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::pipeline::BoxFuture;
use crate::types::{Comment, Detection, EngineKind, User};

pub use memory::MemoryDetectionStore;
pub use settings::MemorySettingsStore;

/// 탐지 인덱스 템플릿 기본 이름
pub const DEFAULT_TEMPLATE_NAME: &str = "so-detection";

/// 탐지 조회 조건
///
/// `None`인 조건은 적용하지 않습니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionFilter {
    pub engine: Option<EngineKind>,
    pub is_enabled: Option<bool>,
    pub is_community: Option<bool>,
}

impl DetectionFilter {
    /// 엔진 조건으로 시작합니다.
    pub fn engine(engine: EngineKind) -> Self {
        Self {
            engine: Some(engine),
            ..Self::default()
        }
    }

    pub fn enabled(mut self, value: bool) -> Self {
        self.is_enabled = Some(value);
        self
    }

    pub fn community(mut self, value: bool) -> Self {
        self.is_community = Some(value);
        self
    }

    /// 탐지가 조건을 만족하는지 확인합니다.
    pub fn matches(&self, detection: &Detection) -> bool {
        self.engine.is_none_or(|e| e == detection.engine)
            && self.is_enabled.is_none_or(|v| v == detection.is_enabled)
            && self.is_community.is_none_or(|v| v == detection.is_community)
    }
}

/// 탐지 저장소 계약
///
/// `get_all_detections`는 PublicID를 키로 하는 맵을 반환합니다.
pub trait DetectionStore: Send + Sync {
    fn create_detection(&self, detection: Detection) -> BoxFuture<'_, Result<Detection, StoreError>>;

    fn update_detection(&self, detection: Detection) -> BoxFuture<'_, Result<Detection, StoreError>>;

    fn delete_detection<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Detection, StoreError>>;

    fn get_detection<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Detection>, StoreError>>;

    fn get_detection_by_public_id<'a>(
        &'a self,
        engine: EngineKind,
        public_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Detection>, StoreError>>;

    fn get_all_detections(
        &self,
        filter: DetectionFilter,
    ) -> BoxFuture<'_, Result<BTreeMap<String, Detection>, StoreError>>;

    fn does_template_exist<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, StoreError>>;

    fn create_comment(&self, comment: Comment) -> BoxFuture<'_, Result<Comment, StoreError>>;

    fn get_comments<'a>(
        &'a self,
        detection_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Comment>, StoreError>>;

    fn delete_comment<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// 이름이 붙은 여러 줄 설정 값
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub id: String,
    pub value: String,
}

impl Setting {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

/// 설정(pillar) 저장소 계약
pub trait SettingsStore: Send + Sync {
    fn get_settings(&self) -> BoxFuture<'_, Result<Vec<Setting>, StoreError>>;

    fn update_setting<'a>(&'a self, setting: &'a Setting) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// ID로 설정을 찾습니다.
pub fn setting_by_id<'a>(settings: &'a [Setting], id: &str) -> Option<&'a Setting> {
    settings.iter().find(|s| s.id == id)
}

/// 권한 검사 계약
pub trait Authorizer: Send + Sync {
    fn check(&self, user: &User, action: &str, resource: &str) -> Result<(), StoreError>;
}

/// 모든 요청을 허용하는 권한 검사기
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn check(&self, _user: &User, _action: &str, _resource: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_all_conditions() {
        let mut det = Detection::new(EngineKind::Strelka);
        det.is_enabled = true;
        det.is_community = true;

        assert!(DetectionFilter::default().matches(&det));
        assert!(DetectionFilter::engine(EngineKind::Strelka).matches(&det));
        assert!(
            DetectionFilter::engine(EngineKind::Strelka)
                .enabled(true)
                .community(true)
                .matches(&det)
        );
        assert!(!DetectionFilter::engine(EngineKind::Suricata).matches(&det));
        assert!(!DetectionFilter::default().enabled(false).matches(&det));
    }

    #[test]
    fn setting_by_id_finds_exact_match() {
        let settings = vec![
            Setting::new("idstools.sids.enabled", "1"),
            Setting::new("idstools.sids.disabled", "2"),
        ];
        assert_eq!(
            setting_by_id(&settings, "idstools.sids.disabled").map(|s| s.value.as_str()),
            Some("2")
        );
        assert!(setting_by_id(&settings, "idstools.sids").is_none());
    }
}
