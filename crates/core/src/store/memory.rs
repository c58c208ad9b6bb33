//! 메모리 탐지 저장소 -- 선택적으로 JSON 파일에 영속화
//!
//! 테스트에서는 read-after-write 지연과 쓰기 거부를 흉내낼 수 있습니다.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DEFAULT_TEMPLATE_NAME, DetectionFilter, DetectionStore};
use crate::error::StoreError;
use crate::pipeline::BoxFuture;
use crate::types::{Comment, Detection, EngineKind};

/// 영속화 파일 형식
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Default)]
struct Inner {
    detections: BTreeMap<String, Detection>,
    comments: BTreeMap<String, Comment>,
    templates: HashSet<String>,
    /// 쓰기는 반영되지만 읽히지 않는 PublicID
    lagging: HashSet<String>,
    /// 쓰기를 거부할 PublicID와 사유
    rejected: HashMap<String, String>,
}

/// 메모리 탐지 저장소
#[derive(Debug)]
pub struct MemoryDetectionStore {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl MemoryDetectionStore {
    /// 기본 템플릿이 존재하는 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.templates.insert(DEFAULT_TEMPLATE_NAME.to_owned());
        Self {
            inner: Mutex::new(inner),
            path: None,
        }
    }

    /// JSON 파일에서 저장소를 엽니다. 파일이 없으면 빈 저장소로 시작합니다.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let file: StoreFile = serde_json::from_str(&content).map_err(|e| {
                    StoreError::Backend(format!("failed to parse {}: {e}", path.display()))
                })?;
                let inner = store.inner.get_mut().map_err(poisoned)?;
                for det in file.detections {
                    inner.detections.insert(det.id.clone(), det);
                }
                for comment in file.comments {
                    inner.comments.insert(comment.id.clone(), comment);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "detection store file not found, starting empty");
            }
            Err(e) => {
                return Err(StoreError::Backend(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        }

        store.path = Some(path);
        Ok(store)
    }

    /// 템플릿을 추가합니다.
    pub fn add_template(&self, name: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.templates.insert(name.to_owned());
        }
    }

    /// 템플릿을 제거합니다.
    pub fn remove_template(&self, name: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.templates.remove(name);
        }
    }

    /// 해당 PublicID의 쓰기가 곧바로 읽히지 않도록 합니다.
    pub fn simulate_read_lag(&self, public_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.lagging.insert(public_id.to_owned());
        }
    }

    /// 읽기 지연을 해제합니다.
    pub fn clear_read_lag(&self, public_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.lagging.remove(public_id);
        }
    }

    /// 해당 PublicID의 쓰기를 거부합니다.
    pub fn reject_writes(&self, public_id: &str, reason: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .rejected
                .insert(public_id.to_owned(), reason.to_owned());
        }
    }

    /// 저장된 탐지 수
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.detections.len()).unwrap_or(0)
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_checked(
        &self,
        mut detection: Detection,
        is_create: bool,
    ) -> Result<(Detection, Option<String>, bool), StoreError> {
        let mut inner = self.inner.lock().map_err(poisoned)?;

        if let Some(reason) = inner.rejected.get(&detection.public_id) {
            return Err(StoreError::Backend(reason.clone()));
        }

        let now = Utc::now();
        if is_create {
            let clash = inner.detections.values().any(|d| {
                d.engine == detection.engine && d.public_id == detection.public_id
            });
            if clash {
                return Err(StoreError::Conflict(format!(
                    "publicId {} already exists for engine {}",
                    detection.public_id, detection.engine
                )));
            }
            if detection.id.is_empty() {
                detection.id = uuid::Uuid::new_v4().to_string();
            }
            if detection.create_time.is_none() {
                detection.create_time = Some(now);
            }
        } else if !inner.detections.contains_key(&detection.id) {
            return Err(StoreError::NotFound {
                id: detection.id.clone(),
            });
        }
        detection.update_time = Some(now);

        inner
            .detections
            .insert(detection.id.clone(), detection.clone());

        let lagging = inner.lagging.contains(&detection.public_id);
        let snapshot = self.snapshot(&inner)?;
        Ok((detection, snapshot, lagging))
    }

    async fn finish_write(
        &self,
        detection: Detection,
        snapshot: Option<String>,
        lagging: bool,
    ) -> Result<Detection, StoreError> {
        self.persist(snapshot).await?;
        if lagging {
            return Err(StoreError::WriteNotVisible {
                public_id: detection.public_id,
            });
        }
        Ok(detection)
    }

    fn snapshot(&self, inner: &Inner) -> Result<Option<String>, StoreError> {
        if self.path.is_none() {
            return Ok(None);
        }
        let file = StoreFile {
            detections: inner.detections.values().cloned().collect(),
            comments: inner.comments.values().cloned().collect(),
        };
        serde_json::to_string_pretty(&file)
            .map(Some)
            .map_err(|e| StoreError::Backend(format!("failed to serialize store: {e}")))
    }

    async fn persist(&self, snapshot: Option<String>) -> Result<(), StoreError> {
        if let (Some(path), Some(content)) = (&self.path, snapshot) {
            tokio::fs::write(path, content).await.map_err(|e| {
                StoreError::Backend(format!("failed to write {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }
}

impl Default for MemoryDetectionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("store lock poisoned".to_owned())
}

impl DetectionStore for MemoryDetectionStore {
    fn create_detection(&self, detection: Detection) -> BoxFuture<'_, Result<Detection, StoreError>> {
        Box::pin(async move {
            let (created, snapshot, lagging) = self.write_checked(detection, true)?;
            self.finish_write(created, snapshot, lagging).await
        })
    }

    fn update_detection(&self, detection: Detection) -> BoxFuture<'_, Result<Detection, StoreError>> {
        Box::pin(async move {
            let (updated, snapshot, lagging) = self.write_checked(detection, false)?;
            self.finish_write(updated, snapshot, lagging).await
        })
    }

    fn delete_detection<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Detection, StoreError>> {
        Box::pin(async move {
            let (removed, snapshot) = {
                let mut inner = self.inner.lock().map_err(poisoned)?;
                let removed = inner
                    .detections
                    .remove(id)
                    .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
                inner.comments.retain(|_, c| c.detection_id != id);
                (removed, self.snapshot(&inner)?)
            };
            self.persist(snapshot).await?;
            Ok(removed)
        })
    }

    fn get_detection<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Detection>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().map_err(poisoned)?;
            Ok(inner
                .detections
                .get(id)
                .filter(|d| !inner.lagging.contains(&d.public_id))
                .cloned())
        })
    }

    fn get_detection_by_public_id<'a>(
        &'a self,
        engine: EngineKind,
        public_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Detection>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().map_err(poisoned)?;
            if inner.lagging.contains(public_id) {
                return Ok(None);
            }
            Ok(inner
                .detections
                .values()
                .find(|d| d.engine == engine && d.public_id == public_id)
                .cloned())
        })
    }

    fn get_all_detections(
        &self,
        filter: DetectionFilter,
    ) -> BoxFuture<'_, Result<BTreeMap<String, Detection>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().map_err(poisoned)?;
            Ok(inner
                .detections
                .values()
                .filter(|d| filter.matches(d) && !inner.lagging.contains(&d.public_id))
                .map(|d| (d.public_id.clone(), d.clone()))
                .collect())
        })
    }

    fn does_template_exist<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().map_err(poisoned)?;
            Ok(inner.templates.contains(name))
        })
    }

    fn create_comment(&self, mut comment: Comment) -> BoxFuture<'_, Result<Comment, StoreError>> {
        Box::pin(async move {
            let snapshot = {
                let mut inner = self.inner.lock().map_err(poisoned)?;
                if !inner.detections.contains_key(&comment.detection_id) {
                    return Err(StoreError::NotFound {
                        id: comment.detection_id.clone(),
                    });
                }
                if comment.id.is_empty() {
                    comment.id = uuid::Uuid::new_v4().to_string();
                }
                comment.create_time = Some(Utc::now());
                inner.comments.insert(comment.id.clone(), comment.clone());
                self.snapshot(&inner)?
            };
            self.persist(snapshot).await?;
            Ok(comment)
        })
    }

    fn get_comments<'a>(
        &'a self,
        detection_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Comment>, StoreError>> {
        Box::pin(async move {
            let inner = self.inner.lock().map_err(poisoned)?;
            let mut comments: Vec<Comment> = inner
                .comments
                .values()
                .filter(|c| c.detection_id == detection_id)
                .cloned()
                .collect();
            comments.sort_by_key(|c| c.create_time);
            Ok(comments)
        })
    }

    fn delete_comment<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let snapshot = {
                let mut inner = self.inner.lock().map_err(poisoned)?;
                inner
                    .comments
                    .remove(id)
                    .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
                self.snapshot(&inner)?
            };
            self.persist(snapshot).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yara(public_id: &str) -> Detection {
        let mut det = Detection::new(EngineKind::Strelka);
        det.public_id = public_id.to_owned();
        det.content = format!("rule {public_id} {{ condition: true }}");
        det
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let store = MemoryDetectionStore::new();
        let created = store.create_detection(yara("Test")).await.unwrap();
        assert!(!created.id.is_empty());
        assert!(created.create_time.is_some());
        assert!(created.update_time.is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_public_id_per_engine() {
        let store = MemoryDetectionStore::new();
        store.create_detection(yara("Test")).await.unwrap();
        let err = store.create_detection(yara("Test")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let mut other = Detection::new(EngineKind::Suricata);
        other.public_id = "Test".to_owned();
        store.create_detection(other).await.unwrap();
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let store = MemoryDetectionStore::new();
        let mut det = yara("Test");
        det.id = "missing".to_owned();
        let err = store.update_detection(det).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn filter_by_engine_enabled_and_community() {
        let store = MemoryDetectionStore::new();
        let mut a = yara("A");
        a.is_enabled = true;
        a.is_community = true;
        let b = yara("B");
        store.create_detection(a).await.unwrap();
        store.create_detection(b).await.unwrap();

        let enabled = store
            .get_all_detections(DetectionFilter::engine(EngineKind::Strelka).enabled(true))
            .await
            .unwrap();
        assert_eq!(enabled.keys().collect::<Vec<_>>(), vec!["A"]);

        let community = store
            .get_all_detections(DetectionFilter::default().community(false))
            .await
            .unwrap();
        assert_eq!(community.keys().collect::<Vec<_>>(), vec!["B"]);
    }

    #[tokio::test]
    async fn read_lag_hides_successful_write() {
        let store = MemoryDetectionStore::new();
        store.simulate_read_lag("Slow");

        let err = store.create_detection(yara("Slow")).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteNotVisible { .. }));
        assert!(
            store
                .get_detection_by_public_id(EngineKind::Strelka, "Slow")
                .await
                .unwrap()
                .is_none()
        );

        store.clear_read_lag("Slow");
        assert!(
            store
                .get_detection_by_public_id(EngineKind::Strelka, "Slow")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn delete_removes_detection_and_comments() {
        let store = MemoryDetectionStore::new();
        let det = store.create_detection(yara("Test")).await.unwrap();
        store
            .create_comment(Comment {
                id: String::new(),
                detection_id: det.id.clone(),
                value: "noisy".to_owned(),
                user_id: "u1".to_owned(),
                create_time: None,
            })
            .await
            .unwrap();

        store.delete_detection(&det.id).await.unwrap();
        assert!(store.is_empty());
        assert!(store.get_comments(&det.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn templates_can_be_removed() {
        let store = MemoryDetectionStore::new();
        assert!(store.does_template_exist(DEFAULT_TEMPLATE_NAME).await.unwrap());
        store.remove_template(DEFAULT_TEMPLATE_NAME);
        assert!(!store.does_template_exist(DEFAULT_TEMPLATE_NAME).await.unwrap());
    }

    #[tokio::test]
    async fn open_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");

        let store = MemoryDetectionStore::open(&path).await.unwrap();
        let created = store.create_detection(yara("Persisted")).await.unwrap();
        drop(store);

        let reopened = MemoryDetectionStore::open(&path).await.unwrap();
        let found = reopened.get_detection(&created.id).await.unwrap().unwrap();
        assert_eq!(found.public_id, "Persisted");
    }
}
