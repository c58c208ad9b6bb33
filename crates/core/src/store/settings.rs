//! 메모리 설정 저장소 -- 선택적으로 JSON 파일에 영속화

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::{Setting, SettingsStore};
use crate::error::StoreError;
use crate::pipeline::BoxFuture;

/// 메모리 설정 저장소
///
/// `update_setting`은 없는 ID도 새로 추가합니다.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<BTreeMap<String, String>>,
    path: Option<PathBuf>,
}

impl MemorySettingsStore {
    /// 주어진 설정으로 저장소를 생성합니다.
    pub fn with_settings(settings: impl IntoIterator<Item = Setting>) -> Self {
        Self {
            settings: Mutex::new(settings.into_iter().map(|s| (s.id, s.value)).collect()),
            path: None,
        }
    }

    /// JSON 파일(`{ "id": "value" }`)에서 저장소를 엽니다.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<BTreeMap<String, String>>(&content).map_err(
                |e| StoreError::Backend(format!("failed to parse {}: {e}", path.display())),
            )?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file not found, starting empty");
                BTreeMap::new()
            }
            Err(e) => {
                return Err(StoreError::Backend(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            settings: Mutex::new(settings),
            path: Some(path),
        })
    }

    /// ID로 값을 조회합니다.
    pub fn value(&self, id: &str) -> Option<String> {
        self.settings.lock().ok()?.get(id).cloned()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("settings lock poisoned".to_owned())
}

impl SettingsStore for MemorySettingsStore {
    fn get_settings(&self) -> BoxFuture<'_, Result<Vec<Setting>, StoreError>> {
        Box::pin(async move {
            let settings = self.settings.lock().map_err(poisoned)?;
            Ok(settings
                .iter()
                .map(|(id, value)| Setting::new(id.clone(), value.clone()))
                .collect())
        })
    }

    fn update_setting<'a>(&'a self, setting: &'a Setting) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let snapshot = {
                let mut settings = self.settings.lock().map_err(poisoned)?;
                settings.insert(setting.id.clone(), setting.value.clone());
                match &self.path {
                    Some(_) => Some(serde_json::to_string_pretty(&*settings).map_err(|e| {
                        StoreError::Backend(format!("failed to serialize settings: {e}"))
                    })?),
                    None => None,
                }
            };

            if let (Some(path), Some(content)) = (&self.path, snapshot) {
                tokio::fs::write(path, content).await.map_err(|e| {
                    StoreError::Backend(format!("failed to write {}: {e}", path.display()))
                })?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_inserts_and_overwrites() {
        let store = MemorySettingsStore::with_settings([Setting::new("a", "1")]);
        store.update_setting(&Setting::new("a", "2")).await.unwrap();
        store.update_setting(&Setting::new("b", "3")).await.unwrap();

        let all = store.get_settings().await.unwrap();
        assert_eq!(all, vec![Setting::new("a", "2"), Setting::new("b", "3")]);
    }

    #[tokio::test]
    async fn open_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = MemorySettingsStore::open(&path).await.unwrap();
        store
            .update_setting(&Setting::new("idstools.sids.enabled", "1000\n# 1001"))
            .await
            .unwrap();

        let reopened = MemorySettingsStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.value("idstools.sids.enabled").as_deref(),
            Some("1000\n# 1001")
        );
    }
}
