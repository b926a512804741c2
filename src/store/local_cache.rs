use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::quiz::SubmissionRecord;

pub const LATEST_RESULT_KEY: &str = "latestQuizResult";
pub const RESULT_HISTORY_KEY: &str = "quizResults";

/// Device-local string key-value storage.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    dir: PathBuf,
}

impl DirectoryCache {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(cache.dir = %dir.display(), "Opened local result cache");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueCache for DirectoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Fallback copy of submitted results: the most recent record plus an
/// unbounded history.
pub struct LocalResultCache {
    cache: Arc<dyn KeyValueCache>,
    history_lock: Mutex<()>,
}

impl LocalResultCache {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self {
            cache,
            history_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::default()))
    }

    /// Appends to the history and overwrites the latest result. Both writes are
    /// attempted even if the first fails.
    pub async fn record(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        let history_result = self.append_history(record).await;
        let latest_result = match serde_json::to_string(record) {
            Ok(json) => self.cache.set(LATEST_RESULT_KEY, json).await,
            Err(e) => Err(e.into()),
        };
        history_result.and(latest_result)
    }

    async fn append_history(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        let _guard = self.history_lock.lock().await;
        let mut history = self.read_history().await?;
        history.push(serde_json::to_value(record)?);
        self.cache
            .set(RESULT_HISTORY_KEY, serde_json::to_string(&history)?)
            .await
    }

    async fn read_history(&self) -> Result<Vec<serde_json::Value>, StoreError> {
        let Some(raw) = self.cache.get(RESULT_HISTORY_KEY).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
            Ok(history) => Ok(history),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable result history, starting a new one");
                Ok(Vec::new())
            }
        }
    }

    pub async fn latest(&self) -> Result<Option<SubmissionRecord>, StoreError> {
        let Some(raw) = self.cache.get(LATEST_RESULT_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable latest result in local cache");
                Ok(None)
            }
        }
    }

    /// Every readable record in submission order.
    pub async fn history(&self) -> Result<Vec<SubmissionRecord>, StoreError> {
        Ok(self
            .read_history()
            .await?
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect())
    }
}
