use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use uuid::Uuid;

use crate::error::StoreError;

pub mod local_cache;

pub use local_cache::{DirectoryCache, LocalResultCache};

/// One entry of the submission log, keyed by a server-generated id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: String,
    pub value: JsonValue,
}

pub type Snapshot = Arc<Vec<StoredEntry>>;

/// Append-only collection of submission records with a live feed of its contents.
///
/// Entries may be written by any client, so readers must not assume they are well formed.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn append(&self, value: JsonValue) -> Result<String, StoreError>;

    /// Receiver that always holds the full current contents and is notified on every append.
    fn subscribe(&self) -> watch::Receiver<Snapshot>;
}

/// In-memory submission log, optionally mirrored to a JSON-lines file that is
/// replayed when the log is reopened.
pub struct SubmissionLog {
    entries: watch::Sender<Snapshot>,
    file: Option<Mutex<tokio::fs::File>>,
}

impl SubmissionLog {
    pub fn in_memory() -> Self {
        let (entries, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries,
            file: None,
        }
    }

    #[tracing::instrument(skip(path), fields(log.path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let existing = match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::replay(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let (entries, _) = watch::channel(Arc::new(existing));
        Ok(Self {
            entries,
            file: Some(Mutex::new(file)),
        })
    }

    fn replay(content: &str) -> Vec<StoredEntry> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(number, line)| match serde_json::from_str::<StoredEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(
                        log.line = number + 1,
                        error = %e,
                        "Skipping unreadable submission log line"
                    );
                    None
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[async_trait]
impl SubmissionStore for SubmissionLog {
    async fn append(&self, value: JsonValue) -> Result<String, StoreError> {
        let entry = StoredEntry {
            key: Uuid::new_v4().to_string(),
            value,
        };

        // Held across the in-memory push so file order matches feed order.
        let _file_guard = match &self.file {
            Some(file) => {
                let mut line = serde_json::to_string(&entry)?;
                line.push('\n');
                let mut file = file.lock().await;
                file.write_all(line.as_bytes()).await?;
                file.flush().await?;
                Some(file)
            }
            None => None,
        };
        self.push(entry.clone());

        tracing::debug!(submission.key = %entry.key, "Appended submission");
        Ok(entry.key)
    }

    fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.entries.subscribe()
    }
}

impl SubmissionLog {
    fn push(&self, entry: StoredEntry) {
        self.entries.send_modify(|entries| {
            let mut next = Vec::with_capacity(entries.len() + 1);
            next.extend(entries.iter().cloned());
            next.push(entry);
            *entries = Arc::new(next);
        });
    }
}
