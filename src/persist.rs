use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::quiz::{SubmissionRecord, SubmissionSink};
use crate::store::{LocalResultCache, SubmissionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Key assigned by the submission log, if the remote write went through.
    pub remote_key: Option<String>,
    pub cached_locally: bool,
}

/// Best-effort writer for finished quiz attempts. The remote log and the local
/// cache are written independently; failures are logged, never returned.
#[derive(Clone)]
pub struct ResultPersister {
    store: Arc<dyn SubmissionStore>,
    local_cache: Arc<LocalResultCache>,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn SubmissionStore>, local_cache: Arc<LocalResultCache>) -> Self {
        Self { store, local_cache }
    }

    #[tracing::instrument(skip(self, record), fields(user.name = %record.username))]
    pub async fn persist(&self, record: &SubmissionRecord) -> PersistOutcome {
        let remote = async {
            match serde_json::to_value(record) {
                Ok(value) => self.store.append(value).await,
                Err(e) => Err(StoreError::from(e)),
            }
        };
        let local = self.local_cache.record(record);

        let (remote_result, local_result) = tokio::join!(remote, local);

        let remote_key = match remote_result {
            Ok(key) => {
                tracing::info!(submission.key = %key, "Saved result to submission log");
                Some(key)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to save result to submission log");
                None
            }
        };

        let cached_locally = match local_result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save result to local cache");
                false
            }
        };

        PersistOutcome {
            remote_key,
            cached_locally,
        }
    }

    /// Runs [`persist`](Self::persist) on its own task so callers never wait on storage.
    pub fn spawn_persist(&self, record: SubmissionRecord) -> JoinHandle<PersistOutcome> {
        let persister = self.clone();
        tokio::spawn(async move { persister.persist(&record).await })
    }
}

impl SubmissionSink for ResultPersister {
    fn accept(&self, record: SubmissionRecord) {
        let _ = self.spawn_persist(record);
    }
}
