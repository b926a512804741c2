// src/main.rs

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Module Declarations ---
mod config;
mod content;
mod error;
mod identity;
mod leaderboard;
mod persist;
mod quiz;
mod session_manager;
mod state;
mod store;
mod web;

// --- Imports ---
use crate::config::{StorageConfig, load_settings};
use crate::content::load_question_pool;
use crate::error::{Result as AppResult, StoreError};
use crate::identity::InMemoryUserDirectory;
use crate::leaderboard::LeaderboardHub;
use crate::persist::ResultPersister;
use crate::session_manager::SessionManagerHandle;
use crate::state::AppState;
use crate::store::{DirectoryCache, LocalResultCache, SubmissionLog, SubmissionStore};
use crate::web::run_server;

async fn open_storage(
    storage: &StorageConfig,
) -> Result<(Arc<dyn SubmissionStore>, Arc<LocalResultCache>), StoreError> {
    let store: Arc<dyn SubmissionStore> = match &storage.submission_log_path {
        Some(path) => {
            let log = SubmissionLog::open(path).await?;
            tracing::info!(
                log.path = %path.display(),
                log.entries = log.len(),
                "Opened submission log"
            );
            Arc::new(log)
        }
        None => {
            tracing::warn!("No submission log path configured, results are kept in memory only");
            Arc::new(SubmissionLog::in_memory())
        }
    };

    let local_cache = match &storage.local_cache_dir {
        Some(dir) => LocalResultCache::new(Arc::new(DirectoryCache::open(dir).await?)),
        None => LocalResultCache::in_memory(),
    };

    Ok((store, Arc::new(local_cache)))
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Setup tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("{}=info,tower_http=debug", env!("CARGO_PKG_NAME")).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load Configuration
    let app_settings = load_settings()?;
    tracing::info!(settings = ?app_settings, "Configuration loaded");

    let pool = load_question_pool(&app_settings.content).await?;
    if pool.len() < app_settings.quiz.sample_size() {
        tracing::warn!(
            pool.size = pool.len(),
            quiz.sample_size = app_settings.quiz.sample_size(),
            "Question pool is smaller than one quiz, quizzes will be short"
        );
    }

    let (store, local_cache) = open_storage(&app_settings.storage).await?;
    let persister = Arc::new(ResultPersister::new(store.clone(), local_cache.clone()));

    let leaderboard = LeaderboardHub::spawn(store);
    let session_manager = SessionManagerHandle::spawn(32, pool, app_settings.quiz, persister);

    let app_state = AppState {
        session_manager,
        leaderboard,
        local_cache,
        users: Arc::new(InMemoryUserDirectory::new(app_settings.users)),
    };

    run_server(app_state, app_settings.server).await?;

    Ok(())
}
