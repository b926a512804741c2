use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::error::{Result as WebResult, WebError};
use crate::identity::resolve_username;
use crate::leaderboard::{LeaderboardEntry, LeaderboardFeed};
use crate::quiz::SubmissionRecord;
use crate::quiz::messages::SessionView;
use crate::session_manager::SessionDetails;
use crate::state::AppState;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub username: Option<String>,
    /// Signed-in account whose directory name is used when no username is given.
    pub user_id: Option<String>,
}

pub async fn create_session_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateSessionRequest>,
) -> WebResult<Json<SessionDetails>> {
    tracing::info!(request = ?payload, "HTTP: Received create_session request");

    let username = resolve_username(
        app_state.users.as_ref(),
        payload.username.as_deref(),
        payload.user_id.as_deref(),
    );

    let details = app_state
        .session_manager
        .create_session(username)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create session");
            WebError::InternalServerError(e)
        })?;

    Ok(Json(details))
}

pub async fn session_snapshot_handler(
    State(app_state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> WebResult<Json<SessionView>> {
    let handle = app_state
        .session_manager
        .get_session_handle(session_id)
        .await
        .ok_or(WebError::SessionNotFound(session_id))?;
    let view = handle
        .snapshot()
        .await
        .ok_or(WebError::SessionNotFound(session_id))?;
    Ok(Json(view))
}

pub async fn leaderboard_handler(
    State(app_state): State<AppState>,
) -> WebResult<Json<Vec<LeaderboardEntry>>> {
    match app_state.leaderboard.current() {
        LeaderboardFeed::Ready(state) => Ok(Json(state.entries.clone())),
        LeaderboardFeed::Failed(message) => {
            tracing::warn!(error = %message, "Leaderboard requested while unavailable");
            Err(WebError::InternalServerError(message))
        }
    }
}

pub async fn latest_result_handler(
    State(app_state): State<AppState>,
) -> WebResult<Json<Option<SubmissionRecord>>> {
    let latest = app_state.local_cache.latest().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read latest result");
        WebError::InternalServerError(e.to_string())
    })?;
    Ok(Json(latest))
}

pub async fn result_history_handler(
    State(app_state): State<AppState>,
) -> WebResult<Json<Vec<SubmissionRecord>>> {
    let history = app_state.local_cache.history().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read result history");
        WebError::InternalServerError(e.to_string())
    })?;
    Ok(Json(history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuizConfig;
    use crate::identity::InMemoryUserDirectory;
    use crate::leaderboard::LeaderboardHub;
    use crate::persist::ResultPersister;
    use crate::quiz::test_support::pool;
    use crate::session_manager::SessionManagerHandle;
    use crate::store::{LocalResultCache, SubmissionLog};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn app_state() -> AppState {
        let store = Arc::new(SubmissionLog::in_memory());
        let local_cache = Arc::new(LocalResultCache::in_memory());
        let persister = Arc::new(ResultPersister::new(store.clone(), local_cache.clone()));
        let users = HashMap::from([("u-1".to_string(), "grace".to_string())]);
        AppState {
            session_manager: SessionManagerHandle::spawn(
                8,
                Arc::new(pool(40)),
                QuizConfig::default(),
                persister,
            ),
            leaderboard: LeaderboardHub::spawn(store),
            local_cache,
            users: Arc::new(InMemoryUserDirectory::new(users)),
        }
    }

    #[tokio::test]
    async fn test_create_session_resolves_username() {
        let state = app_state();

        let Json(details) = create_session_handler(
            State(state.clone()),
            Json(CreateSessionRequest {
                username: None,
                user_id: Some("u-1".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(details.username, "grace");

        let Json(details) =
            create_session_handler(State(state.clone()), Json(CreateSessionRequest::default()))
                .await
                .unwrap();
        assert_eq!(details.username, "User");

        let Json(view) = session_snapshot_handler(State(state), Path(details.session_id))
            .await
            .unwrap();
        assert_eq!(view.username, "User");
    }

    #[test]
    fn test_request_and_details_use_camel_case() {
        let request: CreateSessionRequest =
            serde_json::from_str(r#"{"username":null,"userId":"u-1"}"#).unwrap();
        assert_eq!(request.user_id.as_deref(), Some("u-1"));

        let details = SessionDetails {
            session_id: Uuid::nil(),
            username: "ada".to_string(),
            total_questions: 20,
            questions_per_page: 10,
            total_pages: 2,
            time_limit_seconds: 300,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["sessionId"], Uuid::nil().to_string());
        assert_eq!(json["timeLimitSeconds"], 300);
        assert!(json.get("session_id").is_none());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let result = session_snapshot_handler(State(app_state()), Path(Uuid::nil())).await;
        assert!(matches!(result, Err(WebError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_results() {
        let state = app_state();
        let Json(board) = leaderboard_handler(State(state.clone())).await.unwrap();
        assert!(board.is_empty());
        let Json(latest) = latest_result_handler(State(state.clone())).await.unwrap();
        assert!(latest.is_none());
        let Json(history) = result_history_handler(State(state)).await.unwrap();
        assert!(history.is_empty());
    }
}
