use std::sync::Arc;

use crate::identity::UserDirectory;
use crate::leaderboard::LeaderboardHubHandle;
use crate::session_manager::SessionManagerHandle;
use crate::store::LocalResultCache;

#[derive(Clone)]
pub struct AppState {
    pub session_manager: SessionManagerHandle,
    pub leaderboard: LeaderboardHubHandle,
    pub local_cache: Arc<LocalResultCache>,
    pub users: Arc<dyn UserDirectory>,
}
