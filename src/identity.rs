use std::collections::HashMap;

/// Name used when no username can be resolved for a quiz taker.
pub const DEFAULT_USERNAME: &str = "User";

/// Username lookup offered by the account system.
pub trait UserDirectory: Send + Sync {
    fn username_for(&self, user_id: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: HashMap<String, String>,
}

impl InMemoryUserDirectory {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn username_for(&self, user_id: &str) -> Option<String> {
        self.users.get(user_id).cloned()
    }
}

/// Picks the name a quiz is recorded under: an explicit name, then the
/// directory entry for the signed-in user, then [`DEFAULT_USERNAME`].
pub fn resolve_username(
    directory: &dyn UserDirectory,
    explicit_username: Option<&str>,
    current_user: Option<&str>,
) -> String {
    if let Some(name) = explicit_username.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    current_user
        .and_then(|user_id| {
            let found = directory.username_for(user_id);
            if found.is_none() {
                tracing::debug!(user.id = %user_id, "No username on record for user");
            }
            found
        })
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USERNAME.to_string())
}
