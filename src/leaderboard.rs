use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::quiz::scoring::accuracy_percent;
use crate::store::{StoredEntry, SubmissionStore};

pub const LOAD_FAILED_MESSAGE: &str = "Failed to load leaderboard.";

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub id: String,
    pub username: String,
    pub score: u64,
    pub total_questions: u64,
    pub accuracy: f64,
    pub time_taken: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Derived ranking. Rebuilt from scratch on every change of the submission log.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardState {
    pub revision: u64,
    pub entries: Vec<LeaderboardEntry>,
    /// Stored entries that could not be read as a submission.
    pub skipped: usize,
}

/// Replaces `prior` with a ranking of `raw`: latest submission per username,
/// ordered by score desc, accuracy desc, time taken asc.
pub fn reduce(prior: &LeaderboardState, raw: &[StoredEntry]) -> LeaderboardState {
    let mut latest: Vec<LeaderboardEntry> = Vec::new();
    let mut by_username: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0;

    for stored in raw {
        let Some(candidate) = parse_entry(stored) else {
            skipped += 1;
            continue;
        };
        match by_username.entry(candidate.username.clone()) {
            Entry::Occupied(slot) => {
                let current = &mut latest[*slot.get()];
                if is_more_recent(&candidate, current) {
                    *current = candidate;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(latest.len());
                latest.push(candidate);
            }
        }
    }

    latest.sort_by(compare_ranking);
    for (position, entry) in latest.iter_mut().enumerate() {
        entry.rank = position + 1;
    }

    if skipped > 0 {
        tracing::warn!(
            leaderboard.skipped = skipped,
            "Ignored malformed submission entries"
        );
    }

    LeaderboardState {
        revision: prior.revision + 1,
        entries: latest,
        skipped,
    }
}

fn is_more_recent(candidate: &LeaderboardEntry, current: &LeaderboardEntry) -> bool {
    (candidate.timestamp, &candidate.id) > (current.timestamp, &current.id)
}

fn compare_ranking(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.accuracy.total_cmp(&a.accuracy))
        .then_with(|| a.time_taken.cmp(&b.time_taken))
}

/// Reads a stored submission leniently. `username` and `score` are required;
/// everything else falls back to a default. A timestamp that is present but
/// not RFC 3339 rejects the entry.
fn parse_entry(stored: &StoredEntry) -> Option<LeaderboardEntry> {
    let value = &stored.value;
    let username = value
        .get("username")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())?
        .to_string();
    let score = value.get("score").and_then(as_number)?;
    let total_questions = value
        .get("totalQuestions")
        .and_then(as_number)
        .unwrap_or(0.0);
    let accuracy = value
        .get("accuracy")
        .and_then(as_number)
        .unwrap_or_else(|| accuracy_percent(score as usize, total_questions as usize));
    let time_taken = value.get("timeTaken").and_then(as_number).unwrap_or(0.0);
    let timestamp = match value.get("timestamp") {
        None | Some(JsonValue::Null) => None,
        Some(raw) => match raw.as_str().map(DateTime::parse_from_rfc3339) {
            Some(Ok(ts)) => Some(ts.with_timezone(&Utc)),
            _ => {
                tracing::debug!(
                    submission.key = %stored.key,
                    submission.timestamp = %raw,
                    "Unreadable submission timestamp"
                );
                return None;
            }
        },
    };

    if score < 0.0 || total_questions < 0.0 || time_taken < 0.0 {
        return None;
    }

    Some(LeaderboardEntry {
        rank: 0,
        id: stored.key.clone(),
        username,
        score: score as u64,
        total_questions: total_questions as u64,
        accuracy,
        time_taken: time_taken as u64,
        timestamp,
    })
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaderboardFeed {
    Ready(Arc<LeaderboardState>),
    Failed(String),
}

/// Keeps a live ranking of the submission log. Cloning shares the same feed.
#[derive(Clone, Debug)]
pub struct LeaderboardHubHandle {
    feed: watch::Receiver<LeaderboardFeed>,
}

pub struct LeaderboardHub;

impl LeaderboardHub {
    pub fn spawn(store: Arc<dyn SubmissionStore>) -> LeaderboardHubHandle {
        let mut source = store.subscribe();
        let initial = reduce(&LeaderboardState::default(), &source.borrow_and_update());
        let (feed_tx, feed_rx) = watch::channel(LeaderboardFeed::Ready(Arc::new(initial)));

        tokio::spawn(run_leaderboard_hub(source, feed_tx));

        LeaderboardHubHandle { feed: feed_rx }
    }
}

#[tracing::instrument(skip_all)]
async fn run_leaderboard_hub(
    mut source: watch::Receiver<crate::store::Snapshot>,
    feed_tx: watch::Sender<LeaderboardFeed>,
) {
    tracing::info!("Leaderboard hub started");
    let mut state = match &*feed_tx.borrow() {
        LeaderboardFeed::Ready(state) => state.as_ref().clone(),
        LeaderboardFeed::Failed(_) => LeaderboardState::default(),
    };

    loop {
        tokio::select! {
            changed = source.changed() => {
                if changed.is_err() {
                    tracing::error!("Submission feed closed");
                    feed_tx.send_replace(LeaderboardFeed::Failed(LOAD_FAILED_MESSAGE.to_string()));
                    break;
                }
                let snapshot = source.borrow_and_update().clone();
                state = reduce(&state, &snapshot);
                tracing::debug!(
                    leaderboard.revision = state.revision,
                    leaderboard.entries = state.entries.len(),
                    "Leaderboard rebuilt"
                );
                feed_tx.send_replace(LeaderboardFeed::Ready(Arc::new(state.clone())));
            }
            _ = feed_tx.closed() => {
                tracing::debug!("No leaderboard handles left");
                break;
            }
        }
    }
    tracing::info!("Leaderboard hub stopped");
}

impl LeaderboardHubHandle {
    pub fn current(&self) -> LeaderboardFeed {
        self.feed.borrow().clone()
    }

    pub fn subscribe(&self) -> LeaderboardSubscription {
        let id = Uuid::new_v4();
        tracing::debug!(subscription.id = %id, "Leaderboard subscription opened");
        let mut feed = self.feed.clone();
        feed.mark_changed();
        LeaderboardSubscription { id, feed }
    }
}

/// A live view of the leaderboard. Torn down by [`unsubscribe`](Self::unsubscribe) or by drop.
#[derive(Debug)]
pub struct LeaderboardSubscription {
    id: Uuid,
    feed: watch::Receiver<LeaderboardFeed>,
}

impl LeaderboardSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next ranking. The first call yields the current one.
    /// Returns `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<LeaderboardFeed> {
        self.feed.changed().await.ok()?;
        Some(self.feed.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

impl Drop for LeaderboardSubscription {
    fn drop(&mut self) {
        tracing::debug!(subscription.id = %self.id, "Leaderboard subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SubmissionLog;
    use serde_json::json;

    fn stored(key: &str, value: JsonValue) -> StoredEntry {
        StoredEntry {
            key: key.to_string(),
            value,
        }
    }

    fn submission(username: &str, score: u64, accuracy: f64, time: u64, ts: &str) -> JsonValue {
        json!({
            "username": username,
            "score": score,
            "totalQuestions": 20,
            "accuracy": accuracy,
            "timeTaken": time,
            "timestamp": ts,
        })
    }

    fn ranked(raw: &[StoredEntry]) -> LeaderboardState {
        reduce(&LeaderboardState::default(), raw)
    }

    #[test]
    fn test_latest_submission_per_user_wins() {
        let raw = vec![
            stored("a", submission("ada", 18, 90.0, 100, "2025-03-01T10:00:00Z")),
            stored("b", submission("ada", 12, 60.0, 80, "2025-03-02T10:00:00Z")),
            stored("c", submission("ada", 20, 100.0, 50, "2025-02-01T10:00:00Z")),
        ];
        let state = ranked(&raw);

        assert_eq!(state.entries.len(), 1);
        let ada = &state.entries[0];
        assert_eq!(ada.username, "ada");
        assert_eq!(ada.id, "b");
        assert_eq!(ada.score, 12);
        assert_eq!(ada.accuracy, 60.0);
        assert_eq!(ada.time_taken, 80);
    }

    #[test]
    fn test_ordering_score_then_accuracy_then_time() {
        let raw = vec![
            stored("first", submission("p1", 10, 90.0, 50, "2025-03-01T10:00:00Z")),
            stored("second", submission("p2", 10, 90.0, 40, "2025-03-01T10:00:00Z")),
            stored("third", submission("p3", 8, 100.0, 10, "2025-03-01T10:00:00Z")),
        ];
        let state = ranked(&raw);

        let order: Vec<&str> = state.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(order, vec!["second", "first", "third"]);
        let ranks: Vec<usize> = state.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_accuracy_breaks_score_ties() {
        let raw = vec![
            stored("a", submission("p1", 10, 50.0, 10, "2025-03-01T10:00:00Z")),
            stored("b", submission("p2", 10, 100.0, 90, "2025-03-01T10:00:00Z")),
        ];
        let state = ranked(&raw);
        assert_eq!(state.entries[0].username, "p2");
    }

    #[test]
    fn test_missing_fields_are_defaulted_or_skipped() {
        let raw = vec![
            stored("a", json!({"username": "ada", "score": "15", "totalQuestions": 20})),
            stored("b", json!({"score": 3})),
            stored("c", json!({"username": "grace"})),
            stored("d", json!("garbage")),
        ];
        let state = ranked(&raw);

        assert_eq!(state.skipped, 3);
        assert_eq!(state.entries.len(), 1);
        let ada = &state.entries[0];
        assert_eq!(ada.score, 15);
        assert_eq!(ada.accuracy, 75.0);
        assert_eq!(ada.time_taken, 0);
        assert_eq!(ada.timestamp, None);
    }

    #[test]
    fn test_unreadable_timestamp_is_skipped() {
        let raw = vec![
            stored("a", submission("ada", 18, 90.0, 100, "yesterday")),
            stored("b", submission("grace", 12, 60.0, 80, "2025-03-02T10:00:00Z")),
            stored("c", json!({"username": "linus", "score": 5, "timestamp": 1740909600})),
            stored("d", json!({"username": "ken", "score": 4, "timestamp": null})),
        ];
        let state = ranked(&raw);

        assert_eq!(state.skipped, 2);
        let names: Vec<&str> = state.entries.iter().map(|e| e.username.as_str()).collect();
        assert_eq!(names, vec!["grace", "ken"]);
        assert_eq!(state.entries[1].timestamp, None);
    }

    #[test]
    fn test_timestamp_tie_broken_by_key() {
        let raw = vec![
            stored("k2", submission("ada", 5, 25.0, 10, "2025-03-01T10:00:00Z")),
            stored("k1", submission("ada", 9, 45.0, 10, "2025-03-01T10:00:00Z")),
        ];
        assert_eq!(ranked(&raw).entries[0].id, "k2");

        let reversed: Vec<StoredEntry> = raw.into_iter().rev().collect();
        assert_eq!(ranked(&reversed).entries[0].id, "k2");
    }

    #[test]
    fn test_rebuild_replaces_prior_state() {
        let first = ranked(&[stored("a", submission("ada", 1, 5.0, 1, "2025-03-01T10:00:00Z"))]);
        let second = reduce(&first, &[]);
        assert_eq!(second.revision, first.revision + 1);
        assert!(second.entries.is_empty());
    }

    #[tokio::test]
    async fn test_hub_pushes_updates_to_subscribers() {
        let store = Arc::new(SubmissionLog::in_memory());
        let hub = LeaderboardHub::spawn(store.clone());
        let mut subscription = hub.subscribe();

        let Some(LeaderboardFeed::Ready(initial)) = subscription.next().await else {
            panic!("expected an initial ranking");
        };
        assert!(initial.entries.is_empty());

        store
            .append(submission("ada", 7, 35.0, 60, "2025-03-01T10:00:00Z"))
            .await
            .unwrap();

        let Some(LeaderboardFeed::Ready(updated)) = subscription.next().await else {
            panic!("expected an updated ranking");
        };
        assert_eq!(updated.entries.len(), 1);
        assert_eq!(updated.entries[0].username, "ada");

        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn test_hub_reports_failure_when_feed_closes() {
        let store = Arc::new(SubmissionLog::in_memory());
        let hub = LeaderboardHub::spawn(store.clone());
        let mut subscription = hub.subscribe();
        subscription.next().await.unwrap();

        drop(store);

        assert_eq!(
            subscription.next().await,
            Some(LeaderboardFeed::Failed(LOAD_FAILED_MESSAGE.to_string()))
        );
    }
}
