use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scoring::{ScoreReport, performance_message};
use super::session::{QuizSession, SessionPhase, SubmissionRecord, format_clock};
use super::SelectionMap;
use crate::leaderboard::LeaderboardEntry;

/// Messages sent from a quiz client (WebSocket) to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "messageType", content = "payload", rename_all_fields = "camelCase")]
pub enum ClientToServerMessage {
    /// Sent immediately after the WebSocket connects to attach to a quiz attempt.
    ConnectToSession { session_id: Uuid },
    /// The user left the quiz view; an unsubmitted attempt is abandoned.
    LeaveSession,
    SelectOption {
        question_index: usize,
        option_index: usize,
    },
    NextPage,
    PreviousPage,
    Submit,
}

/// A question as shown to the quiz taker, without its answer key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub index: usize,
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PhaseName {
    InProgress,
    Submitting,
    Submitted,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub username: String,
    pub phase: PhaseName,
    pub current_page: usize,
    pub total_pages: usize,
    pub questions_per_page: usize,
    pub total_questions: usize,
    pub page_questions: Vec<PublicQuestion>,
    pub selections: SelectionMap,
    pub answered: usize,
    pub page_complete: bool,
    pub time_limit_seconds: u64,
    pub remaining_seconds: u64,
    pub remaining_clock: String,
}

impl SessionView {
    pub fn of(session_id: Uuid, session: &QuizSession) -> Self {
        let questions = session.questions();
        let (phase, current_page, selections) = match session.phase() {
            SessionPhase::InProgress(state) => (
                PhaseName::InProgress,
                state.current_page(),
                state.selections().clone(),
            ),
            SessionPhase::Submitting => (PhaseName::Submitting, 0, SelectionMap::new()),
            SessionPhase::Submitted(record) => (
                PhaseName::Submitted,
                questions.page_count() - 1,
                record.selected_options.clone(),
            ),
        };

        let range = questions.page_range(current_page);
        let page_questions = questions
            .page(current_page)
            .iter()
            .zip(range)
            .map(|(question, index)| PublicQuestion {
                index,
                question: question.text.clone(),
                options: question.options.clone(),
            })
            .collect();

        Self {
            session_id,
            username: session.username().to_string(),
            phase,
            current_page,
            total_pages: questions.page_count(),
            questions_per_page: questions.questions_per_page(),
            total_questions: questions.len(),
            page_questions,
            answered: selections.len(),
            selections,
            page_complete: session.is_current_page_complete(),
            time_limit_seconds: session.total_time_seconds(),
            remaining_seconds: session.remaining_seconds(),
            remaining_clock: format_clock(session.remaining_seconds()),
        }
    }
}

/// Messages sent from the server to quiz and leaderboard clients.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload", rename_all_fields = "camelCase")]
pub enum ServerToClientMessage {
    SessionSnapshot(SessionView),
    TimerTick {
        remaining_seconds: u64,
        remaining_clock: String,
    },
    /// Blocking notice, e.g. an incomplete page.
    Notice { message: String },
    Submitted {
        record: SubmissionRecord,
        review: ScoreReport,
        performance_message: String,
    },
    Leaderboard { entries: Vec<LeaderboardEntry> },
    /// Dismissible banner for a leaderboard that could not be loaded.
    LeaderboardError { message: String },
    SystemError { message: String },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn timer_tick(remaining_seconds: u64) -> Self {
        ServerToClientMessage::TimerTick {
            remaining_seconds,
            remaining_clock: format_clock(remaining_seconds),
        }
    }

    pub fn submitted(record: SubmissionRecord) -> Self {
        let review = record.review();
        ServerToClientMessage::Submitted {
            performance_message: performance_message(review.score, review.total_questions)
                .to_string(),
            review,
            record,
        }
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}
