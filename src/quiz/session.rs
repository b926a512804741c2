use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::sampler::SampledQuestionSet;
use super::scoring::{ScoreReport, score_answers};
use super::{Question, SelectionMap};

/// Receives the finished record of an attempt. Implementations must not block:
/// the session moves to `Submitted` as soon as `accept` returns.
pub trait SubmissionSink: Send + Sync {
    fn accept(&self, record: SubmissionRecord);
}

/// Everything a session needs from the outside world.
#[derive(Clone)]
pub struct SessionContext {
    pub username: String,
    pub sink: Arc<dyn SubmissionSink>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Please answer all questions on this page before proceeding ({missing} unanswered).")]
    PageIncomplete { page: usize, missing: usize },
    #[error("Already on the last page.")]
    LastPage,
    #[error("Already on the first page.")]
    FirstPage,
    #[error("Finish the remaining pages before submitting.")]
    NotOnLastPage,
    #[error("The quiz is no longer in progress.")]
    NotInProgress,
    #[error("Question {0} is not part of this quiz.")]
    QuestionOutOfRange(usize),
    #[error("Question {question} has no option {option}.")]
    OptionOutOfRange { question: usize, option: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    /// The user pressed submit; subject to the page-complete gate.
    Manual,
    /// The countdown reached zero; bypasses the gate.
    TimerExpired,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub username: String,
    pub score: usize,
    pub total_questions: usize,
    pub accuracy: f64,
    pub selected_options: SelectionMap,
    pub questions: Vec<Question>,
    pub time_taken: u64,
    pub timestamp: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn review(&self) -> ScoreReport {
        score_answers(&self.questions, &self.selected_options)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted(Box<SubmissionRecord>),
    /// A submission already happened or is underway; nothing was done.
    AlreadySubmitted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Running { remaining_seconds: u64 },
    Expired(SubmitOutcome),
    /// The session is not in progress, the tick was ignored.
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InProgress {
    current_page: usize,
    selections: SelectionMap,
    remaining_seconds: u64,
}

impl InProgress {
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn selections(&self) -> &SelectionMap {
        &self.selections
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.remaining_seconds
    }

    fn missing_on_page(&self, questions: &SampledQuestionSet, page: usize) -> Option<usize> {
        let range = questions.page_range(page);
        if range.is_empty() {
            return None;
        }
        Some(range.filter(|i| !self.selections.contains(*i)).count())
    }

    /// An empty page is never complete.
    pub fn is_page_complete(&self, questions: &SampledQuestionSet, page: usize) -> bool {
        self.missing_on_page(questions, page) == Some(0)
    }

    fn check_page_complete(&self, questions: &SampledQuestionSet) -> Result<(), SessionError> {
        let page = self.current_page;
        match self.missing_on_page(questions, page) {
            Some(0) => Ok(()),
            Some(missing) => Err(SessionError::PageIncomplete { page, missing }),
            None => Err(SessionError::PageIncomplete { page, missing: 0 }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    InProgress(InProgress),
    Submitting,
    Submitted(Box<SubmissionRecord>),
}

/// One quiz attempt: `InProgress` -> `Submitting` -> `Submitted`.
#[derive(Debug)]
pub struct QuizSession {
    context: SessionContext,
    questions: SampledQuestionSet,
    total_time_seconds: u64,
    phase: SessionPhase,
}

impl QuizSession {
    pub fn new(
        context: SessionContext,
        questions: SampledQuestionSet,
        total_time_seconds: u64,
    ) -> Self {
        Self {
            context,
            questions,
            total_time_seconds,
            phase: SessionPhase::InProgress(InProgress {
                current_page: 0,
                selections: SelectionMap::new(),
                remaining_seconds: total_time_seconds,
            }),
        }
    }

    pub fn username(&self) -> &str {
        &self.context.username
    }

    pub fn questions(&self) -> &SampledQuestionSet {
        &self.questions
    }

    pub fn total_time_seconds(&self) -> u64 {
        self.total_time_seconds
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn in_progress(&self) -> Option<&InProgress> {
        match &self.phase {
            SessionPhase::InProgress(state) => Some(state),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&SubmissionRecord> {
        match &self.phase {
            SessionPhase::Submitted(record) => Some(record.as_ref()),
            _ => None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self.phase, SessionPhase::Submitted(_))
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.in_progress().map_or(0, InProgress::remaining_seconds)
    }

    fn in_progress_mut(&mut self) -> Result<&mut InProgress, SessionError> {
        match &mut self.phase {
            SessionPhase::InProgress(state) => Ok(state),
            _ => Err(SessionError::NotInProgress),
        }
    }

    pub fn select_option(
        &mut self,
        question_index: usize,
        option_index: usize,
    ) -> Result<(), SessionError> {
        if self.in_progress().is_none() {
            return Err(SessionError::NotInProgress);
        }
        let question = self
            .questions
            .get(question_index)
            .ok_or(SessionError::QuestionOutOfRange(question_index))?;
        if option_index >= question.options.len() {
            return Err(SessionError::OptionOutOfRange {
                question: question_index,
                option: option_index,
            });
        }

        let state = self.in_progress_mut()?;
        state.selections.select(question_index, option_index);
        tracing::trace!(
            question.index = question_index,
            option.index = option_index,
            "Option selected"
        );
        Ok(())
    }

    /// Moves to the next page if every question on the current one is answered.
    pub fn advance_page(&mut self) -> Result<usize, SessionError> {
        let page_count = self.questions.page_count();
        let SessionPhase::InProgress(state) = &mut self.phase else {
            return Err(SessionError::NotInProgress);
        };
        if state.current_page + 1 >= page_count {
            return Err(SessionError::LastPage);
        }
        state.check_page_complete(&self.questions)?;

        state.current_page += 1;
        tracing::debug!(quiz.page = state.current_page, "Advanced page");
        Ok(state.current_page)
    }

    pub fn retreat_page(&mut self) -> Result<usize, SessionError> {
        let state = self.in_progress_mut()?;
        if state.current_page == 0 {
            return Err(SessionError::FirstPage);
        }
        state.current_page -= 1;
        tracing::debug!(quiz.page = state.current_page, "Went back a page");
        Ok(state.current_page)
    }

    pub fn is_current_page_complete(&self) -> bool {
        self.in_progress()
            .is_some_and(|state| state.is_page_complete(&self.questions, state.current_page))
    }

    /// One second of the countdown. Reaching zero submits regardless of page completeness.
    pub fn tick(&mut self) -> TickOutcome {
        let remaining_seconds = match &mut self.phase {
            SessionPhase::InProgress(state) => {
                state.remaining_seconds = state.remaining_seconds.saturating_sub(1);
                state.remaining_seconds
            }
            _ => return TickOutcome::Idle,
        };

        if remaining_seconds > 0 {
            return TickOutcome::Running { remaining_seconds };
        }

        tracing::info!(user.name = %self.context.username, "Time is up, submitting automatically");
        TickOutcome::Expired(self.finish(SubmitTrigger::TimerExpired))
    }

    /// Submits the attempt at most once. Repeated calls, from any trigger, are no-ops.
    pub fn submit(&mut self, trigger: SubmitTrigger) -> Result<SubmitOutcome, SessionError> {
        if trigger == SubmitTrigger::Manual
            && let SessionPhase::InProgress(state) = &self.phase
        {
            if state.current_page + 1 < self.questions.page_count() {
                return Err(SessionError::NotOnLastPage);
            }
            state.check_page_complete(&self.questions)?;
        }
        Ok(self.finish(trigger))
    }

    fn finish(&mut self, trigger: SubmitTrigger) -> SubmitOutcome {
        let state = match std::mem::replace(&mut self.phase, SessionPhase::Submitting) {
            SessionPhase::InProgress(state) => state,
            other => {
                self.phase = other;
                tracing::debug!(?trigger, "Submit ignored, quiz already submitted");
                return SubmitOutcome::AlreadySubmitted;
            }
        };

        let report = score_answers(self.questions.questions(), &state.selections);
        let record = SubmissionRecord {
            username: self.context.username.clone(),
            score: report.score,
            total_questions: report.total_questions,
            accuracy: report.accuracy_percent(),
            selected_options: state.selections,
            questions: self.questions.questions().to_vec(),
            time_taken: self
                .total_time_seconds
                .saturating_sub(state.remaining_seconds),
            timestamp: Utc::now(),
        };

        tracing::info!(
            user.name = %record.username,
            quiz.score = record.score,
            quiz.total = record.total_questions,
            quiz.time_taken = record.time_taken,
            ?trigger,
            "Quiz submitted"
        );

        self.context.sink.accept(record.clone());
        self.phase = SessionPhase::Submitted(Box::new(record.clone()));
        SubmitOutcome::Submitted(Box::new(record))
    }
}

/// `MM:SS` rendering of a countdown.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::quiz::sample_questions;
    use crate::quiz::test_support::pool;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub records: Mutex<Vec<SubmissionRecord>>,
    }

    impl SubmissionSink for RecordingSink {
        fn accept(&self, record: SubmissionRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn session(pool_size: usize, per_page: usize, pages: usize) -> (QuizSession, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let pool = pool(pool_size);
        let mut rng = StdRng::seed_from_u64(3);
        let questions = sample_questions(&pool, per_page, pages, &mut rng);
        let context = SessionContext {
            username: "alice".to_string(),
            sink: sink.clone(),
        };
        (QuizSession::new(context, questions, 300), sink)
    }

    fn answer_correctly(session: &mut QuizSession, indices: std::ops::Range<usize>) {
        for i in indices {
            let correct = session.questions().get(i).unwrap().correct_answer;
            session.select_option(i, correct).unwrap();
        }
    }

    #[test]
    fn test_end_to_end_two_pages_of_two() {
        let (mut session, sink) = session(4, 2, 2);

        session.select_option(0, 1).unwrap();
        assert_eq!(
            session.advance_page(),
            Err(SessionError::PageIncomplete {
                page: 0,
                missing: 1
            })
        );
        assert_eq!(session.in_progress().unwrap().current_page(), 0);

        answer_correctly(&mut session, 0..2);
        assert_eq!(session.advance_page(), Ok(1));

        let q2 = session.questions().get(2).unwrap().clone();
        session.select_option(2, (q2.correct_answer + 1) % 4).unwrap();
        answer_correctly(&mut session, 3..4);

        let outcome = session.submit(SubmitTrigger::Manual).unwrap();
        let SubmitOutcome::Submitted(record) = outcome else {
            panic!("expected a submission");
        };
        assert_eq!(record.score, 3);
        assert_eq!(record.total_questions, 4);
        assert_eq!(record.accuracy, 75.0);
        assert_eq!(record.username, "alice");
        assert!(session.is_submitted());
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_advance_rejected_iff_page_has_gap() {
        let page_size = 4;
        for answered_mask in 0u32..(1 << page_size) {
            let (mut session, _) = session(8, page_size, 2);
            for i in 0..page_size {
                if answered_mask & (1 << i) != 0 {
                    session.select_option(i, 0).unwrap();
                }
            }
            let complete = answered_mask == (1 << page_size) - 1;
            assert_eq!(session.advance_page().is_ok(), complete, "mask {:b}", answered_mask);
        }
    }

    #[test]
    fn test_answers_on_other_pages_do_not_complete_current_page() {
        let (mut session, _) = session(4, 2, 2);
        session.select_option(0, 0).unwrap();
        session.select_option(2, 0).unwrap();
        session.select_option(3, 0).unwrap();
        assert!(!session.is_current_page_complete());
        assert!(session.advance_page().is_err());
    }

    #[test]
    fn test_double_submit_produces_one_record() {
        let (mut session, sink) = session(4, 2, 2);
        answer_correctly(&mut session, 0..2);
        session.advance_page().unwrap();
        answer_correctly(&mut session, 2..4);

        let first = session.submit(SubmitTrigger::Manual).unwrap();
        let second = session.submit(SubmitTrigger::TimerExpired).unwrap();
        let third = session.submit(SubmitTrigger::Manual).unwrap();

        assert!(matches!(first, SubmitOutcome::Submitted(_)));
        assert_eq!(second, SubmitOutcome::AlreadySubmitted);
        assert_eq!(third, SubmitOutcome::AlreadySubmitted);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
        assert_eq!(session.record().unwrap().score, 4);
    }

    #[test]
    fn test_timer_expiry_submits_incomplete_quiz() {
        let (mut session, sink) = session(4, 2, 2);
        answer_correctly(&mut session, 0..2);
        session.advance_page().unwrap();

        for expected in (1..300).rev() {
            assert_eq!(
                session.tick(),
                TickOutcome::Running {
                    remaining_seconds: expected
                }
            );
        }
        let TickOutcome::Expired(SubmitOutcome::Submitted(record)) = session.tick() else {
            panic!("expected auto-submit on the last tick");
        };
        assert_eq!(record.score, 2);
        assert_eq!(record.time_taken, 300);
        assert!(session.is_submitted());
        assert_eq!(session.tick(), TickOutcome::Idle);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_submit_respects_gate() {
        let (mut session, sink) = session(4, 2, 2);
        answer_correctly(&mut session, 0..2);
        assert_eq!(
            session.submit(SubmitTrigger::Manual),
            Err(SessionError::NotOnLastPage)
        );

        session.advance_page().unwrap();
        answer_correctly(&mut session, 2..3);
        assert_eq!(
            session.submit(SubmitTrigger::Manual),
            Err(SessionError::PageIncomplete {
                page: 1,
                missing: 1
            })
        );
        assert!(sink.records.lock().unwrap().is_empty());
        assert!(session.in_progress().is_some());
    }

    #[test]
    fn test_mutations_rejected_after_submit() {
        let (mut session, _) = session(4, 2, 2);
        session.submit(SubmitTrigger::TimerExpired).unwrap();

        assert_eq!(session.select_option(0, 0), Err(SessionError::NotInProgress));
        assert_eq!(session.advance_page(), Err(SessionError::NotInProgress));
        assert_eq!(session.retreat_page(), Err(SessionError::NotInProgress));
        assert_eq!(session.remaining_seconds(), 0);
    }

    #[test]
    fn test_page_bounds() {
        let (mut session, _) = session(4, 2, 2);
        assert_eq!(session.retreat_page(), Err(SessionError::FirstPage));

        answer_correctly(&mut session, 0..2);
        session.advance_page().unwrap();
        answer_correctly(&mut session, 2..4);
        assert_eq!(session.advance_page(), Err(SessionError::LastPage));
        assert_eq!(session.retreat_page(), Ok(0));
    }

    #[test]
    fn test_selection_is_overwritten() {
        let (mut session, _) = session(4, 2, 2);
        session.select_option(1, 0).unwrap();
        session.select_option(1, 3).unwrap();
        assert_eq!(session.in_progress().unwrap().selections().get(1), Some(3));
        assert_eq!(session.in_progress().unwrap().selections().len(), 1);
    }

    #[test]
    fn test_invalid_selection_rejected() {
        let (mut session, _) = session(4, 2, 2);
        assert_eq!(
            session.select_option(4, 0),
            Err(SessionError::QuestionOutOfRange(4))
        );
        assert_eq!(
            session.select_option(0, 4),
            Err(SessionError::OptionOutOfRange {
                question: 0,
                option: 4
            })
        );
        assert!(session.in_progress().unwrap().selections().len() == 0);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(300), "05:00");
        assert_eq!(format_clock(61), "01:01");
        assert_eq!(format_clock(0), "00:00");
    }
}
