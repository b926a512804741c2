use axum::extract::ws;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::quiz::messages::{
    ClientToServerMessage, ServerToClientMessage, SessionView, client_message_from_ws_text,
};
use crate::quiz::{
    Question, QuizSession, SessionContext, SubmissionSink, SubmitOutcome, SubmitTrigger,
    TickOutcome, sample_questions,
};

const SESSION_INACTIVITY_TIMEOUT: StdDuration = StdDuration::from_secs(60 * 60);
const TICK_PERIOD: StdDuration = StdDuration::from_secs(1);

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    pub session_id: Uuid,
    pub username: String,
    pub total_questions: usize,
    pub questions_per_page: usize,
    pub total_pages: usize,
    pub time_limit_seconds: u64,
}

#[derive(Debug)]
pub enum SessionManagerMessage {
    CreateSession {
        username: String,
        respond_to: oneshot::Sender<Result<SessionDetails, String>>,
    },
    GetSessionHandle {
        session_id: Uuid,
        respond_to: oneshot::Sender<Option<SessionActorHandle>>,
    },
    SessionActorShutdown {
        session_id: Uuid,
    },
}

pub struct SessionManagerActor {
    receiver: mpsc::Receiver<SessionManagerMessage>,
    sessions: HashMap<Uuid, SessionActorHandle>,
    self_sender: mpsc::Sender<SessionManagerMessage>,
    pool: Arc<Vec<Question>>,
    quiz_config: QuizConfig,
    sink: Arc<dyn SubmissionSink>,
}

impl SessionManagerActor {
    fn new(
        receiver: mpsc::Receiver<SessionManagerMessage>,
        self_sender: mpsc::Sender<SessionManagerMessage>,
        pool: Arc<Vec<Question>>,
        quiz_config: QuizConfig,
        sink: Arc<dyn SubmissionSink>,
    ) -> Self {
        SessionManagerActor {
            receiver,
            sessions: HashMap::new(),
            self_sender,
            pool,
            quiz_config,
            sink,
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: SessionManagerMessage) {
        match msg {
            SessionManagerMessage::CreateSession {
                username,
                respond_to,
            } => {
                let session_id = Uuid::new_v4();
                tracing::info!(
                    session.id = %session_id,
                    user.name = %username,
                    "Received CreateSession request"
                );

                if self.pool.is_empty() {
                    tracing::error!(session.id = %session_id, "Question pool is empty");
                    let _ = respond_to.send(Err("No questions are available.".to_string()));
                    return;
                }

                let questions = sample_questions(
                    &self.pool,
                    self.quiz_config.questions_per_page,
                    self.quiz_config.total_pages,
                    &mut rand::thread_rng(),
                );
                let details = SessionDetails {
                    session_id,
                    username: username.clone(),
                    total_questions: questions.len(),
                    questions_per_page: questions.questions_per_page(),
                    total_pages: questions.page_count(),
                    time_limit_seconds: self.quiz_config.total_time_seconds,
                };

                let context = SessionContext {
                    username,
                    sink: self.sink.clone(),
                };
                let session =
                    QuizSession::new(context, questions, self.quiz_config.total_time_seconds);
                let manager_handle = SessionManagerHandle {
                    sender: self.self_sender.clone(),
                };
                let handle = SessionActorHandle::spawn(session_id, 32, manager_handle, session);
                self.sessions.insert(session_id, handle);

                tracing::info!(
                    session.id = %session_id,
                    quiz.questions = details.total_questions,
                    quiz.pages = details.total_pages,
                    "Created quiz session"
                );
                let _ = respond_to.send(Ok(details));
            }
            SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to,
            } => {
                tracing::debug!(session.id = %session_id, "Received GetSessionHandle request");
                let _ = respond_to.send(self.sessions.get(&session_id).cloned());
            }
            SessionManagerMessage::SessionActorShutdown { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    tracing::info!(session.id = %session_id, "Cleaning up session after actor shutdown");
                } else {
                    tracing::warn!(session.id = %session_id, "Received shutdown for unknown session");
                }
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_session_manager_actor(mut actor: SessionManagerActor) {
    tracing::info!("SessionManager actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::info!("SessionManager actor stopped");
}

#[derive(Clone, Debug)]
pub struct SessionManagerHandle {
    sender: mpsc::Sender<SessionManagerMessage>,
}

impl SessionManagerHandle {
    pub fn spawn(
        buffer_size: usize,
        pool: Arc<Vec<Question>>,
        quiz_config: QuizConfig,
        sink: Arc<dyn SubmissionSink>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionManagerActor::new(receiver, sender.clone(), pool, quiz_config, sink);
        tokio::spawn(run_session_manager_actor(actor));
        Self { sender }
    }

    pub async fn create_session(&self, username: String) -> Result<SessionDetails, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionManagerMessage::CreateSession {
                username,
                respond_to,
            })
            .await
            .map_err(|e| format!("Failed to send CreateSession: {}", e))?;
        rx.await
            .map_err(|e| format!("SessionManager no response: {}", e))?
    }

    pub async fn get_session_handle(&self, session_id: Uuid) -> Option<SessionActorHandle> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn notify_session_shutdown(&self, session_id: Uuid) -> Result<(), String> {
        self.sender
            .send(SessionManagerMessage::SessionActorShutdown { session_id })
            .await
            .map_err(|e| format!("Failed to send SessionActorShutdown: {}", e))
    }
}

#[derive(Debug)]
pub enum SessionActorMessage {
    ClientEvent {
        client_id: Uuid,
        raw_payload: String,
    },
    ClientConnected {
        client_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
    },
    ClientDisconnected {
        client_id: Uuid,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<SessionView>,
    },
}

/// Hosts one [`QuizSession`]: drives its countdown and relays it to connected sockets.
pub struct SessionActor {
    receiver: mpsc::Receiver<SessionActorMessage>,
    session_id: Uuid,
    session: QuizSession,
    clients: HashMap<Uuid, mpsc::Sender<ws::Message>>,
    manager_handle: SessionManagerHandle,
}

impl SessionActor {
    fn new(
        receiver: mpsc::Receiver<SessionActorMessage>,
        session_id: Uuid,
        session: QuizSession,
        manager_handle: SessionManagerHandle,
    ) -> Self {
        SessionActor {
            receiver,
            session_id,
            session,
            clients: HashMap::new(),
            manager_handle,
        }
    }

    fn snapshot(&self) -> SessionView {
        SessionView::of(self.session_id, &self.session)
    }

    /// Returns true when the actor should stop.
    #[tracing::instrument(skip(self, msg), fields(
        session.id = %self.session_id,
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: SessionActorMessage) -> bool {
        match msg {
            SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            } => match client_message_from_ws_text(&raw_payload) {
                Ok(parsed) => {
                    tracing::debug!(client.id = %client_id, event.type = ?parsed, "Processing event from client");
                    return self.handle_client_message(client_id, parsed).await;
                }
                Err(e) => {
                    tracing::warn!(
                        client.id = %client_id,
                        error = %e,
                        event.raw = %raw_payload,
                        "Failed to deserialize event from client"
                    );
                    let error_response = ServerToClientMessage::SystemError {
                        message: format!("Invalid message format: {}", e),
                    };
                    self.send_to(client_id, &error_response).await;
                }
            },
            SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            } => {
                tracing::debug!(client.id = %client_id, "Client connected");
                self.clients.insert(client_id, client_tx);
                self.send_to(client_id, &ServerToClientMessage::SessionSnapshot(self.snapshot()))
                    .await;
                if let Some(record) = self.session.record() {
                    let submitted = ServerToClientMessage::submitted(record.clone());
                    self.send_to(client_id, &submitted).await;
                }
            }
            SessionActorMessage::ClientDisconnected { client_id } => {
                tracing::debug!(client.id = %client_id, "Client disconnected");
                self.clients.remove(&client_id);
                if self.clients.is_empty() && self.session.is_submitted() {
                    tracing::info!("Submitted session has no clients left. Triggering shutdown");
                    self.notify_shutdown().await;
                    return true;
                }
            }
            SessionActorMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
        false
    }

    async fn handle_client_message(
        &mut self,
        client_id: Uuid,
        message: ClientToServerMessage,
    ) -> bool {
        let result = match message {
            ClientToServerMessage::SelectOption {
                question_index,
                option_index,
            } => self.session.select_option(question_index, option_index),
            ClientToServerMessage::NextPage => self.session.advance_page().map(|_| ()),
            ClientToServerMessage::PreviousPage => self.session.retreat_page().map(|_| ()),
            ClientToServerMessage::Submit => match self.session.submit(SubmitTrigger::Manual) {
                Ok(outcome) => {
                    self.handle_submit_outcome(outcome).await;
                    return false;
                }
                Err(e) => Err(e),
            },
            ClientToServerMessage::LeaveSession => {
                if self.session.in_progress().is_some() {
                    tracing::info!(client.id = %client_id, "Quiz abandoned before submission");
                }
                self.notify_shutdown().await;
                return true;
            }
            ClientToServerMessage::ConnectToSession { .. } => {
                let error_response = ServerToClientMessage::SystemError {
                    message: "Already connected to a session.".to_string(),
                };
                self.send_to(client_id, &error_response).await;
                return false;
            }
        };

        match result {
            Ok(()) => {
                self.broadcast(&ServerToClientMessage::SessionSnapshot(self.snapshot()))
                    .await;
            }
            Err(e) => {
                tracing::debug!(client.id = %client_id, error = %e, "Rejected quiz action");
                let notice = ServerToClientMessage::Notice {
                    message: e.to_string(),
                };
                self.send_to(client_id, &notice).await;
            }
        }
        false
    }

    async fn handle_submit_outcome(&mut self, outcome: SubmitOutcome) {
        match outcome {
            SubmitOutcome::Submitted(record) => {
                self.broadcast(&ServerToClientMessage::SessionSnapshot(self.snapshot()))
                    .await;
                self.broadcast(&ServerToClientMessage::submitted(*record))
                    .await;
            }
            SubmitOutcome::AlreadySubmitted => {
                tracing::debug!("Submit ignored, session already submitted");
            }
        }
    }

    /// Returns true when the actor should stop.
    async fn handle_tick(&mut self) -> bool {
        match self.session.tick() {
            TickOutcome::Running { remaining_seconds } => {
                self.broadcast(&ServerToClientMessage::timer_tick(remaining_seconds))
                    .await;
                false
            }
            TickOutcome::Expired(outcome) => {
                self.broadcast(&ServerToClientMessage::timer_tick(0)).await;
                self.handle_submit_outcome(outcome).await;
                if self.clients.is_empty() {
                    tracing::info!("Time expired with no clients connected. Triggering shutdown");
                    self.notify_shutdown().await;
                    return true;
                }
                false
            }
            TickOutcome::Idle => false,
        }
    }

    async fn send_to(&self, client_id: Uuid, message: &ServerToClientMessage) {
        let Some(client_tx) = self.clients.get(&client_id) else {
            return;
        };
        match message.to_ws_text() {
            Ok(ws_msg) => {
                if client_tx.send(ws_msg).await.is_err() {
                    tracing::warn!(client.id = %client_id, "Failed to send message to client");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize message for client"),
        }
    }

    async fn broadcast(&self, message: &ServerToClientMessage) {
        let ws_msg = match message.to_ws_text() {
            Ok(ws_msg) => ws_msg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                return;
            }
        };
        for (client_id, client_tx) in &self.clients {
            if client_tx.send(ws_msg.clone()).await.is_err() {
                tracing::warn!(client.id = %client_id, "Failed to send broadcast to client");
            }
        }
    }

    async fn notify_shutdown(&self) {
        if let Err(e) = self
            .manager_handle
            .notify_session_shutdown(self.session_id)
            .await
        {
            tracing::error!(error = %e, "Failed to notify SessionManager of shutdown");
        }
    }
}

#[tracing::instrument(skip(actor), fields(
    session.id = %actor.session_id,
    user.name = %actor.session.username()
))]
pub async fn run_session_actor(mut actor: SessionActor) {
    tracing::info!("Session actor started");

    let mut ticker = tokio::time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
    let mut last_client_activity = Instant::now();

    loop {
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if matches!(msg, SessionActorMessage::ClientEvent { .. }) {
                            last_client_activity = Instant::now();
                        }
                        if actor.handle_message(msg).await {
                            tracing::info!("Session shutdown requested by message handler");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Session actor channel closed. Shutting down");
                        break;
                    }
                }
            }
            _ = ticker.tick(), if actor.session.in_progress().is_some() => {
                if actor.handle_tick().await {
                    break;
                }
            }
            _ = tokio::time::sleep_until(last_client_activity + SESSION_INACTIVITY_TIMEOUT) => {
                tracing::info!("Session inactivity timeout. Notifying manager for shutdown");
                actor.notify_shutdown().await;
                break;
            }
        }
    }

    tracing::info!("Session actor stopping");
}

#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    pub sender: mpsc::Sender<SessionActorMessage>,
    pub session_id: Uuid,
}

impl SessionActorHandle {
    pub fn spawn(
        session_id: Uuid,
        buffer_size: usize,
        manager_handle: SessionManagerHandle,
        session: QuizSession,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionActor::new(receiver, session_id, session, manager_handle);
        tokio::spawn(run_session_actor(actor));
        Self { sender, session_id }
    }

    pub async fn forward_client_event(
        &self,
        client_id: Uuid,
        raw_payload: String,
    ) -> Result<(), String> {
        self.sender
            .send(SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            })
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    pub async fn client_connected(&self, client_id: Uuid, client_tx: mpsc::Sender<ws::Message>) {
        if self
            .sender
            .send(SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientConnected");
        }
    }

    pub async fn client_disconnected(&self, client_id: Uuid) {
        if self
            .sender
            .send(SessionActorMessage::ClientDisconnected { client_id })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientDisconnected");
        }
    }

    pub async fn snapshot(&self) -> Option<SessionView> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionActorMessage::GetSnapshot { respond_to: tx })
            .await
            .ok()?;
        rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::messages::PhaseName;
    use crate::quiz::session::tests::RecordingSink;
    use crate::quiz::test_support::pool;
    use serde_json::Value as JsonValue;

    fn manager(pool_size: usize) -> (SessionManagerHandle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let handle =
            SessionManagerHandle::spawn(8, Arc::new(pool(pool_size)), QuizConfig::default(), sink.clone());
        (handle, sink)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ws::Message>) -> JsonValue {
        match rx.recv().await {
            Some(ws::Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    async fn next_of_type(rx: &mut mpsc::Receiver<ws::Message>, message_type: &str) -> JsonValue {
        loop {
            let event = next_event(rx).await;
            if event["messageType"] == message_type {
                return event;
            }
        }
    }

    fn command(json: &str) -> String {
        json.to_string()
    }

    async fn wait_until_removed(manager: &SessionManagerHandle, session_id: Uuid) {
        for _ in 0..20 {
            if manager.get_session_handle(session_id).await.is_none() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("session {} was not removed", session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_session_samples_configured_size() {
        let (manager, _) = manager(50);
        let details = manager.create_session("ada".to_string()).await.unwrap();

        assert_eq!(details.username, "ada");
        assert_eq!(details.total_questions, 20);
        assert_eq!(details.total_pages, 2);
        assert_eq!(details.time_limit_seconds, 300);

        let handle = manager.get_session_handle(details.session_id).await.unwrap();
        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.phase, PhaseName::InProgress);
        assert_eq!(view.page_questions.len(), 10);
        assert!(manager.get_session_handle(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_is_rejected() {
        let (manager, _) = manager(0);
        assert!(manager.create_session("ada".to_string()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_page_gets_notice() {
        let (manager, sink) = manager(50);
        let details = manager.create_session("ada".to_string()).await.unwrap();
        let handle = manager.get_session_handle(details.session_id).await.unwrap();

        let client_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(64);
        handle.client_connected(client_id, tx).await;
        let snapshot = next_of_type(&mut rx, "SessionSnapshot").await;
        assert_eq!(snapshot["payload"]["currentPage"], 0);

        handle
            .forward_client_event(client_id, command(r#"{"messageType":"NextPage"}"#))
            .await
            .unwrap();
        let notice = next_of_type(&mut rx, "Notice").await;
        assert!(
            notice["payload"]["message"]
                .as_str()
                .unwrap()
                .starts_with("Please answer all questions on this page")
        );

        handle
            .forward_client_event(client_id, command(r#"{"messageType":"Submit"}"#))
            .await
            .unwrap();
        next_of_type(&mut rx, "Notice").await;
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expiry_submits_once_and_cleans_up() {
        let (manager, sink) = manager(50);
        let details = manager.create_session("ada".to_string()).await.unwrap();
        let handle = manager.get_session_handle(details.session_id).await.unwrap();

        let client_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(512);
        handle.client_connected(client_id, tx).await;
        handle
            .forward_client_event(
                client_id,
                command(r#"{"messageType":"SelectOption","payload":{"questionIndex":0,"optionIndex":1}}"#),
            )
            .await
            .unwrap();

        let mut ticks = 0;
        let submitted = loop {
            let event = next_event(&mut rx).await;
            match event["messageType"].as_str() {
                Some("TimerTick") => ticks += 1,
                Some("Submitted") => break event,
                _ => {}
            }
        };

        assert_eq!(ticks, 300);
        assert_eq!(submitted["payload"]["record"]["timeTaken"], 300);
        assert_eq!(submitted["payload"]["record"]["totalQuestions"], 20);
        assert_eq!(sink.records.lock().unwrap().len(), 1);

        handle
            .forward_client_event(client_id, command(r#"{"messageType":"Submit"}"#))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        assert_eq!(sink.records.lock().unwrap().len(), 1);

        handle.client_disconnected(client_id).await;
        wait_until_removed(&manager, details.session_id).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_session_abandons_attempt() {
        let (manager, sink) = manager(50);
        let details = manager.create_session("ada".to_string()).await.unwrap();
        let handle = manager.get_session_handle(details.session_id).await.unwrap();

        let client_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(64);
        handle.client_connected(client_id, tx).await;
        next_of_type(&mut rx, "SessionSnapshot").await;

        handle
            .forward_client_event(client_id, command(r#"{"messageType":"LeaveSession"}"#))
            .await
            .unwrap();
        wait_until_removed(&manager, details.session_id).await;

        tokio::time::sleep(StdDuration::from_secs(400)).await;
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_gets_system_error() {
        let (manager, _) = manager(50);
        let details = manager.create_session("ada".to_string()).await.unwrap();
        let handle = manager.get_session_handle(details.session_id).await.unwrap();

        let client_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(64);
        handle.client_connected(client_id, tx).await;
        handle
            .forward_client_event(client_id, command("not json"))
            .await
            .unwrap();
        next_of_type(&mut rx, "SystemError").await;
    }
}
