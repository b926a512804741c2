use axum::extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::leaderboard::LeaderboardFeed;
use crate::quiz::messages::{
    ClientToServerMessage, ServerToClientMessage, client_message_from_ws_text,
};
use crate::session_manager::SessionActorHandle;
use crate::state::AppState;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    tracing::info!("WebSocket: Connection attempt to quiz session endpoint");
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn reject(ws_sender: &mut SplitSink<WebSocket, ws::Message>, message: String) {
    let error_response = ServerToClientMessage::SystemError { message };
    if let Ok(ws_msg) = error_response.to_ws_text() {
        let _ = ws_sender.send(ws_msg).await;
    }
    let _ = ws_sender.close().await;
}

pub async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let session_handle: SessionActorHandle = match ws_receiver.next().await {
        Some(Ok(ws::Message::Text(text_msg))) => match client_message_from_ws_text(&text_msg) {
            Ok(ClientToServerMessage::ConnectToSession { session_id }) => {
                match app_state.session_manager.get_session_handle(session_id).await {
                    Some(handle) => handle,
                    None => {
                        tracing::warn!(session.id = %session_id, "WebSocket: Session not found. Closing");
                        reject(&mut ws_sender, format!("Session {} not found.", session_id)).await;
                        return;
                    }
                }
            }
            Ok(other_msg) => {
                tracing::warn!(
                    event.type = ?other_msg,
                    "WebSocket: Initial message was not ConnectToSession. Closing"
                );
                reject(
                    &mut ws_sender,
                    "Invalid initial message type. Expected ConnectToSession.".to_string(),
                )
                .await;
                return;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event.raw = %text_msg,
                    "WebSocket: Failed to deserialize initial message. Closing"
                );
                reject(
                    &mut ws_sender,
                    format!("Invalid initial connection message format: {}", e),
                )
                .await;
                return;
            }
        },
        Some(Ok(other_type_msg)) => {
            tracing::warn!(message = ?other_type_msg, "WebSocket: Non-text initial message. Closing");
            reject(
                &mut ws_sender,
                "Initial message must be a text JSON message (ConnectToSession).".to_string(),
            )
            .await;
            return;
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "WebSocket: Error receiving initial message. Closing");
            let _ = ws_sender.close().await;
            return;
        }
        None => {
            tracing::info!("WebSocket: Client disconnected before sending initial message");
            return;
        }
    };

    let client_id = Uuid::new_v4();
    let session_id = session_handle.session_id;
    tracing::info!(client.id = %client_id, session.id = %session_id, "WebSocket: Client joined session");

    let (actor_to_client_tx, mut actor_to_client_rx) = mpsc::channel::<ws::Message>(64);
    session_handle
        .client_connected(client_id, actor_to_client_tx)
        .await;

    let mut send_task = tokio::spawn(async move {
        while let Some(message_to_send) = actor_to_client_rx.recv().await {
            if ws_sender.send(message_to_send).await.is_err() {
                tracing::info!(
                    client.id = %client_id,
                    session.id = %session_id,
                    "WS send error, client likely disconnected"
                );
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let recv_handle = session_handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(received) = ws_receiver.next().await {
            match received {
                Ok(ws::Message::Text(text_msg)) => {
                    tracing::trace!(client.id = %client_id, event.raw = %text_msg, "Received text from WS");
                    if let Err(e) = recv_handle
                        .forward_client_event(client_id, text_msg.to_string())
                        .await
                    {
                        tracing::error!(client.id = %client_id, error = %e, "Error sending event to session");
                        break;
                    }
                }
                Ok(ws::Message::Close(_)) => {
                    tracing::info!(client.id = %client_id, "WebSocket closed by client");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(client.id = %client_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    session_handle.client_disconnected(client_id).await;
    tracing::info!(client.id = %client_id, session.id = %session_id, "WebSocket: Client left session");
}

pub async fn leaderboard_ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    tracing::info!("WebSocket: Connection attempt to leaderboard endpoint");
    ws_upgrade.on_upgrade(move |socket| handle_leaderboard_socket(socket, app_state))
}

fn feed_message(feed: LeaderboardFeed) -> ServerToClientMessage {
    match feed {
        LeaderboardFeed::Ready(state) => ServerToClientMessage::Leaderboard {
            entries: state.entries.clone(),
        },
        LeaderboardFeed::Failed(message) => ServerToClientMessage::LeaderboardError { message },
    }
}

pub async fn handle_leaderboard_socket(socket: WebSocket, app_state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut subscription = app_state.leaderboard.subscribe();
    let subscription_id = subscription.id();

    loop {
        tokio::select! {
            update = subscription.next() => {
                let Some(feed) = update else {
                    tracing::info!(subscription.id = %subscription_id, "Leaderboard feed ended");
                    break;
                };
                let ws_msg = match feed_message(feed).to_ws_text() {
                    Ok(ws_msg) => ws_msg,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize leaderboard");
                        continue;
                    }
                };
                if ws_sender.send(ws_msg).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(ws::Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    subscription.unsubscribe();
    let _ = ws_sender.close().await;
}
