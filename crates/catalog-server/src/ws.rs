//! WebSocket push transport.
//!
//! Each connection registers a notifier session and pumps its bounded event
//! queue to the socket. Client commands (`joinRoom`, `leaveRoom`, `ping`) are
//! answered through the same queue so replies keep their order relative to
//! pushed events.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use catalog_core::{ClientCommand, Notification, NotificationLevel, PushEvent, now_utc};
use catalog_notify::{ChangeNotifier, NotifyError, SessionHandle};
use futures_util::{SinkExt, StreamExt};

use crate::metrics;
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let notifier = state.notifier.clone();
    ws.on_upgrade(move |socket| handle_session(socket, notifier))
}

async fn handle_session(socket: WebSocket, notifier: Arc<ChangeNotifier>) {
    let SessionHandle { id, mut events } = notifier.register();
    metrics::set_ws_sessions(notifier.session_count());
    tracing::info!(session_id = %id, "Push session opened");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(&notifier, &id, text.as_str());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            tracing::debug!(error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(session_id = %id, "Client closed WebSocket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!(session_id = %id, "Session queue closed");
                    break;
                };
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, event = event.name(), "Failed to encode push event");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(frame.into())).await {
                    tracing::debug!(error = %e, "Failed to send event");
                    break;
                }
            }
        }
    }

    notifier.unregister(&id);
    metrics::set_ws_sessions(notifier.session_count());
    tracing::info!(session_id = %id, "Push session closed");
}

fn handle_command(notifier: &ChangeNotifier, session_id: &str, text: &str) {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Ignoring unknown client frame");
            reject(notifier, session_id, "invalid command", e.to_string());
            return;
        }
    };

    let result = match &command {
        ClientCommand::JoinRoom { room } => notifier.join_room(session_id, room),
        ClientCommand::LeaveRoom { room } => notifier.leave_room(session_id, room),
        ClientCommand::Ping => notifier.send_to(session_id, PushEvent::Pong),
    };
    match result {
        Ok(()) => tracing::debug!(session_id = %session_id, command = ?command, "Client command applied"),
        Err(NotifyError::QueueFull(_)) => {
            tracing::debug!(session_id = %session_id, "Reply dropped, queue full");
        }
        Err(e) => reject(notifier, session_id, "command rejected", e.to_string()),
    }
}

fn reject(notifier: &ChangeNotifier, session_id: &str, title: &str, message: String) {
    let _ = notifier.send_to(
        session_id,
        PushEvent::Notification(Notification {
            level: NotificationLevel::Error,
            title: title.to_string(),
            message,
            timestamp: now_utc(),
        }),
    );
}
