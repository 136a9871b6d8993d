//! WebSocket client for the catalog push transport.

use std::sync::Arc;

use catalog_core::{ClientCommand, PushEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::applier::OptimisticApplier;
use crate::error::Result;

pub struct PushClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session_id: Option<String>,
}

impl PushClient {
    /// Connect to a push endpoint such as `ws://host/ws`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = connect_async(url).await?;
        info!(url = %url, "Connected to push transport");
        Ok(Self {
            stream,
            session_id: None,
        })
    }

    /// Session id announced by the server's `welcome` frame.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub async fn send(&mut self, command: &ClientCommand) -> Result<()> {
        let text = serde_json::to_string(command)?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn join_room(&mut self, room: &str) -> Result<()> {
        self.send(&ClientCommand::JoinRoom {
            room: room.to_string(),
        })
        .await
    }

    /// Next push event, or `None` once the server closes the connection.
    ///
    /// Frames that do not decode as push events are skipped.
    pub async fn next_event(&mut self) -> Result<Option<PushEvent>> {
        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Text(text) => match serde_json::from_str::<PushEvent>(&text) {
                    Ok(event) => {
                        if let PushEvent::Welcome { session_id } = &event {
                            self.session_id = Some(session_id.clone());
                        }
                        return Ok(Some(event));
                    }
                    Err(e) => warn!(error = %e, "Skipping undecodable push frame"),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Feed every received stock update to `applier` until the connection closes.
    pub async fn run(mut self, applier: Arc<OptimisticApplier>) -> Result<()> {
        while let Some(event) = self.next_event().await? {
            let name = event.name();
            if let Some(outcome) = applier.apply_event(event) {
                debug!(
                    event = name,
                    patched = outcome.patched_entries,
                    "Applied push event"
                );
            }
        }
        info!("Push transport closed");
        Ok(())
    }
}
