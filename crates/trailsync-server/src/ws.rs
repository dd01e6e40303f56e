//! Bridge between the WebSocket transport and the room registry.
//!
//! Each accepted socket is split: the write half becomes a [`MessageSink`]
//! drained by the registry's per-connection task, and the read half is
//! consumed here, decoding frames and routing them to rooms.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use tracing::{debug, info, instrument, warn};

use trailsync_core::envelope::{ServerEnvelope, decode_client_envelope};
use trailsync_core::error::DecodeError;
use trailsync_core::sink::{MessageSink, SinkError};
use trailsync_room::RoomRegistry;

struct WsSink {
    writer: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn deliver(&mut self, envelope: ServerEnvelope) -> Result<(), SinkError> {
        let json = serde_json::to_string(&envelope)?;
        self.writer
            .send(Message::Text(json.into()))
            .await
            .map_err(|error| SinkError::ConnectionClosed(error.to_string()))
    }
}

/// Runs one connection's read loop until the client disconnects, sends an
/// unrecoverable frame, or the registry rejects a route.
#[instrument(skip(socket, registry))]
pub async fn handle_socket(socket: WebSocket, registry: Arc<RoomRegistry>) {
    let (writer, mut reader) = socket.split();
    let conn = registry.open_connection(Box::new(WsSink { writer }));
    info!("websocket connection opened");

    while let Some(message) = reader.next().await {
        let Ok(message) = message else { break };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Pings and pongs are answered by the protocol layer.
            _ => continue,
        };

        match decode_client_envelope(text.as_str()) {
            Ok(envelope) => {
                if let Err(error) = registry.route(&conn, envelope).await {
                    warn!(%error, "closing connection: routing failed");
                    break;
                }
            }
            Err(error @ DecodeError::UnknownProtocol(_)) => {
                debug!(%error, "ignoring frame");
            }
            Err(error) => {
                warn!(%error, "closing connection: undecodable frame");
                break;
            }
        }
    }

    registry.disconnect(&conn).await;
    info!("websocket connection closed");
}
