//! Outbound delivery seam between the room core and the transport.

use async_trait::async_trait;
use thiserror::Error;

use crate::envelope::ServerEnvelope;

/// Error returned when a sink can no longer deliver frames.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The underlying connection has closed or failed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The envelope could not be encoded for the transport.
    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Destination a participant's drain task writes outbound frames into.
///
/// Production code wraps a WebSocket write half; tests substitute recording
/// or deliberately-stalled sinks.
#[async_trait]
pub trait MessageSink: Send {
    /// Delivers one outbound frame, blocking until the transport accepts it.
    async fn deliver(&mut self, envelope: ServerEnvelope) -> Result<(), SinkError>;
}
