//! Domain error types.

use thiserror::Error;

/// Errors produced while applying protocol operations to a room.
#[derive(Debug, Error)]
pub enum RoomError {
    /// A hiker with the same id is already a member of the room.
    #[error("hiker {0} already exists in room")]
    HikerAlreadyInRoom(String),

    /// The addressed hiker is not a member of the room.
    #[error("hiker {0} is not in the room")]
    HikerNotFound(String),

    /// Pause was requested for a hiker that is already paused.
    #[error("hiker {0} is already paused")]
    AlreadyPaused(String),

    /// Resume was requested for a hiker that is not paused.
    #[error("hiker {0} is not paused")]
    NotPaused(String),

    /// A host-only operation was attempted by a non-host hiker.
    #[error("hiker {0} is not the host")]
    NotHost(String),

    /// The room inbox is closed; the room has been torn down.
    #[error("room {0} is closed")]
    RoomClosed(String),

    /// An outbound frame could not be queued for the connection.
    #[error("delivery to {0} failed")]
    DeliveryFailed(String),
}

/// Errors produced while decoding an inbound client envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON or is missing the header.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The header names a protocol this server does not recognize.
    ///
    /// Non-fatal: callers log and drop the message.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The message body is missing a field the protocol requires.
    #[error("invalid {protocol} payload: {source}")]
    InvalidPayload {
        /// The protocol whose payload failed validation.
        protocol: &'static str,
        /// The underlying deserialization failure.
        source: serde_json::Error,
    },
}
