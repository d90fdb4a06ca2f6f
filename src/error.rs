//! Error types for the pizza kitchen client.

use thiserror::Error;

/// Errors that can occur when using the kitchen client.
#[derive(Debug, Error)]
pub enum KitchenError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted a room operation but the client is not in a room.
    #[error("not in a room")]
    NotInRoom,

    /// The server refused the room join (room full, room gone, bad name).
    ///
    /// Distinct from transport failure: the connection is still alive and the
    /// persisted room is left untouched so the user can decide what to do.
    #[error("join rejected: {message}")]
    JoinRejected {
        /// Human-readable reason from the server.
        message: String,
    },

    /// A room name failed local validation before it was ever sent.
    #[error("room name rejected: {reason}")]
    RoomNameRejected {
        /// Why the name was rejected (empty, flagged by the profanity screen).
        reason: String,
    },

    /// Tried to submit a pizza with nothing staged in the local builder.
    #[error("no ingredients staged to build a pizza")]
    EmptyBuilder,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for kitchen client operations.
pub type Result<T> = std::result::Result<T, KitchenError>;
