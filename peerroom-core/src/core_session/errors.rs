//! Error types for the session layer

use std::time::Duration;

use thiserror::Error;

use crate::core_transport::{RoomError, TransferError};

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Joining the room failed; the session is back to `Disconnected`
    #[error("Failed to join room {room_id}: {reason}")]
    Connect { room_id: String, reason: String },

    /// Command issued while the session is not `Connected`
    #[error("Session is not connected")]
    NotConnected,

    /// `connect` called while a session is connecting or connected
    #[error("Session is already {0}")]
    AlreadyConnected(String),

    /// Session parameters rejected before joining
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),

    /// Text message was empty after trimming
    #[error("Message is empty")]
    EmptyMessage,

    /// File exceeds the configured size cap
    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// Another operation holds the same fingerprint or descriptor
    #[error("Transfer already in progress: {0}")]
    TransferInProgress(String),

    /// The file-transfer collaborator failed to offer the file
    #[error("Transfer failed: {0}")]
    TransferFailed(#[source] TransferError),

    /// Download made no progress within the stall threshold
    #[error("Download stalled: no progress for {idle:?} on {descriptor}")]
    DownloadStalled { descriptor: String, idle: Duration },

    /// The file-transfer collaborator failed to download the file
    #[error("Download failed: {0}")]
    DownloadFailed(#[source] TransferError),

    /// Room transport failure while sending
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    /// Payload encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Serialization(e.to_string())
    }
}
