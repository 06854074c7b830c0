//! Session Layer - Orchestration for Peer-to-Peer Chat Rooms
//!
//! This module composes the per-room state (roster, message history, in-flight
//! transfers) into a connect/disconnect lifecycle bound to an external room
//! transport.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   UI/CLI    │  commands ▼   ▲ SessionEvent
//! └──────┬──────┘
//!        │
//! ┌──────▼──────────────────────────────┐
//! │       SessionController             │
//! │  roster · history · transfers       │
//! └──┬──────────────────────────┬───────┘
//!    │ msg / user / history     │ offer / download
//!    ▼                          ▼
//!  RoomTransport         FileTransferService
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! let (controller, mut events) = SessionController::new(transport, files, settings);
//! controller.connect(SessionConfig::new("peerroom", "123456", "alice")).await?;
//! controller.send_text("hi").await?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

pub mod controller;
pub mod errors;
pub mod fingerprint;
pub mod history;
pub mod room_id;
pub mod roster;
pub mod transfer;
pub mod types;
pub mod wire;

#[cfg(test)]
mod tests;

// Re-exports
pub use controller::{DownloadedFile, SessionController, SessionSettings};
pub use errors::{SessionError, SessionResult};
pub use fingerprint::{fingerprint, FileDescriptor, Fingerprint, FingerprintStrategy};
pub use history::MessageHistory;
pub use room_id::{generate_room_id, RoomKind};
pub use roster::PeerRoster;
pub use transfer::{OperationGuard, OperationKey, StallPolicy, TransferCoordinator};
pub use types::{
    ChatMessage, ConnectionStatus, FileMessage, MessageId, PeerId, PeerInfo, RoomInfo,
    SessionConfig, SessionEvent, TextMessage,
};
