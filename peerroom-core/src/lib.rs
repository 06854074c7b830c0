//! PeerRoom core: session orchestration for small peer-to-peer chat rooms.
//!
//! Participants join a named room and exchange text and file messages
//! directly. There is no server holding state: every peer keeps its own
//! roster and message history and reconciles with late joiners by replaying
//! history over the room.
//!
//! # Modules
//!
//! - [`core_session`] - Session controller, roster, history, transfer coordination
//! - [`core_transport`] - Room and file-transfer collaborator traits, loopback implementations
//! - [`config`] - Application configuration
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod core_session;
pub mod core_transport;
pub mod logging;

#[cfg(test)]
pub(crate) mod test_utils;

pub use core_session::{
    ChatMessage, ConnectionStatus, FileDescriptor, PeerId, PeerInfo, SessionConfig,
    SessionController, SessionError, SessionEvent, SessionResult, SessionSettings,
};
pub use logging::{init_logging, LogLevel};
