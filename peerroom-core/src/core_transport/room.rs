//! Room transport trait
//!
//! A room transport places peers that share `(namespace, room id, credential)`
//! in one broadcast domain and delivers opaque payloads on named channels.
//! Peer ids are assigned by the transport and are stable for the life of a
//! transport instance.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core_session::types::PeerId;

/// Longest channel name a transport must accept, in bytes
pub const MAX_CHANNEL_NAME_LEN: usize = 12;

/// Named channels used by the session layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Live chat events
    Chat,
    /// Presence announcements
    Presence,
    /// History snapshots
    History,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Chat, Channel::Presence, Channel::History];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Chat => "msg",
            Channel::Presence => "user",
            Channel::History => "history",
        }
    }

    pub fn from_name(name: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inbound room activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Payload received on a channel
    Received {
        channel: String,
        from: PeerId,
        payload: Vec<u8>,
    },
    /// Transport-level connection to a peer came up
    PeerJoined(PeerId),
    /// Transport-level connection to a peer went away
    PeerLeft(PeerId),
}

/// Room transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Join failed: {0}")]
    JoinFailed(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Room handle is closed")]
    Closed,
}

/// A joined room: the handle for outbound traffic plus the inbound stream.
///
/// The stream ends when the transport drops this peer from the room.
pub struct JoinedRoom {
    pub handle: Arc<dyn RoomHandle>,
    pub events: mpsc::Receiver<RoomEvent>,
}

impl fmt::Debug for JoinedRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinedRoom").finish_non_exhaustive()
    }
}

/// Factory for room memberships
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Id other peers see for this transport
    fn self_id(&self) -> PeerId;

    /// Join a room scoped by namespace, room id and optional credential.
    ///
    /// Peers with a different credential never see each other.
    async fn join_room(
        &self,
        app_namespace: &str,
        room_id: &str,
        credential: Option<&str>,
    ) -> Result<JoinedRoom, RoomError>;
}

/// Outbound side of a room membership
#[async_trait]
pub trait RoomHandle: Send + Sync {
    /// Declare a channel before sending on it.
    ///
    /// Names longer than [`MAX_CHANNEL_NAME_LEN`] bytes are rejected.
    fn register_channel(&self, channel: &str) -> Result<(), RoomError>;

    /// Send to every peer in the room, or only to `target`
    async fn broadcast(
        &self,
        channel: &str,
        payload: Vec<u8>,
        target: Option<&PeerId>,
    ) -> Result<(), RoomError>;

    /// Leave the room. Idempotent.
    async fn leave(&self);
}

/// Validate a channel name for registration
pub fn check_channel_name(channel: &str) -> Result<(), RoomError> {
    if channel.is_empty() || channel.len() > MAX_CHANNEL_NAME_LEN {
        return Err(RoomError::InvalidChannel(format!(
            "channel name '{}' must be 1..={} bytes",
            channel, MAX_CHANNEL_NAME_LEN
        )));
    }
    Ok(())
}
