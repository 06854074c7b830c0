//! Core data types for the session layer

use std::fmt;

use chrono::{DateTime, Utc};
use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::core_session::room_id::RoomKind;

/// Placeholder sender name used when a message arrives before its sender's presence
pub const UNKNOWN_SENDER: &str = "unknown";

/// MIME types a UI can render inline
const PREVIEWABLE_IMAGE_TYPES: [&str; 6] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

/// Opaque peer identifier assigned by the room transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    /// Random 20-character alphanumeric id
    pub fn generate() -> Self {
        let id: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(20)
            .map(char::from)
            .collect();
        PeerId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique message identifier, the sole deduplication key for history
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    /// Local millisecond clock followed by a 9-character base-36 random suffix
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..9)
            .map(|_| std::char::from_digit(rng.random_range(0..36u32), 36).unwrap_or('0'))
            .collect();
        MessageId(format!("{}{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters of one session. Immutable once `connect` accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Application namespace isolating this app's rooms from others on the same transport
    pub app_namespace: String,

    /// Room identifier shared by all participants
    pub room_id: String,

    /// Name announced to other peers
    pub display_name: String,

    /// Optional room-scoping credential
    pub shared_secret: Option<String>,
}

impl SessionConfig {
    pub fn new(
        app_namespace: impl Into<String>,
        room_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            app_namespace: app_namespace.into(),
            room_id: room_id.into(),
            display_name: display_name.into(),
            shared_secret: None,
        }
    }

    /// Attach a shared secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }

    /// Check the parameters before any side effect.
    ///
    /// Returns a human-readable reason on rejection.
    pub fn check(&self) -> Result<(), String> {
        if self.room_id.trim().is_empty() {
            return Err("room id must not be empty".to_string());
        }
        if self.display_name.trim().is_empty() {
            return Err("display name must not be empty".to_string());
        }
        if self.app_namespace.trim().is_empty() {
            return Err("application namespace must not be empty".to_string());
        }
        let has_secret = self
            .shared_secret
            .as_deref()
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if RoomKind::classify(&self.room_id) == Some(RoomKind::Encrypted) && !has_secret {
            return Err(format!(
                "room {} is an encrypted room and needs a shared secret",
                self.room_id
            ));
        }
        Ok(())
    }
}

/// A remote participant known through its presence announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

/// Text chat event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub id: MessageId,
    pub content: String,
    pub sender_id: PeerId,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    /// Whether this peer authored the message
    pub local_origin: bool,
}

/// File offer event. Carries the transfer descriptor, never the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMessage {
    pub id: MessageId,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub mime_type: String,
    pub transfer_descriptor: String,
    pub sender_id: PeerId,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub local_origin: bool,
}

impl FileMessage {
    /// Whether a UI can render this file inline as an image
    pub fn is_previewable_image(&self) -> bool {
        let mime = self.mime_type.to_lowercase();
        PREVIEWABLE_IMAGE_TYPES.contains(&mime.as_str())
    }
}

/// Chat event in the room history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatMessage {
    Text(TextMessage),
    File(FileMessage),
}

impl ChatMessage {
    pub fn id(&self) -> &MessageId {
        match self {
            ChatMessage::Text(m) => &m.id,
            ChatMessage::File(m) => &m.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChatMessage::Text(m) => m.timestamp,
            ChatMessage::File(m) => m.timestamp,
        }
    }

    pub fn sender_id(&self) -> &PeerId {
        match self {
            ChatMessage::Text(m) => &m.sender_id,
            ChatMessage::File(m) => &m.sender_id,
        }
    }

    pub fn sender_name(&self) -> &str {
        match self {
            ChatMessage::Text(m) => &m.sender_name,
            ChatMessage::File(m) => &m.sender_name,
        }
    }

    pub fn is_local(&self) -> bool {
        match self {
            ChatMessage::Text(m) => m.local_origin,
            ChatMessage::File(m) => m.local_origin,
        }
    }

    pub(crate) fn set_local_origin(&mut self, local: bool) {
        match self {
            ChatMessage::Text(m) => m.local_origin = local,
            ChatMessage::File(m) => m.local_origin = local,
        }
    }
}

/// Overall session state, owned and mutated only by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
        };
        write!(f, "{}", s)
    }
}

/// Summary of the current room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub app_namespace: String,
    pub display_name: String,
    pub self_id: PeerId,
    pub peer_count: usize,
}

/// Notifications delivered to the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message became available (local send, live receive or history replay)
    Message(ChatMessage),
    /// A peer announced itself
    PeerJoined(PeerInfo),
    /// A known peer left the room
    PeerLeft(PeerId),
    /// The session moved to a new status
    StatusChanged(ConnectionStatus),
}
