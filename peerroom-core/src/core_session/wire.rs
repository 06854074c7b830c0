//! Channel payload formats
//!
//! JSON bodies carried on the `msg`, `user` and `history` channels. Live chat
//! payloads omit the sender; the receiver takes it from the transport. History
//! records carry the original author so a replay relayed by a third peer keeps
//! attribution.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core_session::errors::SessionResult;
use crate::core_session::types::{ChatMessage, FileMessage, MessageId, PeerId, TextMessage};

/// Body of a text chat event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPayload {
    pub id: MessageId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

/// Body of a file offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub id: MessageId,
    pub file_name: String,
    pub file_size_bytes: u64,
    pub mime_type: String,
    pub transfer_descriptor: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

/// One chat event on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChatPayload {
    Text(TextPayload),
    File(FilePayload),
}

impl ChatPayload {
    /// Live form: no sender fields
    pub fn live(message: &ChatMessage) -> Self {
        Self::build(message, false)
    }

    /// History form: sender fields included
    pub fn record(message: &ChatMessage) -> Self {
        Self::build(message, true)
    }

    fn build(message: &ChatMessage, with_sender: bool) -> Self {
        let sender_id = with_sender.then(|| message.sender_id().clone());
        let sender_name = with_sender.then(|| message.sender_name().to_string());
        match message {
            ChatMessage::Text(m) => ChatPayload::Text(TextPayload {
                id: m.id.clone(),
                content: m.content.clone(),
                timestamp: m.timestamp,
                sender_id,
                sender_name,
            }),
            ChatMessage::File(m) => ChatPayload::File(FilePayload {
                id: m.id.clone(),
                file_name: m.file_name.clone(),
                file_size_bytes: m.file_size_bytes,
                mime_type: m.mime_type.clone(),
                transfer_descriptor: m.transfer_descriptor.clone(),
                timestamp: m.timestamp,
                sender_id,
                sender_name,
            }),
        }
    }

    /// Author id claimed by a history record
    pub fn claimed_sender_id(&self) -> Option<&PeerId> {
        match self {
            ChatPayload::Text(p) => p.sender_id.as_ref(),
            ChatPayload::File(p) => p.sender_id.as_ref(),
        }
    }

    /// Author name claimed by a history record
    pub fn claimed_sender_name(&self) -> Option<&str> {
        match self {
            ChatPayload::Text(p) => p.sender_name.as_deref(),
            ChatPayload::File(p) => p.sender_name.as_deref(),
        }
    }

    /// Rebuild the chat event with the resolved sender. `local_origin` starts false.
    pub fn into_message(self, sender_id: PeerId, sender_name: String) -> ChatMessage {
        match self {
            ChatPayload::Text(p) => ChatMessage::Text(TextMessage {
                id: p.id,
                content: p.content,
                sender_id,
                sender_name,
                timestamp: p.timestamp,
                local_origin: false,
            }),
            ChatPayload::File(p) => ChatMessage::File(FileMessage {
                id: p.id,
                file_name: p.file_name,
                file_size_bytes: p.file_size_bytes,
                mime_type: p.mime_type,
                transfer_descriptor: p.transfer_descriptor,
                sender_id,
                sender_name,
                timestamp: p.timestamp,
                local_origin: false,
            }),
        }
    }
}

/// Presence announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub display_name: String,
}

/// Full history snapshot sent to a late joiner
pub type HistoryPayload = Vec<ChatPayload>;

pub fn encode<T: Serialize>(payload: &T) -> SessionResult<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SessionResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}
