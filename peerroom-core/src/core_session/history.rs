//! Message history store.
//!
//! Ordered, deduplicated log of every chat event this peer has seen. Message
//! ids are the only deduplication key. After any merge the log is sorted
//! ascending by timestamp; ties keep arrival order.
//!
//! Each remote batch triggers a full re-sort. Batches may arrive out of order
//! and from several peers at once, and room histories are interactive-chat
//! sized, so O(n log n) per merge is fine here.

use std::collections::HashSet;

use crate::core_session::types::{ChatMessage, MessageId, PeerId};

/// Ordered, id-unique chat log
#[derive(Debug, Default, Clone)]
pub struct MessageHistory {
    messages: Vec<ChatMessage>,
    ids: HashSet<MessageId>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a locally authored message at its timestamp position.
    ///
    /// Returns `false` only if the id is already present.
    pub fn append_local(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id().clone()) {
            return false;
        }
        let ts = message.timestamp();
        let pos = self.messages.partition_point(|m| m.timestamp() <= ts);
        self.messages.insert(pos, message);
        true
    }

    /// Merge a batch of remote messages.
    ///
    /// Messages whose id is already present (including earlier entries of the
    /// same batch) are skipped. Inserted messages are tagged local when their
    /// sender is `self_id`. Returns the newly inserted messages in ascending
    /// timestamp order, one per notification the caller should emit.
    pub fn merge_remote(
        &mut self,
        batch: impl IntoIterator<Item = ChatMessage>,
        self_id: &PeerId,
    ) -> Vec<ChatMessage> {
        let mut inserted = Vec::new();

        for mut message in batch {
            if self.ids.contains(message.id()) {
                continue;
            }
            let local = message.sender_id() == self_id;
            message.set_local_origin(local);

            self.ids.insert(message.id().clone());
            self.messages.push(message.clone());
            inserted.push(message);
        }

        if !inserted.is_empty() {
            self.messages.sort_by_key(|m| m.timestamp());
            inserted.sort_by_key(|m| m.timestamp());
        }
        inserted
    }

    /// Read-only copy of the log
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}
