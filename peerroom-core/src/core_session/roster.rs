//! Peer roster: remote participants known by presence announcement.

use std::collections::HashMap;

use chrono::Utc;

use crate::core_session::types::{PeerId, PeerInfo};

/// Currently known remote peers, keyed by transport peer id
#[derive(Debug, Default, Clone)]
pub struct PeerRoster {
    peers: HashMap<PeerId, PeerInfo>,
}

impl PeerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `peer_id` with `joined_at = now`.
    ///
    /// Repeated announcements from the same peer leave one entry.
    pub fn record_join(&mut self, peer_id: PeerId, announced_name: impl Into<String>) -> PeerInfo {
        let info = PeerInfo {
            peer_id: peer_id.clone(),
            display_name: announced_name.into(),
            joined_at: Utc::now(),
        };
        self.peers.insert(peer_id, info.clone());
        info
    }

    /// Remove and return the entry, or `None` if the peer was never announced
    pub fn record_leave(&mut self, peer_id: &PeerId) -> Option<PeerInfo> {
        self.peers.remove(peer_id)
    }

    /// Snapshot of known peers, order unspecified
    pub fn list(&self) -> Vec<PeerInfo> {
        self.peers.values().cloned().collect()
    }

    pub fn display_name(&self, peer_id: &PeerId) -> Option<&str> {
        self.peers.get(peer_id).map(|p| p.display_name.as_str())
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
