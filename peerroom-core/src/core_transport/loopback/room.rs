//! In-process room transport

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use crate::core_session::types::PeerId;
use crate::core_transport::room::{
    check_channel_name, JoinedRoom, RoomError, RoomEvent, RoomHandle, RoomTransport,
};

/// Per-member inbound buffer.
///
/// Broadcasts wait for space, so a member that stops draining its stream
/// stalls every sender to it. Two members blocked on each other's full
/// buffers deadlock; keep demo traffic well under this bound.
const EVENT_BUFFER: usize = 256;

/// Peers only meet when all three parts match
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RoomScope {
    namespace: String,
    room_id: String,
    credential: Option<String>,
}

type Members = HashMap<PeerId, mpsc::Sender<RoomEvent>>;

#[derive(Default)]
struct NetworkState {
    rooms: RwLock<HashMap<RoomScope, Members>>,
    offline: AtomicBool,
}

/// Shared medium connecting loopback transports
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<NetworkState>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with a freshly generated peer id
    pub fn endpoint(&self) -> LoopbackTransport {
        self.endpoint_with_id(PeerId::generate())
    }

    pub fn endpoint_with_id(&self, peer_id: PeerId) -> LoopbackTransport {
        LoopbackTransport {
            network: self.clone(),
            peer_id,
        }
    }

    /// While offline every join attempt fails
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of members currently in a room
    pub async fn room_size(&self, namespace: &str, room_id: &str, credential: Option<&str>) -> usize {
        let scope = RoomScope {
            namespace: namespace.to_string(),
            room_id: room_id.to_string(),
            credential: credential.map(str::to_string),
        };
        self.state
            .rooms
            .read()
            .await
            .get(&scope)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Drop a peer from every room as if its connection died.
    ///
    /// Remaining members see `PeerLeft`; the dropped peer's event stream ends.
    pub async fn drop_peer(&self, peer_id: &PeerId) {
        let mut notify = Vec::new();
        {
            let mut rooms = self.state.rooms.write().await;
            for members in rooms.values_mut() {
                if members.remove(peer_id).is_some() {
                    notify.extend(members.values().cloned());
                }
            }
            rooms.retain(|_, members| !members.is_empty());
        }

        debug!(peer = %peer_id, "Dropped peer from loopback network");
        for tx in notify {
            let _ = tx.send(RoomEvent::PeerLeft(peer_id.clone())).await;
        }
    }

    async fn remove_member(&self, scope: &RoomScope, peer_id: &PeerId) {
        let remaining: Vec<_> = {
            let mut rooms = self.state.rooms.write().await;
            let Some(members) = rooms.get_mut(scope) else {
                return;
            };
            if members.remove(peer_id).is_none() {
                return;
            }
            let remaining = members.values().cloned().collect();
            if members.is_empty() {
                rooms.remove(scope);
            }
            remaining
        };

        for tx in remaining {
            let _ = tx.send(RoomEvent::PeerLeft(peer_id.clone())).await;
        }
    }
}

/// One peer's view of a [`LoopbackNetwork`]
#[derive(Clone)]
pub struct LoopbackTransport {
    network: LoopbackNetwork,
    peer_id: PeerId,
}

#[async_trait]
impl RoomTransport for LoopbackTransport {
    fn self_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    async fn join_room(
        &self,
        app_namespace: &str,
        room_id: &str,
        credential: Option<&str>,
    ) -> Result<JoinedRoom, RoomError> {
        if self.network.state.offline.load(Ordering::SeqCst) {
            return Err(RoomError::JoinFailed("network is offline".to_string()));
        }

        let scope = RoomScope {
            namespace: app_namespace.to_string(),
            room_id: room_id.to_string(),
            credential: credential.map(str::to_string),
        };
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let existing: Vec<_> = {
            let mut rooms = self.network.state.rooms.write().await;
            let members = rooms.entry(scope.clone()).or_default();
            if members.contains_key(&self.peer_id) {
                return Err(RoomError::JoinFailed(format!(
                    "peer {} is already in room {}",
                    self.peer_id, room_id
                )));
            }

            // Fresh buffer, so these cannot fill it unless the room is huge
            for peer in members.keys() {
                let _ = tx.try_send(RoomEvent::PeerJoined(peer.clone()));
            }
            let existing = members.values().cloned().collect();
            members.insert(self.peer_id.clone(), tx);
            existing
        };

        debug!(
            peer = %self.peer_id,
            namespace = %app_namespace,
            room_id = %room_id,
            existing = existing.len(),
            "Joined loopback room"
        );

        for member in existing {
            let _ = member.send(RoomEvent::PeerJoined(self.peer_id.clone())).await;
        }

        let handle = LoopbackRoomHandle {
            network: self.network.clone(),
            scope,
            self_id: self.peer_id.clone(),
            channels: Mutex::new(HashSet::new()),
            left: AtomicBool::new(false),
        };

        Ok(JoinedRoom {
            handle: Arc::new(handle),
            events: rx,
        })
    }
}

struct LoopbackRoomHandle {
    network: LoopbackNetwork,
    scope: RoomScope,
    self_id: PeerId,
    channels: Mutex<HashSet<String>>,
    left: AtomicBool,
}

#[async_trait]
impl RoomHandle for LoopbackRoomHandle {
    fn register_channel(&self, channel: &str) -> Result<(), RoomError> {
        check_channel_name(channel)?;
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string());
        Ok(())
    }

    async fn broadcast(
        &self,
        channel: &str,
        payload: Vec<u8>,
        target: Option<&PeerId>,
    ) -> Result<(), RoomError> {
        if self.left.load(Ordering::SeqCst) {
            return Err(RoomError::Closed);
        }
        let registered = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(channel);
        if !registered {
            return Err(RoomError::InvalidChannel(format!(
                "channel '{}' was not registered",
                channel
            )));
        }

        let recipients: Vec<_> = {
            let rooms = self.network.state.rooms.read().await;
            let members = rooms
                .get(&self.scope)
                .filter(|m| m.contains_key(&self.self_id))
                .ok_or(RoomError::Closed)?;
            members
                .iter()
                .filter(|(peer, _)| **peer != self.self_id)
                .filter(|(peer, _)| target.map_or(true, |t| t == *peer))
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        trace!(
            channel = %channel,
            bytes = payload.len(),
            recipients = recipients.len(),
            "Loopback broadcast"
        );

        for tx in recipients {
            let event = RoomEvent::Received {
                channel: channel.to_string(),
                from: self.self_id.clone(),
                payload: payload.clone(),
            };
            let _ = tx.send(event).await;
        }
        Ok(())
    }

    async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        self.network.remove_member(&self.scope, &self.self_id).await;
        debug!(peer = %self.self_id, room_id = %self.scope.room_id, "Left loopback room");
    }
}
