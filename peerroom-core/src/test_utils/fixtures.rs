//! Test fixtures for session scenarios

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core_session::{
    ConnectionStatus, MessageId, PeerId, SessionConfig, SessionController, SessionEvent,
    SessionSettings,
};
use crate::core_transport::loopback::{LoopbackFileTransfer, LoopbackNetwork};
use crate::core_transport::FileTransferService;

use super::async_helpers::wait_for;

/// Namespace every test session joins under
pub const TEST_NAMESPACE: &str = "peerroom-test";

/// Public room id used by most scenarios
pub const TEST_ROOM: &str = "123456";

/// A controller plus its event stream, named after its display name
pub struct TestPeer {
    pub name: String,
    pub controller: SessionController,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl TestPeer {
    /// Peer with id `<name>-peer` and default settings
    pub fn new(network: &LoopbackNetwork, files: &LoopbackFileTransfer, name: &str) -> Self {
        Self::with_files(network, Arc::new(files.clone()), name, SessionSettings::default())
    }

    pub fn with_files(
        network: &LoopbackNetwork,
        files: Arc<dyn FileTransferService>,
        name: &str,
        settings: SessionSettings,
    ) -> Self {
        let transport = Arc::new(network.endpoint_with_id(PeerId::new(format!("{}-peer", name))));
        let (controller, events) = SessionController::new(transport, files, settings);
        Self {
            name: name.to_string(),
            controller,
            events,
        }
    }

    pub fn id(&self) -> PeerId {
        self.controller.self_id()
    }

    pub fn config(&self, room: &str) -> SessionConfig {
        SessionConfig::new(TEST_NAMESPACE, room, self.name.clone())
    }

    /// Connect to `room` and consume the status events
    pub async fn join(&mut self, room: &str) {
        self.controller
            .connect(self.config(room))
            .await
            .expect("connect should succeed");
        wait_for(&mut self.events, |e| {
            *e == SessionEvent::StatusChanged(ConnectionStatus::Connected)
        })
        .await;
    }

    /// Wait until this peer has seen `other`'s presence
    pub async fn wait_for_peer(&mut self, other: &PeerId) {
        wait_for(&mut self.events, |e| {
            matches!(e, SessionEvent::PeerJoined(info) if info.peer_id == *other)
        })
        .await;
    }

    /// Wait for a message with the given id
    pub async fn wait_for_message(&mut self, id: &MessageId) -> SessionEvent {
        wait_for(&mut self.events, |e| {
            matches!(e, SessionEvent::Message(m) if m.id() == id)
        })
        .await
    }
}
