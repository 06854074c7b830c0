//! Session controller
//!
//! Owns one room session end to end: the connection status, the roster, the
//! message history and the in-flight transfer set. Commands come in through
//! the public async methods; room traffic comes in through a pump task that
//! drains the transport's event stream. Everything the UI needs to render is
//! pushed out as [`SessionEvent`]s.
//!
//! State lives behind a single `RwLock`. Handlers take the lock, mutate, emit
//! and release before any network await, so observers always see a
//! consistent snapshot and events leave in mutation order.
//!
//! ```text
//! Disconnected --connect()--> Connecting --joined--> Connected
//!      ^                          |                      |
//!      +------ join failed -------+                      |
//!      +------------- disconnect() / stream ended -------+
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_MAX_FILE_SIZE_BYTES};
use crate::core_session::errors::{SessionError, SessionResult};
use crate::core_session::fingerprint::{fingerprint, FingerprintStrategy};
use crate::core_session::history::MessageHistory;
use crate::core_session::roster::PeerRoster;
use crate::core_session::transfer::{watch_for_stall, StallPolicy, TransferCoordinator};
use crate::core_session::types::{
    ChatMessage, ConnectionStatus, FileMessage, MessageId, PeerId, PeerInfo, RoomInfo,
    SessionConfig, SessionEvent, TextMessage, UNKNOWN_SENDER,
};
use crate::core_session::wire::{self, ChatPayload, HistoryPayload, PresencePayload};
use crate::core_transport::{
    Channel, DownloadProgress, FileTransferService, JoinedRoom, OutgoingFile, RoomEvent,
    RoomHandle, RoomTransport, TransferKey,
};

/// Per-controller tuning, usually derived from [`Config`]
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub stall_policy: StallPolicy,
    pub max_file_size_bytes: u64,
    /// Where downloads are saved; `None` keeps them in memory only
    pub download_dir: Option<PathBuf>,
    pub fingerprint_strategy: FingerprintStrategy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stall_policy: StallPolicy::default(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            download_dir: None,
            fingerprint_strategy: FingerprintStrategy::default(),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stall_policy: StallPolicy {
                threshold: config.transfer.stall_threshold,
                poll_interval: config.transfer.stall_poll_interval,
            },
            max_file_size_bytes: config.session.max_file_size_bytes,
            download_dir: config.session.download_dir.clone(),
            fingerprint_strategy: config.transfer.fingerprint,
        }
    }
}

/// Result of a completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Set when the file was written to the download directory
    pub saved_to: Option<PathBuf>,
}

struct ActiveRoom {
    config: SessionConfig,
    handle: Arc<dyn RoomHandle>,
    transfer_key: TransferKey,
    pump: JoinHandle<()>,
}

struct SessionState {
    status: ConnectionStatus,
    room: Option<ActiveRoom>,
    roster: PeerRoster,
    history: MessageHistory,
    /// Bumped on every connect and teardown; stale pumps and connects compare against it
    epoch: u64,
}

impl SessionState {
    fn connected_room(&self) -> SessionResult<&ActiveRoom> {
        match (&self.room, self.status) {
            (Some(room), ConnectionStatus::Connected) => Ok(room),
            _ => Err(SessionError::NotConnected),
        }
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.status == ConnectionStatus::Connected
    }
}

struct SessionShared {
    state: RwLock<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    transfers: TransferCoordinator,
    self_id: PeerId,
    settings: SessionSettings,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        // The UI may have dropped its receiver; state keeps working regardless
        let _ = self.events.send(event);
    }

    /// Clear everything and move to Disconnected. Caller holds the write lock.
    fn teardown(&self, state: &mut SessionState) -> Option<ActiveRoom> {
        state.epoch += 1;
        let room = state.room.take();
        state.roster.clear();
        state.history.clear();
        self.transfers.clear();
        state.status = ConnectionStatus::Disconnected;
        self.emit(SessionEvent::StatusChanged(ConnectionStatus::Disconnected));
        room
    }
}

/// One room session
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<SessionShared>,
    transport: Arc<dyn RoomTransport>,
    files: Arc<dyn FileTransferService>,
}

impl SessionController {
    /// Create a disconnected controller and the stream of its events
    pub fn new(
        transport: Arc<dyn RoomTransport>,
        files: Arc<dyn FileTransferService>,
        settings: SessionSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = SessionShared {
            state: RwLock::new(SessionState {
                status: ConnectionStatus::Disconnected,
                room: None,
                roster: PeerRoster::new(),
                history: MessageHistory::new(),
                epoch: 0,
            }),
            events: events_tx,
            transfers: TransferCoordinator::new(),
            self_id: transport.self_id(),
            settings,
        };

        let controller = Self {
            shared: Arc::new(shared),
            transport,
            files,
        };
        (controller, events_rx)
    }

    /// Join the room described by `config`.
    ///
    /// Only valid from `Disconnected`. Success means the local join finished;
    /// other peers need not be present.
    pub async fn connect(&self, config: SessionConfig) -> SessionResult<()> {
        config.check().map_err(SessionError::InvalidConfig)?;

        let epoch = {
            let mut state = self.shared.state.write().await;
            if state.status != ConnectionStatus::Disconnected {
                return Err(SessionError::AlreadyConnected(state.status.to_string()));
            }
            state.epoch += 1;
            state.status = ConnectionStatus::Connecting;
            self.shared
                .emit(SessionEvent::StatusChanged(ConnectionStatus::Connecting));
            state.epoch
        };

        info!(
            room_id = %config.room_id,
            namespace = %config.app_namespace,
            self_id = %self.shared.self_id,
            "Connecting to room"
        );

        let credential = config.shared_secret.as_deref().filter(|s| !s.is_empty());
        let joined = match self
            .transport
            .join_room(&config.app_namespace, &config.room_id, credential)
            .await
        {
            Ok(joined) => joined,
            Err(e) => {
                warn!(room_id = %config.room_id, error = %e, "Failed to join room");
                self.abandon_connect(epoch).await;
                return Err(SessionError::Connect {
                    room_id: config.room_id,
                    reason: e.to_string(),
                });
            }
        };

        let JoinedRoom { handle, events } = joined;
        for channel in Channel::ALL {
            if let Err(e) = handle.register_channel(channel.name()) {
                warn!(channel = %channel, error = %e, "Failed to register channel");
                handle.leave().await;
                self.abandon_connect(epoch).await;
                return Err(SessionError::Connect {
                    room_id: config.room_id,
                    reason: e.to_string(),
                });
            }
        }

        {
            let mut state = self.shared.state.write().await;
            if state.epoch != epoch || state.status != ConnectionStatus::Connecting {
                drop(state);
                debug!(room_id = %config.room_id, "Connect superseded by disconnect");
                handle.leave().await;
                return Err(SessionError::Connect {
                    room_id: config.room_id,
                    reason: "session was disconnected while connecting".to_string(),
                });
            }

            let pump = tokio::spawn(run_pump(
                Arc::clone(&self.shared),
                Arc::clone(&handle),
                events,
                epoch,
            ));
            state.room = Some(ActiveRoom {
                transfer_key: TransferKey::derive(&config.room_id, config.shared_secret.as_deref()),
                config: config.clone(),
                handle: Arc::clone(&handle),
                pump,
            });
            state.status = ConnectionStatus::Connected;
            self.shared
                .emit(SessionEvent::StatusChanged(ConnectionStatus::Connected));
        }

        info!(room_id = %config.room_id, "Connected to room");

        if let Err(e) = announce_presence(&*handle, &config.display_name, None).await {
            warn!(error = %e, "Failed to broadcast presence");
        }
        Ok(())
    }

    async fn abandon_connect(&self, epoch: u64) {
        let mut state = self.shared.state.write().await;
        if state.epoch == epoch && state.status == ConnectionStatus::Connecting {
            state.status = ConnectionStatus::Disconnected;
            self.shared
                .emit(SessionEvent::StatusChanged(ConnectionStatus::Disconnected));
        }
    }

    /// Send a text message to the room and return it
    pub async fn send_text(&self, content: &str) -> SessionResult<ChatMessage> {
        let (handle, message) = {
            let mut state = self.shared.state.write().await;
            let room = state.connected_room()?;

            let content = content.trim();
            if content.is_empty() {
                return Err(SessionError::EmptyMessage);
            }

            let message = ChatMessage::Text(TextMessage {
                id: MessageId::generate(),
                content: content.to_string(),
                sender_id: self.shared.self_id.clone(),
                sender_name: room.config.display_name.clone(),
                timestamp: Utc::now(),
                local_origin: true,
            });
            let handle = Arc::clone(&room.handle);

            state.history.append_local(message.clone());
            self.shared.emit(SessionEvent::Message(message.clone()));
            (handle, message)
        };

        let payload = wire::encode(&ChatPayload::live(&message))?;
        handle.broadcast(Channel::Chat.name(), payload, None).await?;

        debug!(message_id = %message.id(), "Sent text message");
        Ok(message)
    }

    /// Offer a file to the room and return the resulting chat message.
    ///
    /// Fails with `TransferInProgress` while the same file is still being offered,
    /// and with `NotConnected` if the session ends before the offer completes.
    pub async fn send_file(&self, file: OutgoingFile) -> SessionResult<ChatMessage> {
        let (transfer_key, display_name, epoch) = {
            let state = self.shared.state.read().await;
            let room = state.connected_room()?;
            (
                room.transfer_key.clone(),
                room.config.display_name.clone(),
                state.epoch,
            )
        };

        let limit = self.shared.settings.max_file_size_bytes;
        if file.descriptor.size_bytes > limit {
            return Err(SessionError::FileTooLarge {
                size: file.descriptor.size_bytes,
                limit,
            });
        }

        let fp = fingerprint(&file.descriptor, self.shared.settings.fingerprint_strategy);
        let _guard = self.shared.transfers.begin_send(&fp)?;

        info!(
            file_name = %file.descriptor.name,
            size_bytes = file.descriptor.size_bytes,
            fingerprint = %fp,
            "Offering file"
        );

        let descriptor = self
            .files
            .offer(&file, &transfer_key)
            .await
            .map_err(SessionError::TransferFailed)?;

        let message = ChatMessage::File(FileMessage {
            id: MessageId::generate(),
            file_name: file.descriptor.name.clone(),
            file_size_bytes: file.descriptor.size_bytes,
            mime_type: file.descriptor.mime_type.clone(),
            transfer_descriptor: descriptor,
            sender_id: self.shared.self_id.clone(),
            sender_name: display_name,
            timestamp: Utc::now(),
            local_origin: true,
        });

        let handle = {
            let mut state = self.shared.state.write().await;
            // The offer is bound to the old room's key; never carry it into a new session
            if !state.is_live(epoch) {
                debug!(file_name = %file.descriptor.name, "Session ended while offering file");
                return Err(SessionError::NotConnected);
            }
            let handle = Arc::clone(&state.connected_room()?.handle);
            state.history.append_local(message.clone());
            self.shared.emit(SessionEvent::Message(message.clone()));
            handle
        };

        let payload = wire::encode(&ChatPayload::live(&message))?;
        handle.broadcast(Channel::Chat.name(), payload, None).await?;
        Ok(message)
    }

    /// Fetch the bytes behind a transfer descriptor under stall detection
    pub async fn download_file(
        &self,
        transfer_descriptor: &str,
        file_name: &str,
    ) -> SessionResult<DownloadedFile> {
        let transfer_key = {
            let state = self.shared.state.read().await;
            state.connected_room()?.transfer_key.clone()
        };

        let _guard = self.shared.transfers.begin_download(transfer_descriptor)?;
        info!(descriptor = %transfer_descriptor, file_name = %file_name, "Downloading file");

        let progress = DownloadProgress::new();
        let download = self
            .files
            .download(transfer_descriptor, &transfer_key, progress.clone());

        let bytes = match watch_for_stall(self.shared.settings.stall_policy, &progress, download).await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(descriptor = %transfer_descriptor, error = %e, "Download failed");
                return Err(SessionError::DownloadFailed(e));
            }
            Err(stalled) => {
                return Err(SessionError::DownloadStalled {
                    descriptor: transfer_descriptor.to_string(),
                    idle: stalled.idle,
                });
            }
        };

        let saved_to = match &self.shared.settings.download_dir {
            Some(dir) => Some(save_download(dir, file_name, &bytes).await?),
            None => None,
        };

        info!(file_name = %file_name, bytes = bytes.len(), "Download complete");
        Ok(DownloadedFile {
            file_name: file_name.to_string(),
            bytes,
            saved_to,
        })
    }

    /// Leave the room and clear all session state. Safe to call in any state.
    pub async fn disconnect(&self) {
        let room = {
            let mut state = self.shared.state.write().await;
            if state.status == ConnectionStatus::Disconnected {
                return;
            }
            self.shared.teardown(&mut state)
        };

        if let Some(room) = room {
            room.pump.abort();
            room.handle.leave().await;
            info!(room_id = %room.config.room_id, "Disconnected from room");
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.shared.state.read().await.status
    }

    /// Transport-assigned id of this peer
    pub fn self_id(&self) -> PeerId {
        self.shared.self_id.clone()
    }

    pub async fn get_roster(&self) -> Vec<PeerInfo> {
        self.shared.state.read().await.roster.list()
    }

    pub async fn get_history(&self) -> Vec<ChatMessage> {
        self.shared.state.read().await.history.snapshot()
    }

    /// Summary of the current room, or `None` when not connected
    pub async fn room_info(&self) -> Option<RoomInfo> {
        let state = self.shared.state.read().await;
        let room = state.connected_room().ok()?;
        Some(RoomInfo {
            room_id: room.config.room_id.clone(),
            app_namespace: room.config.app_namespace.clone(),
            display_name: room.config.display_name.clone(),
            self_id: self.shared.self_id.clone(),
            peer_count: state.roster.len(),
        })
    }
}

async fn announce_presence(
    handle: &dyn RoomHandle,
    display_name: &str,
    target: Option<&PeerId>,
) -> SessionResult<()> {
    let payload = wire::encode(&PresencePayload {
        display_name: display_name.to_string(),
    })?;
    handle
        .broadcast(Channel::Presence.name(), payload, target)
        .await?;
    Ok(())
}

/// Write to `dir/<base name of file_name>`
async fn save_download(dir: &Path, file_name: &str, bytes: &[u8]) -> SessionResult<PathBuf> {
    let base = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "download".to_string());

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(base);
    tokio::fs::write(&path, bytes).await?;
    debug!(path = %path.display(), "Saved download");
    Ok(path)
}

/// Drain room events until the stream ends or the session moves on
async fn run_pump(
    shared: Arc<SessionShared>,
    handle: Arc<dyn RoomHandle>,
    mut events: mpsc::Receiver<RoomEvent>,
    epoch: u64,
) {
    while let Some(event) = events.recv().await {
        if !shared.state.read().await.is_live(epoch) {
            return;
        }
        handle_room_event(&shared, &*handle, event, epoch).await;
    }

    let room = {
        let mut state = shared.state.write().await;
        if !state.is_live(epoch) {
            return;
        }
        warn!("Room event stream ended, tearing down session");
        shared.teardown(&mut state)
    };
    // This task is the pump; dropping the handle detaches instead of aborting
    if let Some(room) = room {
        room.handle.leave().await;
    }
}

async fn handle_room_event(
    shared: &SessionShared,
    handle: &dyn RoomHandle,
    event: RoomEvent,
    epoch: u64,
) {
    match event {
        RoomEvent::PeerJoined(peer_id) => {
            let display_name = {
                let state = shared.state.read().await;
                match state.connected_room() {
                    Ok(room) if state.epoch == epoch => room.config.display_name.clone(),
                    _ => return,
                }
            };
            debug!(peer = %peer_id, "Transport peer joined, announcing presence");
            if let Err(e) = announce_presence(handle, &display_name, Some(&peer_id)).await {
                warn!(peer = %peer_id, error = %e, "Failed to announce presence");
            }
        }
        RoomEvent::PeerLeft(peer_id) => {
            let mut state = shared.state.write().await;
            if !state.is_live(epoch) {
                return;
            }
            if state.roster.record_leave(&peer_id).is_some() {
                info!(peer = %peer_id, "Peer left");
                shared.emit(SessionEvent::PeerLeft(peer_id));
            } else {
                debug!(peer = %peer_id, "Leave notice for unknown peer");
            }
        }
        RoomEvent::Received {
            channel,
            from,
            payload,
        } => match Channel::from_name(&channel) {
            Some(Channel::Chat) => handle_chat(shared, from, &payload, epoch).await,
            Some(Channel::Presence) => handle_presence(shared, handle, from, &payload, epoch).await,
            Some(Channel::History) => handle_history(shared, from, &payload, epoch).await,
            None => debug!(channel = %channel, peer = %from, "Ignoring unknown channel"),
        },
    }
}

async fn handle_chat(shared: &SessionShared, from: PeerId, payload: &[u8], epoch: u64) {
    let chat: ChatPayload = match wire::decode(payload) {
        Ok(chat) => chat,
        Err(e) => {
            warn!(peer = %from, error = %e, "Dropping malformed chat payload");
            return;
        }
    };

    let mut state = shared.state.write().await;
    if !state.is_live(epoch) {
        return;
    }
    let sender_name = state
        .roster
        .display_name(&from)
        .unwrap_or(UNKNOWN_SENDER)
        .to_string();
    let message = chat.into_message(from, sender_name);

    for inserted in state.history.merge_remote([message], &shared.self_id) {
        shared.emit(SessionEvent::Message(inserted));
    }
}

async fn handle_presence(
    shared: &SessionShared,
    handle: &dyn RoomHandle,
    from: PeerId,
    payload: &[u8],
    epoch: u64,
) {
    let presence: PresencePayload = match wire::decode(payload) {
        Ok(presence) => presence,
        Err(e) => {
            warn!(peer = %from, error = %e, "Dropping malformed presence payload");
            return;
        }
    };

    let snapshot = {
        let mut state = shared.state.write().await;
        if !state.is_live(epoch) {
            return;
        }
        let info = state.roster.record_join(from.clone(), presence.display_name);
        info!(peer = %from, display_name = %info.display_name, "Peer announced");
        shared.emit(SessionEvent::PeerJoined(info));

        if state.history.is_empty() {
            return;
        }
        state.history.snapshot()
    };

    let records: HistoryPayload = snapshot.iter().map(ChatPayload::record).collect();
    let result = match wire::encode(&records) {
        Ok(bytes) => handle
            .broadcast(Channel::History.name(), bytes, Some(&from))
            .await
            .map_err(SessionError::from),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!(peer = %from, messages = records.len(), "Replayed history"),
        Err(e) => warn!(peer = %from, error = %e, "Failed to replay history"),
    }
}

async fn handle_history(shared: &SessionShared, from: PeerId, payload: &[u8], epoch: u64) {
    let records: HistoryPayload = match wire::decode(payload) {
        Ok(records) => records,
        Err(e) => {
            warn!(peer = %from, error = %e, "Dropping malformed history payload");
            return;
        }
    };

    let mut state = shared.state.write().await;
    if !state.is_live(epoch) {
        return;
    }

    let batch: Vec<ChatMessage> = records
        .into_iter()
        .map(|record| {
            let sender_id = record.claimed_sender_id().cloned().unwrap_or_else(|| from.clone());
            let sender_name = record
                .claimed_sender_name()
                .map(str::to_string)
                .or_else(|| state.roster.display_name(&sender_id).map(str::to_string))
                .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
            record.into_message(sender_id, sender_name)
        })
        .collect();

    let received = batch.len();
    let inserted = state.history.merge_remote(batch, &shared.self_id);
    debug!(peer = %from, received, inserted = inserted.len(), "Merged history batch");
    for message in inserted {
        shared.emit(SessionEvent::Message(message));
    }
}

