//! File transfer service trait
//!
//! Bytes never travel on the room channels. A sender hands the file to the
//! transfer service and gets back an opaque descriptor; the descriptor goes
//! out in a chat message; receivers pass it back to their own service to
//! fetch the bytes. Both sides must present the same [`TransferKey`].

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;

use crate::core_session::fingerprint::{infer_mime_type, FileDescriptor};

/// File transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Unknown transfer descriptor: {0}")]
    NotFound(String),

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transfer failed: {0}")]
    Failed(String),
}

/// Key a transfer is scoped to: `room-secret`, or the bare room id
#[derive(Clone, PartialEq, Eq)]
pub struct TransferKey(String);

impl TransferKey {
    pub fn derive(room_id: &str, shared_secret: Option<&str>) -> Self {
        match shared_secret.filter(|s| !s.is_empty()) {
            Some(secret) => TransferKey(format!("{}-{}", room_id, secret)),
            None => TransferKey(room_id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keys may embed the shared secret
impl fmt::Debug for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransferKey(<redacted>)")
    }
}

/// Where the bytes of an outgoing file live
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

/// A file offered to the room
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub descriptor: FileDescriptor,
    pub source: FileSource,
}

impl OutgoingFile {
    /// Describe a file on disk
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let descriptor = FileDescriptor::from_path(&path).await?;
        Ok(Self {
            descriptor,
            source: FileSource::Path(path),
        })
    }

    /// Wrap in-memory bytes, stamped with the current time as modification time
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let bytes: Vec<u8> = bytes.into();
        let descriptor = FileDescriptor::new(
            name.clone(),
            bytes.len() as u64,
            Utc::now().timestamp_millis(),
            infer_mime_type(&name),
        );
        Self {
            descriptor,
            source: FileSource::Memory(bytes.into()),
        }
    }

    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            FileSource::Path(path) => tokio::fs::read(path).await,
            FileSource::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

#[derive(Debug)]
struct ProgressState {
    last_progress: Instant,
    fraction: f64,
}

/// Progress sink shared between a download and its stall watchdog.
///
/// Every `report` refreshes the last-progress timestamp.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    state: Arc<Mutex<ProgressState>>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProgressState {
                last_progress: Instant::now(),
                fraction: 0.0,
            })),
        }
    }

    /// Record progress as a fraction in `[0, 1]`
    pub fn report(&self, fraction: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.fraction = fraction.clamp(0.0, 1.0);
        state.last_progress = Instant::now();
    }

    pub fn fraction(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fraction
    }

    /// Time since the last progress report (or since creation)
    pub fn idle(&self) -> Duration {
        let last = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_progress;
        Instant::now().saturating_duration_since(last)
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Out-of-band file mover
#[async_trait]
pub trait FileTransferService: Send + Sync {
    /// Start seeding a file and return its transfer descriptor
    async fn offer(&self, file: &OutgoingFile, key: &TransferKey) -> Result<String, TransferError>;

    /// Fetch the bytes behind a descriptor, reporting progress as it goes.
    ///
    /// Dropping the returned future cancels the download.
    async fn download(
        &self,
        descriptor: &str,
        key: &TransferKey,
        progress: DownloadProgress,
    ) -> Result<Vec<u8>, TransferError>;
}
