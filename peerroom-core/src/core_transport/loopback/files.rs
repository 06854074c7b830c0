//! In-process file transfer service

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::core_transport::files::{
    DownloadProgress, FileTransferService, OutgoingFile, TransferError, TransferKey,
};

/// Default chunk size for simulated downloads
const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

struct StoredBlob {
    key: TransferKey,
    bytes: Arc<[u8]>,
}

/// Shared blob store standing in for a swarm.
///
/// Clones share the store, so one instance per peer (each possibly with its
/// own pacing) can exchange files.
#[derive(Clone)]
pub struct LoopbackFileTransfer {
    store: Arc<RwLock<HashMap<String, StoredBlob>>>,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl LoopbackFileTransfer {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(HashMap::new())),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pause before each chunk of a download
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub async fn seeded_count(&self) -> usize {
        self.store.read().await.len()
    }
}

impl Default for LoopbackFileTransfer {
    fn default() -> Self {
        Self::new()
    }
}

/// `magnet:?xt=urn:btih:<40 hex>&dn=<name>`, bound to the key and content
fn magnet_descriptor(file_name: &str, key: &TransferKey, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(file_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(bytes);
    let digest = hex::encode(hasher.finalize());
    format!("magnet:?xt=urn:btih:{}&dn={}", &digest[..40], file_name)
}

#[async_trait]
impl FileTransferService for LoopbackFileTransfer {
    async fn offer(&self, file: &OutgoingFile, key: &TransferKey) -> Result<String, TransferError> {
        let bytes = file.read_bytes().await?;
        let descriptor = magnet_descriptor(&file.descriptor.name, key, &bytes);

        debug!(
            file_name = %file.descriptor.name,
            bytes = bytes.len(),
            descriptor = %descriptor,
            "Seeding file"
        );

        self.store.write().await.insert(
            descriptor.clone(),
            StoredBlob {
                key: key.clone(),
                bytes: bytes.into(),
            },
        );
        Ok(descriptor)
    }

    async fn download(
        &self,
        descriptor: &str,
        key: &TransferKey,
        progress: DownloadProgress,
    ) -> Result<Vec<u8>, TransferError> {
        let bytes = {
            let store = self.store.read().await;
            let blob = store
                .get(descriptor)
                .ok_or_else(|| TransferError::NotFound(descriptor.to_string()))?;
            if blob.key != *key {
                return Err(TransferError::Rejected(
                    "transfer key does not match the offer".to_string(),
                ));
            }
            Arc::clone(&blob.bytes)
        };

        let total = bytes.len();
        let mut received = Vec::with_capacity(total);
        for chunk in bytes.chunks(self.chunk_size) {
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            received.extend_from_slice(chunk);
            progress.report(received.len() as f64 / total as f64);
            trace!(received = received.len(), total, "Chunk received");
        }

        if total == 0 {
            progress.report(1.0);
        }
        Ok(received)
    }
}
