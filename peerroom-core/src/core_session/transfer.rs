/*
    Transfer Coordinator - duplicate suppression and stall detection

    Every outbound send is keyed by content fingerprint and every download by
    transfer descriptor. A key can be held by one operation at a time; the
    holder gets an OperationGuard that frees the key when dropped, so success,
    failure and cancellation all release it.

    Downloads additionally run under a stall watchdog: progress callbacks
    refresh a timestamp, a ticker compares it against the threshold, and the
    download future is dropped (cancelled) once nothing has moved for too long.
    A slow download that keeps reporting progress is never cut off.
*/

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{interval_at, Instant};
use tracing::{debug, trace, warn};

use crate::core_session::errors::{SessionError, SessionResult};
use crate::core_session::fingerprint::Fingerprint;
use crate::core_transport::DownloadProgress;

/// Default idle time after which a download counts as stalled
pub const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(120);

/// Default interval between stall checks
pub const DEFAULT_STALL_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Floor for the check interval; a zero period would make the ticker panic
const MIN_STALL_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Key of an in-flight operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKey {
    /// Outbound offer of a file with this fingerprint
    Send(Fingerprint),
    /// Download of this transfer descriptor
    Download(String),
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKey::Send(fp) => write!(f, "send:{}", fp),
            OperationKey::Download(descriptor) => write!(f, "download:{}", descriptor),
        }
    }
}

#[derive(Debug, Default)]
struct ActiveOperations {
    /// Key -> token of the guard currently holding it
    keys: HashMap<OperationKey, u64>,
    next_token: u64,
}

/// Set of in-flight operation keys with atomic check-and-insert
#[derive(Debug, Clone, Default)]
pub struct TransferCoordinator {
    active: Arc<Mutex<ActiveOperations>>,
}

impl TransferCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the send slot for a fingerprint
    pub fn begin_send(&self, fingerprint: &Fingerprint) -> SessionResult<OperationGuard> {
        self.acquire(OperationKey::Send(fingerprint.clone()))
    }

    /// Claim the download slot for a transfer descriptor
    pub fn begin_download(&self, descriptor: &str) -> SessionResult<OperationGuard> {
        self.acquire(OperationKey::Download(descriptor.to_string()))
    }

    fn acquire(&self, key: OperationKey) -> SessionResult<OperationGuard> {
        let mut ops = lock(&self.active);
        if ops.keys.contains_key(&key) {
            debug!(key = %key, "Operation already in progress");
            return Err(SessionError::TransferInProgress(key.to_string()));
        }

        ops.next_token += 1;
        let token = ops.next_token;
        ops.keys.insert(key.clone(), token);
        trace!(key = %key, token, "Operation started");

        Ok(OperationGuard {
            key,
            token,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self, key: &OperationKey) -> bool {
        lock(&self.active).keys.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).keys.len()
    }

    /// Forget every key. Guards still alive become no-ops on drop.
    pub fn clear(&self) {
        lock(&self.active).keys.clear();
    }
}

fn lock(active: &Mutex<ActiveOperations>) -> MutexGuard<'_, ActiveOperations> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds an operation key; releases it on drop
#[derive(Debug)]
pub struct OperationGuard {
    key: OperationKey,
    token: u64,
    active: Arc<Mutex<ActiveOperations>>,
}

impl OperationGuard {
    pub fn key(&self) -> &OperationKey {
        &self.key
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut ops = lock(&self.active);
        // A newer guard may own the key after a clear(); leave it alone
        if ops.keys.get(&self.key) == Some(&self.token) {
            ops.keys.remove(&self.key);
            trace!(key = %self.key, "Operation released");
        }
    }
}

/// Stall detection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallPolicy {
    /// Idle time after which the download is cancelled
    pub threshold: Duration,
    /// How often idle time is checked
    pub poll_interval: Duration,
}

impl Default for StallPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_STALL_THRESHOLD,
            poll_interval: DEFAULT_STALL_POLL_INTERVAL,
        }
    }
}

/// The watchdog fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallDetected {
    pub idle: Duration,
}

/// Drive `download` to completion unless `progress` goes quiet for longer than
/// the policy threshold, in which case the future is dropped.
pub async fn watch_for_stall<F>(
    policy: StallPolicy,
    progress: &DownloadProgress,
    download: F,
) -> Result<F::Output, StallDetected>
where
    F: Future,
{
    tokio::pin!(download);
    let poll = policy.poll_interval.max(MIN_STALL_POLL_INTERVAL);
    let mut ticker = interval_at(Instant::now() + poll, poll);

    loop {
        tokio::select! {
            biased;
            output = &mut download => return Ok(output),
            _ = ticker.tick() => {
                let idle = progress.idle();
                if idle > policy.threshold {
                    warn!(
                        idle_secs = idle.as_secs(),
                        fraction = progress.fraction(),
                        "Download stalled, cancelling"
                    );
                    return Err(StallDetected { idle });
                }
                trace!(idle_secs = idle.as_secs(), "Download still making progress");
            }
        }
    }
}
