//! File offers, downloads, duplicate suppression and stall detection

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::core_session::{
    ChatMessage, ConnectionStatus, FileMessage, SessionError, SessionEvent, SessionSettings,
    StallPolicy,
};
use crate::core_transport::loopback::{LoopbackFileTransfer, LoopbackNetwork};
use crate::core_transport::{
    DownloadProgress, FileTransferService, OutgoingFile, TransferError, TransferKey,
};
use crate::test_utils::*;

/// Holds every offer and download at a gate; each permit admits one call
struct GatedFiles {
    inner: LoopbackFileTransfer,
    gate: Arc<Semaphore>,
    entered: Arc<Notify>,
}

impl GatedFiles {
    fn new(inner: LoopbackFileTransfer) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl FileTransferService for GatedFiles {
    async fn offer(&self, file: &OutgoingFile, key: &TransferKey) -> Result<String, TransferError> {
        self.entered.notify_one();
        self.gate
            .acquire()
            .await
            .map_err(|e| TransferError::Failed(e.to_string()))?
            .forget();
        self.inner.offer(file, key).await
    }

    async fn download(
        &self,
        descriptor: &str,
        key: &TransferKey,
        progress: DownloadProgress,
    ) -> Result<Vec<u8>, TransferError> {
        self.entered.notify_one();
        self.gate
            .acquire()
            .await
            .map_err(|e| TransferError::Failed(e.to_string()))?
            .forget();
        self.inner.download(descriptor, key, progress).await
    }
}

fn expect_file(event: SessionEvent) -> FileMessage {
    match event {
        SessionEvent::Message(ChatMessage::File(file)) => file,
        other => panic!("expected file message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_and_download_file() {
    let network = LoopbackNetwork::new();
    let files = LoopbackFileTransfer::new().with_chunk_size(3);
    let download_dir = tempfile::tempdir().unwrap();

    let mut alice = TestPeer::new(&network, &files, "alice");
    let settings = SessionSettings {
        download_dir: Some(download_dir.path().to_path_buf()),
        ..SessionSettings::default()
    };
    let mut bob = TestPeer::with_files(&network, Arc::new(files.clone()), "bob", settings);

    alice.join(TEST_ROOM).await;
    bob.join(TEST_ROOM).await;
    bob.wait_for_peer(&alice.id()).await;

    let outgoing = OutgoingFile::from_bytes("cat.png", b"meow meow".to_vec());
    let sent = alice.controller.send_file(outgoing).await.unwrap();

    let offer = expect_file(bob.wait_for_message(sent.id()).await);
    assert_eq!(offer.file_name, "cat.png");
    assert_eq!(offer.file_size_bytes, 9);
    assert_eq!(offer.mime_type, "image/png");
    assert!(offer.is_previewable_image());
    assert_eq!(offer.sender_name, "alice");
    assert!(offer.transfer_descriptor.starts_with("magnet:?xt=urn:btih:"));

    let downloaded = bob
        .controller
        .download_file(&offer.transfer_descriptor, &offer.file_name)
        .await
        .unwrap();
    assert_eq!(downloaded.bytes, b"meow meow");

    let saved = downloaded.saved_to.unwrap();
    assert_eq!(saved, download_dir.path().join("cat.png"));
    assert_eq!(std::fs::read(saved).unwrap(), b"meow meow");
}

#[tokio::test]
async fn test_download_strips_path_components() {
    let network = LoopbackNetwork::new();
    let files = LoopbackFileTransfer::new();
    let download_dir = tempfile::tempdir().unwrap();
    let settings = SessionSettings {
        download_dir: Some(download_dir.path().to_path_buf()),
        ..SessionSettings::default()
    };
    let mut alice = TestPeer::with_files(&network, Arc::new(files.clone()), "alice", settings);
    alice.join(TEST_ROOM).await;

    let sent = alice
        .controller
        .send_file(OutgoingFile::from_bytes("notes.txt", b"x".to_vec()))
        .await
        .unwrap();
    let ChatMessage::File(offer) = sent else {
        panic!("expected file message");
    };

    let downloaded = alice
        .controller
        .download_file(&offer.transfer_descriptor, "../../etc/notes.txt")
        .await
        .unwrap();
    assert_eq!(downloaded.saved_to.unwrap(), download_dir.path().join("notes.txt"));
}

#[tokio::test]
async fn test_file_too_large() {
    let network = LoopbackNetwork::new();
    let files = LoopbackFileTransfer::new();
    let settings = SessionSettings {
        max_file_size_bytes: 4,
        ..SessionSettings::default()
    };
    let mut alice = TestPeer::with_files(&network, Arc::new(files.clone()), "alice", settings);
    alice.join(TEST_ROOM).await;

    let result = alice
        .controller
        .send_file(OutgoingFile::from_bytes("big.bin", vec![0u8; 5]))
        .await;
    assert!(matches!(
        result,
        Err(SessionError::FileTooLarge { size: 5, limit: 4 })
    ));
    assert_eq!(files.seeded_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_send_of_same_file_rejected() {
    let network = LoopbackNetwork::new();
    let gated = Arc::new(GatedFiles::new(LoopbackFileTransfer::new()));
    let mut alice = TestPeer::with_files(
        &network,
        gated.clone() as Arc<dyn FileTransferService>,
        "alice",
        SessionSettings::default(),
    );
    alice.join(TEST_ROOM).await;

    let file = OutgoingFile::from_bytes("report.pdf", vec![1u8; 32]);

    let first = tokio::spawn({
        let controller = alice.controller.clone();
        let file = file.clone();
        async move { controller.send_file(file).await }
    });
    gated.entered.notified().await;

    let second = alice.controller.send_file(file.clone()).await;
    assert!(matches!(second, Err(SessionError::TransferInProgress(_))));

    // A different file is not blocked by the first
    let other = tokio::spawn({
        let controller = alice.controller.clone();
        async move {
            controller
                .send_file(OutgoingFile::from_bytes("other.pdf", vec![2u8; 8]))
                .await
        }
    });
    gated.entered.notified().await;

    gated.gate.add_permits(3);
    assert!(first.await.unwrap().is_ok());
    assert!(other.await.unwrap().is_ok());

    // Guard released: the same file may be offered again
    let again = assert_completes_within(DEFAULT_TEST_TIMEOUT, alice.controller.send_file(file)).await;
    assert!(again.is_ok());
}

#[tokio::test]
async fn test_concurrent_download_of_same_descriptor_rejected() {
    let network = LoopbackNetwork::new();
    let store = LoopbackFileTransfer::new();
    let gated = Arc::new(GatedFiles::new(store.clone()));
    let mut alice = TestPeer::new(&network, &store, "alice");
    let mut bob = TestPeer::with_files(
        &network,
        gated.clone() as Arc<dyn FileTransferService>,
        "bob",
        SessionSettings::default(),
    );
    alice.join(TEST_ROOM).await;
    bob.join(TEST_ROOM).await;
    bob.wait_for_peer(&alice.id()).await;

    let sent = alice
        .controller
        .send_file(OutgoingFile::from_bytes("song.mp3", vec![9u8; 64]))
        .await
        .unwrap();
    let offer = expect_file(bob.wait_for_message(sent.id()).await);

    let first = tokio::spawn({
        let controller = bob.controller.clone();
        let descriptor = offer.transfer_descriptor.clone();
        async move { controller.download_file(&descriptor, "song.mp3").await }
    });
    gated.entered.notified().await;

    let second = bob
        .controller
        .download_file(&offer.transfer_descriptor, "song.mp3")
        .await;
    assert!(matches!(second, Err(SessionError::TransferInProgress(_))));

    gated.gate.add_permits(2);
    assert_eq!(first.await.unwrap().unwrap().bytes, vec![9u8; 64]);

    // Re-download after completion is allowed
    let again = bob
        .controller
        .download_file(&offer.transfer_descriptor, "song.mp3")
        .await
        .unwrap();
    assert_eq!(again.bytes.len(), 64);
}

#[tokio::test]
async fn test_download_failure_releases_guard() {
    let network = LoopbackNetwork::new();
    let files = LoopbackFileTransfer::new();
    let mut alice = TestPeer::new(&network, &files, "alice");
    alice.join(TEST_ROOM).await;

    for _ in 0..2 {
        let result = alice
            .controller
            .download_file("magnet:?xt=urn:btih:missing", "x.bin")
            .await;
        assert!(matches!(
            result,
            Err(SessionError::DownloadFailed(TransferError::NotFound(_)))
        ));
    }
}

#[tokio::test]
async fn test_download_from_other_room_rejected() {
    let network = LoopbackNetwork::new();
    let files = LoopbackFileTransfer::new();
    let mut alice = TestPeer::new(&network, &files, "alice");
    let mut carol = TestPeer::new(&network, &files, "carol");
    alice.join(TEST_ROOM).await;
    carol.join("654321").await;

    let sent = alice
        .controller
        .send_file(OutgoingFile::from_bytes("secret.txt", b"s".to_vec()))
        .await
        .unwrap();
    let ChatMessage::File(offer) = sent else {
        panic!("expected file message");
    };

    let result = carol
        .controller
        .download_file(&offer.transfer_descriptor, "secret.txt")
        .await;
    assert!(matches!(
        result,
        Err(SessionError::DownloadFailed(TransferError::Rejected(_)))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_download_cancelled() {
    let network = LoopbackNetwork::new();
    let store = LoopbackFileTransfer::new();
    // One chunk every 200s: the first chunk never arrives before the 150s check
    let stalling = store.clone().with_chunk_delay(Duration::from_secs(200));

    let mut alice = TestPeer::new(&network, &store, "alice");
    let mut bob = TestPeer::with_files(
        &network,
        Arc::new(stalling),
        "bob",
        SessionSettings::default(),
    );
    alice.join(TEST_ROOM).await;
    bob.join(TEST_ROOM).await;
    bob.wait_for_peer(&alice.id()).await;

    let sent = alice
        .controller
        .send_file(OutgoingFile::from_bytes("video.mp4", vec![0u8; 10]))
        .await
        .unwrap();
    let offer = expect_file(bob.wait_for_message(sent.id()).await);

    let started = tokio::time::Instant::now();
    let result = bob
        .controller
        .download_file(&offer.transfer_descriptor, "video.mp4")
        .await;

    match result {
        Err(SessionError::DownloadStalled { descriptor, idle }) => {
            assert_eq!(descriptor, offer.transfer_descriptor);
            assert!(idle > Duration::from_secs(120));
        }
        other => panic!("expected stall, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(200));

    // Guard released: a retry stalls again instead of reporting a duplicate
    let retry = bob
        .controller
        .download_file(&offer.transfer_descriptor, "video.mp4")
        .await;
    assert!(matches!(retry, Err(SessionError::DownloadStalled { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_slow_download_not_cancelled() {
    let network = LoopbackNetwork::new();
    let store = LoopbackFileTransfer::new();
    // Ten chunks at 100s each: 1000s total, never 120s without progress
    let slow = store
        .clone()
        .with_chunk_size(1)
        .with_chunk_delay(Duration::from_secs(100));

    let mut alice = TestPeer::new(&network, &store, "alice");
    let mut bob = TestPeer::with_files(&network, Arc::new(slow), "bob", SessionSettings::default());
    alice.join(TEST_ROOM).await;
    bob.join(TEST_ROOM).await;
    bob.wait_for_peer(&alice.id()).await;

    let sent = alice
        .controller
        .send_file(OutgoingFile::from_bytes("big.iso", vec![7u8; 10]))
        .await
        .unwrap();
    let offer = expect_file(bob.wait_for_message(sent.id()).await);

    let started = tokio::time::Instant::now();
    let downloaded = bob
        .controller
        .download_file(&offer.transfer_descriptor, "big.iso")
        .await
        .unwrap();
    assert_eq!(downloaded.bytes, vec![7u8; 10]);
    assert!(started.elapsed() >= Duration::from_secs(1000));
}

#[tokio::test(start_paused = true)]
async fn test_custom_stall_policy() {
    let network = LoopbackNetwork::new();
    let store = LoopbackFileTransfer::new();
    let slowish = store.clone().with_chunk_delay(Duration::from_secs(20));
    let settings = SessionSettings {
        stall_policy: StallPolicy {
            threshold: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
        },
        ..SessionSettings::default()
    };

    let mut alice = TestPeer::new(&network, &store, "alice");
    alice.join(TEST_ROOM).await;
    let sent = alice
        .controller
        .send_file(OutgoingFile::from_bytes("a.bin", vec![1u8; 4]))
        .await
        .unwrap();
    let ChatMessage::File(offer) = sent else {
        panic!("expected file message");
    };

    let mut bob = TestPeer::with_files(&network, Arc::new(slowish), "bob", settings);
    bob.join(TEST_ROOM).await;
    let result = bob
        .controller
        .download_file(&offer.transfer_descriptor, "a.bin")
        .await;
    assert!(matches!(result, Err(SessionError::DownloadStalled { .. })));
}

#[tokio::test]
async fn test_offer_finishing_after_reconnect_is_dropped() {
    let network = LoopbackNetwork::new();
    let gated = Arc::new(GatedFiles::new(LoopbackFileTransfer::new()));
    let mut alice = TestPeer::with_files(
        &network,
        gated.clone() as Arc<dyn FileTransferService>,
        "alice",
        SessionSettings::default(),
    );
    alice.join(TEST_ROOM).await;

    let in_flight = tokio::spawn({
        let controller = alice.controller.clone();
        async move {
            controller
                .send_file(OutgoingFile::from_bytes("old.txt", b"old".to_vec()))
                .await
        }
    });
    gated.entered.notified().await;

    alice.controller.disconnect().await;
    alice.join("654321").await;
    gated.gate.add_permits(1);

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(SessionError::NotConnected)));
    assert!(alice.controller.get_history().await.is_empty());
    assert_eq!(alice.controller.status().await, ConnectionStatus::Connected);

    settle().await;
    let leaked = try_drain(&mut alice.events)
        .into_iter()
        .any(|e| matches!(e, SessionEvent::Message(_)));
    assert!(!leaked);
}

#[tokio::test]
async fn test_disconnect_releases_in_flight_send() {
    let network = LoopbackNetwork::new();
    let gated = Arc::new(GatedFiles::new(LoopbackFileTransfer::new()));
    let mut alice = TestPeer::with_files(
        &network,
        gated.clone() as Arc<dyn FileTransferService>,
        "alice",
        SessionSettings::default(),
    );
    alice.join(TEST_ROOM).await;

    let file = OutgoingFile::from_bytes("draft.md", b"# draft".to_vec());
    let stale = tokio::spawn({
        let controller = alice.controller.clone();
        let file = file.clone();
        async move { controller.send_file(file).await }
    });
    gated.entered.notified().await;

    alice.controller.disconnect().await;
    alice.join(TEST_ROOM).await;

    // The cleared key can be taken again by the new session
    let fresh = tokio::spawn({
        let controller = alice.controller.clone();
        let file = file.clone();
        async move { controller.send_file(file).await }
    });
    gated.entered.notified().await;

    // Semaphore is FIFO: the stale offer goes first and drops its guard
    gated.gate.add_permits(1);
    assert!(matches!(stale.await.unwrap(), Err(SessionError::NotConnected)));

    // The fresh holder keeps the key
    assert!(matches!(
        alice.controller.send_file(file).await,
        Err(SessionError::TransferInProgress(_))
    ));

    gated.gate.add_permits(1);
    let sent = fresh.await.unwrap().unwrap();
    let history = alice.controller.get_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id(), sent.id());
}
