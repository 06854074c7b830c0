//! Async test helpers
//!
//! Channel helpers that work for both bounded room-event streams and the
//! unbounded session-event stream.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for asserting that nothing arrives (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Receiving side of either mpsc flavour
pub trait TestReceiver {
    type Item;

    fn recv_next(&mut self) -> impl Future<Output = Option<Self::Item>> + '_;
    fn try_next(&mut self) -> Option<Self::Item>;
}

impl<T> TestReceiver for mpsc::Receiver<T> {
    type Item = T;

    fn recv_next(&mut self) -> impl Future<Output = Option<T>> + '_ {
        self.recv()
    }

    fn try_next(&mut self) -> Option<T> {
        self.try_recv().ok()
    }
}

impl<T> TestReceiver for mpsc::UnboundedReceiver<T> {
    type Item = T;

    fn recv_next(&mut self) -> impl Future<Output = Option<T>> + '_ {
        self.recv()
    }

    fn try_next(&mut self) -> Option<T> {
        self.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Receive from a channel with a timeout
pub async fn recv_timeout<R>(rx: &mut R, duration: Duration) -> Result<R::Item, RecvTimeoutError>
where
    R: TestReceiver,
{
    timeout(duration, rx.recv_next())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Next item or panic
pub async fn expect_next<R>(rx: &mut R) -> R::Item
where
    R: TestReceiver,
{
    match recv_timeout(rx, DEFAULT_TEST_TIMEOUT).await {
        Ok(item) => item,
        Err(e) => panic!("expected an item: {}", e),
    }
}

/// Skip items until one matches `predicate`, and return it
pub async fn wait_for<R, P>(rx: &mut R, mut predicate: P) -> R::Item
where
    R: TestReceiver,
    R::Item: std::fmt::Debug,
    P: FnMut(&R::Item) -> bool,
{
    let deadline = tokio::time::Instant::now() + DEFAULT_TEST_TIMEOUT;
    let mut skipped = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match recv_timeout(rx, remaining).await {
            Ok(item) if predicate(&item) => return item,
            Ok(item) => skipped.push(item),
            Err(e) => panic!("no matching item ({}); skipped {:?}", e, skipped),
        }
    }
}

/// Drain everything currently buffered without waiting
pub fn try_drain<R>(rx: &mut R) -> Vec<R::Item>
where
    R: TestReceiver,
{
    let mut results = Vec::new();
    while let Some(item) = rx.try_next() {
        results.push(item);
    }
    results
}

/// Give spawned tasks time to drain their queues.
///
/// Under a paused clock this returns as soon as every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_success() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(42).await.unwrap();

        let result = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_recv_timeout_times_out() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<i32>();

        let result = recv_timeout(&mut rx, SHORT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap_err(), RecvTimeoutError::Timeout);
    }

    #[tokio::test]
    async fn test_recv_timeout_closed() {
        let (tx, mut rx) = mpsc::channel::<i32>(1);
        drop(tx);

        let result = recv_timeout(&mut rx, DEFAULT_TEST_TIMEOUT).await;
        assert_eq!(result.unwrap_err(), RecvTimeoutError::Closed);
    }

    #[tokio::test]
    async fn test_wait_for_skips_non_matching() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..5 {
            tx.send(i).unwrap();
        }

        assert_eq!(wait_for(&mut rx, |i| *i == 3).await, 3);
        assert_eq!(try_drain(&mut rx), vec![4]);
    }
}
