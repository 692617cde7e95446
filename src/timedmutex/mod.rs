// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! A mutex built on a 1-buffered channel instead of a futex, so a waiter can
//! abandon its attempt after a timeout or cancellation without poisoning the
//! lock for anyone else.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Errors from a timed lock attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The timeout elapsed before the lock became available.
    #[error("timed out waiting for lock")]
    Timeout,
    /// The supplied cancellation context fired before the lock became
    /// available.
    #[error("lock wait was cancelled")]
    Cancelled,
}

/// A held guard; dropping it (or calling [`TimedMutex::unlock`] through it)
/// releases the lock.
pub struct Guard<'a> {
    mutex: &'a TimedMutex,
    released: bool,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.mutex.release();
        }
    }
}

impl Guard<'_> {
    /// Explicitly release the lock (equivalent to dropping the guard).
    pub fn unlock(mut self) {
        self.released = true;
        self.mutex.release();
    }
}

/// A mutex whose single token of capacity lives in an `mpsc` channel of
/// depth 1. Acquiring is `recv()`, releasing is `send(())`.
pub struct TimedMutex {
    tx: mpsc::Sender<()>,
    rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl TimedMutex {
    /// Create a new, unlocked mutex.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Seed the one token of capacity.
        let _ = tx.try_send(());
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn release(&self) {
        let _ = self.tx.try_send(());
    }

    /// Acquire the lock, waiting indefinitely.
    pub async fn lock(&self) -> Guard<'_> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.expect("sender half never dropped");
        Guard {
            mutex: self,
            released: false,
        }
    }

    /// Acquire the lock, giving up after `timeout`.
    pub async fn try_lock(&self, timeout: Duration) -> Result<Guard<'_>, LockError> {
        let deadline = Instant::now() + timeout;
        self.try_lock_until(deadline).await
    }

    /// Acquire the lock, giving up at `deadline`.
    pub async fn try_lock_until(&self, deadline: Instant) -> Result<Guard<'_>, LockError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            acquired = rx.recv() => {
                acquired.expect("sender half never dropped");
                Ok(Guard { mutex: self, released: false })
            }
            _ = tokio::time::sleep_until(deadline) => Err(LockError::Timeout),
        }
    }

    /// Acquire the lock, giving up if `ctx` cancels first.
    pub async fn try_lock_context(&self, ctx: &CancellationToken) -> Result<Guard<'_>, LockError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            acquired = rx.recv() => {
                acquired.expect("sender half never dropped");
                Ok(Guard { mutex: self, released: false })
            }
            _ = ctx.cancelled() => Err(LockError::Cancelled),
        }
    }
}

impl Default for TimedMutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn lock_then_unlock_allows_reacquire() {
        let mutex = TimedMutex::new();
        let guard = mutex.lock().await;
        guard.unlock();
        let _guard2 = mutex.lock().await;
    }

    #[tokio::test]
    async fn try_lock_times_out_when_held() {
        let mutex = TimedMutex::new();
        let _guard = mutex.lock().await;
        let err = mutex.try_lock(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, LockError::Timeout);
    }

    #[tokio::test]
    async fn try_lock_context_cancels() {
        let mutex = TimedMutex::new();
        let _guard = mutex.lock().await;
        let ctx = CancellationToken::new();
        let ctx2 = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx2.cancel();
        });
        let err = mutex.try_lock_context(&ctx).await.unwrap_err();
        assert_eq!(err, LockError::Cancelled);
    }

    #[tokio::test]
    async fn drop_releases_lock_for_next_waiter() {
        let mutex = Arc::new(TimedMutex::new());
        {
            let _guard = mutex.lock().await;
        }
        let _guard2 = mutex
            .try_lock(Duration::from_millis(50))
            .await
            .expect("lock should be free after drop");
    }
}
