// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! `PoolMux`: an adaptive connection pool over either dedicated streams or
//! a shared stream-multiplexed session. Default pool size 64, default
//! preconnect count 2.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::monitoring::metrics::Metrics;

pub const DEFAULT_MAX_CONNS: usize = 64;
pub const DEFAULT_PRECONNECT: usize = 2;

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
}

/// A pooled client's liveness/occupancy signal: `>0` busy, `0` idle, `-1`
/// dead or closed.
pub trait PoolClient: Send + Sync {
    fn busy(&self) -> i64;
}

/// How the pool obtains new connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: PoolClient + 'static;

    async fn connect(&self) -> Result<Arc<Self::Client>, PoolError>;

    /// True for codes (YRPC) where, once slots are full, callers should
    /// share one multiplexed session instead of contending for a slot.
    fn is_stream_multiplexed(&self) -> bool {
        false
    }
}

/// A client handed back from [`PoolMux::acquire`], with the discipline the
/// caller must honour: `unique` clients must go through
/// [`PoolMux::release`]; shared clients must not be treated exclusively.
pub struct Acquired<C> {
    pub client: Arc<C>,
    pub unique: bool,
}

struct Slots<C> {
    entries: Vec<Option<Arc<C>>>,
}

impl<C: PoolClient> Slots<C> {
    fn first_dead_or_empty(&mut self) -> Option<usize> {
        for (i, slot) in self.entries.iter_mut().enumerate() {
            match slot {
                None => return Some(i),
                Some(c) if c.busy() == -1 => {
                    *slot = None;
                    return Some(i);
                }
                _ => {}
            }
        }
        None
    }

    fn first_idle(&mut self) -> Option<Arc<C>> {
        for slot in self.entries.iter_mut() {
            match slot {
                Some(c) if c.busy() == -1 => *slot = None,
                Some(c) if c.busy() == 0 => return Some(c.clone()),
                _ => {}
            }
        }
        None
    }

    fn least_busy(&mut self) -> Option<Arc<C>> {
        let mut best: Option<(usize, i64)> = None;
        for (i, slot) in self.entries.iter_mut().enumerate() {
            if let Some(c) = slot {
                let busy = c.busy();
                if busy == -1 {
                    *slot = None;
                    continue;
                }
                if best.map(|(_, b)| busy < b).unwrap_or(true) {
                    best = Some((i, busy));
                }
            }
        }
        best.map(|(i, _)| self.entries[i].clone().expect("checked above"))
    }
}

/// An adaptive pool over a [`Connector`].
pub struct PoolMux<C: Connector> {
    connector: C,
    max_conns: usize,
    slots: Mutex<Slots<C::Client>>,
    idle_tx: mpsc::Sender<Arc<C::Client>>,
    idle_rx: Mutex<mpsc::Receiver<Arc<C::Client>>>,
    shared: Mutex<Option<Arc<C::Client>>>,
    busy_count: AtomicI64,
    closed: AtomicBool,
    metrics: Option<Arc<Metrics>>,
}

impl<C: Connector> PoolMux<C> {
    pub fn new(connector: C, max_conns: usize) -> Self {
        let (idle_tx, idle_rx) = mpsc::channel(max_conns.max(1));
        Self {
            connector,
            max_conns,
            slots: Mutex::new(Slots {
                entries: (0..max_conns).map(|_| None).collect(),
            }),
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
            shared: Mutex::new(None),
            busy_count: AtomicI64::new(0),
            closed: AtomicBool::new(false),
            metrics: None,
        }
    }

    /// Record pool events (dedicated/idle acquisitions, dial failures) into
    /// a shared metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn dial(&self) -> Result<Arc<C::Client>, PoolError> {
        match self.connector.connect().await {
            Ok(client) => Ok(client),
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.pool_dial_failure_total.inc();
                }
                Err(e)
            }
        }
    }

    /// Lazily fill up to `k` idle slots.
    pub async fn preconnect(&self, k: usize) -> Result<(), PoolError> {
        for _ in 0..k {
            let mut slots = self.slots.lock().await;
            let Some(idx) = slots.first_dead_or_empty() else {
                return Ok(());
            };
            drop(slots);

            let client = self.dial().await?;
            let mut slots = self.slots.lock().await;
            slots.entries[idx] = Some(client);
        }
        Ok(())
    }

    /// Acquire a client per the pool's four-step discipline.
    pub async fn acquire(&self) -> Result<Acquired<C::Client>, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        // (a) pop a free idle client from the queue, if fresh.
        {
            let mut rx = self.idle_rx.lock().await;
            while let Ok(client) = rx.try_recv() {
                if client.busy() != -1 {
                    self.busy_count.fetch_add(1, Ordering::AcqRel);
                    if let Some(m) = &self.metrics {
                        m.pool_idle_total.inc();
                    }
                    return Ok(Acquired {
                        client,
                        unique: true,
                    });
                }
            }
        }

        // (b) scan the slot table for an idle slot, clearing dead ones.
        {
            let mut slots = self.slots.lock().await;
            if let Some(client) = slots.first_idle() {
                drop(slots);
                self.busy_count.fetch_add(1, Ordering::AcqRel);
                if let Some(m) = &self.metrics {
                    m.pool_idle_total.inc();
                }
                return Ok(Acquired {
                    client,
                    unique: true,
                });
            }
        }

        // (c) open a new connection into the first empty slot.
        {
            let mut slots = self.slots.lock().await;
            if let Some(idx) = slots.first_dead_or_empty() {
                drop(slots);
                let client = self.dial().await?;
                let mut slots = self.slots.lock().await;
                slots.entries[idx] = Some(client.clone());
                drop(slots);
                self.busy_count.fetch_add(1, Ordering::AcqRel);
                if let Some(m) = &self.metrics {
                    m.pool_busy_total.inc();
                }
                return Ok(Acquired {
                    client,
                    unique: true,
                });
            }
        }

        // (d) full: share a multiplexed session, or the least-busy slot.
        if self.connector.is_stream_multiplexed() {
            let mut shared = self.shared.lock().await;
            if shared.as_ref().map(|c| c.busy() == -1).unwrap_or(true) {
                *shared = Some(self.dial().await?);
            }
            return Ok(Acquired {
                client: shared.clone().expect("just set"),
                unique: false,
            });
        }

        let mut slots = self.slots.lock().await;
        match slots.least_busy() {
            Some(client) => Ok(Acquired {
                client,
                unique: false,
            }),
            None => Err(PoolError::Connect("no live slots".to_string())),
        }
    }

    /// Return a client to the pool iff it was unique and the pool is open.
    pub async fn release(&self, acquired: Acquired<C::Client>) {
        if acquired.unique {
            self.busy_count.fetch_sub(1, Ordering::AcqRel);
            if !self.closed.load(Ordering::Acquire) {
                let _ = self.idle_tx.try_send(acquired.client);
            }
        }
    }

    /// Current number of in-flight dedicated (slot-backed) acquisitions not
    /// yet released; `-1` once the pool is closed.
    pub fn busy_count(&self) -> i64 {
        if self.closed.load(Ordering::Acquire) {
            return -1;
        }
        self.busy_count.load(Ordering::Acquire)
    }

    /// Close every live slot and the shared session, then run `after_close`
    /// (YRPC uses this to send a graceful GoAway).
    pub async fn close<F>(&self, after_close: F)
    where
        F: FnOnce() + Send,
    {
        self.closed.store(true, Ordering::Release);
        let mut slots = self.slots.lock().await;
        for slot in slots.entries.iter_mut() {
            *slot = None;
        }
        drop(slots);
        self.shared.lock().await.take();
        after_close();
    }

    pub fn max_conns(&self) -> usize {
        self.max_conns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FakeClient {
        busy: AtomicI64,
    }

    impl PoolClient for FakeClient {
        fn busy(&self) -> i64 {
            self.busy.load(Ordering::Acquire)
        }
    }

    struct FakeConnector {
        connects: AtomicU32,
        multiplexed: bool,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Client = FakeClient;

        async fn connect(&self) -> Result<Arc<Self::Client>, PoolError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeClient {
                busy: AtomicI64::new(0),
            }))
        }

        fn is_stream_multiplexed(&self) -> bool {
            self.multiplexed
        }
    }

    #[tokio::test]
    async fn acquire_opens_new_connections_up_to_capacity() {
        let pool = PoolMux::new(
            FakeConnector {
                connects: AtomicU32::new(0),
                multiplexed: false,
            },
            2,
        );

        let a = pool.acquire().await.unwrap();
        assert!(a.unique);
        a.client.busy.store(1, Ordering::Release);

        let b = pool.acquire().await.unwrap();
        assert!(b.unique);
        b.client.busy.store(1, Ordering::Release);

        // Pool is full and not multiplexed: fall back to least-busy slot.
        let c = pool.acquire().await.unwrap();
        assert!(!c.unique);
    }

    #[tokio::test]
    async fn full_multiplexed_pool_shares_one_session() {
        let pool = PoolMux::new(
            FakeConnector {
                connects: AtomicU32::new(0),
                multiplexed: true,
            },
            1,
        );
        let a = pool.acquire().await.unwrap();
        a.client.busy.store(1, Ordering::Release);

        let b = pool.acquire().await.unwrap();
        assert!(!b.unique);
        let c = pool.acquire().await.unwrap();
        assert!(!c.unique);
        assert!(Arc::ptr_eq(&b.client, &c.client));
    }

    #[tokio::test]
    async fn release_of_unique_client_makes_it_reusable() {
        let pool = PoolMux::new(
            FakeConnector {
                connects: AtomicU32::new(0),
                multiplexed: false,
            },
            2,
        );
        let a = pool.acquire().await.unwrap();
        let client = a.client.clone();
        pool.release(a).await;

        let b = pool.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&client, &b.client));
    }

    #[tokio::test]
    async fn close_reports_busy_count_negative_one() {
        let pool = PoolMux::new(
            FakeConnector {
                connects: AtomicU32::new(0),
                multiplexed: false,
            },
            2,
        );
        pool.close(|| {}).await;
        assert_eq!(pool.busy_count(), -1);
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
