// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Cluster peerlist: each node publishes its own record into a
//! [`bucket::PeerBucket`] on a heartbeat, reads the full set back, derives
//! distance and liveness, and republishes the hosts-file mapping.

pub mod bucket;
pub mod distance;
pub mod hosts;
pub mod record;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use bucket::{BucketError, PeerBucket};
use record::{key_for, machine_id_from_key, Peer, PeerRecord};

use crate::monitoring::metrics::Metrics;

/// Self-record refresh cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A peer is alive iff its heartbeat is newer than this.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3600);
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Errors from a peerlist tick.
#[derive(Debug, Clone, Error)]
pub enum PeerlistError {
    #[error("peer bucket error: {0}")]
    Bucket(#[from] BucketError),
}

/// Invoked once per tick with the self record's system-data map. Must not
/// block.
pub trait SdSource: Send + Sync {
    fn populate(&self, sd: &mut BTreeMap<String, serde_json::Value>);
}

/// Receives the hosts mapping after each successful tick. The OS
/// hosts-file write is an external collaborator; tests use a no-op or
/// recording implementation.
pub trait HostsPublisher: Send + Sync {
    fn publish(&self, map: &BTreeMap<String, String>);
}

/// A publisher that does nothing, for nodes that manage their own hosts
/// file externally.
pub struct NullPublisher;

impl HostsPublisher for NullPublisher {
    fn publish(&self, _map: &BTreeMap<String, String>) {}
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct SelfRecord {
    host: String,
    ip: String,
    lat: f64,
    lon: f64,
    country: String,
    isp: String,
    ud: BTreeMap<String, serde_json::Value>,
}

/// Drives the gossip/health loop for one node.
pub struct PeerList<B: PeerBucket> {
    bucket: B,
    hosts_publisher: Arc<dyn HostsPublisher>,
    self_id: u32,
    self_record: RwLock<SelfRecord>,
    cached: RwLock<Vec<Peer>>,
    sd_sources: RwLock<Vec<Arc<dyn SdSource>>>,
    consecutive_failures: AtomicU32,
    last_err: RwLock<Option<PeerlistError>>,
    metrics: Option<Arc<Metrics>>,
}

impl<B: PeerBucket> PeerList<B> {
    pub fn new(bucket: B, self_id: u32, host: String, ip: String, lat: f64, lon: f64) -> Self {
        Self {
            bucket,
            hosts_publisher: Arc::new(NullPublisher),
            self_id,
            self_record: RwLock::new(SelfRecord {
                host,
                ip,
                lat,
                lon,
                country: String::new(),
                isp: String::new(),
                ud: BTreeMap::new(),
            }),
            cached: RwLock::new(Vec::new()),
            sd_sources: RwLock::new(Vec::new()),
            consecutive_failures: AtomicU32::new(0),
            last_err: RwLock::new(None),
            metrics: None,
        }
    }

    /// The most recent tick error surfaced after three consecutive
    /// failures, if any. Cleared on the next successful tick.
    pub fn err(&self) -> Option<PeerlistError> {
        self.last_err.read().expect("last_err lock poisoned").clone()
    }

    /// Record tick success/failure counts and the alive-peer gauge into a
    /// shared metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Swap in a real hosts-file publisher.
    pub fn with_hosts_publisher(mut self, publisher: Arc<dyn HostsPublisher>) -> Self {
        self.hosts_publisher = publisher;
        self
    }

    /// Register a system-data source, polled once per tick.
    pub fn register_sd_source(&self, source: Arc<dyn SdSource>) {
        self.sd_sources
            .write()
            .expect("sd_sources lock poisoned")
            .push(source);
    }

    /// The current cached, sorted peer view.
    pub fn peers(&self) -> Vec<Peer> {
        self.cached.read().expect("cached lock poisoned").clone()
    }

    /// Run one heartbeat/read/sort/publish cycle.
    pub async fn tick(&self) -> Result<(), PeerlistError> {
        let now = now_unix_ms();

        let mut sd = BTreeMap::new();
        for source in self.sd_sources.read().expect("sd_sources lock poisoned").iter() {
            source.populate(&mut sd);
        }

        let record = {
            let self_record = self.self_record.read().expect("self_record lock poisoned");
            PeerRecord {
                host: self_record.host.clone(),
                ip: self_record.ip.clone(),
                lat: self_record.lat,
                lon: self_record.lon,
                country: self_record.country.clone(),
                isp: self_record.isp.clone(),
                heartbeat: now,
                ud: self_record.ud.clone(),
                sd,
            }
        };

        self.bucket.put(&key_for(self.self_id), &record).await?;

        let entries = self.bucket.list().await?;
        let mut peers: Vec<Peer> = entries
            .into_iter()
            .filter_map(|(key, rec)| {
                machine_id_from_key(&key).map(|machine_id| Peer {
                    machine_id,
                    record: rec,
                    distance: 0.0,
                    me: machine_id == self.self_id,
                })
            })
            .collect();

        // Stable sort ascending by heartbeat: later writers overwrite
        // earlier ones when the hosts map is built.
        peers.sort_by(|a, b| a.record.heartbeat.cmp(&b.record.heartbeat));

        let hosts_map = hosts::build_hosts_map(&peers, self.self_id);
        self.hosts_publisher.publish(&hosts_map);

        let self_lat = self.self_record.read().expect("self_record lock poisoned").lat;
        let self_lon = self.self_record.read().expect("self_record lock poisoned").lon;
        for peer in peers.iter_mut() {
            peer.distance = distance::distance_m(self_lat, self_lon, peer.record.lat, peer.record.lon);
        }

        let timeout_ms = HEARTBEAT_TIMEOUT.as_millis() as u64;
        peers.sort_by(|a, b| {
            let a_alive = a.is_alive(now, timeout_ms);
            let b_alive = b.is_alive(now, timeout_ms);
            b_alive
                .cmp(&a_alive)
                .then_with(|| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal))
        });

        if let Some(m) = &self.metrics {
            let alive = peers.iter().filter(|p| p.is_alive(now, timeout_ms)).count();
            m.peerlist_alive_peers.set(alive as i64);
        }

        *self.cached.write().expect("cached lock poisoned") = peers;
        Ok(())
    }

    /// Run the tick loop until `cancel` fires. Never exits on its own: after
    /// [`MAX_CONSECUTIVE_FAILURES`] consecutive tick errors, the failure is
    /// recorded and surfaced through [`PeerList::err`], but the loop keeps
    /// ticking.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
            }

            match self.tick().await {
                Ok(()) => {
                    self.consecutive_failures.store(0, Ordering::Release);
                    *self.last_err.write().expect("last_err lock poisoned") = None;
                    if let Some(m) = &self.metrics {
                        m.peerlist_tick_success_total.inc();
                    }
                }
                Err(e) => {
                    if let Some(m) = &self.metrics {
                        m.peerlist_tick_failure_total.inc();
                    }
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(error = %e, failures, "peerlist tick failed");
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        error!("peerlist tick failed {MAX_CONSECUTIVE_FAILURES} times in a row");
                        *self.last_err.write().expect("last_err lock poisoned") = Some(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucket::MemoryBucket;

    #[tokio::test]
    async fn tick_publishes_and_caches_self_record() {
        let list = PeerList::new(MemoryBucket::new(), 1, "node-a".into(), "10.0.0.1".into(), 5.0, 5.0);
        list.tick().await.unwrap();
        let peers = list.peers();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].me);
    }

    #[tokio::test]
    async fn distance_sort_orders_alive_peers_by_proximity() {
        let bucket = MemoryBucket::new();
        bucket
            .put(
                &key_for(2),
                &PeerRecord {
                    host: "far".into(),
                    ip: "10.0.0.2".into(),
                    lat: 50.0,
                    lon: 50.0,
                    country: "US".into(),
                    isp: "isp".into(),
                    heartbeat: now_unix_ms(),
                    ud: Default::default(),
                    sd: Default::default(),
                },
            )
            .await
            .unwrap();
        bucket
            .put(
                &key_for(3),
                &PeerRecord {
                    host: "near".into(),
                    ip: "10.0.0.3".into(),
                    lat: 10.0,
                    lon: 10.0,
                    country: "US".into(),
                    isp: "isp".into(),
                    heartbeat: now_unix_ms(),
                    ud: Default::default(),
                    sd: Default::default(),
                },
            )
            .await
            .unwrap();

        let list = PeerList::new(bucket, 1, "node-a".into(), "10.0.0.1".into(), 5.0, 5.0);
        list.tick().await.unwrap();
        let peers = list.peers();

        let near_idx = peers.iter().position(|p| p.record.host == "near").unwrap();
        let far_idx = peers.iter().position(|p| p.record.host == "far").unwrap();
        assert!(near_idx < far_idx);
    }

    #[tokio::test]
    async fn dead_peer_sorts_after_alive_ones() {
        let bucket = MemoryBucket::new();
        bucket
            .put(
                &key_for(2),
                &PeerRecord {
                    host: "stale".into(),
                    ip: "10.0.0.2".into(),
                    lat: 1.0,
                    lon: 1.0,
                    country: "US".into(),
                    isp: "isp".into(),
                    heartbeat: 0,
                    ud: Default::default(),
                    sd: Default::default(),
                },
            )
            .await
            .unwrap();

        let list = PeerList::new(bucket, 1, "node-a".into(), "10.0.0.1".into(), 5.0, 5.0);
        list.tick().await.unwrap();
        let peers = list.peers();
        assert_eq!(peers.last().unwrap().record.host, "stale");
    }
}
