// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! `PeerBucket` abstracts the external replicated KV the spec calls the
//! "peer bucket". Production nodes publish into a real cluster bus
//! (outside this crate's scope); `MemoryBucket` and `SledBucket` exist so
//! the peerlist contract (gossip, distance sort, hosts-map publishing) can
//! be exercised in tests and single-node deployments without that
//! collaborator.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use super::record::PeerRecord;

/// Errors reading or writing the peer bucket.
#[derive(Debug, Clone, Error)]
pub enum BucketError {
    #[error("bucket I/O error: {0}")]
    Io(String),
    #[error("value for key {0:?} did not JSON-parse")]
    Malformed(String),
}

/// A keyed store of peer records, as published to/read from the external
/// replicated KV bus.
#[async_trait]
pub trait PeerBucket: Send + Sync {
    /// Publish (overwrite) this node's own record under `key`.
    async fn put(&self, key: &str, record: &PeerRecord) -> Result<(), BucketError>;

    /// List every key/record pair currently visible. Entries that fail to
    /// JSON-parse are silently dropped, not surfaced as an error (per the
    /// read-path contract: "drop entries that do not JSON-parse").
    async fn list(&self) -> Result<Vec<(String, PeerRecord)>, BucketError>;
}

/// An in-memory bucket, useful for tests and single-node runs.
#[derive(Default)]
pub struct MemoryBucket {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerBucket for MemoryBucket {
    async fn put(&self, key: &str, record: &PeerRecord) -> Result<(), BucketError> {
        let json = serde_json::to_string(record).map_err(|e| BucketError::Io(e.to_string()))?;
        self.entries
            .write()
            .expect("memory bucket lock poisoned")
            .insert(key.to_string(), json);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, PeerRecord)>, BucketError> {
        let entries = self.entries.read().expect("memory bucket lock poisoned");
        Ok(entries
            .iter()
            .filter_map(|(k, v)| serde_json::from_str::<PeerRecord>(v).ok().map(|r| (k.clone(), r)))
            .collect())
    }
}

/// A `sled`-backed bucket: durable single-node storage that satisfies the
/// same contract, for nodes running without an external bus collaborator.
pub struct SledBucket {
    tree: sled::Tree,
}

impl SledBucket {
    pub fn new(db: &sled::Db, tree_name: &str) -> Result<Self, BucketError> {
        let tree = db
            .open_tree(tree_name)
            .map_err(|e| BucketError::Io(e.to_string()))?;
        Ok(Self { tree })
    }
}

#[async_trait]
impl PeerBucket for SledBucket {
    async fn put(&self, key: &str, record: &PeerRecord) -> Result<(), BucketError> {
        let json = serde_json::to_vec(record).map_err(|e| BucketError::Io(e.to_string()))?;
        self.tree
            .insert(key.as_bytes(), json)
            .map_err(|e| BucketError::Io(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, PeerRecord)>, BucketError> {
        let mut out = Vec::new();
        for entry in self.tree.iter() {
            let (k, v) = entry.map_err(|e| BucketError::Io(e.to_string()))?;
            let key = String::from_utf8_lossy(&k).to_string();
            if let Ok(record) = serde_json::from_slice::<PeerRecord>(&v) {
                out.push((key, record));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(host: &str, heartbeat: u64) -> PeerRecord {
        PeerRecord {
            host: host.to_string(),
            ip: "10.0.0.1".into(),
            lat: 0.0,
            lon: 0.0,
            country: "US".into(),
            isp: "isp".into(),
            heartbeat,
            ud: Default::default(),
            sd: Default::default(),
        }
    }

    #[tokio::test]
    async fn memory_bucket_round_trips() {
        let bucket = MemoryBucket::new();
        bucket.put("00000001", &sample("node-a", 100)).await.unwrap();
        let entries = bucket.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "00000001");
        assert_eq!(entries[0].1.host, "node-a");
    }

    #[tokio::test]
    async fn sled_bucket_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let bucket = SledBucket::new(&db, "peers").unwrap();
        bucket.put("00000002", &sample("node-b", 200)).await.unwrap();
        let entries = bucket.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.host, "node-b");
    }

    #[tokio::test]
    async fn malformed_entries_are_dropped_not_errored() {
        let bucket = MemoryBucket::new();
        bucket
            .entries
            .write()
            .unwrap()
            .insert("bad".to_string(), "not json".to_string());
        let entries = bucket.list().await.unwrap();
        assert!(entries.is_empty());
    }
}
