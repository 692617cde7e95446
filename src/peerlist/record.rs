// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Peer record shapes: the JSON value published to the replicated bus, and
//! the derived in-memory `Peer` (machine ID, distance, `me` added back on
//! read).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The bus value: omits `machine_id`, `me`, and `distance` — those are
/// derived on read, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerRecord {
    pub host: String,
    pub ip: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    pub isp: String,
    pub heartbeat: u64,
    #[serde(default)]
    pub ud: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub sd: BTreeMap<String, serde_json::Value>,
}

/// A peer as observed locally: identity is `machine_id`; `distance` and
/// `me` are derived, never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct Peer {
    pub machine_id: u32,
    pub record: PeerRecord,
    pub distance: f64,
    pub me: bool,
}

impl Peer {
    /// A peer is alive if its heartbeat is within `timeout` of `now` (both
    /// unix millis).
    pub fn is_alive(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.record.heartbeat) < timeout_ms
    }
}

/// Render `machine_id` as the bus key: 8 lowercase hex characters.
pub fn key_for(machine_id: u32) -> String {
    format!("{machine_id:08x}")
}

/// Parse a bus key back into a machine ID.
pub fn machine_id_from_key(key: &str) -> Option<u32> {
    u32::from_str_radix(key, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips() {
        let id = 0xDEAD_BEEFu32;
        let key = key_for(id);
        assert_eq!(key, "deadbeef");
        assert_eq!(machine_id_from_key(&key), Some(id));
    }

    #[test]
    fn liveness_window() {
        let record = PeerRecord {
            host: "a".into(),
            ip: "10.0.0.1".into(),
            lat: 0.0,
            lon: 0.0,
            country: "US".into(),
            isp: "isp".into(),
            heartbeat: 1_000_000,
            ud: Default::default(),
            sd: Default::default(),
        };
        let peer = Peer {
            machine_id: 1,
            record,
            distance: 0.0,
            me: false,
        };
        let hour_ms = 3_600_000;
        assert!(peer.is_alive(1_000_000 + hour_ms - 1, hour_ms));
        assert!(!peer.is_alive(1_000_000 + hour_ms + 1, hour_ms));
    }
}
