// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Builds the hosts-file mapping published after each peerlist read:
//! `pm3`, `{machine_id}.pm3`, and `{host}.pm3` entries. Local IPs are
//! rewritten to `127.0.0.1` so same-host traffic short-circuits the
//! external interface.

use std::collections::BTreeMap;

use super::record::{key_for, Peer};

/// Build the hosts map from peers already sorted ascending by heartbeat,
/// so later (fresher) writers overwrite earlier ones for the same key.
pub fn build_hosts_map(peers_by_heartbeat_asc: &[Peer], self_id: u32) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("pm3".to_string(), "127.0.0.1".to_string());

    for peer in peers_by_heartbeat_asc {
        let ip = if peer.machine_id == self_id {
            "127.0.0.1".to_string()
        } else {
            peer.record.ip.clone()
        };
        map.insert(format!("{}.pm3", key_for(peer.machine_id)), ip.clone());
        map.insert(format!("{}.pm3", peer.record.host), ip);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::super::record::PeerRecord;
    use super::*;

    fn peer(machine_id: u32, host: &str, ip: &str, heartbeat: u64) -> Peer {
        Peer {
            machine_id,
            record: PeerRecord {
                host: host.to_string(),
                ip: ip.to_string(),
                lat: 0.0,
                lon: 0.0,
                country: "US".into(),
                isp: "isp".into(),
                heartbeat,
                ud: Default::default(),
                sd: Default::default(),
            },
            distance: 0.0,
            me: false,
        }
    }

    #[test]
    fn self_record_is_rewritten_to_loopback() {
        let peers = vec![peer(1, "node-a", "10.0.0.5", 100)];
        let map = build_hosts_map(&peers, 1);
        assert_eq!(map.get("node-a.pm3"), Some(&"127.0.0.1".to_string()));
        assert_eq!(map.get("00000001.pm3"), Some(&"127.0.0.1".to_string()));
    }

    #[test]
    fn later_writer_overwrites_earlier_for_same_key() {
        let peers = vec![
            peer(2, "shared", "10.0.0.1", 100),
            peer(2, "shared", "10.0.0.2", 200),
        ];
        let map = build_hosts_map(&peers, 99);
        assert_eq!(map.get("shared.pm3"), Some(&"10.0.0.2".to_string()));
    }

    #[test]
    fn repeated_updates_are_idempotent() {
        let peers = vec![peer(3, "node-c", "10.0.0.9", 300)];
        let a = build_hosts_map(&peers, 99);
        let b = build_hosts_map(&peers, 99);
        assert_eq!(a, b);
    }
}
