// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Derives the 32-bit machine ID used to tag Snowflake IDs and peer
//! records: `sha1(hostname || "---pmesh" || hostID)`, high bit of byte 0
//! forced to 1 (locally-administered, per IEEE 802-style OUI convention).

use std::sync::OnceLock;

use ring::digest;
use thiserror::Error;

const SALT: &str = "---pmesh";

/// Errors deriving the machine ID.
#[derive(Debug, Error)]
pub enum MachineIdError {
    #[error("failed to resolve local hostname: {0}")]
    Hostname(#[source] std::io::Error),
}

fn host_id() -> String {
    std::fs::read_to_string("/etc/machine-id")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|_| {
            std::fs::read_to_string("/var/lib/dbus/machine-id")
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        })
}

fn derive(hostname: &str, host_id: &str) -> u32 {
    let mut input = Vec::with_capacity(hostname.len() + SALT.len() + host_id.len());
    input.extend_from_slice(hostname.as_bytes());
    input.extend_from_slice(SALT.as_bytes());
    input.extend_from_slice(host_id.as_bytes());

    let digest = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &input);
    let bytes = digest.as_ref();
    let mut id = [bytes[0] | 0x80, bytes[1], bytes[2], bytes[3]];
    id[0] |= 0x80;
    u32::from_be_bytes(id)
}

static MACHINE_ID: OnceLock<u32> = OnceLock::new();

/// The process-wide machine ID, computed once and cached.
pub fn machine_id() -> Result<u32, MachineIdError> {
    if let Some(id) = MACHINE_ID.get() {
        return Ok(*id);
    }
    let hostname = hostname::get()
        .map_err(MachineIdError::Hostname)?
        .to_string_lossy()
        .to_string();
    let id = derive(&hostname, &host_id());
    Ok(*MACHINE_ID.get_or_init(|| id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_bit_is_always_set() {
        let id = derive("node-a", "abc123");
        assert_eq!(id >> 31, 1);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive("node-a", "abc123");
        let b = derive("node-a", "abc123");
        assert_eq!(a, b);
    }

    #[test]
    fn different_hostnames_diverge() {
        let a = derive("node-a", "abc123");
        let b = derive("node-b", "abc123");
        assert_ne!(a, b);
    }

    #[test]
    fn machine_id_is_memoised() {
        let a = machine_id().unwrap();
        let b = machine_id().unwrap();
        assert_eq!(a, b);
    }
}
