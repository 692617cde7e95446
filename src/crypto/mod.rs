// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Crypto primitives: the cluster secret, the deterministic CA, and the
//! mutual-TLS configuration derived from both.

pub mod ca;
pub mod cprng;
pub mod tls;

use zeroize::Zeroize;

/// Root of trust for a cluster. Never written to the wire; every other
/// derived value (CA key material, SNI suffix, signer key, leaf certs) is
/// reproducible from this and a derivation tag.
#[derive(Clone)]
pub struct ClusterSecret(Vec<u8>);

impl ClusterSecret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes for derivation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for ClusterSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for ClusterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ClusterSecret(..)")
    }
}
