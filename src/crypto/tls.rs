// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Mutual-TLS configuration shared by the ALPN multiplexer and the RPC
//! dialer. Every peer trusts exactly one root: the cluster's deterministic
//! CA. A connection whose peer certificate does not chain to that root is
//! rejected before the handshake completes.

use std::sync::Arc;

use rustls::RootCertStore;
use thiserror::Error;

use super::ca::{LeafCert, RootCa};

/// TLS configuration errors.
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("failed to install root certificate")]
    Root,
    #[error("failed to build rustls server config")]
    Server,
    #[error("failed to build rustls client config")]
    Client,
}

fn root_store(root: &RootCa) -> Result<RootCertStore, TlsConfigError> {
    let mut store = RootCertStore::empty();
    store
        .add(root.cert_der())
        .map_err(|_| TlsConfigError::Root)?;
    Ok(store)
}

/// Derive the SNI common-name suffix all peers in a cluster share.
pub fn sni_suffix(secret: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, secret);
    format!("{}.pmesh.internal", hex::encode(&digest.as_ref()[..8]))
}

/// Build a server-side config requiring client certificates signed by the
/// cluster root, presenting `leaf` as this node's identity.
pub fn server_config(
    root: &RootCa,
    leaf: &LeafCert,
) -> Result<Arc<rustls::ServerConfig>, TlsConfigError> {
    let client_roots = Arc::new(root_store(root)?);
    let verifier = rustls::server::WebPkiClientVerifier::builder(client_roots)
        .build()
        .map_err(|_| TlsConfigError::Server)?;

    let mut cfg = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|_| TlsConfigError::Server)?
    .with_client_cert_verifier(verifier)
    .with_single_cert(vec![leaf.cert_der()], leaf.key_der())
    .map_err(|_| TlsConfigError::Server)?;

    cfg.alpn_protocols = Vec::new();
    Ok(Arc::new(cfg))
}

/// Build a client-side config that only trusts the cluster root and always
/// presents `leaf` for mutual auth.
pub fn client_config(
    root: &RootCa,
    leaf: &LeafCert,
) -> Result<Arc<rustls::ClientConfig>, TlsConfigError> {
    let server_roots = root_store(root)?;

    let cfg = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|_| TlsConfigError::Client)?
    .with_root_certificates(server_roots)
    .with_client_auth_cert(vec![leaf.cert_der()], leaf.key_der())
    .map_err(|_| TlsConfigError::Client)?;

    Ok(Arc::new(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ca::{derive_root_ca, issue_leaf};

    #[test]
    fn builds_server_and_client_configs() {
        let root = derive_root_ca(b"cluster-secret", "pm3").unwrap();
        let leaf = issue_leaf(&root, &["node-a".to_string()]).unwrap();
        server_config(&root, &leaf).unwrap();
        client_config(&root, &leaf).unwrap();
    }

    #[test]
    fn sni_suffix_is_deterministic() {
        assert_eq!(sni_suffix(b"secret"), sni_suffix(b"secret"));
        assert_ne!(sni_suffix(b"secret-a"), sni_suffix(b"secret-b"));
    }
}
