// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Deterministic CA + leaf certificate issuance.
//!
//! Two nodes sharing a cluster secret compute byte-identical root CAs and
//! leaf certificates without ever exchanging key material: every private
//! key is a P-256 scalar pulled from [`Cprng`], itself seeded from the
//! secret (and, for leaves, from the root's key plus the requested hosts).

use std::net::IpAddr;

use p256::pkcs8::EncodePrivateKey;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, SanType,
};
use thiserror::Error;
use time::OffsetDateTime;

use super::cprng::Cprng;

/// CA / leaf issuance errors.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("failed to derive a valid P-256 scalar")]
    ScalarDerivation,
    #[error("certificate parameter construction failed")]
    Params,
    #[error("certificate signing failed")]
    Signing,
    #[error("no hosts supplied for leaf issuance")]
    NoHosts,
}

/// Root CA, valid 2000-01-01 through 2323-01-01 per the cluster-secret
/// derivation contract.
pub struct RootCa {
    cert: rcgen::Certificate,
    key_pair: KeyPair,
    /// Raw root private-key bytes, used as seed material for leaf issuance.
    root_key_bytes: Vec<u8>,
}

impl RootCa {
    /// PEM-encoded certificate.
    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// DER-encoded certificate, as trusted by `rustls`.
    pub fn cert_der(&self) -> rustls_pki_types::CertificateDer<'static> {
        self.cert.der().clone()
    }
}

/// An issued leaf certificate plus its private key.
pub struct LeafCert {
    cert: rcgen::Certificate,
    key_pair: KeyPair,
}

impl LeafCert {
    /// PEM-encoded certificate chain entry (leaf only; the CA is trusted
    /// independently by both peers).
    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// PEM-encoded PKCS#8 private key.
    pub fn key_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// DER-encoded certificate.
    pub fn cert_der(&self) -> rustls_pki_types::CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// DER-encoded PKCS#8 private key.
    pub fn key_der(&self) -> rustls_pki_types::PrivateKeyDer<'static> {
        rustls_pki_types::PrivateKeyDer::Pkcs8(
            rustls_pki_types::PrivatePkcs8KeyDer::from(self.key_pair.serialize_der()),
        )
    }
}

/// Pull P-256 scalars out of `rng` until one lands in the valid range
/// `[1, n)`, then hand rcgen a PKCS#8 keypair built from it.
fn derive_p256_keypair(rng: &mut Cprng) -> Result<(KeyPair, Vec<u8>), CaError> {
    for _ in 0..16 {
        let candidate = rng.next_bytes(32);
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&candidate);
        if let Ok(secret) = p256::SecretKey::from_bytes((&arr).into()) {
            let pkcs8 = secret
                .to_pkcs8_der()
                .map_err(|_| CaError::ScalarDerivation)?;
            let key_pair =
                KeyPair::from_der(pkcs8.as_bytes()).map_err(|_| CaError::ScalarDerivation)?;
            return Ok((key_pair, candidate));
        }
    }
    Err(CaError::ScalarDerivation)
}

fn not_before() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(946_684_800).expect("2000-01-01 is representable")
}

fn not_after() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(11_138_486_400).expect("2323-01-01 is representable")
}

/// Derive the root CA deterministically from `secret` and a common name.
pub fn derive_root_ca(secret: &[u8], cn: &str) -> Result<RootCa, CaError> {
    let mut seed = secret.to_vec();
    seed.extend_from_slice(b"-n");
    let mut rng = Cprng::new(&seed);

    let (key_pair, root_key_bytes) = derive_p256_keypair(&mut rng)?;

    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(|_| CaError::Params)?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = not_before();
    params.not_after = not_after();

    let cert = params
        .self_signed(&key_pair)
        .map_err(|_| CaError::Signing)?;

    Ok(RootCa {
        cert,
        key_pair,
        root_key_bytes,
    })
}

fn san_entries(hosts: &[String]) -> Vec<SanType> {
    let mut sans = Vec::with_capacity(hosts.len() * 2);
    for host in hosts {
        if let Ok(ip) = host.parse::<IpAddr>() {
            sans.push(SanType::IpAddress(ip));
            continue;
        }
        if let Ok(name) = rcgen::Ia5String::try_from(host.as_str()) {
            sans.push(SanType::DnsName(name.clone()));
        }
        let wildcard = format!("*.{host}");
        if let Ok(name) = rcgen::Ia5String::try_from(wildcard.as_str()) {
            sans.push(SanType::DnsName(name));
        }
    }
    sans
}

/// Issue a leaf certificate for `hosts`, signed by `root`.
///
/// `Associate`s each host into the leaf CPRNG (seeded from the root's key
/// plus the requested hosts) before deriving the leaf key, per the
/// cluster-secret derivation contract.
pub fn issue_leaf(root: &RootCa, hosts: &[String]) -> Result<LeafCert, CaError> {
    if hosts.is_empty() {
        return Err(CaError::NoHosts);
    }

    let mut seed = root.root_key_bytes.clone();
    for host in hosts {
        seed.extend_from_slice(host.as_bytes());
    }
    let mut rng = Cprng::new(&seed);
    for host in hosts {
        rng.associate(host.as_bytes());
    }

    let (key_pair, _) = derive_p256_keypair(&mut rng)?;

    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(|_| CaError::Params)?;
    params.subject_alt_names = san_entries(hosts);
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, hosts[0].as_str());
    params.distinguished_name = dn;
    params.not_before = not_before();
    params.not_after = not_after();

    let cert = params
        .signed_by(&key_pair, &root.cert, &root.key_pair)
        .map_err(|_| CaError::Signing)?;

    Ok(LeafCert { cert, key_pair })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_ca_is_deterministic() {
        let a = derive_root_ca(b"cluster-secret", "pm3").unwrap();
        let b = derive_root_ca(b"cluster-secret", "pm3").unwrap();
        assert_eq!(a.cert.der().as_ref(), b.cert.der().as_ref());
    }

    #[test]
    fn leaf_cert_is_deterministic() {
        let root = derive_root_ca(b"cluster-secret", "pm3").unwrap();
        let hosts = vec!["node-a".to_string()];
        let a = issue_leaf(&root, &hosts).unwrap();
        let b = issue_leaf(&root, &hosts).unwrap();
        assert_eq!(a.cert.der().as_ref(), b.cert.der().as_ref());
    }

    #[test]
    fn different_hosts_different_leaf() {
        let root = derive_root_ca(b"cluster-secret", "pm3").unwrap();
        let a = issue_leaf(&root, &["node-a".to_string()]).unwrap();
        let b = issue_leaf(&root, &["node-b".to_string()]).unwrap();
        assert_ne!(a.cert.der().as_ref(), b.cert.der().as_ref());
    }

    #[test]
    fn different_secret_different_root() {
        let a = derive_root_ca(b"secret-one", "pm3").unwrap();
        let b = derive_root_ca(b"secret-two", "pm3").unwrap();
        assert_ne!(a.cert.der().as_ref(), b.cert.der().as_ref());
    }
}
