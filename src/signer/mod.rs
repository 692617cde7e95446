// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! URL signer: AEAD-sealed out-of-band request digests bound to a
//! normalized URL as associated data.
//!
//! Key material is `SHA1(secret || "vhttp.URLSigner")[..16]`, sealed with
//! AES-128-GCM. The signature is presented as header `X-Psn` or query
//! parameter `psn`, and is only valid against the exact normalized URL it
//! was signed for.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

use crate::monitoring::metrics::Metrics;

const KEY_LABEL: &[u8] = b"vhttp.URLSigner";
pub const HEADER_NAME: &str = "X-Psn";
pub const QUERY_PARAM: &str = "psn";

/// Signer / verifier errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    /// AEAD open failed (wrong key, tampered ciphertext, or wrong AD).
    #[error("signature does not authenticate")]
    Invalid,
    /// Decoded bytes did not parse as a digest.
    #[error("digest payload is corrupt")]
    Corrupt,
    /// The digest's `expires` timestamp has passed.
    #[error("signature expired")]
    Expired,
    /// A required header did not match the digest's pinned value.
    #[error("header mismatch")]
    HeaderMismatch,
}

/// A sealed, URL-bound digest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Digest {
    /// Expiry as epoch milliseconds; `None` means no expiry.
    pub expires: Option<u64>,
    /// Headers that must match verbatim on the verifying request.
    pub headers: BTreeMap<String, String>,
    /// Headers injected into the request on successful verification.
    pub secret_headers: BTreeMap<String, String>,
    /// Optional `host/path` rewrite applied on success.
    pub rewrite: String,
}

fn write_varint_i64(out: &mut Vec<u8>, v: i64) {
    let mut u = (v << 1) ^ (v >> 63); // zigzag
    loop {
        let mut byte = (u & 0x7f) as u8;
        u >>= 7;
        if u != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if u == 0 {
            break;
        }
    }
}

fn read_varint_i64(buf: &[u8], pos: &mut usize) -> Result<i64, SignerError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf.get(*pos).ok_or(SignerError::Corrupt)?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(SignerError::Corrupt);
        }
    }
    Ok(((result >> 1) as i64) ^ -((result & 1) as i64))
}

fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn read_cstr<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a str, SignerError> {
    let start = *pos;
    let end = buf[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or(SignerError::Corrupt)?
        + start;
    *pos = end + 1;
    std::str::from_utf8(&buf[start..end]).map_err(|_| SignerError::Corrupt)
}

fn write_map(out: &mut Vec<u8>, map: &BTreeMap<String, String>) {
    for (k, v) in map {
        write_cstr(out, k);
        write_cstr(out, v);
    }
    out.push(0); // empty key terminates the map
}

fn read_map(buf: &[u8], pos: &mut usize) -> Result<BTreeMap<String, String>, SignerError> {
    let mut map = BTreeMap::new();
    loop {
        let key = read_cstr(buf, pos)?;
        if key.is_empty() {
            break;
        }
        let key = key.to_string();
        let value = read_cstr(buf, pos)?.to_string();
        map.insert(key, value);
    }
    Ok(map)
}

impl Digest {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint_i64(&mut out, self.expires.map(|e| e as i64).unwrap_or(-1));
        write_map(&mut out, &self.headers);
        write_map(&mut out, &self.secret_headers);
        write_cstr(&mut out, &self.rewrite);
        out
    }

    fn decode(buf: &[u8]) -> Result<Self, SignerError> {
        let mut pos = 0;
        let expires_raw = read_varint_i64(buf, &mut pos)?;
        let expires = if expires_raw < 0 {
            None
        } else {
            Some(expires_raw as u64)
        };
        let headers = read_map(buf, &mut pos)?;
        let secret_headers = read_map(buf, &mut pos)?;
        let rewrite = read_cstr(buf, &mut pos)?.to_string();
        Ok(Digest {
            expires,
            headers,
            secret_headers,
            rewrite,
        })
    }
}

/// Normalize a URL per the signer's AD-binding rules: lowercase scheme
/// stripped, trailing `/` removed (unless the whole path is `/`), query
/// string discarded.
pub fn normalize_url(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    let lower = without_query.to_ascii_lowercase();
    let stripped = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    if stripped.len() > 1 && stripped.ends_with('/') {
        stripped.trim_end_matches('/').to_string()
    } else {
        stripped.to_string()
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Seals and authenticates URL-bound digests for one cluster secret.
pub struct UrlSigner {
    key: [u8; 16],
    rng: SystemRandom,
    metrics: Option<Arc<Metrics>>,
}

impl UrlSigner {
    /// Derive a signer from the cluster secret.
    pub fn new(secret: &[u8]) -> Self {
        let mut seed = secret.to_vec();
        seed.extend_from_slice(KEY_LABEL);
        let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, &seed);
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest.as_ref()[..16]);
        Self {
            key,
            rng: SystemRandom::new(),
            metrics: None,
        }
    }

    /// Record verification success/failure counts into a shared metrics
    /// registry.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn unbound_key(&self) -> LessSafeKey {
        let unbound = UnboundKey::new(&AES_128_GCM, &self.key).expect("key is 16 bytes");
        LessSafeKey::new(unbound)
    }

    /// Seal `digest`, binding it to `url`'s normalized form. Returns
    /// `base64url(nonce || ciphertext || tag)`.
    pub fn sign(&self, url: &str, digest: &Digest) -> String {
        let ad = normalize_url(url);
        let key = self.unbound_key();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .expect("system RNG must not fail");
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = digest.encode();
        key.seal_in_place_append_tag(nonce, Aad::from(ad.as_bytes()), &mut in_out)
            .expect("AES-128-GCM seal cannot fail for a well-formed key");

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        URL_SAFE_NO_PAD.encode(out)
    }

    /// Open and validate a signature produced by [`UrlSigner::sign`]
    /// against `url`.
    pub fn verify(&self, url: &str, signature: &str) -> Result<Digest, SignerError> {
        let result = self.verify_inner(url, signature);
        if let Some(m) = &self.metrics {
            match &result {
                Ok(_) => m.signer_verify_success_total.inc(),
                Err(_) => m.signer_verify_failure_total.inc(),
            }
        }
        result
    }

    fn verify_inner(&self, url: &str, signature: &str) -> Result<Digest, SignerError> {
        let raw = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SignerError::Corrupt)?;
        if raw.len() < NONCE_LEN {
            return Err(SignerError::Corrupt);
        }
        let (nonce_bytes, sealed) = raw.split_at(NONCE_LEN);
        let mut nonce_arr = [0u8; NONCE_LEN];
        nonce_arr.copy_from_slice(nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_arr);

        let ad = normalize_url(url);
        let key = self.unbound_key();
        let mut in_out = sealed.to_vec();
        let plain = key
            .open_in_place(nonce, Aad::from(ad.as_bytes()), &mut in_out)
            .map_err(|_| SignerError::Invalid)?;

        let digest = Digest::decode(plain)?;

        if let Some(expires) = digest.expires {
            if now_unix_ms() >= expires {
                return Err(SignerError::Expired);
            }
        }

        Ok(digest)
    }

    /// Extract a presented signature from either the header or query form.
    pub fn extract_signature<'a>(
        header: Option<&'a str>,
        query_params: &'a [(String, String)],
    ) -> Option<&'a str> {
        if let Some(h) = header {
            return Some(h);
        }
        query_params
            .iter()
            .find(|(k, _)| k == QUERY_PARAM)
            .map(|(_, v)| v.as_str())
    }

    /// Check the incoming request's headers against `digest.headers`.
    pub fn check_headers(
        digest: &Digest,
        incoming: &BTreeMap<String, String>,
    ) -> Result<(), SignerError> {
        for (k, expected) in &digest.headers {
            match incoming.get(k) {
                Some(actual) if actual == expected => continue,
                _ => return Err(SignerError::HeaderMismatch),
            }
        }
        Ok(())
    }

    /// Apply `digest.rewrite` (`host/path`, split on the first `/`) to a
    /// `(host, path)` pair, replacing either side when present.
    pub fn apply_rewrite(digest: &Digest, host: &str, path: &str) -> (String, String) {
        if digest.rewrite.is_empty() {
            return (host.to_string(), path.to_string());
        }
        match digest.rewrite.split_once('/') {
            Some((new_host, new_path)) => {
                let h = if new_host.is_empty() {
                    host.to_string()
                } else {
                    new_host.to_string()
                };
                let p = if new_path.is_empty() {
                    path.to_string()
                } else {
                    format!("/{new_path}")
                };
                (h, p)
            }
            None => (digest.rewrite.clone(), path.to_string()),
        }
    }
}
