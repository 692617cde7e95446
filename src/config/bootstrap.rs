// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! First-run secret generation and atomic `config.json` persistence.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors bootstrapping or persisting the on-disk config.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("I/O error reading/writing config at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config.json: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("secret generation failed")]
    Random,
}

/// The on-disk shape of `config.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub cluster: String,
    /// Lowercase, unpadded base32-encoded 32-byte cluster secret.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub topology: Vec<String>,
    #[serde(default)]
    pub advertise_addr: String,
    #[serde(default)]
    pub peer_user_data: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub local_user_data: BTreeMap<String, serde_json::Value>,
}

fn generate_secret() -> Result<String, BootstrapError> {
    let rng = SystemRandom::new();
    let mut raw = [0u8; 32];
    rng.fill(&mut raw).map_err(|_| BootstrapError::Random)?;
    let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &raw);
    Ok(encoded.to_lowercase())
}

/// Load `config.json` under `dir`, creating it (with a freshly generated
/// secret) if absent or if the existing secret is empty. Returns the
/// resolved config either way.
pub fn load_or_init(dir: &Path) -> Result<Config, BootstrapError> {
    let path = dir.join("config.json");

    let mut config = match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(BootstrapError::Malformed)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
        Err(source) => {
            return Err(BootstrapError::Io {
                path: path.clone(),
                source,
            })
        }
    };

    if config.secret.is_empty() {
        config.secret = generate_secret()?;
        persist(dir, &config)?;
    }

    Ok(config)
}

/// Atomically persist `config` to `config.json` under `dir` (write to a
/// temp file, then rename over the target — rename is atomic on the same
/// filesystem).
pub fn persist(dir: &Path, config: &Config) -> Result<(), BootstrapError> {
    fs::create_dir_all(dir).map_err(|source| BootstrapError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join("config.json");
    let tmp_path = dir.join("config.json.tmp");
    let body = serde_json::to_string_pretty(config).map_err(BootstrapError::Malformed)?;

    fs::write(&tmp_path, body).map_err(|source| BootstrapError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, &path).map_err(|source| BootstrapError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_run_generates_secret() {
        let dir = tempdir().unwrap();
        let config = load_or_init(dir.path()).unwrap();
        assert!(!config.secret.is_empty());
        assert_eq!(config.secret, config.secret.to_lowercase());
        assert!(!config.secret.contains('='));
    }

    #[test]
    fn second_load_keeps_existing_secret() {
        let dir = tempdir().unwrap();
        let first = load_or_init(dir.path()).unwrap();
        let second = load_or_init(dir.path()).unwrap();
        assert_eq!(first.secret, second.secret);
    }

    #[test]
    fn persist_is_atomic_and_round_trips() {
        let dir = tempdir().unwrap();
        let mut config = load_or_init(dir.path()).unwrap();
        config.role = "edge".to_string();
        persist(dir.path(), &config).unwrap();
        assert!(!dir.path().join("config.json.tmp").exists());

        let reloaded = load_or_init(dir.path()).unwrap();
        assert_eq!(reloaded.role, "edge");
    }
}
