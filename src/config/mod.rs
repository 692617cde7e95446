// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Persisted node state: `$HOME` resolution, the `config.json` bootstrap,
//! the single-instance session lock, and machine-ID derivation.

pub mod bootstrap;
pub mod lock;
pub mod machine;

use std::path::PathBuf;

pub use bootstrap::Config;
pub use lock::SessionLock;

/// Resolves the node's home directory: an explicit absolute path, or
/// `~/.pmesh` (optionally suffixed `-<env>`) under the user's real `$HOME`.
pub fn resolve_home(explicit: Option<&str>, env: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            return p;
        }
    }

    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    match env {
        Some(env) if !env.is_empty() => home.join(format!(".pmesh-{env}")),
        _ => home.join(".pmesh"),
    }
}

/// Ensure the standard subdirectories (`log/`, `store/`, `certs/`, `asn/`)
/// exist under `home`.
pub fn ensure_layout(home: &std::path::Path) -> std::io::Result<()> {
    for sub in ["log", "store", "certs", "asn"] {
        std::fs::create_dir_all(home.join(sub))?;
    }
    Ok(())
}
