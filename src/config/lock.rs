// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Single-instance file lock: `session.lock` holds an OS advisory lock for
//! the lifetime of the process; a sibling `session.pid` carries the PID of
//! the holder and is removed on release. Re-entrant within one process via
//! a counter, so nested `config` operations don't deadlock on themselves.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use thiserror::Error;

/// Errors acquiring or releasing the session lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance holds the lock at {0}")]
    AlreadyLocked(PathBuf),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct Inner {
    file: File,
    depth: u32,
}

/// Process-wide single-instance lock rooted at a directory.
pub struct SessionLock {
    lock_path: PathBuf,
    pid_path: PathBuf,
    inner: Mutex<Option<Inner>>,
}

impl SessionLock {
    /// Create a lock handle rooted at `dir` (not yet acquired).
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            lock_path: dir.join("session.lock"),
            pid_path: dir.join("session.pid"),
            inner: Mutex::new(None),
        }
    }

    /// Acquire the lock, or bump the re-entrant counter if this process
    /// already holds it.
    pub fn acquire(&self) -> Result<(), LockError> {
        let mut guard = self.inner.lock().expect("lock mutex poisoned");
        if let Some(inner) = guard.as_mut() {
            inner.depth += 1;
            return Ok(());
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| LockError::Io {
                path: self.lock_path.clone(),
                source,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| LockError::AlreadyLocked(self.lock_path.clone()))?;

        fs::write(&self.pid_path, std::process::id().to_string()).map_err(|source| {
            LockError::Io {
                path: self.pid_path.clone(),
                source,
            }
        })?;

        *guard = Some(Inner { file, depth: 1 });
        Ok(())
    }

    /// Release one level of the re-entrant counter; the underlying OS lock
    /// and `session.pid` are removed once the counter reaches zero.
    pub fn release(&self) {
        let mut guard = self.inner.lock().expect("lock mutex poisoned");
        let Some(inner) = guard.as_mut() else {
            return;
        };
        inner.depth -= 1;
        if inner.depth == 0 {
            let inner = guard.take().expect("checked above");
            let _ = fs2::FileExt::unlock(&inner.file);
            let _ = fs::remove_file(&self.pid_path);
        }
    }

    /// True if this process currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.lock().expect("lock mutex poisoned").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_clears_pid_file() {
        let dir = tempdir().unwrap();
        let lock = SessionLock::new(dir.path());
        lock.acquire().unwrap();
        assert!(dir.path().join("session.pid").exists());
        lock.release();
        assert!(!dir.path().join("session.pid").exists());
        assert!(!lock.is_held());
    }

    #[test]
    fn reentrant_acquire_within_process() {
        let dir = tempdir().unwrap();
        let lock = SessionLock::new(dir.path());
        lock.acquire().unwrap();
        lock.acquire().unwrap();
        lock.release();
        assert!(lock.is_held());
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    fn second_handle_on_same_file_is_rejected() {
        let dir = tempdir().unwrap();
        let a = SessionLock::new(dir.path());
        let b = SessionLock::new(dir.path());
        a.acquire().unwrap();
        let err = b.acquire().unwrap_err();
        assert!(matches!(err, LockError::AlreadyLocked(_)));
        a.release();
    }
}
