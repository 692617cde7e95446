// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Process-wide "shutdown begun" signal, closed on SIGINT/SIGTERM or via
//! [`Rundown::force`]. `with_context` derives a [`tokio_util::sync::CancellationToken`]-style
//! context that fires when either the parent or rundown fires.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared shutdown signal.
#[derive(Clone)]
pub struct Rundown {
    tx: Arc<watch::Sender<bool>>,
}

impl Rundown {
    /// Create a fresh, not-yet-fired rundown.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Install OS signal handlers (SIGINT/SIGTERM on unix) that fire this
    /// rundown. Spawns a background task; call once per process.
    pub fn install_signal_handlers(&self) {
        let rundown = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigint =
                    signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
                let mut sigterm =
                    signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                tokio::select! {
                    _ = sigint.recv() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
                info!("received ctrl-c");
            }
            rundown.force();
        });
    }

    /// Fire the rundown immediately.
    pub fn force(&self) {
        let _ = self.tx.send(true);
    }

    /// True once rundown has fired.
    pub fn is_down(&self) -> bool {
        *self.tx.subscribe().borrow()
    }

    /// Resolve once rundown fires.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Derive a `CancellationToken` that cancels when either `parent` or
    /// this rundown fires.
    pub fn with_context(&self, parent: tokio_util::sync::CancellationToken) -> tokio_util::sync::CancellationToken {
        let child = parent.child_token();
        let rundown = self.clone();
        let child_clone = child.clone();
        tokio::spawn(async move {
            rundown.wait().await;
            child_clone.cancel();
        });
        child
    }
}

impl Default for Rundown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn force_fires_wait() {
        let rundown = Rundown::new();
        assert!(!rundown.is_down());
        rundown.force();
        rundown.wait().await;
        assert!(rundown.is_down());
    }

    #[tokio::test]
    async fn with_context_cancels_on_force() {
        let rundown = Rundown::new();
        let parent = tokio_util::sync::CancellationToken::new();
        let child = rundown.with_context(parent.clone());
        assert!(!child.is_cancelled());
        rundown.force();
        child.cancelled().await;
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn with_context_cancels_on_parent() {
        let rundown = Rundown::new();
        let parent = tokio_util::sync::CancellationToken::new();
        let child = rundown.with_context(parent.clone());
        parent.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());
    }
}
