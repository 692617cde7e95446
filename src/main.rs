// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Standalone node entrypoint. Wires the library's modules together for a
//! single-process smoke-test deployment; the real service-mesh product's
//! supervisor (out of scope here) would drive these modules directly
//! instead of through a binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pmesh_core::config::{self, machine};
use pmesh_core::crypto::{ca, tls};
use pmesh_core::monitoring::metrics::Metrics;
use pmesh_core::mux::AlpnMux;
use pmesh_core::peerlist::bucket::MemoryBucket;
use pmesh_core::peerlist::PeerList;
use pmesh_core::rpc::{jrpc, ALPN_JRPC};
use pmesh_core::rundown::Rundown;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn print_banner() {
    let sha = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown");
    let built = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown");
    info!(git_sha = sha, built_at = built, "pmesh-core starting");
}

struct Echo;

#[async_trait::async_trait]
impl jrpc::Handler for Echo {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, String> {
        match method {
            "echo" => Ok(params),
            _ => Err(jrpc::METHOD_NOT_FOUND.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    print_banner();

    let home = config::resolve_home(None, std::env::var("PM3_ENV").ok().as_deref());
    config::ensure_layout(&home).context("failed to lay out home directory")?;

    let lock = config::SessionLock::new(&home);
    lock.acquire().context("another pmesh-core instance is already running")?;

    let cfg = config::bootstrap::load_or_init(&home).context("failed to bootstrap config.json")?;
    let machine_id = machine::machine_id().context("failed to derive machine ID")?;

    let root = ca::derive_root_ca(cfg.secret.as_bytes(), "pmesh-cluster")
        .context("failed to derive cluster root CA")?;
    let host = env("PM3_HOST", "node-local");
    let leaf = ca::issue_leaf(&root, std::slice::from_ref(&host)).context("failed to issue leaf cert")?;
    let server_config = tls::server_config(&root, &leaf).context("failed to build TLS server config")?;

    let bind_addr: SocketAddr = env("PM3_BIND", "0.0.0.0:8443")
        .parse()
        .context("invalid PM3_BIND address")?;

    let rundown = Rundown::new();
    rundown.install_signal_handlers();
    let shutdown = rundown.with_context(tokio_util::sync::CancellationToken::new());

    let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);

    let mux = AlpnMux::bind(bind_addr, server_config, true)
        .await
        .context("failed to bind ALPN mux")?
        .with_metrics(metrics.clone());
    info!(addr = %mux.addr(), "mux listening");

    let mut jrpc_listener = mux.listen(&[ALPN_JRPC]).context("failed to register JRPC sub-listener")?;
    let accept_shutdown = shutdown.clone();
    let accept_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = accept_shutdown.cancelled() => return,
                stream = jrpc_listener.accept() => {
                    let Some(stream) = stream else { return };
                    tokio::spawn(async move {
                        if let Err(e) = jrpc::serve_one(stream, &Echo).await {
                            warn!(error = %e, "jrpc call failed");
                        }
                    });
                }
            }
        }
    });

    let peerlist = Arc::new(
        PeerList::new(
            MemoryBucket::new(),
            machine_id,
            host,
            "127.0.0.1".to_string(),
            0.0,
            0.0,
        )
        .with_metrics(metrics.clone()),
    );
    let peerlist_shutdown = shutdown.clone();
    let peerlist_task = tokio::spawn(async move {
        peerlist.run(peerlist_shutdown).await;
    });

    shutdown.cancelled().await;
    info!("shutdown signalled, draining");

    let _ = accept_task.await;
    let _ = peerlist_task.await;
    lock.release();

    Ok(())
}
