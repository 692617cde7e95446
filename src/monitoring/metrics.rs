// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Process-wide metrics registry.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Streams accepted and routed to a sub-listener.
    pub mux_accept_total: IntCounter,
    /// Streams rejected: no matching sub-listener and no wildcard.
    pub mux_reject_total: IntCounter,

    /// Pool acquisitions that returned a dedicated (unique) client.
    pub pool_busy_total: IntCounter,
    /// Pool acquisitions that returned an idle, reused client.
    pub pool_idle_total: IntCounter,
    /// Connector dial failures while filling the pool.
    pub pool_dial_failure_total: IntCounter,

    /// Rate-limiter admissions.
    pub ratelimit_admit_total: IntCounter,
    /// Rate-limiter admissions that waited in the bounded queue.
    pub ratelimit_queue_total: IntCounter,
    /// Rate-limiter outright rejections.
    pub ratelimit_reject_total: IntCounter,
    /// Advisory block-window trips.
    pub ratelimit_block_total: IntCounter,

    /// Successful peerlist ticks.
    pub peerlist_tick_success_total: IntCounter,
    /// Failed peerlist ticks.
    pub peerlist_tick_failure_total: IntCounter,
    /// Peers currently considered alive.
    pub peerlist_alive_peers: IntGauge,

    /// URL signer verifications that succeeded.
    pub signer_verify_success_total: IntCounter,
    /// URL signer verifications that failed (any reason).
    pub signer_verify_failure_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        macro_rules! counter {
            ($name:expr, $help:expr) => {{
                let c = IntCounter::new($name, $help).map_err(|_| MetricsError::Prom)?;
                registry
                    .register(Box::new(c.clone()))
                    .map_err(|_| MetricsError::Prom)?;
                c
            }};
        }
        macro_rules! gauge {
            ($name:expr, $help:expr) => {{
                let g = IntGauge::new($name, $help).map_err(|_| MetricsError::Prom)?;
                registry
                    .register(Box::new(g.clone()))
                    .map_err(|_| MetricsError::Prom)?;
                g
            }};
        }

        Ok(Self {
            mux_accept_total: counter!("pmesh_mux_accept_total", "Streams routed to a sub-listener"),
            mux_reject_total: counter!(
                "pmesh_mux_reject_total",
                "Streams rejected: no matching sub-listener"
            ),

            pool_busy_total: counter!(
                "pmesh_pool_busy_total",
                "Pool acquisitions returning a dedicated client"
            ),
            pool_idle_total: counter!(
                "pmesh_pool_idle_total",
                "Pool acquisitions returning a reused idle client"
            ),
            pool_dial_failure_total: counter!(
                "pmesh_pool_dial_failure_total",
                "Connector dial failures while filling the pool"
            ),

            ratelimit_admit_total: counter!("pmesh_ratelimit_admit_total", "Rate-limiter admissions"),
            ratelimit_queue_total: counter!(
                "pmesh_ratelimit_queue_total",
                "Admissions that waited in the bounded queue"
            ),
            ratelimit_reject_total: counter!("pmesh_ratelimit_reject_total", "Rate-limiter rejections"),
            ratelimit_block_total: counter!(
                "pmesh_ratelimit_block_total",
                "Advisory block-window trips"
            ),

            peerlist_tick_success_total: counter!(
                "pmesh_peerlist_tick_success_total",
                "Successful peerlist ticks"
            ),
            peerlist_tick_failure_total: counter!(
                "pmesh_peerlist_tick_failure_total",
                "Failed peerlist ticks"
            ),
            peerlist_alive_peers: gauge!("pmesh_peerlist_alive_peers", "Peers currently alive"),

            signer_verify_success_total: counter!(
                "pmesh_signer_verify_success_total",
                "URL signer verifications that succeeded"
            ),
            signer_verify_failure_total: counter!(
                "pmesh_signer_verify_failure_total",
                "URL signer verifications that failed"
            ),

            registry,
        })
    }
}
