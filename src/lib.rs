// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! pmesh fabric core - the mesh-fabric layer of a process-management and
//! service-mesh system.
//!
//! This crate binds a set of host machines into a cooperative cluster that
//! can route internal RPC traffic, exchange heartbeats and peer metadata,
//! enforce per-client rate limits, sign and verify URLs, and multiplex
//! multiple application-level protocols over a single TLS listener:
//! - Deterministic CA/leaf certificate derivation and a cipher-seeded CPRNG
//! - A TLS ALPN multiplexer sharing one listener across protocols
//! - Line-framed and stream-multiplexed RPC transports behind a pool
//! - A sliding-window rate limiter with backpressure
//! - Gossip-style peer discovery over a replicated KV view
//! - Snowflake/Ray-ID time-ordered identifiers
//! - An AEAD-sealed URL signer
//! - Retry, shutdown-signal, and timed-mutex utilities
//! - Config bootstrap, single-instance locking, and machine-ID derivation

/// Persisted node state: home-directory resolution, `config.json`
/// bootstrap, the session lock, and machine-ID derivation.
pub mod config;
/// Deterministic CA/leaf certificate derivation, cipher-seeded CPRNG, and
/// mutual-TLS configuration.
pub mod crypto;
/// Snowflake-style time-ordered IDs and the printable Ray-ID wrapper.
pub mod ids;
/// Observability: metrics registry.
pub mod monitoring;
/// TLS ALPN multiplexer: one listener demultiplexed by negotiated
/// protocol into many sub-listeners.
pub mod mux;
/// Cluster peerlist: heartbeat, replicated read, distance sort, hosts-map
/// publishing.
pub mod peerlist;
/// Sliding two-window rate limiter with bounded wait queue and advisory
/// block window.
pub mod ratelimit;
/// Exponential-backoff retrier.
pub mod retry;
/// RPC transport: line-framed JRPC, stream-multiplexed YRPC, and the
/// `PoolMux` connection pool.
pub mod rpc;
/// Process-wide shutdown signal.
pub mod rundown;
/// AEAD-sealed URL signer.
pub mod signer;
/// 1-buffered-channel timed mutex.
pub mod timedmutex;
