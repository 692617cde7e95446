// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! RPC transport: line-framed JSON request/reply (JRPC, one call per
//! connection) and a stream-multiplexed variant (YRPC) fronted by a
//! connection pool (`PoolMux`).

pub mod frame;
pub mod jrpc;
pub mod pool;
pub mod yrpc;

/// ALPN token for a dedicated JRPC connection.
pub const ALPN_JRPC: &str = "pmtp";
/// ALPN token for a YRPC (yamux-multiplexed) session.
pub const ALPN_YRPC: &str = "pmtp+yamux";
