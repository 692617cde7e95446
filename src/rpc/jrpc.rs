// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! JRPC: exactly one logical call per connection. `busy()` reports `1`
//! while the call is outstanding, `0` before it starts, `-1` once the
//! connection has been consumed.

use std::future::Future;
use std::sync::atomic::{AtomicI8, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::Mutex;

use super::frame::{read_frame, write_frame, FrameError, Reply, Request};

pub const METHOD_NOT_FOUND: &str = "method not found";

/// Errors from a JRPC call or dispatch.
#[derive(Debug, Error)]
pub enum JrpcError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("connection already consumed")]
    Closed,
    #[error("peer closed the connection before replying")]
    PeerClosed,
    #[error("remote error: {0}")]
    Remote(String),
}

/// Server-side dispatch target. Implementations should not block; long
/// calls should await internally.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, String>;
}

/// Blanket impl so a plain async closure-backed function pointer can serve
/// as a [`Handler`] in tests.
#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(String, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<serde_json::Value, String>> + Send,
{
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, String> {
        (self)(method.to_string(), params).await
    }
}

/// Serve exactly one request/reply pair on `stream`, then return. The
/// caller is expected to drop the stream afterward (one call per
/// connection).
pub async fn serve_one<S, H>(stream: S, handler: &H) -> Result<(), JrpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let request: Request = match read_frame(&mut reader).await? {
        Some(r) => r,
        None => return Ok(()),
    };

    let reply = match handler.call(&request.method, request.params).await {
        Ok(result) => Reply::ok(result),
        Err(message) => Reply::err(message),
    };

    write_frame(&mut write_half, &reply).await?;
    Ok(())
}

/// Client side of one JRPC connection. Good for exactly one call.
pub struct JrpcClient<S> {
    stream: Mutex<Option<S>>,
    busy: AtomicI8,
}

impl<S> JrpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            busy: AtomicI8::new(0),
        }
    }

    /// `1` while a call is outstanding, `0` when idle, `-1` after the
    /// connection has been consumed.
    pub fn busy(&self) -> i8 {
        self.busy.load(Ordering::Acquire)
    }

    /// Issue the connection's one call.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, JrpcError> {
        if self
            .busy
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(JrpcError::Closed);
        }

        let result = self.call_inner(method.into(), params).await;
        self.busy.store(-1, Ordering::Release);
        result
    }

    async fn call_inner(
        &self,
        method: String,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, JrpcError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.take().ok_or(JrpcError::Closed)?;

        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        write_frame(&mut write_half, &Request { method, params }).await?;

        let reply: Reply = read_frame(&mut reader).await?.ok_or(JrpcError::PeerClosed)?;
        match reply {
            Reply::Ok { result } => Ok(result),
            Reply::Err { error } => Err(JrpcError::Remote(error)),
        }
    }
}
