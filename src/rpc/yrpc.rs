// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! YRPC: a single TCP+TLS connection stream-multiplexed with `yamux`. Each
//! stream hosts exactly one JRPC call. Knobs are fixed per the wire
//! contract, not user-tunable: accept backlog 256, write timeout 10s,
//! keep-alive 30s, stream close timeout 5 minutes, stream open timeout
//! 75s, receive window 512 KiB.
//!
//! `yamux::Connection` exposes only a poll-based interface
//! (`poll_new_outbound`/`poll_next_inbound`/`poll_close`), not a separate
//! `Control` handle. A single task owns the connection and services
//! outbound-open and close requests alongside inbound polling.

use std::future::poll_fn;
use std::task::Poll;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tracing::warn;
use yamux::{Config, Connection, ConnectionError, Mode};

pub const ACCEPT_BACKLOG: usize = 256;
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const KEEPALIVE: Duration = Duration::from_secs(30);
pub const STREAM_CLOSE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(75);
pub const RECEIVE_WINDOW: usize = 512 * 1024;

type OpenResponder = oneshot::Sender<Result<yamux::Stream, ConnectionError>>;
type CloseResponder = oneshot::Sender<Result<(), ConnectionError>>;

/// Errors from a YRPC session.
#[derive(Debug, Error)]
pub enum YrpcError {
    #[error("yamux connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("opening a stream timed out after {0:?}")]
    OpenTimeout(Duration),
    #[error("session is closed")]
    Closed,
}

fn config() -> Config {
    let mut cfg = Config::default();
    cfg.set_max_num_streams(ACCEPT_BACKLOG);
    cfg.set_max_connection_receive_window(Some(RECEIVE_WINDOW));
    cfg
}

/// A stream-multiplexed session over one TCP+TLS connection.
pub struct Session {
    open_tx: mpsc::Sender<OpenResponder>,
    close_tx: mpsc::Sender<CloseResponder>,
    inbound: Mutex<mpsc::Receiver<yamux::Stream>>,
    driver: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Wrap `io` in a yamux session. `mode` determines which side opens the
    /// handshake (client dials, server accepts).
    pub fn new<T>(io: T, mode: Mode) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let compat: Compat<T> = io.compat();
        let connection = Connection::new(compat, config(), mode);

        let (inbound_tx, inbound_rx) = mpsc::channel(ACCEPT_BACKLOG);
        let (open_tx, open_rx) = mpsc::channel(1);
        let (close_tx, close_rx) = mpsc::channel(1);
        let driver = tokio::spawn(drive(connection, inbound_tx, open_rx, close_rx));

        Self {
            open_tx,
            close_tx,
            inbound: Mutex::new(inbound_rx),
            driver,
        }
    }

    /// Open an outbound stream, one JRPC call's worth of traffic.
    pub async fn open_stream(&self) -> Result<yamux::Stream, YrpcError> {
        let (tx, rx) = oneshot::channel();
        if self.open_tx.send(tx).await.is_err() {
            return Err(YrpcError::Closed);
        }
        match tokio::time::timeout(STREAM_OPEN_TIMEOUT, rx).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(YrpcError::Closed),
            Err(_) => Err(YrpcError::OpenTimeout(STREAM_OPEN_TIMEOUT)),
        }
    }

    /// Accept the next inbound stream opened by the peer.
    pub async fn accept_stream(&self) -> Option<yamux::Stream> {
        self.inbound.lock().await.recv().await
    }

    /// Wait up to [`STREAM_CLOSE_TIMEOUT`] for the connection to drain
    /// before hard-closing the driver task.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.close_tx.send(tx).await.is_err() {
            return;
        }
        match tokio::time::timeout(STREAM_CLOSE_TIMEOUT, rx).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "yamux session closed with an error"),
            Ok(_) => {}
            Err(_) => {
                warn!("yamux session did not drain within the close timeout, hard-closing");
                self.driver.abort();
            }
        }
    }
}

/// Adapt a yamux stream (futures I/O) to tokio's `AsyncRead`/`AsyncWrite`
/// so it can host a JRPC call via [`crate::rpc::jrpc`].
pub fn as_tokio_io(stream: yamux::Stream) -> Compat<yamux::Stream> {
    stream.compat()
}

enum Event {
    Opened(Result<yamux::Stream, ConnectionError>),
    Closed(Result<(), ConnectionError>),
    Inbound(Option<Result<yamux::Stream, ConnectionError>>),
}

/// Services inbound polling plus outbound-open/close requests against one
/// `Connection`, since the 0.13 API gives exclusive `&mut` access through
/// its poll methods rather than a cloneable control handle.
async fn drive<T>(
    mut connection: Connection<T>,
    inbound_tx: mpsc::Sender<yamux::Stream>,
    mut open_rx: mpsc::Receiver<OpenResponder>,
    mut close_rx: mpsc::Receiver<CloseResponder>,
) where
    T: futures::AsyncRead + futures::AsyncWrite + Unpin,
{
    let mut pending_open: Option<OpenResponder> = None;
    let mut pending_close: Option<CloseResponder> = None;

    loop {
        let event = poll_fn(|cx| {
            if pending_close.is_some() {
                return match connection.poll_close(cx) {
                    Poll::Ready(result) => Poll::Ready(Event::Closed(result)),
                    Poll::Pending => Poll::Pending,
                };
            }

            if let Poll::Ready(Some(responder)) = close_rx.poll_recv(cx) {
                pending_close = Some(responder);
                return match connection.poll_close(cx) {
                    Poll::Ready(result) => Poll::Ready(Event::Closed(result)),
                    Poll::Pending => Poll::Pending,
                };
            }

            if pending_open.is_some() {
                if let Poll::Ready(result) = connection.poll_new_outbound(cx) {
                    return Poll::Ready(Event::Opened(result));
                }
            } else if let Poll::Ready(Some(responder)) = open_rx.poll_recv(cx) {
                pending_open = Some(responder);
                if let Poll::Ready(result) = connection.poll_new_outbound(cx) {
                    return Poll::Ready(Event::Opened(result));
                }
            }

            match connection.poll_next_inbound(cx) {
                Poll::Ready(item) => Poll::Ready(Event::Inbound(item)),
                Poll::Pending => Poll::Pending,
            }
        })
        .await;

        match event {
            Event::Opened(result) => {
                if let Some(responder) = pending_open.take() {
                    let _ = responder.send(result);
                }
            }
            Event::Closed(result) => {
                if let Some(responder) = pending_close.take() {
                    let _ = responder.send(result);
                }
                return;
            }
            Event::Inbound(Some(Ok(stream))) => {
                if inbound_tx.send(stream).await.is_err() {
                    return;
                }
            }
            Event::Inbound(Some(Err(e))) => {
                warn!(error = %e, "yamux connection driver stopped");
                return;
            }
            Event::Inbound(None) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_stream_is_observed_as_server_inbound() {
        let (a, b) = duplex(64 * 1024);
        let client = Session::new(a, Mode::Client);
        let server = Session::new(b, Mode::Server);

        let mut outbound = client.open_stream().await.unwrap();
        let inbound = server.accept_stream().await;
        assert!(inbound.is_some());

        use tokio::io::AsyncWriteExt;
        outbound.write_all(b"hi").await.ok();
    }
}
