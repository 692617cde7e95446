// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! TLS ALPN multiplexer: one TCP listener per bind address, demultiplexed
//! after the TLS handshake by negotiated ALPN protocol into any number of
//! sub-listeners. `"*"` is the wildcard fallback protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::monitoring::metrics::Metrics;

/// A handshaked, ALPN-routed connection handed to a sub-listener.
pub type MuxStream = TlsStream<TcpStream>;

const ACCEPT_BACKLOG: usize = 8;
const WILDCARD: &str = "*";

/// Errors from the ALPN multiplexer.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("mux at {0} is closed")]
    Closed(SocketAddr),
    #[error("protocol {0:?} is already bound on this mux")]
    AlreadyBound(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

struct Inner {
    addr: SocketAddr,
    subs: Mutex<HashMap<String, mpsc::Sender<MuxStream>>>,
    closed: AtomicBool,
    close_on_drain: bool,
    metrics: OnceLock<Arc<Metrics>>,
}

impl Inner {
    fn evict_if_drained(self: &Arc<Self>) {
        if !self.close_on_drain {
            return;
        }
        let subs = self.subs.lock().expect("subs mutex poisoned");
        if subs.is_empty() {
            self.closed.store(true, Ordering::Release);
        }
    }
}

/// A TLS-ALPN-multiplexed TCP listener, shareable by bind address.
#[derive(Clone)]
pub struct AlpnMux {
    inner: Arc<Inner>,
}

type Registry = Mutex<HashMap<SocketAddr, Weak<Inner>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl AlpnMux {
    /// Bind a new mux at `addr`, or reuse an existing open one registered at
    /// the same address (the shared-by-address table described in the
    /// design notes).
    pub async fn bind(
        addr: SocketAddr,
        server_config: Arc<rustls::ServerConfig>,
        close_on_drain: bool,
    ) -> Result<Self, MuxError> {
        {
            let mut reg = registry().lock().expect("mux registry poisoned");
            if let Some(weak) = reg.get(&addr) {
                if let Some(inner) = weak.upgrade() {
                    if !inner.closed.load(Ordering::Acquire) {
                        return Ok(Self { inner });
                    }
                }
                reg.remove(&addr);
            }
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| MuxError::Bind { addr, source })?;

        let inner = Arc::new(Inner {
            addr,
            subs: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_on_drain,
            metrics: OnceLock::new(),
        });

        registry()
            .lock()
            .expect("mux registry poisoned")
            .insert(addr, Arc::downgrade(&inner));

        let acceptor = TlsAcceptor::from(server_config);
        let accept_inner = inner.clone();
        tokio::spawn(async move {
            accept_loop(listener, acceptor, accept_inner).await;
        });

        Ok(Self { inner })
    }

    /// Register a sub-listener for each of `protos`. Fails with
    /// [`MuxError::Closed`] if the mux has already drained shut, or
    /// [`MuxError::AlreadyBound`] if any protocol is already registered.
    pub fn listen(&self, protos: &[&str]) -> Result<SubListener, MuxError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(MuxError::Closed(self.inner.addr));
        }

        let mut subs = self.inner.subs.lock().expect("subs mutex poisoned");
        for proto in protos {
            if subs.contains_key(*proto) {
                return Err(MuxError::AlreadyBound((*proto).to_string()));
            }
        }

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        for proto in protos {
            subs.insert((*proto).to_string(), tx.clone());
        }
        drop(subs);

        Ok(SubListener {
            protos: protos.iter().map(|p| p.to_string()).collect(),
            rx,
            mux: self.inner.clone(),
        })
    }

    /// The bound local address.
    pub fn addr(&self) -> SocketAddr {
        self.inner.addr
    }

    /// Attach a metrics registry. Counts accepts/rejects from the point
    /// this is called onward; a no-op if already set.
    pub fn with_metrics(self, metrics: Arc<Metrics>) -> Self {
        let _ = self.inner.metrics.set(metrics);
        self
    }
}

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor, inner: Arc<Inner>) {
    loop {
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "mux accept failed");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let inner = inner.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, %peer, "tls handshake failed");
                    return;
                }
            };

            let negotiated = tls_stream
                .get_ref()
                .1
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).to_string());

            let subs = inner.subs.lock().expect("subs mutex poisoned");
            let sender = negotiated
                .as_deref()
                .and_then(|p| subs.get(p))
                .or_else(|| subs.get(WILDCARD))
                .cloned();
            drop(subs);

            match sender {
                Some(tx) => {
                    if let Some(m) = inner.metrics.get() {
                        m.mux_accept_total.inc();
                    }
                    if tx.send(tls_stream).await.is_err() {
                        debug!(%peer, "sub-listener dropped before dispatch");
                    }
                }
                None => {
                    if let Some(m) = inner.metrics.get() {
                        m.mux_reject_total.inc();
                    }
                    debug!(?negotiated, %peer, "no sub-listener for negotiated protocol");
                }
            }
        });
    }
}

/// A logical listener bound to one or more ALPN protocols on a shared mux.
pub struct SubListener {
    protos: Vec<String>,
    rx: mpsc::Receiver<MuxStream>,
    mux: Arc<Inner>,
}

impl SubListener {
    /// Accept the next handshaked stream routed to this sub-listener.
    pub async fn accept(&mut self) -> Option<MuxStream> {
        self.rx.recv().await
    }

    /// The protocols this sub-listener was registered for.
    pub fn protocols(&self) -> &[String] {
        &self.protos
    }
}

impl Drop for SubListener {
    fn drop(&mut self) {
        let mut subs = self.mux.subs.lock().expect("subs mutex poisoned");
        for proto in &self.protos {
            subs.remove(proto);
        }
        drop(subs);
        self.mux.evict_if_drained();
    }
}
