// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! End-to-end: two nodes sharing a cluster secret complete a mutual-TLS
//! handshake over the ALPN mux and exchange one JRPC call; a node with a
//! different secret is rejected before the sub-listener ever sees it.

use std::net::SocketAddr;
use std::sync::Arc;

use pmesh_core::crypto::{ca, tls};
use pmesh_core::mux::AlpnMux;
use pmesh_core::rpc::jrpc::{self, Handler};
use pmesh_core::rpc::ALPN_JRPC;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

struct Echo;

#[async_trait::async_trait]
impl Handler for Echo {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, String> {
        match method {
            "echo" => Ok(params),
            _ => Err(jrpc::METHOD_NOT_FOUND.to_string()),
        }
    }
}

async fn bind_echo_node(secret: &[u8]) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let root = ca::derive_root_ca(secret, "pmesh-cluster").unwrap();
    let leaf = ca::issue_leaf(&root, &["node-a".to_string()]).unwrap();
    let server_config = tls::server_config(&root, &leaf).unwrap();

    let mux = AlpnMux::bind("127.0.0.1:0".parse().unwrap(), server_config, false)
        .await
        .unwrap();
    let addr = mux.addr();
    let mut listener = mux.listen(&[ALPN_JRPC]).unwrap();

    let task = tokio::spawn(async move {
        while let Some(stream) = listener.accept().await {
            tokio::spawn(async move {
                let _ = jrpc::serve_one(stream, &Echo).await;
            });
        }
    });

    (addr, task)
}

fn dial_config(secret: &[u8]) -> Arc<rustls::ClientConfig> {
    let root = ca::derive_root_ca(secret, "pmesh-cluster").unwrap();
    let leaf = ca::issue_leaf(&root, &["node-b".to_string()]).unwrap();
    let mut cfg = tls::client_config(&root, &leaf).unwrap();
    Arc::get_mut(&mut cfg).unwrap().alpn_protocols = vec![ALPN_JRPC.as_bytes().to_vec()];
    cfg
}

#[tokio::test]
async fn matching_secret_completes_handshake_and_echoes() {
    let (addr, _server) = bind_echo_node(b"abc").await;

    let connector = TlsConnector::from(dial_config(b"abc"));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("node-a").unwrap();
    let tls_stream = connector.connect(server_name, tcp).await.unwrap();

    let client = jrpc::JrpcClient::new(tls_stream);
    let result = client.call("echo", serde_json::json!("hi")).await.unwrap();
    assert_eq!(result, serde_json::json!("hi"));
}

#[tokio::test]
async fn mismatched_secret_fails_handshake() {
    let (addr, _server) = bind_echo_node(b"abc").await;

    let connector = TlsConnector::from(dial_config(b"xyz"));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("node-a").unwrap();
    let result = connector.connect(server_name, tcp).await;
    assert!(result.is_err());
}
