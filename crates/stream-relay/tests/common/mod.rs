// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::json;
use stream_relay::{http_utils, InMemoryLogStore, InMemorySecretStore, LogStore, Relay, RelayConfig};
use tokio::time::timeout;

pub const SOURCE_LOG: &str = "orders";

/// Work item JSON targeting `path` on `base_url`.
pub fn work_item(base_url: &str, method: &str, path: &str) -> serde_json::Value {
    json!({
        "targetRestApi": format!("{base_url}{path}"),
        "targetRestApiOperation": method,
        "targetRestApiPayload": {"path": path},
        "targetRestApiHeaders": [{"key": "Content-Type", "value": "application/json"}]
    })
}

/// Creates `log` and appends `values` to it, one entry per value, keyed by index.
pub async fn seed_log(store: &InMemoryLogStore, log: &str, values: &[String]) {
    store.create_log(log);
    for (i, value) in values.iter().enumerate() {
        store
            .append(log, Bytes::from(format!("key-{i}")), Bytes::from(value.clone()))
            .await
            .unwrap();
    }
}

pub fn test_config() -> RelayConfig {
    RelayConfig {
        dispatch_timeout: Duration::from_secs(5),
        secret_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

pub fn relay(config: &RelayConfig, logs: &InMemoryLogStore, secrets: &InMemorySecretStore) -> Relay {
    Relay::new(
        config,
        Arc::new(logs.clone()),
        Arc::new(secrets.clone()),
        http_utils::get_client(config),
    )
}

/// Send an HTTP request over TCP and return the response
pub async fn send_tcp_request(
    port: u16,
    uri: &str,
    method: &str,
    body: Option<Vec<u8>>,
    headers: &[(&str, &str)],
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port)),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Content-Type", "application/json");
    for (name, value) in headers {
        request_builder = request_builder.header(*name, *value);
    }

    let body_data = body.unwrap_or_default();
    request_builder = request_builder.header("Content-Length", body_data.len().to_string());
    let request = request_builder.body(Full::new(Bytes::from(body_data)))?;
    let response = timeout(Duration::from_secs(10), sender.send_request(request)).await??;

    Ok(response)
}

pub async fn response_json(response: Response<hyper::body::Incoming>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
