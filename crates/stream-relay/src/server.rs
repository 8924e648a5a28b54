// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{header, http, Method, Request, Response, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::RelayConfig;
use crate::error::ConfigError;
use crate::http_utils::{
    create_json_response, log_and_create_http_response, verify_request_content_length,
    HttpResponse,
};
use crate::ingest::Ingestor;
use crate::relay::Relay;
use crate::router::RoutingRules;
use crate::trigger;

const RETRY_ENDPOINT_PATH: &str = "/retry";
const INGEST_ENDPOINT_PATH: &str = "/ingest";
const CONSUME_ENDPOINT_PATH: &str = "/consume";
const INFO_ENDPOINT_PATH: &str = "/info";

struct EndpointState {
    config: RelayConfig,
    relay: Relay,
    ingestor: Ingestor,
    /// Routing for the consume trigger, built from the configuration once.
    consume_rules: Result<RoutingRules, ConfigError>,
}

/// HTTP/1 front door for the retry, ingest and consume triggers.
pub struct RelayServer {
    state: Arc<EndpointState>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, relay: Relay, ingestor: Ingestor) -> Self {
        let consume_rules = config.consume_routing_rules();
        if let Err(e) = &consume_rules {
            info!("SERVER | Consume trigger disabled: {e}");
        }
        Self {
            state: Arc::new(EndpointState {
                config,
                relay,
                ingestor,
                consume_rules,
            }),
        }
    }

    /// Binds to the configured port on localhost and serves until `cancel` fires.
    pub async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let now = Instant::now();
        let addr = SocketAddr::from(([127, 0, 0, 1], self.state.config.port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        debug!("SERVER | Relay server started: listening on port {}", self.state.config.port);
        debug!(
            "SERVER | Time taken to start the relay server: {} ms",
            now.elapsed().as_millis()
        );
        self.serve(listener, cancel).await
    }

    /// Serves connections accepted on `listener`. Cancelling `cancel` stops
    /// accepting and interrupts the batches that are still running.
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = self.state.clone();
        let service_cancel = cancel.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            // called for each http request
            let state = state.clone();
            let cancel = service_cancel.child_token();
            async move { endpoint_handler(state, req, cancel).await }
        });

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                () = cancel.cancelled() => {
                    info!("SERVER | Shutting down relay server");
                    return Ok(());
                },
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("SERVER | Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("SERVER | Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("SERVER | Connection error: {e}");
                }
            });
        }
    }
}

async fn endpoint_handler(
    state: Arc<EndpointState>,
    req: Request<Incoming>,
    cancel: CancellationToken,
) -> http::Result<HttpResponse> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, RETRY_ENDPOINT_PATH) => {
            let body = match read_body(req, &state.config, "Error processing retry trigger").await
            {
                Ok(body) => body,
                Err(response) => return response,
            };
            match trigger::handle_retry(&state.relay, &body, &cancel).await {
                Ok(result) => create_json_response(&result, StatusCode::OK),
                Err(e) => log_and_create_http_response(
                    &format!("Error processing retry trigger: {e}"),
                    e.status_code(),
                ),
            }
        }
        (&Method::POST, CONSUME_ENDPOINT_PATH) => {
            let rules = match &state.consume_rules {
                Ok(rules) => rules,
                Err(e) => {
                    return log_and_create_http_response(
                        &format!("Error processing consume trigger: {e}"),
                        StatusCode::UNPROCESSABLE_ENTITY,
                    )
                }
            };
            let body =
                match read_body(req, &state.config, "Error processing consume trigger").await {
                    Ok(body) => body,
                    Err(response) => return response,
                };
            match trigger::handle_consume(&state.relay, rules, &body, &cancel).await {
                Ok(result) => create_json_response(&result, StatusCode::OK),
                Err(e) => log_and_create_http_response(
                    &format!("Error processing consume trigger: {e}"),
                    e.status_code(),
                ),
            }
        }
        (&Method::POST, INGEST_ENDPOINT_PATH) => {
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = match read_body(req, &state.config, "Error processing ingest request").await
            {
                Ok(body) => body,
                Err(response) => return response,
            };
            match trigger::handle_ingest(&state.ingestor, &body, authorization.as_deref()).await {
                Ok(receipt) => create_json_response(&receipt, StatusCode::OK),
                Err(e) => log_and_create_http_response(
                    &format!("Error processing ingest request: {e}"),
                    e.status_code(),
                ),
            }
        }
        (&Method::GET, INFO_ENDPOINT_PATH) => info_handler(&state.config),
        _ => {
            let mut not_found = Response::default();
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Ok(not_found)
        }
    }
}

/// Collects the request body, enforcing the configured size limit both on the
/// declared Content-Length and on the bytes actually received.
async fn read_body(
    req: Request<Incoming>,
    config: &RelayConfig,
    error_message_prefix: &str,
) -> Result<bytes::Bytes, http::Result<HttpResponse>> {
    let (parts, body) = req.into_parts();
    if let Some(response) = verify_request_content_length(
        &parts.headers,
        config.max_request_content_length,
        error_message_prefix,
    ) {
        return Err(response);
    }

    match Limited::new(body, config.max_request_content_length)
        .collect()
        .await
    {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<http_body_util::LengthLimitError>() => Err(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        )),
        Err(e) => Err(log_and_create_http_response(
            &format!("{error_message_prefix}: Unable to read request body: {e}"),
            StatusCode::BAD_REQUEST,
        )),
    }
}

fn info_handler(config: &RelayConfig) -> http::Result<HttpResponse> {
    let config_json = json!({
        "port": config.port,
        "max_concurrency": config.max_concurrency,
        "dispatch_timeout_ms": config.dispatch_timeout.as_millis() as u64,
        "max_request_content_length": config.max_request_content_length,
        "data_log": config.data_log.as_deref().unwrap_or(""),
    });
    let response_json = json!(
        {
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": [
                RETRY_ENDPOINT_PATH,
                INGEST_ENDPOINT_PATH,
                CONSUME_ENDPOINT_PATH,
                INFO_ENDPOINT_PATH
            ],
            "config": config_json
        }
    );
    create_json_response(&response_json, StatusCode::OK)
}
