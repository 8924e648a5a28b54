// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};

use anyhow::{anyhow, Context};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use stream_relay::{
    http_utils, ingest::Ingestor, InMemoryLogStore, InMemorySecretStore, Relay, RelayConfig,
    RelayServer,
};

/// Comma separated logs created at startup besides the configured ones, so
/// retry triggers have something to read from.
const ENV_LOCAL_LOGS: &str = "RELAY_LOCAL_LOGS";

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env_iter(env::vars());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    if let Err(e) = config.validate() {
        error!("Invalid relay configuration: {e}");
        return Err(anyhow!(e));
    }

    let logs = InMemoryLogStore::new();
    for log in configured_logs(&config) {
        debug!("Creating in-memory log {log}");
        logs.create_log(&log);
    }
    let secrets = InMemorySecretStore::new();

    let client = http_utils::get_client(&config);
    let relay = Relay::new(
        &config,
        Arc::new(logs.clone()),
        Arc::new(secrets.clone()),
        client,
    );
    let ingestor = Ingestor::new(&config, Arc::new(logs), Arc::new(secrets));
    let server = RelayServer::new(config.clone(), relay, ingestor);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    info!("Starting stream relay on port {}", config.port);
    server
        .start(cancel)
        .await
        .map_err(|e| anyhow!("relay server failed: {e}"))
}

fn configured_logs(config: &RelayConfig) -> Vec<String> {
    let mut logs: Vec<String> = config
        .data_log
        .iter()
        .chain(config.default_error_log.iter())
        .chain(config.unexpected_error_log.iter())
        .chain(config.error_logs.values())
        .cloned()
        .collect();
    if let Ok(extra) = env::var(ENV_LOCAL_LOGS) {
        logs.extend(
            extra
                .split(',')
                .map(str::trim)
                .filter(|log| !log.is_empty())
                .map(str::to_string),
        );
    }
    logs.sort();
    logs.dedup();
    logs
}
