// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer side: appends work items to the data log and stores the caller's
//! credential so later dispatches can resolve it by name.

use std::sync::Arc;

use bytes::Bytes;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::value::RawValue;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::log_store::{AppendReceipt, LogError, LogStore};
use crate::secrets::{SecretError, SecretResolver, SecretStore};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Partition key of the appended entry, empty when absent.
    #[serde(default, alias = "key")]
    pub stream_key: String,
    /// Work item JSON, appended as-is.
    #[serde(alias = "message")]
    pub stream_message: Box<RawValue>,
    /// Overrides the configured data log.
    #[serde(default, alias = "streamOCID")]
    pub log: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialFields {
    #[serde(default)]
    vault_secret_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("streamMessage must be a JSON object: {0}")]
    InvalidPayload(String),

    #[error("an Authorization header was supplied but streamMessage has no vaultSecretName")]
    MissingSecretName,

    #[error("no data log configured")]
    NoDataLog,

    #[error("failed to store credential: {0}")]
    Secret(#[from] SecretError),

    #[error("failed to append to data log: {0}")]
    Log(#[from] LogError),
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::InvalidPayload(_) | IngestError::MissingSecretName => {
                StatusCode::BAD_REQUEST
            }
            IngestError::NoDataLog => StatusCode::UNPROCESSABLE_ENTITY,
            IngestError::Secret(_) | IngestError::Log(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Clone)]
pub struct Ingestor {
    logs: Arc<dyn LogStore>,
    secrets: SecretResolver,
    data_log: Option<String>,
}

impl Ingestor {
    pub fn new(
        config: &RelayConfig,
        logs: Arc<dyn LogStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            logs,
            secrets: SecretResolver::new(secrets, config.secret_timeout),
            data_log: config.data_log.clone(),
        }
    }

    /// When `authorization` is present it is stored under the message's
    /// `vaultSecretName` unless a secret with that name already exists.
    pub async fn ingest(
        &self,
        request: IngestRequest,
        authorization: Option<&str>,
    ) -> Result<AppendReceipt, IngestError> {
        let log = request
            .log
            .filter(|log| !log.trim().is_empty())
            .or_else(|| self.data_log.clone())
            .ok_or(IngestError::NoDataLog)?;

        let fields: CredentialFields = serde_json::from_str(request.stream_message.get())
            .map_err(|e| IngestError::InvalidPayload(e.to_string()))?;

        if let Some(authorization) = authorization.filter(|v| !v.trim().is_empty()) {
            let name = fields
                .vault_secret_name
                .filter(|name| !name.trim().is_empty())
                .ok_or(IngestError::MissingSecretName)?;
            self.secrets.ensure(&name, authorization).await?;
        } else {
            debug!("INGEST | No Authorization header, storing message without credential");
        }

        let receipt = self
            .logs
            .append(
                &log,
                Bytes::from(request.stream_key),
                Bytes::from(request.stream_message.get().to_string()),
            )
            .await?;
        info!(
            "INGEST | Message pushed to position {} in partition {} of {log}",
            receipt.position, receipt.partition
        );
        Ok(receipt)
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ingestor")
    }
}
