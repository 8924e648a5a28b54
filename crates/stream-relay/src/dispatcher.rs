// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::model::{Header, WorkItem};
use crate::secrets::{SecretError, SecretResolver, SecretValue};

/// Result of a single outbound call.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The target answered; any status, error statuses included.
    Responded(StatusCode),
    /// No response was received.
    TransportFailed(DispatchError),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unable to resolve credential: {0}")]
    Secret(#[from] SecretError),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DispatchError::Timeout(e)
        } else {
            DispatchError::Transport(e)
        }
    }
}

/// Turns work items into REST calls. Each item gets exactly one attempt.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    secrets: SecretResolver,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, secrets: SecretResolver, timeout: Duration) -> Self {
        Self {
            client,
            secrets,
            timeout,
        }
    }

    pub async fn execute(&self, item: &WorkItem) -> DispatchOutcome {
        match self.send(item).await {
            Ok(status) => {
                debug!(
                    "DISPATCH | {} {} returned {status}",
                    item.method, item.target_url
                );
                DispatchOutcome::Responded(status)
            }
            Err(e) => {
                warn!("DISPATCH | {} {} failed: {e}", item.method, item.target_url);
                DispatchOutcome::TransportFailed(e)
            }
        }
    }

    async fn send(&self, item: &WorkItem) -> Result<StatusCode, DispatchError> {
        let authorization = match &item.credential {
            Some(reference) => Some(self.secrets.resolve(reference).await?),
            None => None,
        };
        let headers = build_headers(&item.headers, authorization.as_ref())?;

        let mut request = self
            .client
            .request(item.method.into(), item.target_url.clone())
            .headers(headers)
            .timeout(self.timeout);
        if item.method.has_body() {
            request = request.body(item.body());
        }

        let response = request.send().await?;
        Ok(response.status())
    }
}

/// Item headers in order, duplicates kept, then `Authorization` replacing any
/// value the item supplied.
/// Values sharing a name keep their relative order; `HeaderMap` groups them
/// by name, so ordering across different names is not preserved.
fn build_headers(
    headers: &[Header],
    authorization: Option<&SecretValue>,
) -> Result<HeaderMap, DispatchError> {
    let mut map = HeaderMap::with_capacity(headers.len() + 1);
    for header in headers {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|e| {
            DispatchError::InvalidHeader {
                name: header.name.clone(),
                reason: e.to_string(),
            }
        })?;
        let value =
            HeaderValue::from_str(&header.value).map_err(|e| DispatchError::InvalidHeader {
                name: header.name.clone(),
                reason: e.to_string(),
            })?;
        map.append(name, value);
    }

    if let Some(secret) = authorization {
        let mut value =
            HeaderValue::from_str(secret.expose()).map_err(|e| DispatchError::InvalidHeader {
                name: AUTHORIZATION.to_string(),
                reason: e.to_string(),
            })?;
        value.set_sensitive(true);
        map.insert(AUTHORIZATION, value);
    }
    Ok(map)
}
