// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entries read from a log and the work items they carry.
//!
//! The entry value is JSON in the following shape; it is the only work item
//! schema the relay understands:
//!
//! ```json
//! {
//!   "targetRestApi": "https://api.example.com/orders/42",
//!   "targetRestApiOperation": "PUT",
//!   "targetRestApiPayload": { "status": "shipped" },
//!   "targetRestApiHeaders": [ { "key": "Content-Type", "value": "application/json" } ],
//!   "vaultSecretId": "ocid1.secret...",
//!   "vaultSecretName": "orders-api-token"
//! }
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::log_store::StartPosition;

/// One record read from a log partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Partition routing key, possibly empty.
    pub key: Bytes,
    /// UTF-8 JSON work item.
    pub value: Bytes,
    pub partition: String,
    /// Monotonically increasing within `partition`.
    pub position: u64,
}

impl LogEntry {
    pub fn new(
        partition: impl Into<String>,
        position: u64,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            partition: partition.into(),
            position,
        }
    }
}

/// Reasons an entry value cannot be turned into a [`WorkItem`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("entry value is not a valid work item: {0}")]
    InvalidJson(String),

    #[error("targetRestApi node not found in payload")]
    MissingTargetUrl,

    #[error("targetRestApi {0:?} is not an absolute http(s) URL")]
    InvalidTargetUrl(String),

    #[error("targetRestApiOperation node not found in payload")]
    MissingMethod,

    #[error("targetRestApiOperation {0:?} is not one of PUT, POST or DELETE")]
    UnsupportedMethod(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }

    /// DELETE requests are sent without a body.
    pub fn has_body(self) -> bool {
        !matches!(self, Method::Delete)
    }
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            other => Err(ParseError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Pointer to the secret holding the `Authorization` header value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CredentialRef {
    /// Stable secret identifier.
    Id(String),
    /// Human readable secret name.
    Name(String),
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub target_url: Url,
    pub method: Method,
    /// Raw JSON text of the payload, forwarded byte for byte.
    pub payload: Option<Box<RawValue>>,
    /// Applied in order; the same name may appear more than once.
    pub headers: Vec<Header>,
    pub credential: Option<CredentialRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWorkItem {
    #[serde(default)]
    target_rest_api: Option<String>,
    #[serde(default)]
    target_rest_api_operation: Option<String>,
    #[serde(default)]
    target_rest_api_payload: Option<Box<RawValue>>,
    #[serde(default)]
    target_rest_api_headers: Option<Vec<WireHeader>>,
    #[serde(default)]
    vault_secret_id: Option<String>,
    #[serde(default)]
    vault_secret_name: Option<String>,
}

#[derive(Deserialize)]
struct WireHeader {
    key: String,
    value: String,
}

impl WorkItem {
    /// Parses an entry value. A failure here is terminal for the entry: it is
    /// routed as an unexpected error and never dispatched.
    pub fn parse(value: &[u8]) -> Result<Self, ParseError> {
        let wire: WireWorkItem =
            serde_json::from_slice(value).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        let target = wire.target_rest_api.ok_or(ParseError::MissingTargetUrl)?;
        let target_url = match Url::parse(&target) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => return Err(ParseError::InvalidTargetUrl(target)),
        };

        let method = wire
            .target_rest_api_operation
            .ok_or(ParseError::MissingMethod)?
            .parse::<Method>()?;

        let headers = wire
            .target_rest_api_headers
            .unwrap_or_default()
            .into_iter()
            .map(|h| Header {
                name: h.key,
                value: h.value,
            })
            .collect();

        let credential = non_empty(wire.vault_secret_id)
            .map(CredentialRef::Id)
            .or_else(|| non_empty(wire.vault_secret_name).map(CredentialRef::Name));

        Ok(WorkItem {
            target_url,
            method,
            payload: wire.target_rest_api_payload,
            headers,
            credential,
        })
    }

    /// Body sent with PUT and POST requests.
    pub fn body(&self) -> String {
        self.payload
            .as_ref()
            .map(|raw| raw.get().to_string())
            .unwrap_or_default()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Summary of one relay invocation, returned to the trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Continuation point: pass it back as an exclusive start to resume.
    pub last_position: Option<u64>,
    pub processed_count: u64,
    pub failed_count: u64,
    /// Failed entries successfully written to an error log.
    pub routed_count: u64,
    pub end_of_log: bool,
    /// Set when the invocation budget ran out before the batch finished.
    pub interrupted: bool,
}

impl BatchResult {
    /// Empty result whose continuation point is the position just before
    /// `start`, so resuming from it re-reads nothing and skips nothing.
    pub fn starting_at(start: StartPosition) -> Self {
        let last_position = match start {
            StartPosition::AfterOffset(offset) => Some(offset),
            StartPosition::AtOffset(offset) => offset.checked_sub(1),
            StartPosition::Beginning => None,
        };
        BatchResult {
            last_position,
            ..Default::default()
        }
    }
}
