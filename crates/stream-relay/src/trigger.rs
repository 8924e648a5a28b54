// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trigger payloads and the handlers that turn them into relay calls.
//!
//! Field names accept both the current spelling and the older aliases
//! (`streamOCIDToRetry`, `noOfMessagesToProcess`, `errormapping`, ...), and
//! numeric fields accept JSON numbers or numeric strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::ingest::{IngestError, IngestRequest, Ingestor};
use crate::log_store::{AppendReceipt, StartPosition};
use crate::model::{BatchResult, LogEntry};
use crate::relay::{BatchRequest, Relay};
use crate::router::RoutingRules;

const DEFAULT_PARTITION: &str = "0";
/// `readAfterOffset` value meaning "from the oldest retained entry".
const READ_FROM_BEGINNING: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn as_i64(&self, field: &str) -> Result<i64, RelayError> {
        match self {
            Scalar::Int(n) => Ok(*n),
            Scalar::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| RelayError::Trigger(format!("{field} must be an integer, got {s:?}"))),
        }
    }

    fn into_string(self) -> String {
        match self {
            Scalar::Int(n) => n.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMappingEntry {
    #[serde(rename = "responseCode", alias = "responsecode")]
    pub response_code: Scalar,
    #[serde(alias = "stream")]
    pub log: String,
}

/// Pull invocation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryTrigger {
    #[serde(
        default,
        alias = "logId",
        alias = "streamOCIDToRetry",
        alias = "sourceStreamOCID"
    )]
    pub log_id_to_retry: Option<String>,
    #[serde(default)]
    pub read_partition: Option<Scalar>,
    #[serde(default)]
    pub read_offset: Option<Scalar>,
    #[serde(default)]
    pub read_after_offset: Option<Scalar>,
    #[serde(default)]
    pub beginning: Option<bool>,
    #[serde(default, alias = "noOfMessagesToProcess")]
    pub max_items_to_process: Option<Scalar>,
    #[serde(default, alias = "errormapping")]
    pub error_mapping: Vec<ErrorMappingEntry>,
    #[serde(default)]
    pub default_error_log: Option<String>,
}

impl RetryTrigger {
    pub fn parse(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body).map_err(|e| RelayError::Trigger(e.to_string()))
    }

    pub fn into_request(self) -> Result<BatchRequest, RelayError> {
        let log = self
            .log_id_to_retry
            .filter(|log| !log.trim().is_empty())
            .ok_or_else(|| RelayError::Trigger("logIdToRetry is required".to_string()))?;

        let partition = self
            .read_partition
            .map(Scalar::into_string)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PARTITION.to_string());

        let start = start_position(
            self.read_offset.as_ref(),
            self.read_after_offset.as_ref(),
            self.beginning.unwrap_or(false),
        )?;

        let max_items = self
            .max_items_to_process
            .ok_or_else(|| RelayError::Trigger("maxItemsToProcess is required".to_string()))?
            .as_i64("maxItemsToProcess")?;
        let max_items = usize::try_from(max_items.max(0)).unwrap_or(usize::MAX);

        let rules = RoutingRules::new(
            self.error_mapping
                .into_iter()
                .map(|m| (m.response_code.into_string(), m.log)),
            self.default_error_log,
        )?;

        Ok(BatchRequest {
            log,
            partition,
            start,
            max_items,
            rules,
        })
    }
}

fn start_position(
    read_offset: Option<&Scalar>,
    read_after_offset: Option<&Scalar>,
    beginning: bool,
) -> Result<StartPosition, RelayError> {
    let selected = [read_offset.is_some(), read_after_offset.is_some(), beginning]
        .iter()
        .filter(|s| **s)
        .count();
    if selected > 1 {
        return Err(RelayError::Trigger(
            "only one of readOffset, readAfterOffset and beginning may be set".to_string(),
        ));
    }

    if let Some(offset) = read_offset {
        let offset = offset.as_i64("readOffset")?;
        return u64::try_from(offset)
            .map(StartPosition::AtOffset)
            .map_err(|_| RelayError::Trigger(format!("readOffset must not be negative, got {offset}")));
    }
    if let Some(offset) = read_after_offset {
        return match offset.as_i64("readAfterOffset")? {
            READ_FROM_BEGINNING => Ok(StartPosition::Beginning),
            offset => u64::try_from(offset)
                .map(StartPosition::AfterOffset)
                .map_err(|_| {
                    RelayError::Trigger(format!("readAfterOffset must be -1 or more, got {offset}"))
                }),
        };
    }
    Ok(StartPosition::Beginning)
}

/// One entry as delivered by a log consumption connector.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumedMessage {
    #[serde(default)]
    pub key: Option<String>,
    /// Base64 encoded entry value.
    pub value: String,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub partition: Option<Scalar>,
}

impl ConsumedMessage {
    /// A value that is not valid base64 is kept as-is; it will fail to parse
    /// as a work item and be routed as an unexpected error.
    fn into_entry(self, index: usize) -> LogEntry {
        let value = match STANDARD.decode(self.value.as_bytes()) {
            Ok(decoded) => Bytes::from(decoded),
            Err(e) => {
                warn!("TRIGGER | Delivered value {index} is not valid base64: {e}");
                Bytes::from(self.value)
            }
        };
        LogEntry::new(
            self.partition
                .map(Scalar::into_string)
                .unwrap_or_else(|| DEFAULT_PARTITION.to_string()),
            self.offset.unwrap_or(index as u64),
            Bytes::from(self.key.unwrap_or_default()),
            value,
        )
    }
}

/// Pulls a batch from the log named in the trigger.
pub async fn handle_retry(
    relay: &Relay,
    body: &[u8],
    cancel: &CancellationToken,
) -> Result<BatchResult, RelayError> {
    let request = RetryTrigger::parse(body)?.into_request()?;
    debug!(
        "TRIGGER | Retry of {}/{} from {:?}, at most {} items",
        request.log, request.partition, request.start, request.max_items
    );
    relay.run_batch_until(request, cancel).await
}

/// Relays entries pushed by a connector, routing failures with `rules`.
pub async fn handle_consume(
    relay: &Relay,
    rules: &RoutingRules,
    body: &[u8],
    cancel: &CancellationToken,
) -> Result<BatchResult, RelayError> {
    let messages: Vec<ConsumedMessage> =
        serde_json::from_slice(body).map_err(|e| RelayError::Trigger(e.to_string()))?;
    debug!("TRIGGER | Consuming {} delivered entries", messages.len());
    let entries = messages
        .into_iter()
        .enumerate()
        .map(|(index, message)| message.into_entry(index))
        .collect();
    relay.relay_entries(entries, rules, cancel).await
}

pub async fn handle_ingest(
    ingestor: &Ingestor,
    body: &[u8],
    authorization: Option<&str>,
) -> Result<AppendReceipt, IngestError> {
    let request: IngestRequest =
        serde_json::from_slice(body).map_err(|e| IngestError::InvalidPayload(e.to_string()))?;
    ingestor.ingest(request, authorization).await
}
