// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drives one batch through read, dispatch and routing.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::cursor::CursorReader;
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, RelayError};
use crate::log_store::{LogStore, StartPosition};
use crate::model::{BatchResult, LogEntry, WorkItem};
use crate::router::{ErrorRouter, ItemOutcome, RoutingRules};
use crate::secrets::{SecretResolver, SecretStore};

/// One pull invocation: which partition to read, from where, how much, and
/// where failures go.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub log: String,
    pub partition: String,
    pub start: StartPosition,
    pub max_items: usize,
    pub rules: RoutingRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStatus {
    Processed,
    Failed { routed: bool },
}

#[derive(Clone)]
pub struct Relay {
    logs: Arc<dyn LogStore>,
    reader: CursorReader,
    dispatcher: Dispatcher,
    router: ErrorRouter,
    max_concurrency: usize,
    invocation_budget: Option<Duration>,
}

impl Relay {
    pub fn new(
        config: &RelayConfig,
        logs: Arc<dyn LogStore>,
        secrets: Arc<dyn SecretStore>,
        client: reqwest::Client,
    ) -> Self {
        let resolver = SecretResolver::new(secrets, config.secret_timeout);
        Self {
            reader: CursorReader::new(logs.clone()),
            router: ErrorRouter::new(logs.clone()),
            dispatcher: Dispatcher::new(client, resolver, config.dispatch_timeout),
            logs,
            max_concurrency: config.max_concurrency.max(1),
            invocation_budget: config.invocation_budget,
        }
    }

    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchResult, RelayError> {
        self.run_batch_until(request, &CancellationToken::new()).await
    }

    /// Like [`Relay::run_batch`], returning the partial result with
    /// `interrupted` set once `cancel` fires or the invocation budget runs out.
    pub async fn run_batch_until(
        &self,
        request: BatchRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, RelayError> {
        let BatchRequest {
            log,
            partition,
            start,
            max_items,
            rules,
        } = request;
        let deadline = self.deadline();

        let mut required = vec![log.clone()];
        required.extend(rules.destinations().into_iter().map(str::to_string));
        self.ensure_active(&required).await?;

        let mut result = BatchResult::starting_at(start);
        if max_items == 0 {
            debug!("RELAY | Nothing to read from {log}/{partition}, max items is 0");
            return Ok(result);
        }

        let cursor = self
            .reader
            .create_cursor(&log, &partition, start)
            .await
            .map_err(|source| RelayError::Cursor {
                log: log.clone(),
                source,
            })?;
        let batch = self
            .reader
            .read_batch(&log, &cursor, max_items)
            .await
            .map_err(|source| RelayError::Read {
                log: log.clone(),
                source,
            })?;

        self.process(batch.entries, &rules, cancel, deadline, &mut result).await;
        result.end_of_log = batch.reached_end && !result.interrupted;

        info!(
            "RELAY | Batch on {log}/{partition} finished: {} processed, {} failed, {} routed, last position {:?}, end of log: {}",
            result.processed_count,
            result.failed_count,
            result.routed_count,
            result.last_position,
            result.end_of_log
        );
        Ok(result)
    }

    /// Runs already delivered entries through dispatch and routing. Used by
    /// push triggers, where the log service hands the relay its entries.
    pub async fn relay_entries(
        &self,
        entries: Vec<LogEntry>,
        rules: &RoutingRules,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, RelayError> {
        let deadline = self.deadline();
        let required: Vec<String> = rules
            .destinations()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.ensure_active(&required).await?;

        let mut result = BatchResult::default();
        self.process(entries, rules, cancel, deadline, &mut result).await;
        info!(
            "RELAY | Delivered entries finished: {} processed, {} failed, {} routed",
            result.processed_count, result.failed_count, result.routed_count
        );
        Ok(result)
    }

    /// End of the invocation budget, measured from the start of the invocation.
    fn deadline(&self) -> Option<Instant> {
        self.invocation_budget.map(|budget| Instant::now() + budget)
    }

    async fn ensure_active(&self, logs: &[String]) -> Result<(), RelayError> {
        for log in logs {
            match self.logs.is_active(log).await {
                Ok(true) => {}
                Ok(false) => return Err(ConfigError::InactiveLog(log.clone()).into()),
                Err(e) => return Err(RelayError::Log(e)),
            }
        }
        Ok(())
    }

    async fn process(
        &self,
        mut entries: Vec<LogEntry>,
        rules: &RoutingRules,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
        result: &mut BatchResult,
    ) {
        // Pushed entries may arrive out of order; the watermark walks positions.
        entries.sort_by_key(|entry| entry.position);
        let mut watermark = Watermark::new(entries.iter().map(|e| e.position).collect());
        let mut outcomes = stream::iter(entries.into_iter().enumerate())
            .map(move |(index, entry)| async move {
                (index, self.relay_entry(&entry, rules).await)
            })
            .buffer_unordered(self.max_concurrency);

        let budget_expired = expired(deadline);
        tokio::pin!(budget_expired);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("RELAY | Invocation cancelled, stopping batch early");
                    result.interrupted = true;
                    break;
                }
                () = &mut budget_expired => {
                    warn!("RELAY | Invocation budget exhausted, stopping batch early");
                    result.interrupted = true;
                    break;
                }
                next = outcomes.next() => next,
            };
            let Some((index, status)) = next else {
                break;
            };

            match status {
                ItemStatus::Processed => result.processed_count += 1,
                ItemStatus::Failed { routed } => {
                    result.failed_count += 1;
                    if routed {
                        result.routed_count += 1;
                    }
                }
            }
            if let Some(position) = watermark.complete(index) {
                result.last_position = Some(position);
            }
        }
    }

    async fn relay_entry(&self, entry: &LogEntry, rules: &RoutingRules) -> ItemStatus {
        let outcome = match WorkItem::parse(&entry.value) {
            Ok(item) => ItemOutcome::Dispatched(self.dispatcher.execute(&item).await),
            Err(e) => {
                warn!(
                    "RELAY | Entry {}/{} is not a valid work item: {e}",
                    entry.partition, entry.position
                );
                ItemOutcome::Malformed(e)
            }
        };

        match self.router.route(entry, &outcome, rules).await {
            Ok(None) => ItemStatus::Processed,
            Ok(Some(_)) => ItemStatus::Failed { routed: true },
            Err(_) => ItemStatus::Failed { routed: false },
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Relay")
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Highest position below which every entry of the batch has finished.
struct Watermark {
    positions: Vec<u64>,
    completed: Vec<bool>,
    next: usize,
}

impl Watermark {
    fn new(positions: Vec<u64>) -> Self {
        let completed = vec![false; positions.len()];
        Self {
            positions,
            completed,
            next: 0,
        }
    }

    /// Marks the entry at `index` finished; returns the new watermark when it moved.
    fn complete(&mut self, index: usize) -> Option<u64> {
        if let Some(done) = self.completed.get_mut(index) {
            *done = true;
        }
        let mut moved = None;
        while self.completed.get(self.next).copied().unwrap_or(false) {
            moved = self.positions.get(self.next).copied();
            self.next += 1;
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_store::InMemoryLogStore;
    use crate::secrets::InMemorySecretStore;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn batch_futures_are_send() {
        let config = RelayConfig::default();
        let relay = Relay::new(
            &config,
            Arc::new(InMemoryLogStore::new()),
            Arc::new(InMemorySecretStore::new()),
            reqwest::Client::new(),
        );
        let rules =
            RoutingRules::new(Vec::<(String, String)>::new(), Some("errors".to_string())).unwrap();
        let cancel = CancellationToken::new();

        let batch = relay.run_batch_until(
            BatchRequest {
                log: "orders".to_string(),
                partition: "0".to_string(),
                start: StartPosition::Beginning,
                max_items: 1,
                rules: rules.clone(),
            },
            &cancel,
        );
        assert_send(&batch);

        let delivered = relay.relay_entries(Vec::new(), &rules, &cancel);
        assert_send(&delivered);
    }

    #[test]
    fn watermark_in_order() {
        let mut watermark = Watermark::new(vec![10, 11, 12]);
        assert_eq!(watermark.complete(0), Some(10));
        assert_eq!(watermark.complete(1), Some(11));
        assert_eq!(watermark.complete(2), Some(12));
    }

    #[test]
    fn watermark_waits_for_gaps() {
        let mut watermark = Watermark::new(vec![10, 11, 12, 13]);
        assert_eq!(watermark.complete(2), None);
        assert_eq!(watermark.complete(3), None);
        assert_eq!(watermark.complete(1), None);
        assert_eq!(watermark.complete(0), Some(13));
    }

    #[test]
    fn watermark_ignores_unknown_index() {
        let mut watermark = Watermark::new(vec![5]);
        assert_eq!(watermark.complete(3), None);
        assert_eq!(watermark.complete(0), Some(5));
    }
}
