// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Seam to the partitioned log service, plus an in-memory implementation.
//!
//! The relay only needs four primitives from the log service: an activity
//! check used to validate routing destinations, cursor creation, bounded
//! reads, and single-entry appends used when forwarding failed items.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::model::LogEntry;

/// Where a cursor starts reading inside a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Start at this position, inclusive.
    AtOffset(u64),
    /// Start strictly after this position.
    AfterOffset(u64),
    /// Start at the oldest retained position.
    Beginning,
}

/// Server issued read position within a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where an appended entry landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendReceipt {
    pub partition: String,
    pub position: u64,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("log {0} not found")]
    NotFound(String),

    #[error("partition {partition} not found in log {log}")]
    PartitionNotFound { log: String, partition: String },

    #[error("invalid cursor {0:?}")]
    InvalidCursor(String),

    #[error("log {0} is not active")]
    Inactive(String),

    #[error("log store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Whether `log` exists and accepts reads and appends.
    async fn is_active(&self, log: &str) -> Result<bool, LogError>;

    async fn create_cursor(
        &self,
        log: &str,
        partition: &str,
        start: StartPosition,
    ) -> Result<Cursor, LogError>;

    /// Returns up to `limit` entries in position order starting at `cursor`.
    async fn get_entries(
        &self,
        log: &str,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<LogEntry>, LogError>;

    /// Appends one entry; the partition is chosen from the key.
    async fn append(&self, log: &str, key: Bytes, value: Bytes) -> Result<AppendReceipt, LogError>;
}

#[derive(Debug, Default)]
struct MemoryPartition {
    entries: Vec<LogEntry>,
    next_position: u64,
}

#[derive(Debug)]
struct MemoryLog {
    active: bool,
    unavailable: bool,
    partitions: Vec<MemoryPartition>,
}

/// Process-local log store. Clones share the same logs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogStore {
    logs: Arc<Mutex<HashMap<String, MemoryLog>>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a single-partition log named `log`; partition ids are `"0"`, `"1"`, ...
    pub fn create_log(&self, log: &str) {
        self.create_partitioned_log(log, 1);
    }

    pub fn create_partitioned_log(&self, log: &str, partitions: usize) {
        let partitions = (0..partitions.max(1))
            .map(|_| MemoryPartition::default())
            .collect();
        self.lock().insert(
            log.to_string(),
            MemoryLog {
                active: true,
                unavailable: false,
                partitions,
            },
        );
    }

    pub fn set_active(&self, log: &str, active: bool) {
        if let Some(memory_log) = self.lock().get_mut(log) {
            memory_log.active = active;
        }
    }

    /// Makes every call against `log` fail as if the service were unreachable.
    pub fn set_unavailable(&self, log: &str, unavailable: bool) {
        if let Some(memory_log) = self.lock().get_mut(log) {
            memory_log.unavailable = unavailable;
        }
    }

    /// Drops entries below `position`, as a retention policy would.
    pub fn trim_before(&self, log: &str, partition: &str, position: u64) {
        let mut logs = self.lock();
        let Some(memory_log) = logs.get_mut(log) else {
            return;
        };
        if let Some(p) = partition_index(partition).and_then(|i| memory_log.partitions.get_mut(i))
        {
            p.entries.retain(|e| e.position >= position);
            p.next_position = p.next_position.max(position);
        }
    }

    /// Every retained entry of `log`, partition by partition.
    pub fn entries(&self, log: &str) -> Vec<LogEntry> {
        self.lock()
            .get(log)
            .map(|memory_log| {
                memory_log
                    .partitions
                    .iter()
                    .flat_map(|p| p.entries.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryLog>> {
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn partition_index(partition: &str) -> Option<usize> {
    partition.parse::<usize>().ok()
}

fn usable<'a>(
    logs: &'a mut HashMap<String, MemoryLog>,
    log: &str,
) -> Result<&'a mut MemoryLog, LogError> {
    let memory_log = logs
        .get_mut(log)
        .ok_or_else(|| LogError::NotFound(log.to_string()))?;
    if memory_log.unavailable {
        return Err(LogError::Unavailable(format!("log {log} is unreachable")));
    }
    if !memory_log.active {
        return Err(LogError::Inactive(log.to_string()));
    }
    Ok(memory_log)
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn is_active(&self, log: &str) -> Result<bool, LogError> {
        match self.lock().get(log) {
            Some(memory_log) if memory_log.unavailable => {
                Err(LogError::Unavailable(format!("log {log} is unreachable")))
            }
            Some(memory_log) => Ok(memory_log.active),
            None => Ok(false),
        }
    }

    async fn create_cursor(
        &self,
        log: &str,
        partition: &str,
        start: StartPosition,
    ) -> Result<Cursor, LogError> {
        let mut logs = self.lock();
        let memory_log = usable(&mut logs, log)?;
        let memory_partition = partition_index(partition)
            .and_then(|i| memory_log.partitions.get(i))
            .ok_or_else(|| LogError::PartitionNotFound {
                log: log.to_string(),
                partition: partition.to_string(),
            })?;

        let oldest = memory_partition
            .entries
            .first()
            .map_or(memory_partition.next_position, |e| e.position);
        let position = match start {
            StartPosition::Beginning => oldest,
            StartPosition::AtOffset(offset) => offset.max(oldest),
            StartPosition::AfterOffset(offset) => offset.saturating_add(1).max(oldest),
        };
        Ok(Cursor::new(format!("{partition}@{position}")))
    }

    async fn get_entries(
        &self,
        log: &str,
        cursor: &Cursor,
        limit: usize,
    ) -> Result<Vec<LogEntry>, LogError> {
        let (partition, position) = cursor
            .as_str()
            .rsplit_once('@')
            .and_then(|(partition, position)| {
                Some((partition_index(partition)?, position.parse::<u64>().ok()?))
            })
            .ok_or_else(|| LogError::InvalidCursor(cursor.as_str().to_string()))?;

        let mut logs = self.lock();
        let memory_log = usable(&mut logs, log)?;
        let memory_partition = memory_log
            .partitions
            .get(partition)
            .ok_or_else(|| LogError::InvalidCursor(cursor.as_str().to_string()))?;

        Ok(memory_partition
            .entries
            .iter()
            .filter(|e| e.position >= position)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append(&self, log: &str, key: Bytes, value: Bytes) -> Result<AppendReceipt, LogError> {
        let mut logs = self.lock();
        let memory_log = usable(&mut logs, log)?;

        let index = if key.is_empty() {
            0
        } else {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % memory_log.partitions.len() as u64) as usize
        };
        let memory_partition = &mut memory_log.partitions[index];
        let position = memory_partition.next_position;
        memory_partition.next_position += 1;
        memory_partition.entries.push(LogEntry {
            key,
            value,
            partition: index.to_string(),
            position,
        });

        Ok(AppendReceipt {
            partition: index.to_string(),
            position,
        })
    }
}
