// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tracing::debug;

use crate::log_store::{Cursor, LogError, LogStore, StartPosition};
use crate::model::LogEntry;

/// Extra entry requested on every read so that "exactly `max_items` left"
/// can be told apart from "more entries exist".
const LOOKAHEAD: usize = 1;

/// One bounded read from a partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// At most `max_items` entries, in position order.
    pub entries: Vec<LogEntry>,
    /// No entry exists past the returned ones at the time of the read.
    pub reached_end: bool,
}

#[derive(Clone)]
pub struct CursorReader {
    store: Arc<dyn LogStore>,
}

impl CursorReader {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    pub async fn create_cursor(
        &self,
        log: &str,
        partition: &str,
        start: StartPosition,
    ) -> Result<Cursor, LogError> {
        debug!("CURSOR | Creating cursor on {log}/{partition} from {start:?}");
        self.store.create_cursor(log, partition, start).await
    }

    pub async fn read_batch(
        &self,
        log: &str,
        cursor: &Cursor,
        max_items: usize,
    ) -> Result<Batch, LogError> {
        if max_items == 0 {
            return Ok(Batch::default());
        }

        let mut entries = self
            .store
            .get_entries(log, cursor, max_items.saturating_add(LOOKAHEAD))
            .await?;
        let reached_end = entries.len() <= max_items;
        entries.truncate(max_items);

        debug!(
            "CURSOR | Read {} entries from {log}, end of log reached: {reached_end}",
            entries.len()
        );
        Ok(Batch {
            entries,
            reached_end,
        })
    }
}

impl std::fmt::Debug for CursorReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CursorReader")
    }
}
