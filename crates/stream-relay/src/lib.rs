// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relays JSON work items from a partitioned log to REST endpoints.
//!
//! Each entry of the source log describes one outbound call. The relay reads
//! a bounded batch from a cursor, resolves the entry's credential from the
//! secret store, performs the call once, and forwards the untouched entry to
//! an error log chosen from the response code when it fails. The returned
//! [`BatchResult`] carries the position to resume from, so a batch can be
//! replayed with at-least-once semantics.
//!
//! The log service and the secret store are reached through the
//! [`LogStore`] and [`SecretStore`] traits; [`InMemoryLogStore`] and
//! [`InMemorySecretStore`] implement them in process.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod error;
pub mod http_utils;
pub mod ingest;
pub mod log_store;
pub mod model;
pub mod relay;
pub mod router;
pub mod secrets;
pub mod server;
pub mod trigger;

pub use config::RelayConfig;
pub use error::{ConfigError, RelayError};
pub use log_store::{InMemoryLogStore, LogStore, StartPosition};
pub use model::{BatchResult, LogEntry, WorkItem};
pub use relay::{BatchRequest, Relay};
pub use router::RoutingRules;
pub use secrets::{InMemorySecretStore, SecretStore};
pub use server::RelayServer;
