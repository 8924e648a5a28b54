// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::StatusCode;

use crate::log_store::LogError;

/// Configuration problems detected before a batch touches any log or target.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no default error log configured")]
    MissingDefaultDestination,

    #[error("error mapping for {0:?} has an empty destination log")]
    EmptyDestination(String),

    #[error("unsupported response code {0:?} in error mapping")]
    InvalidResponseCode(String),

    #[error("log {0} does not exist or is not active")]
    InactiveLog(String),

    #[error("{0}")]
    Invalid(String),
}

/// Errors that abort a whole relay invocation.
///
/// Everything else (malformed entries, transport failures, mapped error
/// statuses, failed forwards) stays inside the item that caused it and is
/// only visible through the batch counters.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid trigger payload: {0}")]
    Trigger(String),

    #[error("Failed to create cursor on log {log}: {source}")]
    Cursor {
        log: String,
        #[source]
        source: LogError,
    },

    #[error("Failed to read from log {log}: {source}")]
    Read {
        log: String,
        #[source]
        source: LogError,
    },

    #[error("Log store error: {0}")]
    Log(#[source] LogError),
}

impl RelayError {
    /// Status returned to a trigger caller when the invocation could not run.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Trigger(_) => StatusCode::BAD_REQUEST,
            RelayError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RelayError::Cursor { .. } | RelayError::Read { .. } | RelayError::Log(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}
