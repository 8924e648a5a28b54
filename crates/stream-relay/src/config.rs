// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::router::RoutingRules;

const ENV_LOG_LEVEL: &str = "RELAY_LOG_LEVEL";
const ENV_PORT: &str = "RELAY_PORT";
const ENV_DISPATCH_TIMEOUT_MS: &str = "RELAY_DISPATCH_TIMEOUT_MS";
const ENV_SECRET_TIMEOUT_MS: &str = "RELAY_SECRET_TIMEOUT_MS";
const ENV_MAX_CONCURRENCY: &str = "RELAY_MAX_CONCURRENCY";
const ENV_INVOCATION_BUDGET_MS: &str = "RELAY_INVOCATION_BUDGET_MS";
const ENV_MAX_REQUEST_CONTENT_LENGTH: &str = "RELAY_MAX_REQUEST_CONTENT_LENGTH";
const ENV_DATA_LOG: &str = "RELAY_DATA_LOG";
const ENV_DEFAULT_ERROR_LOG: &str = "RELAY_DEFAULT_ERROR_LOG";
const ENV_UNEXPECTED_ERROR_LOG: &str = "RELAY_UNEXPECTED_ERROR_LOG";
/// Prefix of per-status error logs, e.g. `RELAY_ERROR_LOG_503` or `RELAY_ERROR_LOG_5XX`.
const ENV_ERROR_LOG_PREFIX: &str = "RELAY_ERROR_LOG_";
const ENV_PROXY_HTTPS: &str = "RELAY_PROXY_HTTPS";
const ENV_HTTPS_PROXY: &str = "HTTPS_PROXY";

const DEFAULT_PORT: u16 = 8126;
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SECRET_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024; // 10MB in Bytes

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings shared by every relay invocation in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Port of the trigger endpoint server
    pub port: u16,
    /// Timeout for each call to a target REST API
    pub dispatch_timeout: Duration,
    /// Timeout for each call to the secret store
    pub secret_timeout: Duration,
    /// Entries processed concurrently within a batch; 1 is sequential
    pub max_concurrency: usize,
    /// Wall-clock budget of a single batch, unbounded when unset
    pub invocation_budget: Option<Duration>,
    pub max_request_content_length: usize,
    pub https_proxy: Option<String>,
    /// Log receiving entries from the ingest trigger
    pub data_log: Option<String>,
    /// Routing used by the consume trigger, keyed like the retry trigger's error mapping
    pub default_error_log: Option<String>,
    pub unexpected_error_log: Option<String>,
    pub error_logs: BTreeMap<String, String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            port: DEFAULT_PORT,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            secret_timeout: DEFAULT_SECRET_TIMEOUT,
            max_concurrency: 1,
            invocation_budget: None,
            max_request_content_length: DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            https_proxy: None,
            data_log: None,
            default_error_log: None,
            unexpected_error_log: None,
            error_logs: BTreeMap::new(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_env_iter(env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Builds settings from an iterator of key/value pairs. Unparseable
    /// numbers fall back to their defaults.
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str| map.get(key).and_then(|v| non_empty(v));
        let millis = |key: &str| {
            get(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        let error_logs = map
            .iter()
            .filter_map(|(key, value)| {
                let code = key.strip_prefix(ENV_ERROR_LOG_PREFIX)?;
                Some((code.to_lowercase(), non_empty(value)?))
            })
            .collect();

        Self {
            log_level: get(ENV_LOG_LEVEL)
                .map(|v| v.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            port: get(ENV_PORT)
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            dispatch_timeout: millis(ENV_DISPATCH_TIMEOUT_MS).unwrap_or(DEFAULT_DISPATCH_TIMEOUT),
            secret_timeout: millis(ENV_SECRET_TIMEOUT_MS).unwrap_or(DEFAULT_SECRET_TIMEOUT),
            max_concurrency: get(ENV_MAX_CONCURRENCY)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(1),
            invocation_budget: millis(ENV_INVOCATION_BUDGET_MS),
            max_request_content_length: get(ENV_MAX_REQUEST_CONTENT_LENGTH)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_REQUEST_CONTENT_LENGTH),
            https_proxy: get(ENV_PROXY_HTTPS).or_else(|| get(ENV_HTTPS_PROXY)),
            data_log: get(ENV_DATA_LOG),
            default_error_log: get(ENV_DEFAULT_ERROR_LOG),
            unexpected_error_log: get(ENV_UNEXPECTED_ERROR_LOG),
            error_logs,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "Relay port must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(format!(
                "{ENV_MAX_CONCURRENCY} must be at least 1"
            )));
        }

        if self.dispatch_timeout.is_zero() || self.secret_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "Dispatch and secret timeouts must be greater than 0".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Routing rules for entries delivered by the consume trigger.
    pub fn consume_routing_rules(&self) -> Result<RoutingRules, ConfigError> {
        let mut mappings: Vec<(String, String)> = self
            .error_logs
            .iter()
            .map(|(code, log)| (code.clone(), log.clone()))
            .collect();
        if let Some(log) = &self.unexpected_error_log {
            mappings.push((crate::router::UNEXPECTED_ERROR_KEY.to_string(), log.clone()));
        }
        RoutingRules::new(mappings, self.default_error_log.clone())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
