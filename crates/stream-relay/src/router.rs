// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Classification of per-entry outcomes and forwarding to error logs.
//!
//! # Classification order
//!
//! 1. The entry could not be parsed, or the call never completed:
//!    the `unexpectedError` destination (the default when unset).
//! 2. The target answered 4xx/5xx: the exact status code destination,
//!    then the `4xx`/`5xx` family destination, then the default.
//! 3. Any other status is a success and nothing is forwarded.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{error, info};

use crate::dispatcher::DispatchOutcome;
use crate::error::ConfigError;
use crate::log_store::{AppendReceipt, LogError, LogStore};
use crate::model::{LogEntry, ParseError};

/// Error mapping key for parse and transport failures.
pub const UNEXPECTED_ERROR_KEY: &str = "unexpectedError";
/// Error mapping key accepted in place of an explicit default error log.
pub const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFamily {
    ClientError,
    ServerError,
}

impl StatusFamily {
    fn of(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(StatusFamily::ClientError),
            500..=599 => Some(StatusFamily::ServerError),
            _ => None,
        }
    }
}

/// Which rule selected a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKey {
    Status(u16),
    Family(StatusFamily),
    Unmapped,
    UnexpectedError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub key: RouteKey,
    pub destination: String,
}

/// Response code to error log mapping, built once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRules {
    exact: HashMap<u16, String>,
    families: HashMap<StatusFamily, String>,
    unexpected_error: Option<String>,
    default: String,
}

impl RoutingRules {
    /// Builds rules from `(responseCode, log)` pairs. Accepted codes are
    /// exact 4xx/5xx values, `4xx`, `5xx`, `unexpectedError` and `default`.
    /// `default_log` wins over a `default` mapping; one of them is required.
    pub fn new<I>(mappings: I, default_log: Option<String>) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut exact = HashMap::new();
        let mut families = HashMap::new();
        let mut unexpected_error = None;
        let mut mapped_default = None;

        for (code, log) in mappings {
            let code = code.trim();
            let log = log.trim();
            if log.is_empty() {
                return Err(ConfigError::EmptyDestination(code.to_string()));
            }
            let log = log.to_string();

            if code.eq_ignore_ascii_case(UNEXPECTED_ERROR_KEY) {
                unexpected_error = Some(log);
            } else if code.eq_ignore_ascii_case(DEFAULT_KEY) {
                mapped_default = Some(log);
            } else if code.eq_ignore_ascii_case("4xx") {
                families.insert(StatusFamily::ClientError, log);
            } else if code.eq_ignore_ascii_case("5xx") {
                families.insert(StatusFamily::ServerError, log);
            } else {
                match code.parse::<u16>().ok().filter(|c| StatusFamily::of(*c).is_some()) {
                    Some(status) => {
                        exact.insert(status, log);
                    }
                    None => return Err(ConfigError::InvalidResponseCode(code.to_string())),
                }
            }
        }

        let default = default_log
            .map(|log| log.trim().to_string())
            .filter(|log| !log.is_empty())
            .or(mapped_default)
            .ok_or(ConfigError::MissingDefaultDestination)?;

        Ok(RoutingRules {
            exact,
            families,
            unexpected_error,
            default,
        })
    }

    /// Destination for an error status: exact code, family, then default.
    pub fn for_status(&self, status: u16) -> (RouteKey, &str) {
        if let Some(log) = self.exact.get(&status) {
            return (RouteKey::Status(status), log);
        }
        if let Some((family, log)) =
            StatusFamily::of(status).and_then(|f| self.families.get(&f).map(|log| (f, log)))
        {
            return (RouteKey::Family(family), log);
        }
        (RouteKey::Unmapped, &self.default)
    }

    pub fn unexpected_error(&self) -> &str {
        self.unexpected_error.as_deref().unwrap_or(&self.default)
    }

    pub fn default_destination(&self) -> &str {
        &self.default
    }

    /// Every distinct log the rules can forward to.
    pub fn destinations(&self) -> BTreeSet<&str> {
        self.exact
            .values()
            .chain(self.families.values())
            .chain(self.unexpected_error.iter())
            .map(String::as_str)
            .chain(std::iter::once(self.default.as_str()))
            .collect()
    }
}

/// What happened to a single entry before routing.
#[derive(Debug)]
pub enum ItemOutcome {
    Malformed(ParseError),
    Dispatched(DispatchOutcome),
}

/// Returns `None` when the outcome is a success.
pub fn classify(outcome: &ItemOutcome, rules: &RoutingRules) -> Option<RouteDecision> {
    let unexpected = || RouteDecision {
        key: RouteKey::UnexpectedError,
        destination: rules.unexpected_error().to_string(),
    };
    match outcome {
        ItemOutcome::Malformed(_) => Some(unexpected()),
        ItemOutcome::Dispatched(DispatchOutcome::TransportFailed(_)) => Some(unexpected()),
        ItemOutcome::Dispatched(DispatchOutcome::Responded(status)) => {
            if !is_error(*status) {
                return None;
            }
            let (key, destination) = rules.for_status(status.as_u16());
            Some(RouteDecision {
                key,
                destination: destination.to_string(),
            })
        }
    }
}

fn is_error(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

#[derive(Debug, thiserror::Error)]
#[error("failed to forward entry to {destination}: {source}")]
pub struct ForwardError {
    pub destination: String,
    #[source]
    pub source: LogError,
}

#[derive(Clone)]
pub struct ErrorRouter {
    store: Arc<dyn LogStore>,
}

impl ErrorRouter {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Classifies `outcome` and forwards `entry` when it is a failure.
    /// Returns the decision that was applied, `None` on success.
    pub async fn route(
        &self,
        entry: &LogEntry,
        outcome: &ItemOutcome,
        rules: &RoutingRules,
    ) -> Result<Option<RouteDecision>, ForwardError> {
        let Some(decision) = classify(outcome, rules) else {
            return Ok(None);
        };
        self.forward(entry, &decision.destination).await?;
        Ok(Some(decision))
    }

    /// Appends the entry's original key and value, unmodified, to `destination`.
    pub async fn forward(
        &self,
        entry: &LogEntry,
        destination: &str,
    ) -> Result<AppendReceipt, ForwardError> {
        match self
            .store
            .append(destination, entry.key.clone(), entry.value.clone())
            .await
        {
            Ok(receipt) => {
                info!(
                    "ROUTER | Entry {}/{} pushed to position {} in partition {} of {destination}",
                    entry.partition, entry.position, receipt.position, receipt.partition
                );
                Ok(receipt)
            }
            Err(source) => {
                error!(
                    "ROUTER | Failed to forward entry {}/{} to {destination}: {source}",
                    entry.partition, entry.position
                );
                Err(ForwardError {
                    destination: destination.to_string(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for ErrorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ErrorRouter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchError;
    use crate::log_store::InMemoryLogStore;
    use crate::secrets::SecretError;
    use bytes::Bytes;
    use tracing_test::traced_test;

    fn rules() -> RoutingRules {
        RoutingRules::new(
            vec![
                ("503".to_string(), "errors-503".to_string()),
                ("5xx".to_string(), "errors-5xx".to_string()),
                ("unexpectedError".to_string(), "errors-unexpected".to_string()),
            ],
            Some("errors-default".to_string()),
        )
        .unwrap()
    }

    fn responded(status: u16) -> ItemOutcome {
        ItemOutcome::Dispatched(DispatchOutcome::Responded(
            StatusCode::from_u16(status).unwrap(),
        ))
    }

    fn destination(outcome: &ItemOutcome, rules: &RoutingRules) -> Option<String> {
        classify(outcome, rules).map(|d| d.destination)
    }

    #[test]
    fn successes_are_not_routed() {
        let rules = rules();
        for status in [200, 201, 204, 302, 304] {
            assert_eq!(classify(&responded(status), &rules), None, "{status}");
        }
    }

    #[test]
    fn error_statuses_use_exact_then_family_then_default() {
        let rules = rules();
        assert_eq!(
            classify(&responded(503), &rules),
            Some(RouteDecision {
                key: RouteKey::Status(503),
                destination: "errors-503".into()
            })
        );
        assert_eq!(
            classify(&responded(500), &rules).map(|d| d.key),
            Some(RouteKey::Family(StatusFamily::ServerError))
        );
        assert_eq!(
            classify(&responded(404), &rules),
            Some(RouteDecision {
                key: RouteKey::Unmapped,
                destination: "errors-default".into()
            })
        );
    }

    #[test]
    fn failures_before_a_response_are_unexpected() {
        let rules = rules();
        let malformed = ItemOutcome::Malformed(ParseError::MissingMethod);
        let transport = ItemOutcome::Dispatched(DispatchOutcome::TransportFailed(
            DispatchError::Secret(SecretError::Unavailable("down".into())),
        ));
        assert_eq!(destination(&malformed, &rules).as_deref(), Some("errors-unexpected"));
        assert_eq!(destination(&transport, &rules).as_deref(), Some("errors-unexpected"));

        let without_unexpected =
            RoutingRules::new(Vec::new(), Some("errors-default".into())).unwrap();
        assert_eq!(
            destination(&malformed, &without_unexpected).as_deref(),
            Some("errors-default")
        );
    }

    #[test]
    fn rules_require_a_default() {
        assert_eq!(
            RoutingRules::new(vec![("503".into(), "errors-503".into())], None).unwrap_err(),
            ConfigError::MissingDefaultDestination
        );
        assert_eq!(
            RoutingRules::new(Vec::new(), Some("  ".into())).unwrap_err(),
            ConfigError::MissingDefaultDestination
        );
        let mapped = RoutingRules::new(vec![("default".into(), "fallback".into())], None).unwrap();
        assert_eq!(mapped.default_destination(), "fallback");
    }

    #[test]
    fn rules_reject_bad_mappings() {
        assert_eq!(
            RoutingRules::new(vec![("200".into(), "x".into())], Some("d".into())).unwrap_err(),
            ConfigError::InvalidResponseCode("200".into())
        );
        assert_eq!(
            RoutingRules::new(vec![("teapot".into(), "x".into())], Some("d".into())).unwrap_err(),
            ConfigError::InvalidResponseCode("teapot".into())
        );
        assert_eq!(
            RoutingRules::new(vec![("503".into(), "".into())], Some("d".into())).unwrap_err(),
            ConfigError::EmptyDestination("503".into())
        );
    }

    #[test]
    fn destinations_are_deduplicated() {
        let rules = RoutingRules::new(
            vec![
                ("500".into(), "errors".into()),
                ("502".into(), "errors".into()),
            ],
            Some("errors".into()),
        )
        .unwrap();
        assert_eq!(rules.destinations().into_iter().collect::<Vec<_>>(), vec!["errors"]);
        assert_eq!(
            self::rules().destinations().len(),
            4,
            "503, 5xx, unexpected and default logs"
        );
    }

    #[tokio::test]
    async fn route_forwards_original_key_and_value() {
        let store = InMemoryLogStore::new();
        store.create_log("errors-503");
        let router = ErrorRouter::new(Arc::new(store.clone()));
        let entry = LogEntry::new(
            "0",
            11,
            Bytes::from_static(b"order-11"),
            Bytes::from_static(b"{\"targetRestApi\": \"x\"}"),
        );

        let decision = router
            .route(&entry, &responded(503), &rules())
            .await
            .unwrap();
        assert_eq!(decision.map(|d| d.key), Some(RouteKey::Status(503)));

        let forwarded = store.entries("errors-503");
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].key, entry.key);
        assert_eq!(forwarded[0].value, entry.value);
    }

    #[tokio::test]
    #[traced_test]
    async fn forward_to_missing_log_is_an_error() {
        let router = ErrorRouter::new(Arc::new(InMemoryLogStore::new()));
        let entry = LogEntry::new("0", 1, Bytes::new(), Bytes::from_static(b"{}"));
        let err = router
            .route(&entry, &responded(404), &rules())
            .await
            .unwrap_err();
        assert_eq!(err.destination, "errors-default");
        assert_eq!(err.source, LogError::NotFound("errors-default".into()));
        assert!(logs_contain("ROUTER | Failed to forward entry 0/1 to errors-default"));
    }
}
