// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::model::CredentialRef;

/// Secret content. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        SecretValue(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretValue(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretId(pub String);

/// Current version of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretBundle {
    pub id: SecretId,
    pub value: SecretValue,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret {0} not found")]
    NotFound(String),

    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    #[error("secret store call timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<SecretBundle, SecretError>;

    async fn get_by_name(&self, name: &str) -> Result<SecretBundle, SecretError>;

    /// Creates a new secret whose current version holds `value`.
    async fn create(&self, name: &str, value: &str) -> Result<SecretId, SecretError>;
}

/// Read-through access to the secret store. Nothing is cached: every
/// dispatch sees the secret's current version.
#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    timeout: Duration,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Identifier references fall back to a name lookup when no secret has
    /// that identifier, so callers do not need to know which one they hold.
    pub async fn resolve(&self, reference: &CredentialRef) -> Result<SecretValue, SecretError> {
        let bundle = match reference {
            CredentialRef::Id(id) => match self.call(self.store.get_by_id(id)).await {
                Err(SecretError::NotFound(_)) => {
                    debug!("SECRETS | No secret with id {id}, trying it as a name");
                    self.call(self.store.get_by_name(id)).await?
                }
                other => other?,
            },
            CredentialRef::Name(name) => self.call(self.store.get_by_name(name)).await?,
        };
        Ok(bundle.value)
    }

    /// Returns the id of the secret named `name`, creating it with `value`
    /// only when it does not exist yet. Two concurrent callers may both
    /// create it.
    pub async fn ensure(&self, name: &str, value: &str) -> Result<SecretId, SecretError> {
        match self.call(self.store.get_by_name(name)).await {
            Ok(bundle) => {
                debug!("SECRETS | Secret {name} already exists");
                Ok(bundle.id)
            }
            Err(SecretError::NotFound(_)) => {
                let id = self.call(self.store.create(name, value)).await?;
                info!("SECRETS | Created secret {name} with id {}", id.0);
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, SecretError>>,
    ) -> Result<T, SecretError> {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| SecretError::Timeout(self.timeout))?
    }
}

impl Debug for SecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretResolver")
    }
}

#[derive(Debug)]
struct StoredSecret {
    id: SecretId,
    name: String,
    versions: Vec<SecretValue>,
}

#[derive(Debug, Default)]
struct MemorySecrets {
    secrets: Vec<StoredSecret>,
    next_id: u64,
    unavailable: bool,
    latency: Option<Duration>,
    creates: usize,
}

/// Process-local secret store. Clones share the same secrets.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecretStore {
    inner: Arc<Mutex<MemorySecrets>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, value: &str) -> SecretId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = SecretId(format!("secret-{}", inner.next_id));
        inner.secrets.push(StoredSecret {
            id: id.clone(),
            name: name.to_string(),
            versions: vec![SecretValue::new(value)],
        });
        id
    }

    /// Adds a new current version to the secret with `id`.
    pub fn rotate(&self, id: &SecretId, value: &str) {
        if let Some(secret) = self.lock().secrets.iter_mut().find(|s| &s.id == id) {
            secret.versions.push(SecretValue::new(value));
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Delays every call, to exercise timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Number of secrets created through [`SecretStore::create`].
    pub fn create_count(&self) -> usize {
        self.lock().creates
    }

    fn lock(&self) -> MutexGuard<'_, MemorySecrets> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn before_call(&self) -> Result<(), SecretError> {
        let (unavailable, latency) = {
            let inner = self.lock();
            (inner.unavailable, inner.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(SecretError::Unavailable("secret store is unreachable".into()));
        }
        Ok(())
    }

    fn current(&self, matches: impl Fn(&StoredSecret) -> bool) -> Option<SecretBundle> {
        self.lock().secrets.iter().find(|s| matches(s)).and_then(|s| {
            s.versions.last().map(|value| SecretBundle {
                id: s.id.clone(),
                value: value.clone(),
            })
        })
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get_by_id(&self, id: &str) -> Result<SecretBundle, SecretError> {
        self.before_call().await?;
        self.current(|s| s.id.0 == id)
            .ok_or_else(|| SecretError::NotFound(id.to_string()))
    }

    async fn get_by_name(&self, name: &str) -> Result<SecretBundle, SecretError> {
        self.before_call().await?;
        self.current(|s| s.name == name)
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }

    async fn create(&self, name: &str, value: &str) -> Result<SecretId, SecretError> {
        self.before_call().await?;
        let id = self.insert(name, value);
        self.lock().creates += 1;
        Ok(id)
    }
}
