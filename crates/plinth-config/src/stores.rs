//! External value stores
//!
//! Override directives read their raw textual values from a secret store or
//! a config store. Both are reached through [`ValueStore`]; concrete stores
//! (cluster secrets, config maps, in-memory maps) live with their backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::overrides::ValueSource;

/// Reference to one key inside a named secret or config object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRef {
    /// Object name
    pub name: String,
    /// Namespace, defaults to the namespace of the configuration resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Key within the object
    pub key: String,
}

impl ValueRef {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            key: key.into(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Namespace to look in, falling back to `default_namespace`
    pub fn namespace_or<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default_namespace)
    }
}

impl std::fmt::Display for ValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}#{}", ns, self.name, self.key),
            None => write!(f, "{}#{}", self.name, self.key),
        }
    }
}

/// Errors returned by value stores
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or answered with an error
    #[error("lookup of '{reference}' in {store} store failed: {message}")]
    Lookup {
        store: String,
        reference: String,
        message: String,
    },

    /// The store answered but the object or key does not exist
    #[error("key '{reference}' not found in {store} store")]
    KeyNotFound { store: String, reference: String },
}

impl StoreError {
    pub fn lookup(store: &str, reference: &ValueRef, message: impl Into<String>) -> Self {
        Self::Lookup {
            store: store.to_string(),
            reference: reference.to_string(),
            message: message.into(),
        }
    }

    pub fn key_not_found(store: &str, reference: &ValueRef) -> Self {
        Self::KeyNotFound {
            store: store.to_string(),
            reference: reference.to_string(),
        }
    }
}

/// Trait for stores that resolve a reference to raw text
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Name of this store (for logging and error messages)
    fn name(&self) -> &str;

    /// Fetch the raw textual value for `reference`
    async fn get_value(&self, reference: &ValueRef) -> Result<String, StoreError>;
}

/// The pair of stores a reconciliation pass reads overrides from
#[derive(Clone)]
pub struct StoreSet {
    secrets: Arc<dyn ValueStore>,
    config: Arc<dyn ValueStore>,
}

impl StoreSet {
    pub fn new(secrets: Arc<dyn ValueStore>, config: Arc<dyn ValueStore>) -> Self {
        Self { secrets, config }
    }

    /// Fetch the value a directive source points at
    pub async fn fetch(&self, source: &ValueSource) -> Result<String, StoreError> {
        match source {
            ValueSource::SecretRef(reference) => self.secrets.get_value(reference).await,
            ValueSource::ConfigRef(reference) => self.config.get_value(reference).await,
        }
    }
}

impl std::fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSet")
            .field("secrets", &self.secrets.name())
            .field("config", &self.config.name())
            .finish()
    }
}

/// In-memory store keyed by `namespace/name#key`
///
/// References without a namespace match entries inserted without one.
pub struct StaticStore {
    name: String,
    values: RwLock<HashMap<String, String>>,
    unreachable: AtomicBool,
}

impl StaticStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Builder-style insert
    pub fn with_value(mut self, reference: ValueRef, value: impl Into<String>) -> Self {
        self.values
            .get_mut()
            .insert(reference.to_string(), value.into());
        self
    }

    pub async fn insert(&self, reference: ValueRef, value: impl Into<String>) {
        let mut values = self.values.write().await;
        values.insert(reference.to_string(), value.into());
    }

    pub async fn remove(&self, reference: &ValueRef) -> Option<String> {
        let mut values = self.values.write().await;
        values.remove(&reference.to_string())
    }

    /// Make every lookup fail as if the backend were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ValueStore for StaticStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_value(&self, reference: &ValueRef) -> Result<String, StoreError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(StoreError::lookup(&self.name, reference, "store unreachable"));
        }

        let values = self.values.read().await;
        values
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| StoreError::key_not_found(&self.name, reference))
    }
}

impl std::fmt::Debug for StaticStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticStore")
            .field("name", &self.name)
            .field("values", &"<redacted>")
            .finish()
    }
}
