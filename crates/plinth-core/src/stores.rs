//! Value stores backed by cluster objects

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use plinth_config::{StoreError, ValueRef, ValueStore};

use crate::cluster::{CONFIG_MAP_KIND, DynCluster, SECRET_KIND};

/// Reads override values from `Secret` objects; data is base64 encoded
pub struct ClusterSecretStore {
    cluster: DynCluster,
}

impl ClusterSecretStore {
    pub fn new(cluster: DynCluster) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl ValueStore for ClusterSecretStore {
    fn name(&self) -> &str {
        "secret"
    }

    async fn get_value(&self, reference: &ValueRef) -> Result<String, StoreError> {
        let encoded = lookup(&self.cluster, self.name(), SECRET_KIND, reference).await?;
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| StoreError::lookup(self.name(), reference, format!("invalid base64: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| StoreError::lookup(self.name(), reference, format!("invalid UTF-8: {e}")))
    }
}

/// Reads override values from `ConfigMap` objects
pub struct ClusterConfigStore {
    cluster: DynCluster,
}

impl ClusterConfigStore {
    pub fn new(cluster: DynCluster) -> Self {
        Self { cluster }
    }
}

#[async_trait]
impl ValueStore for ClusterConfigStore {
    fn name(&self) -> &str {
        "config"
    }

    async fn get_value(&self, reference: &ValueRef) -> Result<String, StoreError> {
        lookup(&self.cluster, self.name(), CONFIG_MAP_KIND, reference).await
    }
}

async fn lookup(
    cluster: &DynCluster,
    store: &str,
    kind: &str,
    reference: &ValueRef,
) -> Result<String, StoreError> {
    let Some(namespace) = reference.namespace.as_deref() else {
        return Err(StoreError::lookup(store, reference, "reference has no namespace"));
    };

    let object = cluster
        .get(namespace, &reference.name, kind)
        .await
        .map_err(|e| StoreError::lookup(store, reference, e.to_string()))?
        .ok_or_else(|| StoreError::key_not_found(store, reference))?;

    object
        .data
        .get(&reference.key)
        .cloned()
        .ok_or_else(|| StoreError::key_not_found(store, reference))
}
