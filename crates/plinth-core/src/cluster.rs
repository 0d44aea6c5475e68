//! Cluster capabilities
//!
//! Plinth never talks to a cluster directly. Everything goes through two
//! capabilities: [`ClusterApi`] for typed object access and watches, and
//! [`Deployer`] for installing manifest sets. Backends implement both.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClusterError;

pub const SECRET_KIND: &str = "Secret";
pub const CONFIG_MAP_KIND: &str = "ConfigMap";
pub const NAMESPACE_KIND: &str = "Namespace";

/// Identity of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A typed cluster object
///
/// `generation` is assigned by the cluster and changes only when the
/// desired part of the object (spec, data, labels) changes; status writes
/// leave it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObject {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub generation: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Key/value payload for `Secret` (base64) and `ConfigMap` (plain) objects
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl ClusterObject {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
            generation: 0,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            data: BTreeMap::new(),
            spec: Value::Null,
            status: Value::Null,
        }
    }

    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.kind, &self.namespace, &self.name)
    }

    /// Whether `other` differs in its desired part
    pub fn desired_differs(&self, other: &ClusterObject) -> bool {
        self.spec != other.spec
            || self.data != other.data
            || self.labels != other.labels
            || self.annotations != other.annotations
    }
}

/// Change notification from a watch
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Created or updated
    Applied(ClusterObject),
    Deleted(ClusterObject),
}

impl WatchEvent {
    pub fn object(&self) -> &ClusterObject {
        match self {
            Self::Applied(object) | Self::Deleted(object) => object,
        }
    }
}

/// Typed object access against the cluster API
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
    ) -> Result<Option<ClusterObject>, ClusterError>;

    /// List every object of `kind` across namespaces
    async fn list(&self, kind: &str) -> Result<Vec<ClusterObject>, ClusterError>;

    /// Create or replace the desired part of an object
    async fn apply(&self, namespace: &str, object: ClusterObject)
    -> Result<ClusterObject, ClusterError>;

    /// Delete an object; returns whether it existed
    async fn delete(&self, namespace: &str, name: &str, kind: &str) -> Result<bool, ClusterError>;

    /// Replace only the status of an existing object
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        status: Value,
    ) -> Result<ClusterObject, ClusterError>;

    /// Stream of changes to objects of `kind`
    fn watch(&self, kind: &str) -> BoxStream<'static, WatchEvent>;
}

/// Installs and removes platform components
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Apply a named set of manifests into `namespace`
    async fn apply_manifest_set(
        &self,
        namespace: &str,
        manifests: &[&str],
    ) -> Result<(), ClusterError>;

    /// Remove a named set of manifests from `namespace`
    async fn delete_manifest_set(
        &self,
        namespace: &str,
        manifests: &[&str],
    ) -> Result<(), ClusterError>;

    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    /// Return the data of an existing secret, or create it with `data`
    async fn get_or_create_secret(
        &self,
        name: &str,
        namespace: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ClusterError>;

    /// Wait until the named workload reports ready
    async fn wait_for_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError>;
}

/// Type alias for a shared cluster API client
pub type DynCluster = Arc<dyn ClusterApi>;

/// Type alias for a shared deployer
pub type DynDeployer = Arc<dyn Deployer>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_desired_differs_ignores_status() {
        let a = ClusterObject::new("PlatformDeployment", "platform", "main")
            .with_spec(json!({"config": {}}));
        let mut b = a.clone();
        b.status = json!({"lastError": "boom"});
        b.generation = 7;
        assert!(!a.desired_differs(&b));

        b.spec = json!({"config": {"ingress": {"enabled": false}}});
        assert!(a.desired_differs(&b));
    }

    #[test]
    fn test_object_serde() {
        let object = ClusterObject::new(SECRET_KIND, "platform", "pg").with_data("password", "aHVudGVyMg==");
        let json = serde_json::to_value(&object).unwrap();
        assert_eq!(json["data"]["password"], "aHVudGVyMg==");
        assert!(json.get("labels").is_none());

        let back: ClusterObject = serde_json::from_value(json).unwrap();
        assert_eq!(back, object);
    }
}
