//! Configuration resources and their reconciliation status

use plinth_config::ConfigurationSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::checksum::Checksum;
use crate::cluster::ClusterObject;
use crate::error::CoreError;

/// Kind of the watched configuration resource
pub const CONFIGURATION_KIND: &str = "PlatformDeployment";

/// Namespace/name identity of a configuration resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Outcome bookkeeping persisted on the configuration resource
///
/// `last_applied_*` only move after a fully successful apply. The error and
/// attempt fields are informational and never influence the skip decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_checksum: Option<Checksum>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_applied_time: Option<OffsetDateTime>,
    /// Re-run token that was in effect at the last successful apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_rerun: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_attempt_time: Option<OffsetDateTime>,
}

impl ReconciliationStatus {
    /// Record a successful apply
    pub fn applied(
        &self,
        checksum: Checksum,
        rerun: Option<String>,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            last_applied_checksum: Some(checksum),
            last_applied_time: Some(at),
            last_applied_rerun: rerun,
            last_error: None,
            last_attempt_time: Some(at),
        }
    }

    /// Record a failed attempt; the applied fields are carried over unchanged
    pub fn failed(&self, error: impl Into<String>, at: OffsetDateTime) -> Self {
        Self {
            last_error: Some(error.into()),
            last_attempt_time: Some(at),
            ..self.clone()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Decoded view of a `PlatformDeployment` object
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationResource {
    pub key: ResourceKey,
    pub generation: u64,
    pub spec: ConfigurationSpec,
    pub status: ReconciliationStatus,
}

impl ConfigurationResource {
    pub fn new(key: ResourceKey, spec: ConfigurationSpec) -> Self {
        Self {
            key,
            generation: 0,
            spec,
            status: ReconciliationStatus::default(),
        }
    }

    /// Decode from a cluster object.
    ///
    /// A missing or null status decodes as the empty status.
    pub fn from_object(object: &ClusterObject) -> Result<Self, CoreError> {
        let key = ResourceKey::new(&object.namespace, &object.name);

        if object.kind != CONFIGURATION_KIND {
            return Err(CoreError::invalid_resource(
                key.to_string(),
                format!("expected kind {CONFIGURATION_KIND}, found {}", object.kind),
            ));
        }

        let spec = ConfigurationSpec::from_value(object.spec.clone())
            .map_err(|e| CoreError::invalid_resource(key.to_string(), e.to_string()))?;

        let status = match &object.status {
            Value::Null => ReconciliationStatus::default(),
            status => serde_json::from_value(status.clone())
                .map_err(|e| CoreError::invalid_resource(key.to_string(), e.to_string()))?,
        };

        Ok(Self {
            key,
            generation: object.generation,
            spec,
            status,
        })
    }

    /// Encode as a cluster object carrying spec and status
    pub fn to_object(&self) -> ClusterObject {
        let mut object = ClusterObject::new(CONFIGURATION_KIND, &self.key.namespace, &self.key.name)
            .with_spec(self.spec.to_value());
        object.generation = self.generation;
        object.status = self.status.to_value();
        object
    }
}
