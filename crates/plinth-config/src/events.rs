//! Configuration change events

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Where a change notification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// Configuration file on disk
    File,
}

impl std::fmt::Display for ChangeOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
        }
    }
}

/// What happened to the configuration resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// Created or updated
    Applied,
    /// Removed
    Deleted,
}

impl std::fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Event representing a change to a configuration resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChangeEvent {
    pub origin: ChangeOrigin,
    pub operation: ChangeOperation,
    /// Namespace of the configuration resource
    pub namespace: String,
    /// Name of the configuration resource
    pub name: String,
    /// Timestamp of the change
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ConfigChangeEvent {
    pub fn new(
        origin: ChangeOrigin,
        operation: ChangeOperation,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            operation,
            namespace: namespace.into(),
            name: name.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Create a change event for a file-backed resource
    pub fn file_changed(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ChangeOrigin::File, ChangeOperation::Applied, namespace, name)
    }

    /// Create a deletion event for a file-backed resource
    pub fn file_removed(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ChangeOrigin::File, ChangeOperation::Deleted, namespace, name)
    }
}
