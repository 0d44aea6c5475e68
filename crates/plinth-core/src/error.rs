//! Error types shared across Plinth core.

use std::path::Path;
use std::time::Duration;

/// Errors raised while loading schema-level inputs.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The defaults document could not be read or does not fit the schema.
    #[error("Invalid defaults document {path}: {message}")]
    Defaults { path: String, message: String },

    /// A configuration resource could not be decoded.
    #[error("Invalid configuration resource {resource}: {message}")]
    InvalidResource { resource: String, message: String },
}

impl CoreError {
    #[must_use]
    pub fn defaults(path: &Path, message: impl Into<String>) -> Self {
        Self::Defaults {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_resource(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResource {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by cluster collaborators (API client and deployer).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// The requested object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The API server could not be reached.
    #[error("cluster unavailable: {message}")]
    Unavailable { message: String },

    /// The API server refused the request.
    #[error("{message}")]
    Rejected { message: String },

    /// An object did not become ready in time.
    #[error("{what} not ready after {}s", .timeout.as_secs())]
    Timeout { what: String, timeout: Duration },
}

impl ClusterError {
    #[must_use]
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            timeout,
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
