//! Unit and run failures

use std::time::Duration;

use crate::error::ClusterError;

/// Failure of a single deployment unit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitError {
    /// A field the unit needs was not set in the resolved configuration
    #[error("required field '{field}' is not set")]
    MissingField { field: String },

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("cancelled before start")]
    Cancelled,

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

impl UnitError {
    #[must_use]
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A unit name paired with its error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub error: UnitError,
}

impl std::fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.unit, self.error)
    }
}

/// Every unit failure of one run
///
/// Ordered failures come first in execution order, then remainder failures
/// in registration order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} deployment unit(s) failed: {}", .failures.len(), join_failures(.failures))]
pub struct AggregateApplyError {
    pub failures: Vec<UnitFailure>,
    /// Units that did not run because an ordered unit failed under
    /// the halt policy
    pub skipped: Vec<String>,
}

impl AggregateApplyError {
    /// Names of the failed units
    pub fn failed_units(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|failure| failure.unit.as_str())
    }

    /// Whether the run was interrupted by shutdown
    pub fn was_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.error == UnitError::Cancelled)
    }
}

fn join_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while building a registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("deployment unit '{0}' is already registered")]
    DuplicateUnit(String),
}
