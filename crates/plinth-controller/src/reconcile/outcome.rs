//! Pass triggers, states and outcomes

use plinth_core::{AggregateApplyError, Checksum, ClusterError, CoreError, ResolveError};
use std::sync::Arc;

/// Why a pass was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Create or update of the configuration resource
    Watch,
    /// Explicit re-run request; bypasses the checksum gate
    Rerun,
    /// Periodic resync
    Resync,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Watch => write!(f, "watch"),
            Self::Rerun => write!(f, "rerun"),
            Self::Resync => write!(f, "resync"),
        }
    }
}

/// Per-resource pass states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Resolving,
    Diffing,
    Applying,
    Persisting,
    Failed,
}

impl std::fmt::Display for PassState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Diffing => "diffing",
            Self::Applying => "applying",
            Self::Persisting => "persisting",
            Self::Failed => "failed",
        };
        f.write_str(state)
    }
}

/// Errors that fail a reconciliation pass
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Resource(#[from] CoreError),

    #[error("resolve failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("apply failed: {0}")]
    Apply(#[from] AggregateApplyError),

    #[error("status update failed: {0}")]
    Status(ClusterError),
}

impl ReconcileError {
    /// State the pass was in when it failed
    pub fn state(&self) -> PassState {
        match self {
            Self::Cluster(_) | Self::Resource(_) | Self::Resolve(_) => PassState::Resolving,
            Self::Apply(_) => PassState::Applying,
            Self::Status(_) => PassState::Persisting,
        }
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone)]
pub enum PassOutcome {
    /// Resolved state equals the last applied state
    Skipped { checksum: Checksum },
    /// The configuration resource does not exist
    NotFound,
    Applied {
        checksum: Checksum,
        units: usize,
        forced: bool,
    },
    Failed(Arc<ReconcileError>),
}

impl PassOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn error(&self) -> Option<&ReconcileError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Human readable one-line summary
    pub fn describe(&self) -> String {
        match self {
            Self::Skipped { checksum } => format!("up to date (checksum {checksum})"),
            Self::NotFound => "configuration resource not found".to_string(),
            Self::Applied {
                checksum,
                units,
                forced,
            } => {
                let how = if *forced { "re-applied" } else { "applied" };
                format!("{how} {units} unit(s) (checksum {checksum})")
            }
            Self::Failed(err) => format!("failed while {}: {err}", err.state()),
        }
    }
}

impl std::fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}
