//! Configuration resolution for Plinth
//!
//! This crate turns a stored, partially specified configuration document into
//! the fully resolved desired state consumed by the orchestrator:
//! - Deep-merges the stored document over a defaults document
//! - Applies override directives sourced from secret/config stores
//! - Coerces override values to each field's declared kind
//! - Loads and watches file-backed configuration resources
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐
//! │ stored doc   │     │ defaults doc │
//! └──────┬───────┘     └──────┬───────┘
//!        └─────────┬──────────┘
//!            ┌─────▼─────┐
//!            │ resolver  │   pure deep merge
//!            └─────┬─────┘
//!            ┌─────▼─────┐    ┌─────────────┐
//!            │ overrides │◄───│ ValueStores │
//!            └─────┬─────┘    └─────────────┘
//!                  ▼
//!          typed configuration
//! ```

pub mod document;
pub mod events;
pub mod overrides;
pub mod resolver;
pub mod sources;
pub mod stores;

// Re-export main types
pub use document::ConfigurationSpec;
pub use events::{ChangeOperation, ChangeOrigin, ConfigChangeEvent};
pub use overrides::{
    AppliedOverrides, FieldKind, FieldRegistry, MaterializedField, MaterializedFiles,
    OverrideDirective, OverrideError, ValueSource, apply_overrides,
};
pub use resolver::{MergeError, resolve, resolve_typed};
pub use sources::{ConfigSource, FileSource, FileWatcherConfig, WatchHandle};
pub use stores::{StaticStore, StoreError, StoreSet, ValueRef, ValueStore};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
