//! Configuration sources
//!
//! A source produces the stored [`ConfigurationSpec`] of one configuration
//! resource and notifies when it changes. The file source backs the local
//! mode of the controller; cluster-backed resources are watched through the
//! cluster API instead.

mod file;

pub use file::{FileSource, FileWatcherConfig};

use crate::ConfigError;
use crate::document::ConfigurationSpec;
use crate::events::ConfigChangeEvent;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Trait for configuration sources
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Name of this source (for logging and debugging)
    fn name(&self) -> &str;

    /// Load the current spec; `None` when the resource does not exist
    async fn load(&self) -> Result<Option<ConfigurationSpec>, ConfigError>;

    /// Start watching for changes
    ///
    /// The source should send events through the provided channel when
    /// configuration changes are detected.
    async fn watch(&self, tx: mpsc::Sender<ConfigChangeEvent>) -> Result<WatchHandle, ConfigError>;
}

/// Handle for a running watcher
pub struct WatchHandle {
    /// Task handle for the watcher
    handle: tokio::task::JoinHandle<()>,
    /// Shutdown signal
    shutdown: tokio::sync::oneshot::Sender<()>,
}

impl WatchHandle {
    /// Create a new watch handle
    pub fn new(
        handle: tokio::task::JoinHandle<()>,
        shutdown: tokio::sync::oneshot::Sender<()>,
    ) -> Self {
        Self { handle, shutdown }
    }

    /// Stop the watcher
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}
