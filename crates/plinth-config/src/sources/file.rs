//! File-based configuration source
//!
//! Reads a configuration resource from a TOML or JSON file and watches it
//! for changes. Used by the controller's local mode.

use crate::ConfigError;
use crate::document::ConfigurationSpec;
use crate::events::ConfigChangeEvent;
use crate::sources::{ConfigSource, WatchHandle};

use async_trait::async_trait;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Configuration for file watcher
#[derive(Debug, Clone)]
pub struct FileWatcherConfig {
    /// Path to the configuration file
    pub path: PathBuf,
    /// Debounce duration for rapid changes
    pub debounce: Duration,
    /// Namespace reported in change events
    pub namespace: String,
    /// Resource name reported in change events
    pub name: String,
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("platform.toml"),
            debounce: Duration::from_millis(500),
            namespace: "default".to_string(),
            name: "platform".to_string(),
        }
    }
}

impl FileWatcherConfig {
    /// Create config for a specific path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set debounce duration
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the resource identity reported in events
    pub fn with_identity(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.name = name.into();
        self
    }
}

/// File-based configuration source
pub struct FileSource {
    config: FileWatcherConfig,
}

impl FileSource {
    /// Create a new file source
    pub fn new(config: FileWatcherConfig) -> Self {
        Self { config }
    }

    /// Create with default config for given path
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(FileWatcherConfig::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Read and parse the configuration file
    fn read_spec(&self) -> Result<Option<ConfigurationSpec>, ConfigError> {
        let path = &self.config.path;

        if !path.exists() {
            debug!(path = ?path, "Configuration file does not exist");
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        parse_spec(path, &content).map(Some)
    }
}

/// Parse by extension; anything other than `.json` is read as TOML.
fn parse_spec(path: &Path, content: &str) -> Result<ConfigurationSpec, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigurationSpec::from_json(content),
        _ => ConfigurationSpec::from_toml(content),
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self) -> Result<Option<ConfigurationSpec>, ConfigError> {
        self.read_spec()
    }

    async fn watch(&self, tx: mpsc::Sender<ConfigChangeEvent>) -> Result<WatchHandle, ConfigError> {
        let path = self.config.path.clone();
        let debounce = self.config.debounce;
        let namespace = self.config.namespace.clone();
        let name = self.config.name.clone();

        // Watch the parent directory so creation and removal are seen too
        let watch_path = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if !watch_path.is_dir() {
            return Err(ConfigError::watcher(format!(
                "directory {} does not exist",
                watch_path.display()
            )));
        }

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut debouncer = match new_debouncer(debounce, notify_tx) {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "Failed to create file watcher");
                    return;
                }
            };

            if let Err(e) = debouncer
                .watcher()
                .watch(&watch_path, RecursiveMode::NonRecursive)
            {
                error!(path = ?watch_path, error = %e, "Failed to watch path");
                return;
            }

            info!(path = ?path, "Started watching configuration file");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("File watcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        while let Ok(events) = notify_rx.try_recv() {
                            let events = match events {
                                Ok(events) => events,
                                Err(e) => {
                                    error!(error = ?e, "File watcher error");
                                    continue;
                                }
                            };

                            // One notification per debounce window is enough
                            if !events.iter().any(|event| event.path.file_name() == path.file_name()) {
                                continue;
                            }

                            let change_event = if path.exists() {
                                info!(path = ?path, "Configuration file changed");
                                ConfigChangeEvent::file_changed(&namespace, &name)
                            } else {
                                info!(path = ?path, "Configuration file removed");
                                ConfigChangeEvent::file_removed(&namespace, &name)
                            };

                            if tx.send(change_event).await.is_err() {
                                warn!("Config change receiver dropped");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(WatchHandle::new(handle, shutdown_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeOperation, ChangeOrigin};
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("platform.toml");

        std::fs::write(
            &path,
            r#"
rerun = "2"

[config.global]
domain = "example.test"

[[overrides]]
fieldPath = "postgres.superuser_password"
materializeAsFile = false
source = { secretRef = { name = "pg", key = "password" } }
"#,
        )
        .unwrap();

        let source = FileSource::from_path(&path);
        let spec = source.load().await.unwrap().unwrap();

        assert_eq!(spec.config["global"]["domain"], "example.test");
        assert_eq!(spec.overrides.len(), 1);
        assert_eq!(spec.rerun.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_load_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("platform.json");

        std::fs::write(&path, r#"{"config": {"ingress": {"enabled": false}}}"#).unwrap();

        let spec = FileSource::from_path(&path).load().await.unwrap().unwrap();
        assert_eq!(spec.config["ingress"]["enabled"], false);
        assert!(spec.overrides.is_empty());
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let source = FileSource::from_path("/nonexistent/platform.toml");
        assert!(source.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("platform.toml");
        std::fs::write(&path, "config = [").unwrap();

        let err = FileSource::from_path(&path).load().await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[tokio::test]
    async fn test_watch_missing_directory() {
        let source = FileSource::from_path("/nonexistent/dir/platform.toml");
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            source.watch(tx).await,
            Err(ConfigError::Watcher(_))
        ));
    }

    #[tokio::test]
    async fn test_file_watcher() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watch-test.toml");

        std::fs::write(&path, "[config.global]\ndomain = \"a.test\"\n").unwrap();

        let source = FileSource::new(
            FileWatcherConfig::new(&path)
                .with_debounce(Duration::from_millis(100))
                .with_identity("platform", "main"),
        );

        let (tx, mut rx) = mpsc::channel(10);
        let handle = source.watch(tx).await.unwrap();

        // Give watcher time to start
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(&path, "[config.global]\ndomain = \"b.test\"\n").unwrap();

        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(event)) => {
                assert_eq!(event.origin, ChangeOrigin::File);
                assert_eq!(event.operation, ChangeOperation::Applied);
                assert_eq!(event.namespace, "platform");
                assert_eq!(event.name, "main");
            }
            Ok(None) => panic!("Channel closed unexpectedly"),
            Err(_) => panic!("Timeout waiting for file change event"),
        }

        handle.stop().await;
    }
}
