use plinth_core::{OrchestratorOptions, OrderedFailurePolicy, ResourceKey};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while loading controller settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings build error: {0}")]
    Build(String),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Controller settings, loaded from `plinth.toml` and `PLINTH__*` variables
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Operator-supplied defaults document (TOML or JSON)
    #[serde(default)]
    pub defaults_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Concurrent reconciliation passes across resources
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// 0 disables periodic resync
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// Namespace of the configuration resource
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Name of the configuration resource
    #[serde(default = "default_resource_name")]
    pub resource_name: String,
    /// Upper bound for component readiness waits
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval_secs: default_resync_interval_secs(),
            namespace: default_namespace(),
            resource_name: default_resource_name(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}
fn default_resync_interval_secs() -> u64 {
    300
}
fn default_namespace() -> String {
    "platform-system".into()
}
fn default_resource_name() -> String {
    "platform".into()
}
fn default_ready_timeout_secs() -> u64 {
    300
}

impl ControllerSettings {
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(&self.namespace, &self.resource_name)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// 0 disables the per-unit timeout
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
    #[serde(default)]
    pub ordered_failure_policy: OrderedFailurePolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            unit_timeout_secs: default_unit_timeout_secs(),
            ordered_failure_policy: OrderedFailurePolicy::default(),
        }
    }
}

fn default_max_parallel() -> usize {
    4
}
fn default_unit_timeout_secs() -> u64 {
    600
}

impl OrchestratorSettings {
    pub fn options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            max_parallel: self.max_parallel,
            unit_timeout: (self.unit_timeout_secs > 0)
                .then(|| Duration::from_secs(self.unit_timeout_secs)),
            ordered_failure_policy: self.ordered_failure_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.controller.workers == 0 {
            return Err(SettingsError::Invalid("controller.workers must be > 0".into()));
        }
        if self.controller.namespace.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "controller.namespace must not be empty".into(),
            ));
        }
        if self.controller.resource_name.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "controller.resource_name must not be empty".into(),
            ));
        }
        if self.orchestrator.max_parallel == 0 {
            return Err(SettingsError::Invalid(
                "orchestrator.max_parallel must be > 0".into(),
            ));
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(SettingsError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        if let Some(path) = &self.defaults_path
            && !path.exists()
        {
            return Err(SettingsError::Invalid(format!(
                "defaults_path {} does not exist",
                path.display()
            )));
        }
        Ok(())
    }
}

pub mod loader {
    use super::{Settings, SettingsError};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    /// Default settings file looked up in the working directory
    pub const DEFAULT_SETTINGS_FILE: &str = "plinth.toml";

    pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                if !p.exists() {
                    return Err(SettingsError::Build(format!(
                        "settings file {} not found",
                        p.display()
                    )));
                }
                builder = builder.add_source(File::from(p.to_path_buf()));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_SETTINGS_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., PLINTH__CONTROLLER__WORKERS=8
        builder = builder.add_source(
            Environment::with_prefix("PLINTH")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| SettingsError::Build(e.to_string()))?;
        let merged: Settings = cfg
            .try_deserialize()
            .map_err(|e| SettingsError::Build(format!("deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.controller.resource_key().to_string(), "platform-system/platform");
        assert_eq!(settings.controller.resync_interval(), Some(Duration::from_secs(300)));
        assert_eq!(
            settings.orchestrator.options().unit_timeout,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_zero_disables_timers() {
        let mut settings = Settings::default();
        settings.controller.resync_interval_secs = 0;
        settings.orchestrator.unit_timeout_secs = 0;
        assert_eq!(settings.controller.resync_interval(), None);
        assert_eq!(settings.orchestrator.options().unit_timeout, None);
    }

    #[test]
    fn test_validation_errors() {
        let mut settings = Settings::default();
        settings.controller.workers = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.logging.level = "loud".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));

        let mut settings = Settings::default();
        settings.defaults_path = Some(PathBuf::from("/nonexistent/defaults.toml"));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plinth.toml");
        std::fs::write(
            &path,
            r#"
[controller]
workers = 2
namespace = "ops"

[orchestrator]
ordered_failure_policy = "halt"
max_parallel = 8
"#,
        )
        .unwrap();

        let settings = loader::load_settings(Some(&path)).unwrap();
        assert_eq!(settings.controller.workers, 2);
        assert_eq!(settings.controller.namespace, "ops");
        assert_eq!(settings.controller.resource_name, "platform");
        assert_eq!(
            settings.orchestrator.ordered_failure_policy,
            OrderedFailurePolicy::Halt
        );
        assert_eq!(settings.orchestrator.max_parallel, 8);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = loader::load_settings(Some(std::path::Path::new("/nonexistent/plinth.toml")))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Build(_)));
    }
}
