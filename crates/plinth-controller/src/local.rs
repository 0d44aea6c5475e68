//! Local mode: a manifest file reconciled against the in-memory cluster
//!
//! The manifest file plays the configuration resource, an optional values
//! file seeds the secrets and config maps that overrides read from, and an
//! optional state file carries the reconciliation status between runs so the
//! checksum gate works across invocations.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use plinth_cluster_memory::InMemoryCluster;
use plinth_config::{
    ChangeOperation, ConfigError, ConfigSource, ConfigurationSpec, FileSource, FileWatcherConfig,
    StoreSet,
};
use plinth_core::{
    CONFIG_MAP_KIND, CONFIGURATION_KIND, ClusterApi, ClusterConfigStore, ClusterError,
    ClusterObject, ClusterSecretStore, ConfigurationResource, CoreError, Orchestrator,
    PlatformConfig, ReconciliationStatus, RegistryError, Resolver, ResourceKey, SECRET_KIND,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{Controller, ControllerOptions};
use crate::reconcile::{PassOutcome, Reconciler, Trigger};
use crate::settings::Settings;
use crate::units;

#[derive(Debug, thiserror::Error)]
pub enum LocalError {
    #[error("manifest {0} not found")]
    ManifestMissing(PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("unit registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("values file {path}: {message}")]
    Values { path: PathBuf, message: String },

    #[error("state file {path}: {message}")]
    State { path: PathBuf, message: String },
}

impl LocalError {
    fn values(path: &Path, message: impl std::fmt::Display) -> Self {
        Self::Values {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    fn state(path: &Path, message: impl std::fmt::Display) -> Self {
        Self::State {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }
}

/// Files the local runtime works from
#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub manifest: PathBuf,
    pub values: Option<PathBuf>,
    pub state: Option<PathBuf>,
}

impl LocalOptions {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            values: None,
            state: None,
        }
    }

    pub fn with_values(mut self, values: impl Into<PathBuf>) -> Self {
        self.values = Some(values.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<PathBuf>) -> Self {
        self.state = Some(state.into());
        self
    }
}

/// Secrets and config maps keyed by namespace, then object name
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValuesFile {
    #[serde(default)]
    secrets: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(default)]
    config: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

/// Persisted reconciliation status of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub status: ReconciliationStatus,
}

impl StateFile {
    pub fn load(path: &Path) -> Result<Option<Self>, LocalError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| LocalError::state(path, e))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| LocalError::state(path, e))
    }

    /// Replace the file atomically; the previous state survives a failed write
    pub fn save(&self, path: &Path) -> Result<(), LocalError> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let content = serde_json::to_vec_pretty(self).map_err(|e| LocalError::state(path, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| LocalError::state(path, e))?;
        tmp.write_all(&content)
            .map_err(|e| LocalError::state(path, e))?;
        tmp.persist(path)
            .map_err(|e| LocalError::state(path, e.error))?;
        Ok(())
    }
}

pub struct LocalRuntime {
    cluster: Arc<InMemoryCluster>,
    reconciler: Arc<Reconciler>,
    source: FileSource,
    key: ResourceKey,
    options: LocalOptions,
    controller: ControllerOptions,
    cancel: CancellationToken,
}

impl LocalRuntime {
    pub fn new(settings: &Settings, options: LocalOptions) -> Result<Self, LocalError> {
        let defaults = match &settings.defaults_path {
            Some(path) => PlatformConfig::load_defaults(path)?,
            None => PlatformConfig::defaults_document(),
        };

        let cluster = Arc::new(InMemoryCluster::new());
        let stores = StoreSet::new(
            Arc::new(ClusterSecretStore::new(cluster.clone())),
            Arc::new(ClusterConfigStore::new(cluster.clone())),
        );
        let cancel = CancellationToken::new();
        let orchestrator =
            Orchestrator::new(settings.orchestrator.options()).with_cancellation(cancel.clone());
        let registry =
            units::default_registry(cluster.clone(), settings.controller.ready_timeout())?;

        let reconciler = Reconciler::new(
            cluster.clone(),
            Resolver::with_defaults(defaults, stores),
            orchestrator,
            registry,
            units::default_order(),
        );

        let key = settings.controller.resource_key();
        let source = FileSource::new(
            FileWatcherConfig::new(&options.manifest).with_identity(&key.namespace, &key.name),
        );

        Ok(Self {
            cluster,
            reconciler: Arc::new(reconciler),
            source,
            key,
            options,
            controller: ControllerOptions {
                workers: settings.controller.workers,
                resync_interval: settings.controller.resync_interval(),
            },
            cancel,
        })
    }

    pub fn cluster(&self) -> &Arc<InMemoryCluster> {
        &self.cluster
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Token that stops [`LocalRuntime::run`] and interrupts running passes
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One pass over the manifest as it is on disk now
    pub async fn apply_once(&self, rerun: bool) -> Result<PassOutcome, LocalError> {
        self.seed_values().await?;
        if !self.sync_manifest(true).await? {
            return Err(LocalError::ManifestMissing(self.options.manifest.clone()));
        }

        let trigger = if rerun { Trigger::Rerun } else { Trigger::Watch };
        let outcome = self.reconciler.reconcile(&self.key, trigger).await;
        self.save_state().await?;
        Ok(outcome)
    }

    /// Reconcile continuously, following manifest changes, until shut down
    pub async fn run(&self) -> Result<(), LocalError> {
        self.seed_values().await?;
        if !self.sync_manifest(true).await? {
            warn!(path = ?self.options.manifest, "Manifest not found yet; waiting for it");
        }

        let controller = Controller::new(
            self.cluster.clone(),
            self.reconciler.clone(),
            self.controller.clone(),
        );
        let mut reports = controller.handle().subscribe();
        let controller = tokio::spawn(controller.run(self.cancel.clone()));

        let (tx, mut changes) = mpsc::channel(16);
        let watcher = self.source.watch(tx).await?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(change) = changes.recv() => {
                    debug!(operation = %change.operation, "Manifest change");
                    if let Err(e) = self.follow_change(change.operation).await {
                        warn!(error = %e, "Could not sync manifest change");
                    }
                }
                report = reports.recv() => match report {
                    Ok(report) if report.key == self.key => {
                        if let Err(e) = self.save_state().await {
                            warn!(error = %e, "Could not persist state");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Pass reports lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        watcher.stop().await;
        self.cancel.cancel();
        match controller.await {
            Ok(result) => result?,
            Err(e) => warn!(error = %e, "Controller task aborted"),
        }
        self.save_state().await?;
        Ok(())
    }

    async fn follow_change(&self, operation: ChangeOperation) -> Result<(), LocalError> {
        if operation == ChangeOperation::Deleted {
            self.cluster
                .delete(&self.key.namespace, &self.key.name, CONFIGURATION_KIND)
                .await?;
            info!(resource = %self.key, "Manifest removed; configuration resource deleted");
            return Ok(());
        }
        self.seed_values().await?;
        self.sync_manifest(false).await?;
        Ok(())
    }

    /// Push the manifest into the cluster; returns whether it exists.
    ///
    /// With `restore`, a freshly created resource gets the persisted status.
    async fn sync_manifest(&self, restore: bool) -> Result<bool, LocalError> {
        let Some(spec) = self.source.load().await? else {
            return Ok(false);
        };
        let object = self.upsert(spec).await?;

        if restore
            && object.status.is_null()
            && let Some(path) = &self.options.state
            && let Some(state) = StateFile::load(path)?
            && state.namespace == self.key.namespace
            && state.name == self.key.name
        {
            debug!(path = ?path, "Restoring persisted status");
            self.cluster
                .update_status(
                    &self.key.namespace,
                    &self.key.name,
                    CONFIGURATION_KIND,
                    state.status.to_value(),
                )
                .await?;
        }
        Ok(true)
    }

    async fn upsert(&self, spec: ConfigurationSpec) -> Result<ClusterObject, LocalError> {
        let object = ConfigurationResource::new(self.key.clone(), spec).to_object();
        Ok(self.cluster.apply(&self.key.namespace, object).await?)
    }

    async fn seed_values(&self) -> Result<(), LocalError> {
        let Some(path) = &self.options.values else {
            return Ok(());
        };
        let values = load_values(path)?;

        for (namespace, objects) in values.secrets {
            for (name, data) in objects {
                let mut secret = ClusterObject::new(SECRET_KIND, &namespace, name);
                secret.data = data
                    .into_iter()
                    .map(|(k, v)| (k, STANDARD.encode(v)))
                    .collect();
                self.cluster.apply(&namespace, secret).await?;
            }
        }
        for (namespace, objects) in values.config {
            for (name, data) in objects {
                let mut config_map = ClusterObject::new(CONFIG_MAP_KIND, &namespace, name);
                config_map.data = data;
                self.cluster.apply(&namespace, config_map).await?;
            }
        }
        Ok(())
    }

    async fn save_state(&self) -> Result<(), LocalError> {
        let Some(path) = &self.options.state else {
            return Ok(());
        };
        let Some(object) = self
            .cluster
            .get(&self.key.namespace, &self.key.name, CONFIGURATION_KIND)
            .await?
        else {
            return Ok(());
        };

        let resource = ConfigurationResource::from_object(&object)?;
        StateFile {
            namespace: self.key.namespace.clone(),
            name: self.key.name.clone(),
            status: resource.status,
        }
        .save(path)
    }
}

fn load_values(path: &Path) -> Result<ValuesFile, LocalError> {
    let content = std::fs::read_to_string(path).map_err(|e| LocalError::values(path, e))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&content).map_err(|e| LocalError::values(path, e))
        }
        _ => toml::from_str(&content).map_err(|e| LocalError::values(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_config::ValueRef;
    use tempfile::TempDir;

    #[test]
    fn test_values_file_formats() {
        let dir = TempDir::new().unwrap();
        let toml_path = dir.path().join("values.toml");
        std::fs::write(
            &toml_path,
            r#"
[secrets.postgres.pg-credentials]
password = "s3cret"

[config.platform-system.tuning]
replicas = "3"
"#,
        )
        .unwrap();
        let values = load_values(&toml_path).unwrap();
        assert_eq!(values.secrets["postgres"]["pg-credentials"]["password"], "s3cret");
        assert_eq!(values.config["platform-system"]["tuning"]["replicas"], "3");

        let json_path = dir.path().join("values.json");
        std::fs::write(&json_path, r#"{"secrets": {}, "unknown": 1}"#).unwrap();
        assert!(matches!(
            load_values(&json_path),
            Err(LocalError::Values { .. })
        ));
    }

    #[test]
    fn test_state_file_replaced_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        assert!(StateFile::load(&path).unwrap().is_none());

        let state = StateFile {
            namespace: "platform-system".to_string(),
            name: "platform".to_string(),
            status: ReconciliationStatus {
                last_error: Some("boom".to_string()),
                ..Default::default()
            },
        };
        state.save(&path).unwrap();
        state.save(&path).unwrap();

        assert_eq!(StateFile::load(&path).unwrap(), Some(state));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_seeded_values_are_readable_by_stores() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("platform.toml");
        let values = dir.path().join("values.toml");
        std::fs::write(&manifest, "[config]\n").unwrap();
        std::fs::write(&values, "[secrets.postgres.pg]\npassword = \"pw\"\n").unwrap();

        let runtime = LocalRuntime::new(
            &Settings::default(),
            LocalOptions::new(&manifest).with_values(&values),
        )
        .unwrap();
        runtime.seed_values().await.unwrap();

        let store = ClusterSecretStore::new(runtime.cluster().clone());
        let value = plinth_config::ValueStore::get_value(
            &store,
            &ValueRef::new("pg", "password").in_namespace("postgres"),
        )
        .await
        .unwrap();
        assert_eq!(value, "pw");
    }
}
