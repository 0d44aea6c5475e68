//! Reconciliation passes
//!
//! One pass takes a configuration resource from the cluster to the
//! deployed state:
//!
//! ```text
//! Idle ─► Resolving ─► Diffing ─► Applying ─► Persisting ─► Idle
//!             │            │          │
//!             ▼            ▼          ▼
//!          Failed         Idle      Failed
//! ```
//!
//! Passes for the same resource are serialized in arrival order; passes for
//! different resources may overlap.

mod outcome;

pub use outcome::{PassOutcome, PassState, ReconcileError, Trigger};

use dashmap::DashMap;
use plinth_core::{
    CONFIGURATION_KIND, ConfigurationResource, DynCluster, Orchestrator, PhaseOrder,
    PhaseRegistry, Resolution, Resolver, ResourceKey,
};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Runs reconciliation passes against one cluster
pub struct Reconciler {
    cluster: DynCluster,
    resolver: Resolver,
    orchestrator: Orchestrator,
    registry: PhaseRegistry,
    order: PhaseOrder,
    /// Per-resource pass locks; tokio mutexes hand out the lock in FIFO order
    locks: DashMap<ResourceKey, Arc<Mutex<()>>>,
}

impl Reconciler {
    pub fn new(
        cluster: DynCluster,
        resolver: Resolver,
        orchestrator: Orchestrator,
        registry: PhaseRegistry,
        order: PhaseOrder,
    ) -> Self {
        Self {
            cluster,
            resolver,
            orchestrator,
            registry,
            order,
            locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    /// Run one pass for `key`, waiting for any earlier pass on it to finish
    pub async fn reconcile(&self, key: &ResourceKey, trigger: Trigger) -> PassOutcome {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        debug!(resource = %key, %trigger, "Reconciliation pass started");
        let outcome = match self.pass(key, trigger).await {
            Ok(outcome) => outcome,
            Err(err) => {
                transition(key, err.state(), PassState::Failed);
                warn!(resource = %key, %trigger, error = %err, "Reconciliation pass failed");
                self.record_failure(key, &err).await;
                PassOutcome::Failed(Arc::new(err))
            }
        };

        info!(resource = %key, %trigger, outcome = %outcome, "Reconciliation pass finished");
        outcome
    }

    /// Drop the pass lock of a deleted resource
    pub fn forget(&self, key: &ResourceKey) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn pass(&self, key: &ResourceKey, trigger: Trigger) -> Result<PassOutcome, ReconcileError> {
        let Some(object) = self
            .cluster
            .get(&key.namespace, &key.name, CONFIGURATION_KIND)
            .await?
        else {
            debug!(resource = %key, "Configuration resource not found");
            return Ok(PassOutcome::NotFound);
        };
        let resource = ConfigurationResource::from_object(&object)?;

        transition(key, PassState::Idle, PassState::Resolving);
        // `files` owns materialized temp files until the end of the pass
        let Resolution { resolved, files } =
            self.resolver.resolve(&resource.spec, &key.namespace).await?;
        let checksum = resolved.checksum().clone();

        transition(key, PassState::Resolving, PassState::Diffing);
        let status = &resource.status;
        let forced = trigger == Trigger::Rerun || resource.spec.rerun != status.last_applied_rerun;
        if !forced && status.last_applied_checksum.as_ref() == Some(&checksum) {
            transition(key, PassState::Diffing, PassState::Idle);
            return Ok(PassOutcome::Skipped { checksum });
        }

        transition(key, PassState::Diffing, PassState::Applying);
        info!(
            resource = %key,
            checksum = %checksum,
            previous = ?status.last_applied_checksum.as_ref().map(|c| c.as_str()),
            forced,
            "Applying configuration"
        );
        let report = self
            .orchestrator
            .run(resolved, &self.registry, &self.order)
            .await?;
        drop(files);

        transition(key, PassState::Applying, PassState::Persisting);
        let status = status.applied(
            checksum.clone(),
            resource.spec.rerun.clone(),
            OffsetDateTime::now_utc(),
        );
        self.cluster
            .update_status(&key.namespace, &key.name, CONFIGURATION_KIND, status.to_value())
            .await
            .map_err(ReconcileError::Status)?;

        transition(key, PassState::Persisting, PassState::Idle);
        Ok(PassOutcome::Applied {
            checksum,
            units: report.applied.len(),
            forced,
        })
    }

    /// Best-effort write of the failure into the resource status
    async fn record_failure(&self, key: &ResourceKey, err: &ReconcileError) {
        let current = match self
            .cluster
            .get(&key.namespace, &key.name, CONFIGURATION_KIND)
            .await
        {
            Ok(Some(object)) => object,
            Ok(None) => return,
            Err(e) => {
                warn!(resource = %key, error = %e, "Could not read resource to record failure");
                return;
            }
        };

        let status = match ConfigurationResource::from_object(&current) {
            Ok(resource) => resource.status,
            Err(_) => Default::default(),
        };
        let status = status.failed(err.to_string(), OffsetDateTime::now_utc());

        if let Err(e) = self
            .cluster
            .update_status(&key.namespace, &key.name, CONFIGURATION_KIND, status.to_value())
            .await
        {
            warn!(resource = %key, error = %e, "Could not record failure in status");
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

fn transition(key: &ResourceKey, from: PassState, to: PassState) {
    debug!(resource = %key, %from, %to, "Pass state transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_cluster_memory::InMemoryCluster;
    use plinth_config::{ConfigurationSpec, StaticStore, StoreSet};
    use plinth_core::ClusterApi;
    use serde_json::json;

    fn reconciler(cluster: Arc<InMemoryCluster>) -> Reconciler {
        let stores = StoreSet::new(Arc::new(StaticStore::new("secret")), Arc::new(StaticStore::new("config")));
        Reconciler::new(
            cluster,
            Resolver::new(stores),
            Orchestrator::default(),
            PhaseRegistry::new(),
            PhaseOrder::default(),
        )
    }

    #[tokio::test]
    async fn test_missing_resource_is_noop() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = reconciler(cluster.clone());

        let outcome = reconciler
            .reconcile(&ResourceKey::new("platform-system", "platform"), Trigger::Watch)
            .await;
        assert!(matches!(outcome, PassOutcome::NotFound));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_resource_fails_and_records_error() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = reconciler(cluster.clone());
        let key = ResourceKey::new("platform-system", "platform");

        let resource = ConfigurationResource::new(
            key.clone(),
            ConfigurationSpec::new(json!({"ingress": {"replicas": "many"}})),
        );
        cluster
            .apply(&key.namespace, resource.to_object())
            .await
            .unwrap();

        let outcome = reconciler.reconcile(&key, Trigger::Watch).await;
        assert!(matches!(
            outcome.error(),
            Some(ReconcileError::Resolve(_))
        ));

        let stored = cluster
            .get(&key.namespace, &key.name, CONFIGURATION_KIND)
            .await
            .unwrap()
            .unwrap();
        let status = ConfigurationResource::from_object(&stored).unwrap().status;
        assert!(status.last_applied_checksum.is_none());
        assert!(status.last_error.unwrap().contains("resolve failed"));
    }

    #[tokio::test]
    async fn test_forget_removes_idle_lock() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = reconciler(cluster);
        let key = ResourceKey::new("a", "b");

        reconciler.reconcile(&key, Trigger::Resync).await;
        assert!(reconciler.locks.contains_key(&key));
        reconciler.forget(&key);
        assert!(!reconciler.locks.contains_key(&key));
    }
}
