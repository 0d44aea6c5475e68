mod common;

use async_trait::async_trait;
use common::*;
use plinth_cluster_memory::InMemoryCluster;
use plinth_config::{OverrideDirective, ValueRef};
use plinth_controller::{PassOutcome, ReconcileError, Trigger};
use plinth_core::{
    DeploymentUnit, PhaseOrder, PhaseRegistry, ResolvedConfiguration, UnitError,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn unchanged_config_applies_once() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed_platform(&cluster).await;
    let reconciler = catalog_reconciler(&cluster);

    let first = reconciler.reconcile(&key(), Trigger::Watch).await;
    let second = reconciler.reconcile(&key(), Trigger::Resync).await;

    assert!(first.is_applied(), "{first}");
    assert!(matches!(second, PassOutcome::Skipped { .. }), "{second}");
    assert_eq!(cluster.apply_count("platform-crds"), 1);
    assert_eq!(cluster.apply_count("ingress-controller"), 1);

    let status = status(&cluster).await;
    let PassOutcome::Applied { checksum, units, .. } = first else {
        unreachable!()
    };
    assert_eq!(units, 7);
    assert_eq!(status.last_applied_checksum, Some(checksum));
    assert!(status.last_applied_time.is_some());
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn ordered_units_run_before_the_rest() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed_platform(&cluster).await;
    let reconciler = catalog_reconciler(&cluster);

    reconciler.reconcile(&key(), Trigger::Watch).await;

    let applied: Vec<Vec<String>> = cluster
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            plinth_cluster_memory::DeployerCall::ApplyManifests { manifests, .. } => Some(manifests),
            _ => None,
        })
        .collect();
    assert_eq!(applied[0], vec!["platform-crds"]);
    assert_eq!(applied[1], vec!["network-base", "network-policies"]);
    assert_eq!(applied[2], vec!["cert-manager", "cluster-issuer"]);
}

#[tokio::test]
async fn failed_apply_is_retried_with_unchanged_content() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed_platform(&cluster).await;
    cluster.fail_manifest("ingress-controller", "ingress webhook unreachable");
    let reconciler = catalog_reconciler(&cluster);

    let failed = reconciler.reconcile(&key(), Trigger::Watch).await;
    let Some(ReconcileError::Apply(err)) = failed.error() else {
        panic!("expected apply failure, got {failed}");
    };
    assert_eq!(err.failed_units().collect::<Vec<_>>(), vec!["ingress"]);
    assert!(failed.describe().contains("ingress: ingress webhook unreachable"));

    // Independent units still ran
    assert!(cluster.is_installed("postgres", "postgres-cluster"));
    assert!(cluster.is_installed("logging", "log-agent"));

    let status = status(&cluster).await;
    assert!(status.last_applied_checksum.is_none());
    assert!(
        status
            .last_error
            .as_deref()
            .unwrap()
            .contains("ingress: ingress webhook unreachable")
    );
    assert!(status.last_attempt_time.is_some());

    cluster.clear_failures();
    let retried = reconciler.reconcile(&key(), Trigger::Resync).await;
    assert!(retried.is_applied(), "{retried}");
    assert!(status_of_cluster_is_clean(&cluster).await);
}

async fn status_of_cluster_is_clean(cluster: &InMemoryCluster) -> bool {
    let status = status(cluster).await;
    status.last_error.is_none() && status.last_applied_checksum.is_some()
}

#[tokio::test]
async fn failure_keeps_previous_applied_status() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed_platform(&cluster).await;
    let reconciler = catalog_reconciler(&cluster);

    assert!(reconciler.reconcile(&key(), Trigger::Watch).await.is_applied());
    let before = status(&cluster).await;

    // Ingress needs a domain
    put_resource(&cluster, platform_spec(json!({"global": {"domain": ""}}))).await;
    let outcome = reconciler.reconcile(&key(), Trigger::Watch).await;
    assert!(outcome.is_failed());
    assert!(outcome.describe().contains("required field 'global.domain' is not set"));

    let after = status(&cluster).await;
    assert_eq!(after.last_applied_checksum, before.last_applied_checksum);
    assert_eq!(after.last_applied_time, before.last_applied_time);
    assert!(after.last_error.is_some());
}

#[tokio::test]
async fn rerun_bypasses_checksum_gate() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed_platform(&cluster).await;
    let reconciler = catalog_reconciler(&cluster);

    reconciler.reconcile(&key(), Trigger::Watch).await;
    let forced = reconciler.reconcile(&key(), Trigger::Rerun).await;
    assert!(matches!(forced, PassOutcome::Applied { forced: true, .. }), "{forced}");
    assert_eq!(cluster.apply_count("platform-crds"), 2);

    // A new rerun token forces one more apply, then the gate holds again
    let mut spec = platform_spec(json!({"ingress": {"replicas": 3}}));
    spec.rerun = Some("2".to_string());
    put_resource(&cluster, spec).await;

    let token = reconciler.reconcile(&key(), Trigger::Watch).await;
    assert!(matches!(token, PassOutcome::Applied { forced: true, .. }), "{token}");
    assert_eq!(status(&cluster).await.last_applied_rerun.as_deref(), Some("2"));

    let gated = reconciler.reconcile(&key(), Trigger::Watch).await;
    assert!(matches!(gated, PassOutcome::Skipped { .. }), "{gated}");
    assert_eq!(cluster.apply_count("platform-crds"), 3);
}

#[tokio::test]
async fn missing_resource_is_a_noop() {
    let cluster = Arc::new(InMemoryCluster::new());
    let reconciler = catalog_reconciler(&cluster);

    let outcome = reconciler.reconcile(&key(), Trigger::Watch).await;
    assert!(matches!(outcome, PassOutcome::NotFound));
    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn override_errors_fail_before_any_deployment() {
    let cluster = Arc::new(InMemoryCluster::new());
    put_secret(&cluster, "platform-system", "pg-credentials", "password", "s3cret").await;
    put_secret(&cluster, "platform-system", "flags", "tls", "notabool").await;

    let spec = platform_spec(json!({})).with_override(OverrideDirective::secret(
        "postgres.tls",
        ValueRef::new("flags", "tls"),
    ));
    put_resource(&cluster, spec).await;
    let reconciler = catalog_reconciler(&cluster);

    let outcome = reconciler.reconcile(&key(), Trigger::Watch).await;
    assert!(matches!(outcome.error(), Some(ReconcileError::Resolve(_))), "{outcome}");
    assert!(cluster.calls().is_empty());

    // Missing secret key
    let spec = platform_spec(json!({})).with_override(OverrideDirective::secret(
        "global.cluster_name",
        ValueRef::new("flags", "cluster"),
    ));
    put_resource(&cluster, spec).await;
    let outcome = reconciler.reconcile(&key(), Trigger::Watch).await;
    assert!(outcome.describe().contains("not found"), "{outcome}");
    assert!(cluster.calls().is_empty());
}

/// Records the materialized CA bundle path and whether it existed during apply
struct CaProbe {
    seen: Arc<Mutex<Vec<(PathBuf, bool, String)>>>,
}

#[async_trait]
impl DeploymentUnit for CaProbe {
    fn name(&self) -> &str {
        "ca-probe"
    }

    async fn apply(&self, cfg: &ResolvedConfiguration) -> Result<(), UnitError> {
        let path = cfg
            .cert_manager
            .ca_bundle_file
            .as_ref()
            .map(PathBuf::from)
            .ok_or_else(|| UnitError::missing_field("cert_manager.ca_bundle_file"))?;
        let contents = std::fs::read_to_string(&path).unwrap_or_default();
        self.seen
            .lock()
            .unwrap()
            .push((path.clone(), path.exists(), contents));
        if cfg.ingress.replicas == 13 {
            return Err(UnitError::failed("unlucky"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn materialized_files_live_for_one_pass() {
    let cluster = Arc::new(InMemoryCluster::new());
    put_secret(&cluster, "platform-system", "ca", "bundle", "-----BEGIN CERTIFICATE-----").await;
    let spec = |replicas: u32| {
        plinth_config::ConfigurationSpec::new(json!({"ingress": {"replicas": replicas}}))
            .with_override(
                OverrideDirective::secret("cert_manager.ca_bundle_file", ValueRef::new("ca", "bundle"))
                    .as_file(),
            )
    };
    put_resource(&cluster, spec(2)).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let registry = PhaseRegistry::new()
        .with_unit(Arc::new(CaProbe { seen: seen.clone() }))
        .unwrap();
    let reconciler = reconciler_with(&cluster, registry, PhaseOrder::default());

    assert!(reconciler.reconcile(&key(), Trigger::Watch).await.is_applied());
    // Fresh temp path, same contents: the checksum gate still holds
    let second = reconciler.reconcile(&key(), Trigger::Resync).await;
    assert!(matches!(second, PassOutcome::Skipped { .. }), "{second}");

    put_resource(&cluster, spec(13)).await;
    assert!(reconciler.reconcile(&key(), Trigger::Watch).await.is_failed());

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    for (path, existed, contents) in seen {
        assert!(existed);
        assert_eq!(contents, "-----BEGIN CERTIFICATE-----");
        assert!(!path.exists(), "{} left behind", path.display());
    }
}

/// Tracks how many applies overlap
struct Overlap {
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl DeploymentUnit for Overlap {
    fn name(&self) -> &str {
        "overlap"
    }

    async fn apply(&self, _cfg: &ResolvedConfiguration) -> Result<(), UnitError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn same_resource_passes_never_overlap() {
    let cluster = Arc::new(InMemoryCluster::new());
    put_resource(&cluster, plinth_config::ConfigurationSpec::new(json!({}))).await;

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let registry = PhaseRegistry::new()
        .with_unit(Arc::new(Overlap {
            running: running.clone(),
            peak: peak.clone(),
        }))
        .unwrap();
    let reconciler = Arc::new(reconciler_with(&cluster, registry, PhaseOrder::default()));

    let passes: Vec<_> = (0..4)
        .map(|_| {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.reconcile(&key(), Trigger::Rerun).await })
        })
        .collect();
    for pass in passes {
        assert!(pass.await.unwrap().is_applied());
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
