#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use plinth_cluster_memory::InMemoryCluster;
use plinth_config::{ConfigurationSpec, OverrideDirective, StoreSet, ValueRef};
use plinth_controller::Reconciler;
use plinth_controller::units;
use plinth_core::{
    CONFIGURATION_KIND, ClusterApi, ClusterConfigStore, ClusterObject, ClusterSecretStore,
    ConfigurationResource, Orchestrator, OrchestratorOptions, PhaseOrder, PhaseRegistry,
    ReconciliationStatus, Resolver, ResourceKey, SECRET_KIND,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

pub fn key() -> ResourceKey {
    ResourceKey::new("platform-system", "platform")
}

pub fn stores(cluster: &Arc<InMemoryCluster>) -> StoreSet {
    StoreSet::new(
        Arc::new(ClusterSecretStore::new(cluster.clone())),
        Arc::new(ClusterConfigStore::new(cluster.clone())),
    )
}

/// Reconciler over the full component catalog
pub fn catalog_reconciler(cluster: &Arc<InMemoryCluster>) -> Reconciler {
    let registry = units::default_registry(cluster.clone(), Duration::from_millis(50)).unwrap();
    reconciler_with(cluster, registry, units::default_order())
}

pub fn reconciler_with(
    cluster: &Arc<InMemoryCluster>,
    registry: PhaseRegistry,
    order: PhaseOrder,
) -> Reconciler {
    Reconciler::new(
        cluster.clone(),
        Resolver::new(stores(cluster)),
        Orchestrator::new(OrchestratorOptions {
            unit_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }),
        registry,
        order,
    )
}

pub async fn put_secret(cluster: &InMemoryCluster, namespace: &str, name: &str, key: &str, value: &str) {
    let secret = ClusterObject::new(SECRET_KIND, namespace, name).with_data(key, STANDARD.encode(value));
    cluster.apply(namespace, secret).await.unwrap();
}

/// Minimal valid spec: postgres password from a secret
pub fn platform_spec(config: Value) -> ConfigurationSpec {
    ConfigurationSpec::new(config).with_override(OverrideDirective::secret(
        "postgres.superuser_password",
        ValueRef::new("pg-credentials", "password"),
    ))
}

pub async fn put_resource(cluster: &InMemoryCluster, spec: ConfigurationSpec) -> ClusterObject {
    let key = key();
    let object = ConfigurationResource::new(key.clone(), spec).to_object();
    cluster.apply(&key.namespace, object).await.unwrap()
}

/// Store the default platform resource and the secret it reads
pub async fn seed_platform(cluster: &InMemoryCluster) {
    put_secret(cluster, "platform-system", "pg-credentials", "password", "s3cret").await;
    put_resource(cluster, platform_spec(json!({"ingress": {"replicas": 3}}))).await;
}

pub async fn status(cluster: &InMemoryCluster) -> ReconciliationStatus {
    let key = key();
    let object = cluster
        .get(&key.namespace, &key.name, CONFIGURATION_KIND)
        .await
        .unwrap()
        .expect("configuration resource exists");
    ConfigurationResource::from_object(&object).unwrap().status
}
