use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use plinth_core::{ClusterApi, ClusterError, ClusterObject, ObjectRef, WatchEvent};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::deployer::DeployerCall;

/// Capacity of the watch broadcast channel
const WATCH_CAPACITY: usize = 1024;

/// In-memory cluster implementing both [`ClusterApi`] and
/// [`plinth_core::Deployer`].
///
/// Objects live in an ordered map keyed by [`ObjectRef`]. Every deployer
/// call is appended to a call log, and failures can be injected per
/// manifest or for the whole API.
#[derive(Debug)]
pub struct InMemoryCluster {
    pub(crate) objects: RwLock<BTreeMap<ObjectRef, ClusterObject>>,
    pub(crate) events: broadcast::Sender<WatchEvent>,
    pub(crate) calls: Mutex<Vec<DeployerCall>>,
    /// Manifest sets currently installed, per namespace
    pub(crate) installed: Mutex<BTreeSet<(String, String)>>,
    /// Manifest name -> error message returned when it is applied
    pub(crate) manifest_failures: Mutex<HashMap<String, String>>,
    /// Workloads that never become ready
    pub(crate) not_ready: Mutex<BTreeSet<(String, String)>>,
    pub(crate) apply_delay: Mutex<Duration>,
    unavailable: AtomicBool,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
            calls: Mutex::new(Vec::new()),
            installed: Mutex::new(BTreeSet::new()),
            manifest_failures: Mutex::new(HashMap::new()),
            not_ready: Mutex::new(BTreeSet::new()),
            apply_delay: Mutex::new(Duration::ZERO),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every API call fail as if the server were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn check_available(&self) -> Result<(), ClusterError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ClusterError::unavailable("connection refused"))
        } else {
            Ok(())
        }
    }

    /// Number of stored objects of `kind`
    pub async fn count(&self, kind: &str) -> usize {
        let objects = self.objects.read().await;
        objects.keys().filter(|key| key.kind == kind).count()
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub(crate) async fn store(&self, mut object: ClusterObject) -> ClusterObject {
        let key = object.object_ref();
        let mut objects = self.objects.write().await;

        match objects.get(&key) {
            Some(existing) if !existing.desired_differs(&object) => return existing.clone(),
            Some(existing) => {
                object.uid = existing.uid.clone();
                object.generation = existing.generation + 1;
                object.status = existing.status.clone();
            }
            None => {
                object.uid = Some(uuid::Uuid::new_v4().to_string());
                object.generation = 1;
                object.status = Value::Null;
            }
        }

        debug!(object = %key, generation = object.generation, "Stored object");
        objects.insert(key, object.clone());
        drop(objects);

        self.publish(WatchEvent::Applied(object.clone()));
        object
    }
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
    ) -> Result<Option<ClusterObject>, ClusterError> {
        self.check_available()?;
        let objects = self.objects.read().await;
        Ok(objects.get(&ObjectRef::new(kind, namespace, name)).cloned())
    }

    async fn list(&self, kind: &str) -> Result<Vec<ClusterObject>, ClusterError> {
        self.check_available()?;
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn apply(
        &self,
        namespace: &str,
        mut object: ClusterObject,
    ) -> Result<ClusterObject, ClusterError> {
        self.check_available()?;
        object.namespace = namespace.to_string();
        Ok(self.store(object).await)
    }

    async fn delete(&self, namespace: &str, name: &str, kind: &str) -> Result<bool, ClusterError> {
        self.check_available()?;
        let removed = {
            let mut objects = self.objects.write().await;
            objects.remove(&ObjectRef::new(kind, namespace, name))
        };

        match removed {
            Some(object) => {
                debug!(object = %object.object_ref(), "Deleted object");
                self.publish(WatchEvent::Deleted(object));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        status: Value,
    ) -> Result<ClusterObject, ClusterError> {
        self.check_available()?;
        let updated = {
            let mut objects = self.objects.write().await;
            let object = objects
                .get_mut(&ObjectRef::new(kind, namespace, name))
                .ok_or_else(|| ClusterError::not_found(kind, namespace, name))?;
            object.status = status;
            object.clone()
        };

        self.publish(WatchEvent::Applied(updated.clone()));
        Ok(updated)
    }

    fn watch(&self, kind: &str) -> BoxStream<'static, WatchEvent> {
        let kind = kind.to_string();
        BroadcastStream::new(self.events.subscribe())
            .filter_map(move |event| {
                // Lagged receivers skip missed events; resync covers the gap
                let event = event.ok().filter(|event| event.object().kind == kind);
                std::future::ready(event)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_core::CONFIGURATION_KIND;
    use serde_json::json;

    fn deployment(spec: Value) -> ClusterObject {
        ClusterObject::new(CONFIGURATION_KIND, "platform", "main").with_spec(spec)
    }

    #[tokio::test]
    async fn test_apply_get_delete() {
        let cluster = InMemoryCluster::new();
        let stored = cluster
            .apply("platform", deployment(json!({"config": {}})))
            .await
            .unwrap();
        assert_eq!(stored.generation, 1);
        assert!(stored.uid.is_some());

        let fetched = cluster
            .get("platform", "main", CONFIGURATION_KIND)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, stored);

        assert!(cluster.delete("platform", "main", CONFIGURATION_KIND).await.unwrap());
        assert!(!cluster.delete("platform", "main", CONFIGURATION_KIND).await.unwrap());
        assert!(cluster
            .get("platform", "main", CONFIGURATION_KIND)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_generation_tracks_desired_changes_only() {
        let cluster = InMemoryCluster::new();
        let first = cluster
            .apply("platform", deployment(json!({"config": {}})))
            .await
            .unwrap();

        let same = cluster
            .apply("platform", deployment(json!({"config": {}})))
            .await
            .unwrap();
        assert_eq!(same.generation, first.generation);

        let status = cluster
            .update_status("platform", "main", CONFIGURATION_KIND, json!({"lastError": "x"}))
            .await
            .unwrap();
        assert_eq!(status.generation, first.generation);

        let changed = cluster
            .apply("platform", deployment(json!({"config": {"crds": {"enabled": false}}})))
            .await
            .unwrap();
        assert_eq!(changed.generation, first.generation + 1);
        assert_eq!(changed.uid, first.uid);
        assert_eq!(changed.status["lastError"], "x");
    }

    #[tokio::test]
    async fn test_update_status_missing_object() {
        let cluster = InMemoryCluster::new();
        let err = cluster
            .update_status("platform", "main", CONFIGURATION_KIND, json!({}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_watch_filters_by_kind() {
        let cluster = InMemoryCluster::new();
        let mut events = cluster.watch(CONFIGURATION_KIND);

        cluster
            .apply("platform", ClusterObject::new("ConfigMap", "platform", "other"))
            .await
            .unwrap();
        cluster
            .apply("platform", deployment(json!({"config": {}})))
            .await
            .unwrap();
        cluster
            .delete("platform", "main", CONFIGURATION_KIND)
            .await
            .unwrap();

        match events.next().await.unwrap() {
            WatchEvent::Applied(object) => assert_eq!(object.name, "main"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(events.next().await.unwrap(), WatchEvent::Deleted(_)));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let cluster = InMemoryCluster::new();
        cluster.set_unavailable(true);
        let err = cluster
            .get("platform", "main", CONFIGURATION_KIND)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Unavailable { .. }));
    }
}
