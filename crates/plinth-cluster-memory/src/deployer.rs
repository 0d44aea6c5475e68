use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use plinth_core::{ClusterError, ClusterObject, Deployer, NAMESPACE_KIND, ObjectRef, SECRET_KIND};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::InMemoryCluster;

/// One recorded deployer invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployerCall {
    EnsureNamespace {
        name: String,
    },
    ApplyManifests {
        namespace: String,
        manifests: Vec<String>,
    },
    DeleteManifests {
        namespace: String,
        manifests: Vec<String>,
    },
    GetOrCreateSecret {
        namespace: String,
        name: String,
    },
    WaitForReady {
        namespace: String,
        name: String,
    },
}

impl InMemoryCluster {
    /// Every deployer call so far, in invocation order
    pub fn calls(&self) -> Vec<DeployerCall> {
        locked(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        locked(&self.calls).clear();
    }

    /// Number of `apply_manifest_set` calls that touched `manifest`
    pub fn apply_count(&self, manifest: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(call, DeployerCall::ApplyManifests { manifests, .. }
                    if manifests.iter().any(|m| m == manifest))
            })
            .count()
    }

    /// Whether `manifest` is currently installed in `namespace`
    pub fn is_installed(&self, namespace: &str, manifest: &str) -> bool {
        locked(&self.installed).contains(&(namespace.to_string(), manifest.to_string()))
    }

    /// Make applying `manifest` fail with `message` until cleared
    pub fn fail_manifest(&self, manifest: impl Into<String>, message: impl Into<String>) {
        locked(&self.manifest_failures).insert(manifest.into(), message.into());
    }

    pub fn clear_failures(&self) {
        locked(&self.manifest_failures).clear();
    }

    /// Make `wait_for_ready` on this workload time out
    pub fn never_ready(&self, namespace: impl Into<String>, name: impl Into<String>) {
        locked(&self.not_ready).insert((namespace.into(), name.into()));
    }

    /// Delay every manifest apply, to widen race windows in tests
    pub fn set_apply_delay(&self, delay: Duration) {
        *locked(&self.apply_delay) = delay;
    }

    fn record(&self, call: DeployerCall) {
        locked(&self.calls).push(call);
    }

    fn injected_failure(&self, manifests: &[&str]) -> Option<String> {
        let failures = locked(&self.manifest_failures);
        manifests.iter().find_map(|m| failures.get(*m).cloned())
    }
}

/// Test fixtures keep working after a panic elsewhere poisoned a lock
fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn owned(manifests: &[&str]) -> Vec<String> {
    manifests.iter().map(|m| m.to_string()).collect()
}

#[async_trait]
impl Deployer for InMemoryCluster {
    async fn apply_manifest_set(
        &self,
        namespace: &str,
        manifests: &[&str],
    ) -> Result<(), ClusterError> {
        self.record(DeployerCall::ApplyManifests {
            namespace: namespace.to_string(),
            manifests: owned(manifests),
        });
        self.check_available()?;

        let delay = *locked(&self.apply_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.injected_failure(manifests) {
            return Err(ClusterError::rejected(message));
        }

        {
            let mut installed = locked(&self.installed);
            for manifest in manifests {
                installed.insert((namespace.to_string(), manifest.to_string()));
            }
        }
        info!(namespace, manifests = ?manifests, "Applied manifest set");
        Ok(())
    }

    async fn delete_manifest_set(
        &self,
        namespace: &str,
        manifests: &[&str],
    ) -> Result<(), ClusterError> {
        self.record(DeployerCall::DeleteManifests {
            namespace: namespace.to_string(),
            manifests: owned(manifests),
        });
        self.check_available()?;

        {
            let mut installed = locked(&self.installed);
            for manifest in manifests {
                installed.remove(&(namespace.to_string(), manifest.to_string()));
            }
        }
        info!(namespace, manifests = ?manifests, "Deleted manifest set");
        Ok(())
    }

    async fn ensure_namespace(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.record(DeployerCall::EnsureNamespace {
            name: name.to_string(),
        });
        self.check_available()?;

        let mut namespace = ClusterObject::new(NAMESPACE_KIND, "", name);
        namespace.labels = labels.clone();
        namespace.annotations = annotations.clone();
        self.store(namespace).await;
        Ok(())
    }

    async fn get_or_create_secret(
        &self,
        name: &str,
        namespace: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        self.record(DeployerCall::GetOrCreateSecret {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        self.check_available()?;

        let key = ObjectRef::new(SECRET_KIND, namespace, name);
        let existing = self.objects.read().await.get(&key).cloned();

        let encoded = match existing {
            Some(secret) => {
                debug!(secret = %key, "Secret already exists");
                secret.data
            }
            None => {
                let mut secret = ClusterObject::new(SECRET_KIND, namespace, name);
                secret.data = data
                    .iter()
                    .map(|(k, v)| (k.clone(), STANDARD.encode(v)))
                    .collect();
                self.store(secret).await.data
            }
        };

        encoded
            .into_iter()
            .map(|(k, v)| -> Result<(String, String), ClusterError> {
                let bytes = STANDARD
                    .decode(&v)
                    .map_err(|e| ClusterError::rejected(format!("secret {key}: {e}")))?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| ClusterError::rejected(format!("secret {key}: {e}")))?;
                Ok((k, text))
            })
            .collect()
    }

    async fn wait_for_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        self.record(DeployerCall::WaitForReady {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        self.check_available()?;

        let stuck = locked(&self.not_ready).contains(&(namespace.to_string(), name.to_string()));

        if stuck {
            tokio::time::sleep(timeout).await;
            return Err(ClusterError::timeout(format!("{namespace}/{name}"), timeout));
        }
        Ok(())
    }
}
