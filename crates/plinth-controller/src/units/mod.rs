//! Platform component units
//!
//! Every platform component is described by a [`ComponentSpec`]: its name,
//! the manifest sets it installs and a planning function that reads the
//! resolved configuration. [`ComponentUnit`] turns a spec into a
//! [`DeploymentUnit`] driving the [`Deployer`](plinth_core::Deployer).

mod catalog;

pub use catalog::{CATALOG, DEFAULT_ORDER, default_order, default_registry};

use async_trait::async_trait;
use plinth_core::{
    DeploymentUnit, DynDeployer, PlatformConfig, ResolvedConfiguration, UnitError,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Label identifying objects managed by Plinth
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL: &str = "plinth.io/component";

/// Static description of one component
#[derive(Debug, Clone, Copy)]
pub struct ComponentSpec {
    pub name: &'static str,
    pub manifests: &'static [&'static str],
    /// Reads the configuration and checks required fields
    pub plan: fn(&PlatformConfig) -> Result<ComponentPlan, UnitError>,
}

/// What one apply of a component does
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentPlan {
    pub enabled: bool,
    pub namespace: String,
    /// Secrets created once and then left alone
    pub secrets: Vec<SecretPlan>,
    /// Workload to wait for after the manifests are applied
    pub ready: Option<&'static str>,
}

impl ComponentPlan {
    pub fn enabled(namespace: impl Into<String>) -> Self {
        Self {
            enabled: true,
            namespace: namespace.into(),
            secrets: Vec::new(),
            ready: None,
        }
    }

    pub fn disabled(namespace: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::enabled(namespace)
        }
    }

    pub fn with_secret(mut self, name: &'static str, data: BTreeMap<String, String>) -> Self {
        self.secrets.push(SecretPlan { name, data });
        self
    }

    pub fn wait_for(mut self, workload: &'static str) -> Self {
        self.ready = Some(workload);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPlan {
    pub name: &'static str,
    pub data: BTreeMap<String, String>,
}

/// Deployment unit for one platform component
pub struct ComponentUnit {
    spec: ComponentSpec,
    deployer: DynDeployer,
    ready_timeout: Duration,
}

impl ComponentUnit {
    pub fn new(spec: ComponentSpec, deployer: DynDeployer, ready_timeout: Duration) -> Self {
        Self {
            spec,
            deployer,
            ready_timeout,
        }
    }
}

#[async_trait]
impl DeploymentUnit for ComponentUnit {
    fn name(&self) -> &str {
        self.spec.name
    }

    async fn apply(&self, cfg: &ResolvedConfiguration) -> Result<(), UnitError> {
        let plan = (self.spec.plan)(cfg.config())?;
        let name = self.spec.name;

        if !plan.enabled {
            debug!(unit = name, namespace = %plan.namespace, "Component disabled, removing");
            self.deployer
                .delete_manifest_set(&plan.namespace, self.spec.manifests)
                .await?;
            return Ok(());
        }

        let labels = BTreeMap::from([
            (MANAGED_BY_LABEL.to_string(), "plinth".to_string()),
            (COMPONENT_LABEL.to_string(), name.to_string()),
        ]);
        self.deployer
            .ensure_namespace(&plan.namespace, &labels, &BTreeMap::new())
            .await?;

        for secret in &plan.secrets {
            self.deployer
                .get_or_create_secret(secret.name, &plan.namespace, &secret.data)
                .await?;
        }

        self.deployer
            .apply_manifest_set(&plan.namespace, self.spec.manifests)
            .await?;

        if let Some(workload) = plan.ready {
            self.deployer
                .wait_for_ready(&plan.namespace, workload, self.ready_timeout)
                .await?;
        }

        info!(unit = name, namespace = %plan.namespace, "Component installed");
        Ok(())
    }
}

impl std::fmt::Debug for ComponentUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentUnit")
            .field("name", &self.spec.name)
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}
