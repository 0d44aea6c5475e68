//! Desired-state resolution
//!
//! Turns a stored [`ConfigurationSpec`] into an immutable
//! [`ResolvedConfiguration`]: defaults merge, typed decode, overrides, then
//! checksum.

use plinth_config::{
    AppliedOverrides, ConfigurationSpec, FieldRegistry, MaterializedField, MaterializedFiles,
    MergeError, OverrideError, StoreSet, apply_overrides,
};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

use crate::checksum::Checksum;
use crate::platform::PlatformConfig;

/// Errors raised before any cluster mutation
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Override(#[from] OverrideError),
}

/// Platform configuration after defaulting and overrides
///
/// Shared read-only by every unit of one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfiguration {
    config: PlatformConfig,
    checksum: Checksum,
    materialized: Vec<MaterializedField>,
}

impl ResolvedConfiguration {
    /// Wrap an already resolved configuration
    pub fn new(config: PlatformConfig, materialized: Vec<MaterializedField>) -> Self {
        let checksum = Checksum::compute(&config, &materialized);
        Self {
            config,
            checksum,
            materialized,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn materialized(&self) -> &[MaterializedField] {
        &self.materialized
    }
}

impl Deref for ResolvedConfiguration {
    type Target = PlatformConfig;

    fn deref(&self) -> &Self::Target {
        &self.config
    }
}

/// Result of one resolution
///
/// `files` owns the temp files that materialized fields point to and must
/// outlive the orchestration run.
#[derive(Debug)]
pub struct Resolution {
    pub resolved: Arc<ResolvedConfiguration>,
    pub files: MaterializedFiles,
}

/// Resolves stored specs against a defaults document and external stores
pub struct Resolver {
    defaults: Value,
    registry: FieldRegistry<PlatformConfig>,
    stores: StoreSet,
}

impl Resolver {
    /// Resolver using the built-in defaults
    pub fn new(stores: StoreSet) -> Self {
        Self::with_defaults(PlatformConfig::defaults_document(), stores)
    }

    pub fn with_defaults(defaults: Value, stores: StoreSet) -> Self {
        Self {
            defaults,
            registry: PlatformConfig::field_registry(),
            stores,
        }
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    /// Resolve `spec` declared in `namespace`.
    ///
    /// Store references without a namespace are looked up in `namespace`.
    pub async fn resolve(
        &self,
        spec: &ConfigurationSpec,
        namespace: &str,
    ) -> Result<Resolution, ResolveError> {
        let mut config: PlatformConfig = plinth_config::resolve_typed(&spec.config, &self.defaults)?;

        let directives: Vec<_> = spec
            .overrides
            .iter()
            .cloned()
            .map(|mut directive| {
                directive
                    .source
                    .reference_mut()
                    .namespace
                    .get_or_insert_with(|| namespace.to_string());
                directive
            })
            .collect();

        let AppliedOverrides {
            files,
            materialized,
            applied,
        } = apply_overrides(&mut config, &directives, &self.registry, &self.stores).await?;

        let resolved = ResolvedConfiguration::new(config, materialized);
        debug!(
            checksum = %resolved.checksum(),
            overrides = applied.len(),
            materialized = files.len(),
            "Resolved configuration"
        );

        Ok(Resolution {
            resolved: Arc::new(resolved),
            files,
        })
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("fields", &self.registry.len())
            .field("stores", &self.stores)
            .finish()
    }
}
