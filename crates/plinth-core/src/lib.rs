//! # plinth-core
//!
//! Platform schema, cluster capabilities and phase orchestration.
//!
//! ## Overview
//!
//! - [`PlatformConfig`]: typed configuration schema, its defaults and the
//!   registry of overridable fields
//! - [`Resolver`]: stored spec to [`ResolvedConfiguration`] with a [`Checksum`]
//! - [`ClusterApi`] / [`Deployer`]: capabilities backends implement
//! - [`Orchestrator`]: runs a [`PhaseRegistry`] honoring a [`PhaseOrder`]
//! - [`ReconciliationStatus`]: what the controller persists per resource

pub mod checksum;
pub mod cluster;
mod error;
pub mod orchestrator;
pub mod platform;
pub mod resolve;
pub mod status;
pub mod stores;

pub use checksum::Checksum;
pub use cluster::{
    CONFIG_MAP_KIND, ClusterApi, ClusterObject, Deployer, DynCluster, DynDeployer, NAMESPACE_KIND,
    ObjectRef, SECRET_KIND, WatchEvent,
};
pub use error::{ClusterError, CoreError};
pub use orchestrator::{
    AggregateApplyError, DeploymentUnit, DynUnit, OrchestratorOptions, Orchestrator,
    OrderedFailurePolicy, PhaseOrder, PhaseRegistry, RegistryError, RunReport, UnitError,
    UnitFailure,
};
pub use platform::PlatformConfig;
pub use resolve::{Resolution, ResolveError, ResolvedConfiguration, Resolver};
pub use status::{CONFIGURATION_KIND, ConfigurationResource, ReconciliationStatus, ResourceKey};
pub use stores::{ClusterConfigStore, ClusterSecretStore};
