use async_trait::async_trait;
use std::sync::Arc;

use super::error::UnitError;
use crate::resolve::ResolvedConfiguration;

/// One independently deployable platform component
///
/// Units hold no per-run state; the same instance is applied on every pass.
#[async_trait]
pub trait DeploymentUnit: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, cfg: &ResolvedConfiguration) -> Result<(), UnitError>;
}

/// Type alias for a shared deployment unit
pub type DynUnit = Arc<dyn DeploymentUnit>;
