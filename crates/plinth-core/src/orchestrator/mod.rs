//! Phase orchestration
//!
//! Runs every registered [`DeploymentUnit`] against one resolved
//! configuration:
//!
//! ```text
//!   PhaseOrder ──► ordered units   (one at a time, in order)
//!                        │
//!                        ▼
//!                  remainder units (concurrently, at most max_parallel)
//!                        │
//!                        ▼
//!            RunReport | AggregateApplyError
//! ```
//!
//! A unit failure never stops independent units; all failures are reported
//! together at the end.

mod error;
mod registry;
mod unit;

pub use error::{AggregateApplyError, RegistryError, UnitError, UnitFailure};
pub use registry::{Partition, PhaseOrder, PhaseRegistry, Scheduled};
pub use unit::{DeploymentUnit, DynUnit};

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::resolve::ResolvedConfiguration;

/// What to do with the rest of the ordered prefix after an ordered unit fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderedFailurePolicy {
    /// Record the failure and keep going
    #[default]
    Continue,
    /// Skip the remaining ordered units; the remainder still runs
    Halt,
}

impl std::str::FromStr for OrderedFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "halt" => Ok(Self::Halt),
            other => Err(format!("unknown ordered failure policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Upper bound on concurrently running remainder units
    pub max_parallel: usize,
    /// Per-unit time limit; `None` waits indefinitely
    pub unit_timeout: Option<Duration>,
    pub ordered_failure_policy: OrderedFailurePolicy,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            unit_timeout: Some(Duration::from_secs(600)),
            ordered_failure_policy: OrderedFailurePolicy::Continue,
        }
    }
}

/// Summary of a fully successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Units in completion order
    pub applied: Vec<String>,
    pub duration: Duration,
}

/// Executes a registry against a resolved configuration
#[derive(Debug, Clone)]
pub struct Orchestrator {
    options: OrchestratorOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Self {
        Self {
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop starting new units once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub async fn run(
        &self,
        cfg: Arc<ResolvedConfiguration>,
        registry: &PhaseRegistry,
        order: &PhaseOrder,
    ) -> Result<RunReport, AggregateApplyError> {
        let started = Instant::now();
        let Partition { ordered, remainder } = registry.partition(order);

        info!(
            checksum = %cfg.checksum(),
            ordered = ordered.len(),
            remainder = remainder.len(),
            "Starting orchestration run"
        );

        let mut applied = Vec::new();
        let mut failures = Vec::new();
        let mut skipped = Vec::new();

        // Ordered prefix
        let mut halted = false;
        for scheduled in &ordered {
            let name = scheduled.name().to_string();

            if halted {
                debug!(unit = %name, "Skipping ordered unit after earlier failure");
                skipped.push(name);
                continue;
            }
            if self.cancel.is_cancelled() {
                failures.push(UnitFailure {
                    unit: name,
                    error: UnitError::Cancelled,
                });
                continue;
            }

            match run_unit(&scheduled.unit, &cfg, self.options.unit_timeout).await {
                Ok(()) => applied.push(name),
                Err(error) => {
                    failures.push(UnitFailure { unit: name, error });
                    if self.options.ordered_failure_policy == OrderedFailurePolicy::Halt {
                        halted = true;
                    }
                }
            }
        }

        // Remainder, bounded fan-out
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));
        let mut tasks = UnitTasks::default();
        let mut remainder_failures = Vec::new();

        for scheduled in remainder {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                remainder_failures.push((
                    scheduled.index,
                    UnitFailure {
                        unit: scheduled.name().to_string(),
                        error: UnitError::Cancelled,
                    },
                ));
                continue;
            };

            let cfg = cfg.clone();
            let timeout = self.options.unit_timeout;
            let name = scheduled.name().to_string();
            tasks.spawn(scheduled.index, name, async move {
                let result = run_unit(&scheduled.unit, &cfg, timeout).await;
                drop(permit);
                result
            });
        }

        while let Some((index, name, result)) = tasks.join_next().await {
            match result {
                Ok(()) => applied.push(name),
                Err(error) => remainder_failures.push((index, UnitFailure { unit: name, error })),
            }
        }

        remainder_failures.sort_by_key(|(index, _)| *index);
        failures.extend(remainder_failures.into_iter().map(|(_, failure)| failure));

        let duration = started.elapsed();
        if failures.is_empty() && skipped.is_empty() {
            info!(
                applied = applied.len(),
                duration_ms = duration.as_millis() as u64,
                "Orchestration run succeeded"
            );
            Ok(RunReport { applied, duration })
        } else {
            let err = AggregateApplyError { failures, skipped };
            warn!(
                applied = applied.len(),
                failed = err.failures.len(),
                skipped = err.skipped.len(),
                duration_ms = duration.as_millis() as u64,
                error = %err,
                "Orchestration run failed"
            );
            Err(err)
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorOptions::default())
    }
}

/// Remainder unit tasks, keyed so a lost task is still attributed to its unit
#[derive(Default)]
struct UnitTasks {
    tasks: JoinSet<Result<(), UnitError>>,
    units: HashMap<Id, (usize, String)>,
}

impl UnitTasks {
    fn spawn<F>(&mut self, index: usize, name: String, apply: F)
    where
        F: Future<Output = Result<(), UnitError>> + Send + 'static,
    {
        let handle = self.tasks.spawn(apply);
        self.units.insert(handle.id(), (index, name));
    }

    async fn join_next(&mut self) -> Option<(usize, String, Result<(), UnitError>)> {
        loop {
            let (id, result) = match self.tasks.join_next_with_id().await? {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    let id = e.id();
                    warn!(error = %e, "Deployment unit task aborted");
                    let error = if e.is_panic() {
                        UnitError::Panicked(panic_message(e.into_panic().as_ref()))
                    } else {
                        UnitError::failed(format!("task aborted: {e}"))
                    };
                    (id, Err(error))
                }
            };
            if let Some((index, name)) = self.units.remove(&id) {
                return Some((index, name, result));
            }
        }
    }
}

/// Apply one unit with the time limit, turning panics into failures.
async fn run_unit(
    unit: &DynUnit,
    cfg: &ResolvedConfiguration,
    timeout: Option<Duration>,
) -> Result<(), UnitError> {
    let name = unit.name();
    let started = Instant::now();
    debug!(unit = %name, "Applying unit");

    let apply = AssertUnwindSafe(unit.apply(cfg)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, apply).await {
            Ok(outcome) => outcome,
            Err(_) => Ok(Err(UnitError::Timeout(limit))),
        },
        None => apply.await,
    };

    let result = outcome.unwrap_or_else(|panic| Err(UnitError::Panicked(panic_message(panic.as_ref()))));

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => info!(unit = %name, elapsed_ms, "Unit applied"),
        Err(e) => warn!(unit = %name, elapsed_ms, error = %e, "Unit failed"),
    }
    result
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
