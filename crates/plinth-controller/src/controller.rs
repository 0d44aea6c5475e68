//! Watch-driven controller loop
//!
//! Lists configuration resources on start, then dispatches a pass for every
//! watch event that changes a resource's generation, every explicit re-run
//! request and every resync tick. Passes run on a bounded worker pool.
//!
//! Each resource has at most one pass task. Triggers that arrive while it
//! runs collapse into a single follow-up pass, so a slow resource holds at
//! most one worker.

use futures_util::StreamExt;
use plinth_core::{CONFIGURATION_KIND, ClusterError, DynCluster, ResourceKey, WatchEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio::task::{Id, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reconcile::{PassOutcome, Reconciler, Trigger};

/// Capacity of the pass report broadcast channel
const REPORT_CAPACITY: usize = 256;
const RERUN_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Concurrent passes across resources
    pub workers: usize,
    /// `None` disables periodic resync
    pub resync_interval: Option<Duration>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Some(Duration::from_secs(300)),
        }
    }
}

/// Outcome of one dispatched pass
#[derive(Debug, Clone)]
pub struct PassReport {
    pub key: ResourceKey,
    pub trigger: Trigger,
    pub outcome: PassOutcome,
}

/// Requests re-runs and observes passes of a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    reruns: mpsc::Sender<ResourceKey>,
    reports: broadcast::Sender<PassReport>,
}

impl ControllerHandle {
    /// Ask for a pass on `key` that bypasses the checksum gate
    pub async fn request_rerun(&self, key: ResourceKey) -> bool {
        self.reruns.send(key).await.is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PassReport> {
        self.reports.subscribe()
    }
}

pub struct Controller {
    cluster: DynCluster,
    reconciler: Arc<Reconciler>,
    options: ControllerOptions,
    reruns: mpsc::Receiver<ResourceKey>,
    handle: ControllerHandle,
}

impl Controller {
    pub fn new(cluster: DynCluster, reconciler: Arc<Reconciler>, options: ControllerOptions) -> Self {
        let (rerun_tx, reruns) = mpsc::channel(RERUN_CAPACITY);
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        Self {
            cluster,
            reconciler,
            options,
            reruns,
            handle: ControllerHandle {
                reruns: rerun_tx,
                reports,
            },
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Run until `cancel` fires, then wait for in-flight passes.
    ///
    /// Only the initial list can fail; later cluster errors surface as
    /// failed passes.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ClusterError> {
        // Subscribe before listing so no change between the two is lost
        let mut events = self.cluster.watch(CONFIGURATION_KIND);
        let mut passes = Passes::new(self.options.workers);
        let mut generations: HashMap<ResourceKey, u64> = HashMap::new();

        let existing = self.cluster.list(CONFIGURATION_KIND).await?;
        info!(
            resources = existing.len(),
            workers = self.options.workers,
            resync_secs = self.options.resync_interval.map(|d| d.as_secs()),
            "Controller started"
        );
        for object in existing {
            let key = ResourceKey::new(&object.namespace, &object.name);
            generations.insert(key.clone(), object.generation);
            self.dispatch(&mut passes, key, Trigger::Watch);
        }

        let mut resync = self.options.resync_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Controller shutting down");
                    break;
                }
                event = events.next() => match event {
                    Some(WatchEvent::Applied(object)) => {
                        let key = ResourceKey::new(&object.namespace, &object.name);
                        // Status writes keep the generation and need no pass
                        if generations.get(&key) == Some(&object.generation) {
                            continue;
                        }
                        generations.insert(key.clone(), object.generation);
                        self.dispatch(&mut passes, key, Trigger::Watch);
                    }
                    Some(WatchEvent::Deleted(object)) => {
                        let key = ResourceKey::new(&object.namespace, &object.name);
                        debug!(resource = %key, "Configuration resource deleted");
                        generations.remove(&key);
                        self.reconciler.forget(&key);
                    }
                    None => {
                        warn!("Watch stream ended");
                        break;
                    }
                },
                Some(key) = self.reruns.recv() => {
                    self.dispatch(&mut passes, key, Trigger::Rerun);
                }
                _ = tick(&mut resync) => {
                    debug!(resources = generations.len(), "Periodic resync");
                    for key in generations.keys() {
                        self.dispatch(&mut passes, key.clone(), Trigger::Resync);
                    }
                }
                Some(joined) = passes.tasks.join_next_with_id(), if !passes.tasks.is_empty() => {
                    let id = match joined {
                        Ok((id, ())) => id,
                        Err(e) => {
                            warn!(error = %e, "Reconciliation task aborted");
                            e.id()
                        }
                    };
                    if let Some((key, trigger)) = passes.finished(id) {
                        self.spawn(&mut passes, key, trigger);
                    }
                }
            }
        }

        // In-flight passes stop starting units once cancelled; let them finish.
        // Queued follow-ups are dropped.
        while let Some(joined) = passes.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Reconciliation task aborted");
            }
        }
        info!("Controller stopped");
        Ok(())
    }

    /// Start a pass for `key`, or fold `trigger` into its queued follow-up
    fn dispatch(&self, passes: &mut Passes, key: ResourceKey, trigger: Trigger) {
        if let Some(state) = passes.active.get_mut(&key) {
            let merged = match state.queued {
                Some(queued) => stronger(queued, trigger),
                None => trigger,
            };
            debug!(resource = %key, trigger = %merged, "Pass queued behind running pass");
            state.queued = Some(merged);
            return;
        }
        self.spawn(passes, key, trigger);
    }

    fn spawn(&self, passes: &mut Passes, key: ResourceKey, trigger: Trigger) {
        let reconciler = self.reconciler.clone();
        let workers = passes.workers.clone();
        let reports = self.handle.reports.clone();
        let task_key = key.clone();

        let handle = passes.tasks.spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            let outcome = reconciler.reconcile(&task_key, trigger).await;
            // Nobody listening is fine
            let _ = reports.send(PassReport {
                key: task_key,
                trigger,
                outcome,
            });
        });
        passes.ids.insert(handle.id(), key.clone());
        passes.active.insert(key, Active { queued: None });
    }
}

/// Pass tasks in flight, at most one per resource
struct Passes {
    workers: Arc<Semaphore>,
    tasks: JoinSet<()>,
    ids: HashMap<Id, ResourceKey>,
    active: HashMap<ResourceKey, Active>,
}

struct Active {
    /// Follow-up pass requested while this one runs
    queued: Option<Trigger>,
}

impl Passes {
    fn new(workers: usize) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
            tasks: JoinSet::new(),
            ids: HashMap::new(),
            active: HashMap::new(),
        }
    }

    /// Release the resource of task `id`, returning its queued follow-up
    fn finished(&mut self, id: Id) -> Option<(ResourceKey, Trigger)> {
        let key = self.ids.remove(&id)?;
        let state = self.active.remove(&key)?;
        state.queued.map(|trigger| (key, trigger))
    }
}

/// A re-run forces the apply, and a watch event outranks a resync
fn stronger(a: Trigger, b: Trigger) -> Trigger {
    match (a, b) {
        (Trigger::Rerun, _) | (_, Trigger::Rerun) => Trigger::Rerun,
        (Trigger::Watch, _) | (_, Trigger::Watch) => Trigger::Watch,
        _ => Trigger::Resync,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
