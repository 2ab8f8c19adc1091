//! Swarm: drains a [`TaskPool`] through a set of registered workers.
//!
//! A single coordinating loop claims pending tasks for idle workers and runs
//! each claimed task on its own tokio task. The claim is the pool's atomic
//! compare-and-set, so a task is executed at most once even when several
//! swarms share one pool.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain::{HiveError, Task, TaskId, TaskPatch, TaskStatus, WorkerId};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::SwarmConfig;
use crate::pool::TaskPool;

/// Something that can execute a task.
///
/// Workers are stateless between tasks; the swarm hands each one at most one
/// task at a time.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &WorkerId;

    /// Capabilities advertised for tasks carrying a `required_capability`.
    fn capabilities(&self) -> &[String] {
        &[]
    }

    /// Executes `task`, returning the JSON result stored on completion.
    async fn execute(&self, task: &Task) -> Result<Value, HiveError>;
}

/// Whether `worker` may claim `task`.
pub fn can_take(worker: &dyn Worker, task: &Task) -> bool {
    match task.required_capability() {
        None => true,
        Some(required) => worker.capabilities().iter().any(|c| c == required),
    }
}

/// Options for [`Swarm::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Return once no pending, claimed or in-progress tasks remain.
    pub stop_when_empty: bool,
    /// Idle sleep between polls. Finishing tasks wake the loop early.
    pub poll_interval: Duration,
    pub max_iterations: Option<u64>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            stop_when_empty: true,
            poll_interval: Duration::from_secs(1),
            max_iterations: None,
        }
    }
}

impl From<&SwarmConfig> for StartOptions {
    fn from(config: &SwarmConfig) -> Self {
        Self {
            stop_when_empty: config.stop_when_empty,
            poll_interval: config.poll_interval(),
            max_iterations: config.max_iterations,
        }
    }
}

/// Counters for one [`Swarm::start`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwarmRunSummary {
    pub iterations: u64,
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Point-in-time view of a swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwarmStatus {
    pub running: bool,
    pub workers: usize,
    pub busy: usize,
}

/// Worker and task behind one spawned dispatch, keyed by tokio task id.
type Assignments = HashMap<tokio::task::Id, (WorkerId, TaskId)>;

/// How a dispatched task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    /// The task could not be started or its result could not be stored.
    Abandoned,
}

/// Coordinates workers over one task pool.
pub struct Swarm {
    pool: Arc<TaskPool>,
    workers: Mutex<Vec<Arc<dyn Worker>>>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    busy: AtomicUsize,
    wake: Notify,
}

impl Swarm {
    pub fn new(pool: Arc<TaskPool>) -> Self {
        Self {
            pool,
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
            wake: Notify::new(),
        }
    }

    pub fn pool(&self) -> &Arc<TaskPool> {
        &self.pool
    }

    /// Adds a worker. Worker ids must be unique within a swarm.
    pub fn register_agent(&self, worker: Arc<dyn Worker>) -> Result<(), HiveError> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if workers.iter().any(|w| w.id() == worker.id()) {
            return Err(HiveError::validation(format!(
                "worker '{}' is already registered",
                worker.id()
            )));
        }
        info!(worker_id = %worker.id(), capabilities = ?worker.capabilities(), "Registered worker");
        workers.push(worker);
        drop(workers);
        self.wake.notify_one();
        Ok(())
    }

    pub fn status(&self) -> SwarmStatus {
        SwarmStatus {
            running: self.running.load(Ordering::SeqCst),
            workers: self.worker_snapshot().len(),
            busy: self.busy.load(Ordering::SeqCst),
        }
    }

    /// Asks the loop to stop claiming. In-flight tasks still finish before
    /// [`start`](Self::start) returns. A stop issued before a spawned `start`
    /// gets to run ends that run before its first iteration.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Runs the claim/dispatch loop until stopped, until the pool is drained
    /// (with `stop_when_empty`), or until `max_iterations` is reached.
    pub async fn start(&self, options: StartOptions) -> Result<SwarmRunSummary, HiveError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HiveError::validation("swarm is already running"));
        }
        info!(
            workers = self.worker_snapshot().len(),
            stop_when_empty = options.stop_when_empty,
            "Swarm started"
        );

        let summary = self.run_loop(options).await;

        // The stop request is consumed by the run it ended.
        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        info!(
            iterations = summary.iterations,
            dispatched = summary.dispatched,
            completed = summary.completed,
            failed = summary.failed,
            "Swarm stopped"
        );
        Ok(summary)
    }

    async fn run_loop(&self, options: StartOptions) -> SwarmRunSummary {
        let mut summary = SwarmRunSummary::default();
        let mut in_flight: JoinSet<Outcome> = JoinSet::new();
        let mut busy = Assignments::new();

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                debug!("Stop requested");
                break;
            }
            if options
                .max_iterations
                .is_some_and(|max| summary.iterations >= max)
            {
                debug!(iterations = summary.iterations, "Iteration limit reached");
                break;
            }
            summary.iterations += 1;

            let workers = self.worker_snapshot();
            self.dispatch(&workers, &mut busy, &mut in_flight, &mut summary)
                .await;

            if options.stop_when_empty && in_flight.is_empty() && self.is_drained(&workers).await {
                break;
            }

            tokio::select! {
                Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    self.settle(joined, &mut busy, &mut summary).await;
                }
                _ = tokio::time::sleep(options.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        while let Some(joined) = in_flight.join_next_with_id().await {
            self.settle(joined, &mut busy, &mut summary).await;
        }
        summary
    }

    /// Claims one eligible pending task for every idle worker.
    async fn dispatch(
        &self,
        workers: &[Arc<dyn Worker>],
        busy: &mut Assignments,
        in_flight: &mut JoinSet<Outcome>,
        summary: &mut SwarmRunSummary,
    ) {
        let idle: Vec<&Arc<dyn Worker>> = workers
            .iter()
            .filter(|w| !busy.values().any(|(id, _)| id == w.id()))
            .collect();
        if idle.is_empty() {
            return;
        }
        let mut queue = match self.pool.pending_queue().await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "Failed to read pending tasks");
                return;
            }
        };

        for worker in idle {
            while let Some(position) = queue.iter().position(|t| can_take(worker.as_ref(), t)) {
                let candidate = queue.remove(position);
                match self.pool.claim(candidate.id, worker.id()).await {
                    Ok(task) => {
                        let task_id = task.id;
                        let handle = in_flight.spawn(run_task(self.pool.clone(), worker.clone(), task));
                        busy.insert(handle.id(), (worker.id().clone(), task_id));
                        self.busy.fetch_add(1, Ordering::SeqCst);
                        summary.dispatched += 1;
                        break;
                    }
                    Err(e) => {
                        // Another claimant won, or the task changed since the queue was read.
                        debug!(task_id = %candidate.id, worker_id = %worker.id(), error = %e, "Claim skipped");
                    }
                }
            }
            if queue.is_empty() {
                break;
            }
        }
    }

    /// True when nothing is left that these workers could ever pick up.
    async fn is_drained(&self, workers: &[Arc<dyn Worker>]) -> bool {
        let stats = match self.pool.get_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Failed to read task statistics");
                return false;
            }
        };
        if stats.claimed > 0 || stats.in_progress > 0 {
            return false;
        }
        if stats.pending == 0 {
            return true;
        }
        let queue = match self.pool.pending_queue().await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "Failed to read pending tasks");
                return false;
            }
        };
        let stranded = queue
            .iter()
            .all(|task| !workers.iter().any(|w| can_take(w.as_ref(), task)));
        if stranded {
            warn!(
                pending = queue.len(),
                "No registered worker can take the remaining pending tasks"
            );
        }
        stranded
    }

    /// Frees the worker slot of a finished dispatch and counts its outcome.
    ///
    /// A dispatch that died outside the worker (panic in the store, abort)
    /// still frees its worker, and its task is marked failed so it is never
    /// left claimed or in progress.
    async fn settle(
        &self,
        joined: Result<(tokio::task::Id, Outcome), JoinError>,
        busy: &mut Assignments,
        summary: &mut SwarmRunSummary,
    ) {
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let Some((worker_id, task_id)) = busy.remove(&id) else {
            warn!(tokio_task_id = %id, "Settled a dispatch with no recorded worker");
            return;
        };
        self.busy.fetch_sub(1, Ordering::SeqCst);

        match joined {
            Ok((_, Outcome::Completed)) => summary.completed += 1,
            Ok((_, Outcome::Failed)) => summary.failed += 1,
            Ok((_, Outcome::Abandoned)) => {}
            Err(e) => {
                error!(task_id = %task_id, worker_id = %worker_id, error = %e, "Task dispatch did not finish");
                let patch = TaskPatch::failed(format!("dispatch did not finish: {e}"));
                match self.pool.update_task(task_id, patch).await {
                    Ok(_) => summary.failed += 1,
                    Err(e) => warn!(task_id = %task_id, error = %e, "Could not mark task failed"),
                }
            }
        }
    }

    fn worker_snapshot(&self) -> Vec<Arc<dyn Worker>> {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Runs one claimed task to a terminal status.
async fn run_task(pool: Arc<TaskPool>, worker: Arc<dyn Worker>, task: Task) -> Outcome {
    let span = info_span!("task", task_id = %task.id, worker_id = %worker.id());
    async move {
        let task = match pool.start_task(task.id, worker.id()).await {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "Could not start claimed task");
                if let Err(e) = pool.release(task.id).await {
                    debug!(error = %e, "Could not release task");
                }
                return Outcome::Abandoned;
            }
        };

        let patch = match AssertUnwindSafe(worker.execute(&task)).catch_unwind().await {
            Ok(Ok(result)) => TaskPatch::completed(result),
            Ok(Err(e)) => {
                warn!(error = %e, "Task failed");
                TaskPatch::failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Worker panicked");
                TaskPatch::failed(format!("worker panicked: {message}"))
            }
        };
        let outcome = if patch.status == Some(TaskStatus::Completed) {
            Outcome::Completed
        } else {
            Outcome::Failed
        };

        match pool.update_task(task.id, patch).await {
            Ok(task) => {
                info!(status = %task.status, "Task finished");
                outcome
            }
            Err(e) => {
                error!(error = %e, "Could not store task outcome");
                Outcome::Abandoned
            }
        }
    }
    .instrument(span)
    .await
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
