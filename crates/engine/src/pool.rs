//! Task pool: the single shared store of tasks for one swarm.
//!
//! All task mutation goes through [`TaskPool`]; workers never write task
//! fields directly. The pool owns its [`TaskStore`] handle, so independent
//! pools never share state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    Clock, HiveError, NewTask, SystemClock, Task, TaskError, TaskFilter, TaskGuard, TaskId,
    TaskMutation, TaskPatch, TaskStats, TaskStatus, TaskStore, WorkerId,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// [`TaskStore`] kept in process memory behind one lock.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(TaskError::Storage {
                message: format!("duplicate task id {}", task.id),
            });
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| filter.matches(t)).cloned().collect())
    }

    async fn modify(&self, id: TaskId, mutation: TaskMutation) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        // Mutate a copy so a failed mutation leaves the stored task untouched.
        let mut draft = task.clone();
        mutation(&mut draft)?;
        *task = draft;
        Ok(task.clone())
    }

    async fn remove(&self, id: TaskId, guard: TaskGuard) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get(&id).ok_or(TaskError::NotFound(id))?;
        guard(task)?;
        tasks.remove(&id).ok_or(TaskError::NotFound(id))
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Create/read/update/query/stats over the tasks of one store.
#[derive(Clone)]
pub struct TaskPool {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl TaskPool {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// A pool over a fresh [`MemoryTaskStore`] and the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTaskStore::new()), Arc::new(SystemClock))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validates `input` and stores it as a new pending task.
    pub async fn create_task(&self, input: NewTask) -> Result<Task, HiveError> {
        require_text("title", &input.title)?;
        require_text("description", &input.description)?;

        let task = Task::from_new(TaskId::new_random(), input, self.clock.now());
        self.store.insert(task.clone()).await?;
        debug!(task_id = %task.id, priority = ?task.priority, "Created task");
        Ok(task)
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, HiveError> {
        self.store
            .get(id)
            .await?
            .ok_or(HiveError::Task(TaskError::NotFound(id)))
    }

    /// Tasks matching `filter`, oldest first.
    pub async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, HiveError> {
        let mut tasks = self.store.list(filter).await?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Pending tasks in dispatch order: priority descending, then FIFO.
    pub async fn pending_queue(&self) -> Result<Vec<Task>, HiveError> {
        let mut tasks = self
            .store
            .list(&TaskFilter::with_status(TaskStatus::Pending))
            .await?;
        tasks.sort_by(|a, b| Task::queue_order(a, b).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Applies `patch`. Moving a terminal task to any other status fails
    /// with [`TaskError::InvalidTransition`], as does any patch entering
    /// `claimed`/`in_progress` or returning an active task to `pending`.
    pub async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task, HiveError> {
        if let Some(title) = &patch.title {
            require_text("title", title)?;
        }
        if let Some(description) = &patch.description {
            require_text("description", description)?;
        }
        let now = self.clock.now();
        let task = self
            .store
            .modify(id, Box::new(move |task| task.apply_patch(patch, now)))
            .await?;
        debug!(task_id = %id, status = %task.status, "Updated task");
        Ok(task)
    }

    /// Atomically claims a pending task for `worker`.
    ///
    /// At most one claim per task ever succeeds; losers get
    /// [`TaskError::ClaimConflict`].
    pub async fn claim(&self, id: TaskId, worker: &WorkerId) -> Result<Task, HiveError> {
        let now = self.clock.now();
        let claimant = worker.clone();
        let task = self
            .store
            .modify(id, Box::new(move |task| task.claim(&claimant, now)))
            .await?;
        info!(task_id = %id, worker_id = %worker, "Claimed task");
        Ok(task)
    }

    /// Moves a task claimed by `worker` to in-progress.
    pub async fn start_task(&self, id: TaskId, worker: &WorkerId) -> Result<Task, HiveError> {
        let now = self.clock.now();
        let claimant = worker.clone();
        let task = self
            .store
            .modify(id, Box::new(move |task| task.start(&claimant, now)))
            .await?;
        debug!(task_id = %id, worker_id = %worker, "Started task");
        Ok(task)
    }

    /// Returns a claimed task to the pending queue.
    pub async fn release(&self, id: TaskId) -> Result<Task, HiveError> {
        let now = self.clock.now();
        let task = self
            .store
            .modify(id, Box::new(move |task| task.release(now)))
            .await?;
        info!(task_id = %id, "Released task");
        Ok(task)
    }

    pub async fn cancel_task(&self, id: TaskId) -> Result<Task, HiveError> {
        self.update_task(id, TaskPatch::status(TaskStatus::Cancelled))
            .await
    }

    /// Physically removes a task. Claimed and in-progress tasks are refused.
    pub async fn delete_task(&self, id: TaskId) -> Result<Task, HiveError> {
        let task = self
            .store
            .remove(
                id,
                Box::new(|task| {
                    if task.status.is_active() {
                        Err(TaskError::DeleteActive {
                            id: task.id,
                            status: task.status,
                        })
                    } else {
                        Ok(())
                    }
                }),
            )
            .await?;
        debug!(task_id = %id, "Deleted task");
        Ok(task)
    }

    pub async fn get_stats(&self) -> Result<TaskStats, HiveError> {
        let tasks = self.store.list(&TaskFilter::default()).await?;
        Ok(TaskStats::from_tasks(&tasks))
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

fn require_text(field: &str, value: &str) -> Result<(), HiveError> {
    if value.trim().is_empty() {
        return Err(HiveError::validation(format!("task {field} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ManualClock, Priority};
    use serde_json::json;
    use std::time::Duration;

    fn worker(name: &str) -> WorkerId {
        WorkerId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_create_validates_and_defaults() {
        let pool = TaskPool::in_memory();
        let err = pool.create_task(NewTask::new("", "d")).await.unwrap_err();
        assert!(matches!(err, HiveError::Validation { .. }));
        let err = pool.create_task(NewTask::new("t", "  ")).await.unwrap_err();
        assert!(matches!(err, HiveError::Validation { .. }));

        let task = pool.create_task(NewTask::new("t", "d")).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(pool.get_task(task.id).await.unwrap(), task);
    }

    #[tokio::test]
    async fn test_stats_total_matches_creations() {
        let pool = TaskPool::in_memory();
        for n in 0..17 {
            pool.create_task(NewTask::new(format!("t{n}"), "d"))
                .await
                .unwrap();
        }
        let _ = pool.create_task(NewTask::new("", "rejected")).await;
        let stats = pool.get_stats().await.unwrap();
        assert_eq!(stats.total, 17);
        assert_eq!(stats.pending, 17);
    }

    #[tokio::test]
    async fn test_update_unknown_task_is_not_found() {
        let pool = TaskPool::in_memory();
        let id = TaskId::new_random();
        let err = pool
            .update_task(id, TaskPatch::status(TaskStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, HiveError::Task(TaskError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_terminal_tasks_cannot_be_reopened() {
        let pool = TaskPool::in_memory();
        let task = pool.create_task(NewTask::new("t", "d")).await.unwrap();
        pool.update_task(task.id, TaskPatch::completed(json!({"answer": 42})))
            .await
            .unwrap();
        let err = pool
            .update_task(task.id, TaskPatch::status(TaskStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HiveError::Task(TaskError::InvalidTransition { .. })
        ));
        let stored = pool.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_updates_bump_updated_at() {
        let clock = Arc::new(ManualClock::default());
        let pool = TaskPool::new(Arc::new(MemoryTaskStore::new()), clock.clone());
        let task = pool.create_task(NewTask::new("t", "d")).await.unwrap();
        clock.advance(Duration::from_secs(3));
        let patch = TaskPatch {
            priority: Some(Priority::High),
            ..TaskPatch::default()
        };
        let updated = pool.update_task(task.id, patch).await.unwrap();
        assert!(updated.updated_at > task.updated_at);
        assert_eq!(updated.created_at, task.created_at);
    }

    #[tokio::test]
    async fn test_query_by_filter() {
        let pool = TaskPool::in_memory();
        let a = pool
            .create_task(NewTask::new("a", "d").with_priority(Priority::High))
            .await
            .unwrap();
        let b = pool.create_task(NewTask::new("b", "d")).await.unwrap();
        pool.claim(b.id, &worker("w1")).await.unwrap();

        let high = pool
            .query(&TaskFilter {
                priority: Some(Priority::High),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].id, a.id);

        let mine = pool
            .query(&TaskFilter {
                assigned_agent: Some(worker("w1")),
                ..TaskFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, b.id);
    }

    #[tokio::test]
    async fn test_pending_queue_order() {
        let clock = Arc::new(ManualClock::default());
        let pool = TaskPool::new(Arc::new(MemoryTaskStore::new()), clock.clone());
        let first = pool.create_task(NewTask::new("first", "d")).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let second = pool.create_task(NewTask::new("second", "d")).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let urgent = pool
            .create_task(NewTask::new("urgent", "d").with_priority(Priority::Critical))
            .await
            .unwrap();

        let queue: Vec<_> = pool
            .pending_queue()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(queue, vec![urgent.id, first.id, second.id]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        for _ in 0..20 {
            let pool = TaskPool::in_memory();
            let task = pool.create_task(NewTask::new("t", "d")).await.unwrap();
            let mut handles = Vec::new();
            for n in 0..16 {
                let pool = pool.clone();
                handles.push(tokio::spawn(async move {
                    pool.claim(task.id, &worker(&format!("w{n}"))).await
                }));
            }
            let mut winners = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => winners += 1,
                    Err(HiveError::Task(TaskError::ClaimConflict { .. })) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            assert_eq!(winners, 1);
        }
    }

    #[tokio::test]
    async fn test_release_and_delete() {
        let pool = TaskPool::in_memory();
        let task = pool.create_task(NewTask::new("t", "d")).await.unwrap();
        pool.claim(task.id, &worker("w")).await.unwrap();

        let err = pool.delete_task(task.id).await.unwrap_err();
        assert!(matches!(err, HiveError::Task(TaskError::DeleteActive { .. })));

        let released = pool.release(task.id).await.unwrap();
        assert_eq!(released.status, TaskStatus::Pending);
        assert!(released.assigned_agent.is_none());

        pool.delete_task(task.id).await.unwrap();
        assert_eq!(pool.get_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_running_task_cannot_be_requeued_by_patch() {
        let pool = TaskPool::in_memory();
        let task = pool.create_task(NewTask::new("t", "d")).await.unwrap();
        pool.claim(task.id, &worker("first")).await.unwrap();
        assert!(pool.start_task(task.id, &worker("second")).await.is_err());
        pool.start_task(task.id, &worker("first")).await.unwrap();

        let err = pool
            .update_task(task.id, TaskPatch::status(TaskStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HiveError::Task(TaskError::InvalidTransition { .. })
        ));
        let err = pool
            .update_task(
                task.id,
                TaskPatch {
                    assigned_agent: Some(None),
                    ..TaskPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HiveError::Task(TaskError::AssignmentLocked { .. })
        ));

        // Nobody else can pick it up while it runs.
        assert!(pool.pending_queue().await.unwrap().is_empty());
        assert!(matches!(
            pool.claim(task.id, &worker("second")).await,
            Err(HiveError::Task(TaskError::ClaimConflict { .. }))
        ));
        let stored = pool.get_task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert_eq!(stored.assigned_agent, Some(worker("first")));
    }

    #[tokio::test]
    async fn test_cancel_task() {
        let pool = TaskPool::in_memory();
        let task = pool.create_task(NewTask::new("t", "d")).await.unwrap();
        let cancelled = pool.cancel_task(task.id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());
        assert!(pool.claim(task.id, &worker("w")).await.is_err());
    }
}
