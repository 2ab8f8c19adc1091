//! Port traits implemented by infrastructure crates.
//!
//! The engine depends only on these traits; concrete providers and task
//! stores are injected by the composition root.

use async_trait::async_trait;

use crate::{Completion, CompletionRequest, HiveError, ProviderName, Task, TaskError, TaskFilter, TaskId};

/// A remote LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider label used in errors and logs.
    fn name(&self) -> &ProviderName;

    /// Performs one chat completion. Implementations must not retry; retry,
    /// caching and cost accounting are layered on by the engine.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, HiveError>;
}

/// Mutation applied to a stored task while the store holds its lock.
pub type TaskMutation = Box<dyn FnOnce(&mut Task) -> Result<(), TaskError> + Send>;

/// Check run against a stored task, under the store lock, before removal.
pub type TaskGuard = Box<dyn FnOnce(&Task) -> Result<(), TaskError> + Send>;

/// Backing storage for one task pool.
///
/// `modify` and `remove` must be atomic with respect to every other call on
/// the same store: the mutation or guard observes the current task and its
/// outcome is committed (or discarded) before any other caller can read or
/// modify that task. This is what makes claim a compare-and-set.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new task. Fails if the id already exists.
    async fn insert(&self, task: Task) -> Result<(), TaskError>;

    /// Returns the task, or `None` if unknown.
    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError>;

    /// Returns every task matching `filter`, in no particular order.
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;

    /// Applies `mutation` atomically and returns the updated task.
    ///
    /// Returns [`TaskError::NotFound`] for unknown ids. If the mutation fails
    /// the stored task is left unchanged.
    async fn modify(&self, id: TaskId, mutation: TaskMutation) -> Result<Task, TaskError>;

    /// Removes the task if `guard` accepts it, returning the removed task.
    async fn remove(&self, id: TaskId, guard: TaskGuard) -> Result<Task, TaskError>;
}
