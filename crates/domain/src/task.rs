//! Task model: lifecycle status, priority, patches, filters and statistics.
//!
//! A [`Task`] is only ever mutated through [`Task::apply_patch`],
//! [`Task::claim`] and [`Task::release`]. Those methods enforce the lifecycle
//! invariants; the task pool calls them under its store lock.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{TaskError, TaskId, Timestamp, WorkerId};

/// Metadata key naming the worker capability a task requires.
pub const REQUIRED_CAPABILITY_KEY: &str = "required_capability";

// ---------------------------------------------------------------------------
// Status and priority
// ---------------------------------------------------------------------------

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by a worker but not yet started.
    Claimed,
    /// A worker is executing the task.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Withdrawn before completion.
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Claimed,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Returns `true` for completed, failed and cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` while a worker holds the task (claimed or in progress).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Claimed | Self::InProgress)
    }

    /// Returns the wire name of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Variants are declared in ascending order so the
/// derived [`Ord`] ranks `Critical` highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Input accepted by the task pool when creating a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewTask {
    /// Creates a task input with default priority and no metadata.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority: None,
            metadata: Map::new(),
        }
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Builder method to require a worker capability.
    pub fn requiring_capability(mut self, capability: impl Into<String>) -> Self {
        self.metadata.insert(
            REQUIRED_CAPABILITY_KEY.to_string(),
            Value::String(capability.into()),
        );
        self
    }

    /// Builder method to add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A unit of work with a lifecycle status, executed by exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    /// Worker that claimed the task, if any.
    pub assigned_agent: Option<WorkerId>,
    pub created_at: Timestamp,
    /// Never moves backwards, even if the clock does.
    pub updated_at: Timestamp,
    /// Set when the task first enters [`TaskStatus::InProgress`].
    pub started_at: Option<Timestamp>,
    /// Set when the task enters a terminal status.
    pub completed_at: Option<Timestamp>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: Map<String, Value>,
}

impl Task {
    /// Builds a pending task from already-validated input.
    pub fn from_new(id: TaskId, input: NewTask, now: Timestamp) -> Self {
        Self {
            id,
            title: input.title,
            description: input.description,
            status: TaskStatus::Pending,
            priority: input.priority.unwrap_or_default(),
            assigned_agent: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            metadata: input.metadata,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Capability a worker must advertise to claim this task, if any.
    pub fn required_capability(&self) -> Option<&str> {
        self.metadata
            .get(REQUIRED_CAPABILITY_KEY)
            .and_then(Value::as_str)
    }

    /// Queue ordering: priority descending, then creation time ascending.
    pub fn queue_order(a: &Task, b: &Task) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    }

    /// Atomically moves a pending task to claimed for `worker`.
    ///
    /// Callers must hold whatever lock guards this task; the check and the
    /// update happen in one step.
    pub fn claim(&mut self, worker: &WorkerId, now: Timestamp) -> Result<(), TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::ClaimConflict {
                id: self.id,
                status: self.status,
                holder: self.assigned_agent.clone(),
            });
        }
        self.status = TaskStatus::Claimed;
        self.assigned_agent = Some(worker.clone());
        self.touch(now);
        Ok(())
    }

    /// Returns a claimed task to the pending queue.
    pub fn release(&mut self, now: Timestamp) -> Result<(), TaskError> {
        if self.status != TaskStatus::Claimed {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: TaskStatus::Pending,
            });
        }
        self.transition(TaskStatus::Pending, now)
    }

    /// Moves a claimed task to in-progress. Only the claiming worker may
    /// start it.
    pub fn start(&mut self, worker: &WorkerId, now: Timestamp) -> Result<(), TaskError> {
        if self.status != TaskStatus::Claimed || self.assigned_agent.as_ref() != Some(worker) {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: TaskStatus::InProgress,
            });
        }
        self.transition(TaskStatus::InProgress, now)
    }

    /// Applies `patch`, validating any status change.
    ///
    /// Patches cannot enter `claimed`/`in_progress` or send an active task
    /// back to `pending`; those moves belong to [`claim`](Self::claim),
    /// [`start`](Self::start) and [`release`](Self::release). The patch is
    /// applied all-or-nothing: an invalid transition leaves the task
    /// untouched.
    pub fn apply_patch(&mut self, patch: TaskPatch, now: Timestamp) -> Result<(), TaskError> {
        if let Some(status) = patch.status {
            self.check_patch_transition(status)?;
        }
        if let Some(agent) = &patch.assigned_agent {
            if self.status.is_active() && agent.as_ref() != self.assigned_agent.as_ref() {
                return Err(TaskError::AssignmentLocked {
                    id: self.id,
                    status: self.status,
                });
            }
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(agent) = patch.assigned_agent {
            self.assigned_agent = agent;
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        self.metadata.extend(patch.metadata);
        match patch.status {
            Some(status) => self.transition(status, now),
            None => {
                self.touch(now);
                Ok(())
            }
        }
    }

    fn check_patch_transition(&self, to: TaskStatus) -> Result<(), TaskError> {
        let from = self.status;
        let reserved = to.is_active() || (from.is_active() && to == TaskStatus::Pending);
        if from != to && reserved {
            return Err(TaskError::InvalidTransition { id: self.id, from, to });
        }
        self.check_transition(to)
    }

    fn check_transition(&self, to: TaskStatus) -> Result<(), TaskError> {
        if self.status.is_terminal() && to != self.status {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: TaskStatus, now: Timestamp) -> Result<(), TaskError> {
        self.check_transition(to)?;
        let from = self.status;
        self.status = to;
        self.touch(now);
        if from == to {
            return Ok(());
        }
        match to {
            TaskStatus::Pending => self.assigned_agent = None,
            TaskStatus::InProgress if self.started_at.is_none() => {
                self.started_at = Some(self.updated_at)
            }
            s if s.is_terminal() => self.completed_at = Some(self.updated_at),
            _ => {}
        }
        Ok(())
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = self.updated_at.max(now);
    }
}

// ---------------------------------------------------------------------------
// Patches, filters, statistics
// ---------------------------------------------------------------------------

/// Partial update applied by the task pool. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    /// `Some(None)` clears the assignment.
    pub assigned_agent: Option<Option<WorkerId>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Entries merged into the existing metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TaskPatch {
    /// Patch that only changes status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch completing a task with `result`.
    pub fn completed(result: Value) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Patch failing a task with `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Query filter; every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_agent: Option<WorkerId>,
    pub priority: Option<Priority>,
}

impl TaskFilter {
    /// Filter matching one status.
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Returns `true` if `task` satisfies every set field.
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self
                .assigned_agent
                .as_ref()
                .map_or(true, |a| task.assigned_agent.as_ref() == Some(a))
            && self.priority.map_or(true, |p| task.priority == p)
    }
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub pending: usize,
    pub claimed: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

impl TaskStats {
    /// Counts `tasks` by status.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Claimed => stats.claimed += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Count for one status.
    pub fn count(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Claimed => self.claimed,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    /// Tasks still waiting or held by a worker.
    pub fn outstanding(&self) -> usize {
        self.pending + self.claimed + self.in_progress
    }
}
