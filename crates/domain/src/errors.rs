//! Top-level error and retry-classification types for the Hive domain.
//!
//! [`HiveError`] covers every condition surfaced to callers of the execution
//! engine. Task-store conditions are grouped under [`TaskError`] so storage
//! backends can report them without depending on the rest of the error surface.
//!
//! [`RetryClass`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryClass`] via [`Classify`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CostBudget, ProviderName, TaskId, TaskStatus, TokenCost, WorkerId};

/// HTTP status codes treated as transient provider failures.
pub const TRANSIENT_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Lowercase message fragments that identify transport-level transient failures.
const TRANSIENT_SIGNATURES: [&str; 6] = [
    "econnreset",
    "connection reset",
    "etimedout",
    "timed out",
    "timeout",
    "socket hang up",
];

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// ## Rules
///
/// - `Transient` errors: rate limits, provider 5xx responses, timeouts,
///   connection resets.
/// - `Permanent` errors: validation failures, budget exceeded, task state
///   conflicts, configuration problems, provider 4xx responses other than 429.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryClass {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Transient {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    Permanent,
}

impl RetryClass {
    /// Returns `true` for [`RetryClass::Transient`].
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Implemented by error types that know whether they are worth retrying.
pub trait Classify {
    /// Classifies this error for retry decisions.
    fn retry_class(&self) -> RetryClass;
}

// ---------------------------------------------------------------------------
// Task errors
// ---------------------------------------------------------------------------

/// Errors produced by task-pool operations and task-store backends.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TaskError {
    /// No task with this identifier exists in the pool.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The requested status change is not permitted from the current status.
    #[error("Invalid state transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// Task the transition was attempted on.
        id: TaskId,
        /// Status at the time of the attempt.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// A claim attempt lost the race: the task is no longer pending.
    #[error("Task {id} cannot be claimed: status is {status}")]
    ClaimConflict {
        /// Task the claim was attempted on.
        id: TaskId,
        /// Status observed under the store lock.
        status: TaskStatus,
        /// Worker currently holding the task, if any.
        holder: Option<WorkerId>,
    },

    /// A claimed or in-progress task cannot be handed to another worker
    /// through a patch; only `claim` and `release` move the assignment.
    #[error("Task {id} is {status}; its assignment cannot be changed")]
    AssignmentLocked {
        /// Task the reassignment was attempted on.
        id: TaskId,
        /// Active status that blocked the change.
        status: TaskStatus,
    },

    /// A claimed or in-progress task cannot be physically removed.
    #[error("Task {id} is {status} and cannot be deleted")]
    DeleteActive {
        /// Task the deletion was attempted on.
        id: TaskId,
        /// Active status that blocked deletion.
        status: TaskStatus,
    },

    /// The backing store failed independently of task state.
    #[error("Task store failure: {message}")]
    Storage {
        /// Backend-supplied description.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Top-level errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the execution engine.
///
/// One worker's task failure is recorded on that task and never propagated
/// as a [`HiveError`] to the swarm loop or sibling tasks.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum HiveError {
    /// Malformed input: empty task title, negative token counts, and similar.
    ///
    /// Surfaced immediately; never retried.
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the offending input.
        message: String,
    },

    /// The LLM provider rejected or failed the call.
    ///
    /// Retried when the status (or, without a status, the message) matches a
    /// transient signature.
    #[error("Provider '{provider}' failed{}: {message}", status_suffix(.status))]
    Api {
        /// Provider that produced the failure.
        provider: ProviderName,
        /// HTTP status code, when the failure came from a response.
        status: Option<u16>,
        /// Provider-supplied or transport error text.
        message: String,
        /// Server-requested back-off (e.g. from `Retry-After`).
        retry_after: Option<Duration>,
    },

    /// An operation did not finish in time.
    #[error("Timed out during {operation}")]
    Timeout {
        /// The operation that timed out (e.g. `"chat completion"`).
        operation: String,
    },

    /// Recording the call would push accumulated cost above the configured limit.
    ///
    /// Fatal to the triggering call; never retried.
    #[error("Cost budget exceeded: accumulated {accumulated}, limit {limit}")]
    BudgetExceeded {
        /// Total cost that would have been accumulated.
        accumulated: TokenCost,
        /// Configured budget.
        limit: CostBudget,
    },

    /// A task-pool operation failed.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The engine configuration is invalid.
    ///
    /// Produced at load time; the engine never starts with an invalid config.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

impl HiveError {
    /// Shorthand for [`HiveError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for [`HiveError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl Classify for HiveError {
    fn retry_class(&self) -> RetryClass {
        match self {
            HiveError::Api {
                status: Some(status),
                retry_after,
                ..
            } if TRANSIENT_STATUS_CODES.contains(status) => RetryClass::Transient {
                after: *retry_after,
            },
            HiveError::Api {
                status: None,
                message,
                retry_after,
                ..
            } if has_transient_signature(message) => RetryClass::Transient {
                after: *retry_after,
            },
            HiveError::Timeout { .. } => RetryClass::Transient { after: None },
            _ => RetryClass::Permanent,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

fn has_transient_signature(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}
