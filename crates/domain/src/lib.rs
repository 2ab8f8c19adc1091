//! Core execution domain for Hive.
//!
//! This crate contains every domain concept, newtype identifier, shared primitive
//! type, and cross-cutting error type used throughout the engine. Infrastructure
//! crates implement the traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype domain identifiers (`TaskId`, `WorkerId`, etc.) |
//! | [`types`] | Shared value types (`TokenCount`, `TokenCost`, `CostBudget`, `Usage`, etc.) |
//! | [`task`] | Task model, lifecycle transitions, filters and statistics |
//! | [`chat`] | Chat-completion request and response shapes |
//! | [`clock`] | Injectable wall-clock source |
//! | [`ports`] | `LlmProvider` and `TaskStore` traits |
//! | [`errors`] | Top-level error and retry-classification types |

pub mod chat;
pub mod clock;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod task;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use chat::{ChatMessage, Completion, CompletionRequest, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{Classify, HiveError, RetryClass, TaskError, TRANSIENT_STATUS_CODES};
pub use identifiers::{AgentName, CacheKey, ModelName, ProviderName, TaskId, WorkerId};
pub use ports::{LlmProvider, TaskGuard, TaskMutation, TaskStore};
pub use task::{
    NewTask, Priority, Task, TaskFilter, TaskPatch, TaskStats, TaskStatus,
    REQUIRED_CAPABILITY_KEY,
};
pub use types::{CostBudget, Timestamp, TokenCost, TokenCount, Usage};
