//! Hive execution engine.
//!
//! Turns a queue of tasks into bounded, concurrent, retried, cached and
//! cost-accounted provider calls.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The engine sequences calls between the business
//! types in [`domain`] and the injected ports ([`domain::LlmProvider`],
//! [`domain::TaskStore`]). It performs no network or disk I/O itself.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`retry`] | Exponential backoff with jitter around async calls |
//! | [`cache`] | Fingerprinted, TTL-bounded cache of deterministic requests |
//! | [`cost`] | Per-call cost ledger with an optional hard budget |
//! | [`batch`] | Chunked, order-preserving bounded-concurrency execution |
//! | [`pool`] | Task pool over an explicit task store |
//! | [`swarm`] | Claim/dispatch loop draining a pool through workers |
//! | [`orchestrator`] | Composition of the above, plus the LLM-backed worker |

pub mod batch;
pub mod cache;
pub mod config;
pub mod cost;
pub mod orchestrator;
pub mod pool;
pub mod retry;
pub mod swarm;

pub use batch::{BatchOutcome, BatchProcessor, BatchProgress, ErrorAction};
pub use cache::{fingerprint, CacheConfig, CacheEntry, CacheStats, RequestCache};
pub use config::{BatchConfig, EngineConfig, SwarmConfig};
pub use cost::{CostEntry, CostSummary, CostTracker, ModelPrice, PriceTable, FALLBACK_PRICE};
pub use orchestrator::{BudgetRun, CallContext, LlmWorker, Orchestrator};
pub use pool::{MemoryTaskStore, TaskPool};
pub use retry::{RetryConfig, RetryEvent, RetryPolicy};
pub use swarm::{can_take, StartOptions, Swarm, SwarmRunSummary, SwarmStatus, Worker};
