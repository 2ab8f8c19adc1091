//! Hive LLM provider infrastructure adapter.
//!
//! Implements the [`domain::LlmProvider`] trait for servers speaking the
//! OpenAI chat completions API (OpenAI itself, and the many gateways and
//! local runtimes that mirror it). Additional providers are added as new
//! modules in this crate without any changes to `domain` or `engine`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing
//! and `Retry-After` extraction live here. Failures are mapped onto
//! [`domain::HiveError`] so the engine's retry classification applies
//! unchanged.

pub mod config;
pub mod openai;

pub use config::{ProviderConfig, DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_TIMEOUT};
pub use openai::OpenAiCompatibleProvider;
