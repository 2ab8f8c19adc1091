//! Orchestrator: the single entry point for provider calls.
//!
//! Every call goes cache lookup → budget pre-check → retried provider call →
//! cost record → cache store. Batch runs, pool drains and budget-bounded
//! sequential runs are all layered on [`Orchestrator::complete`].

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    AgentName, ChatMessage, Clock, Completion, CompletionRequest, HiveError, LlmProvider,
    ModelName, Task, TaskId, WorkerId,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::batch::{BatchOutcome, BatchProcessor, ErrorAction};
use crate::cache::RequestCache;
use crate::config::{BatchConfig, EngineConfig};
use crate::cost::{CostTracker, PriceTable};
use crate::pool::TaskPool;
use crate::retry::RetryPolicy;
use crate::swarm::{StartOptions, Swarm, SwarmRunSummary, Worker};

/// Attribution attached to the cost entry of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub agent: Option<AgentName>,
    pub task_id: Option<TaskId>,
}

impl CallContext {
    pub fn for_task(agent: AgentName, task_id: TaskId) -> Self {
        Self {
            agent: Some(agent),
            task_id: Some(task_id),
        }
    }
}

/// Result of [`Orchestrator::run_within_budget`].
#[derive(Debug)]
pub struct BudgetRun {
    /// One entry per request that was attempted, in input order.
    pub outcomes: Vec<(CompletionRequest, Result<Completion, HiveError>)>,
    /// Requests never sent because the budget ran out.
    pub not_run: Vec<CompletionRequest>,
    /// The budget error that stopped the run, if any.
    pub stopped_by: Option<HiveError>,
}

/// Composition of provider, cache, cost ledger and retry policy.
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    cache: RequestCache,
    costs: CostTracker,
    retry: RetryPolicy,
    batch: BatchConfig,
}

impl Orchestrator {
    /// Builds an orchestrator from a validated configuration.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        config: &EngineConfig,
        prices: PriceTable,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HiveError> {
        config.validate()?;
        Ok(Self {
            provider,
            cache: RequestCache::new(&config.cache, clock.clone()),
            costs: CostTracker::new(prices, config.budget(), clock),
            retry: RetryPolicy::new(config.retry.clone()),
            batch: config.batch.clone(),
        })
    }

    /// Replaces the retry policy (e.g. with a seeded one).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    pub fn costs(&self) -> &CostTracker {
        &self.costs
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Performs one completion.
    ///
    /// Cache hits are free and skip the provider entirely. A response whose
    /// cost would exceed the budget is discarded and
    /// [`HiveError::BudgetExceeded`] is returned.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        context: &CallContext,
    ) -> Result<Completion, HiveError> {
        if let Some(hit) = self.cache.get_completion(request) {
            debug!(model = %request.model, "Serving completion from cache");
            return Ok(hit);
        }

        self.costs.ensure_budget_available()?;

        let completion = self
            .retry
            .retry(|| self.provider.complete(request))
            .await?;

        // Priced by the requested model: providers often answer with a
        // dated variant that is missing from the price table.
        let entry = self.costs.record(
            &request.model,
            completion.usage,
            context.agent.as_ref(),
            context.task_id,
        )?;
        self.cache.set_completion(request, &completion);
        debug!(
            provider = %self.provider.name(),
            model = %request.model,
            cost = %entry.cost,
            "Completion finished"
        );
        Ok(completion)
    }

    /// Runs `requests` in chunks of `concurrency`, preserving input order.
    ///
    /// Individual failures are recorded per item; a budget rejection aborts
    /// the remaining chunks and is returned.
    pub async fn run_batch(
        &self,
        requests: Vec<CompletionRequest>,
        concurrency: usize,
    ) -> Result<Vec<BatchOutcome<CompletionRequest, Completion, HiveError>>, HiveError> {
        let mut processor = BatchProcessor::new(concurrency)
            .with_max_retries_per_item(self.batch.max_retries_per_item)
            .with_on_error(|error: &HiveError, _: &CompletionRequest| match error {
                HiveError::BudgetExceeded { .. } => ErrorAction::Abort,
                _ => ErrorAction::Skip,
            });
        if let Some(delay) = self.batch.delay_between_batches() {
            processor = processor.with_delay_between_batches(delay);
        }
        let context = CallContext::default();
        let context = &context;
        processor
            .process(requests, move |request| async move {
                self.complete(&request, context).await
            })
            .await
    }

    /// Drains `pool` with `workers` through a fresh [`Swarm`].
    pub async fn drain_pool(
        &self,
        pool: Arc<TaskPool>,
        workers: Vec<Arc<dyn Worker>>,
        options: StartOptions,
    ) -> Result<SwarmRunSummary, HiveError> {
        let swarm = Swarm::new(pool);
        for worker in workers {
            swarm.register_agent(worker)?;
        }
        let summary = swarm.start(options).await?;
        info!(
            completed = summary.completed,
            failed = summary.failed,
            total_cost = %self.costs.current_cost(),
            "Pool drained"
        );
        Ok(summary)
    }

    /// Runs `requests` one after another until the budget stops the run.
    ///
    /// Non-budget failures are recorded and the run continues.
    pub async fn run_within_budget(
        &self,
        requests: Vec<CompletionRequest>,
        context: &CallContext,
    ) -> BudgetRun {
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut remaining = requests.into_iter();
        let mut stopped_by = None;
        let mut not_run = Vec::new();

        while let Some(request) = remaining.next() {
            match self.complete(&request, context).await {
                Err(error @ HiveError::BudgetExceeded { .. }) => {
                    warn!(error = %error, "Budget reached; skipping remaining requests");
                    not_run.push(request);
                    not_run.extend(remaining.by_ref());
                    stopped_by = Some(error);
                    break;
                }
                result => outcomes.push((request, result)),
            }
        }

        BudgetRun {
            outcomes,
            not_run,
            stopped_by,
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", self.provider.name())
            .field("retry", &self.retry)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// LlmWorker
// ---------------------------------------------------------------------------

/// A [`Worker`] that answers each task with one completion.
///
/// The task title and description become the user message; the optional
/// persona prompt becomes the system message.
#[derive(Debug)]
pub struct LlmWorker {
    id: WorkerId,
    agent: AgentName,
    orchestrator: Arc<Orchestrator>,
    model: ModelName,
    system_prompt: Option<String>,
    capabilities: Vec<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmWorker {
    pub fn new(
        name: &str,
        orchestrator: Arc<Orchestrator>,
        model: ModelName,
    ) -> Result<Self, HiveError> {
        let invalid = || HiveError::validation("worker name must not be empty");
        Ok(Self {
            id: WorkerId::new(name).ok_or_else(invalid)?,
            agent: AgentName::new(name).ok_or_else(invalid)?,
            orchestrator,
            model,
            system_prompt: None,
            capabilities: Vec::new(),
            temperature: None,
            max_tokens: None,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// The request this worker sends for `task`.
    pub fn render(&self, task: &Task) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }
        messages.push(ChatMessage::user(format!(
            "{}\n\n{}",
            task.title, task.description
        )));

        let mut request = CompletionRequest::new(self.model.clone(), messages);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}

#[async_trait]
impl Worker for LlmWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn execute(&self, task: &Task) -> Result<Value, HiveError> {
        let request = self.render(task);
        let context = CallContext::for_task(self.agent.clone(), task.id);
        let completion = self.orchestrator.complete(&request, &context).await?;
        Ok(json!({
            "content": completion.content,
            "model": completion.model,
            "cached": completion.cached,
            "usage": completion.usage,
        }))
    }
}
