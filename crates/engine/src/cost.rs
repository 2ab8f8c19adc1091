//! Cost Tracker - append-only ledger of provider usage
//!
//! Every completed provider call appends one [`CostEntry`]. Aggregates are
//! recomputed from the full ledger on every read, and the budget check runs
//! under the same lock as the append so concurrent callers can never jointly
//! overshoot the ceiling.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use domain::{
    AgentName, Clock, CostBudget, HiveError, ModelName, TaskId, Timestamp, TokenCost, TokenCount,
    Usage,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// Pricing
// ============================================================================

/// Price of one model, in USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Calculate cost for given token counts
    pub fn cost(&self, prompt: TokenCount, completion: TokenCount) -> TokenCost {
        let prompt_cost = prompt.as_u64() as f64 / 1_000.0 * self.prompt_per_1k;
        let completion_cost = completion.as_u64() as f64 / 1_000.0 * self.completion_per_1k;
        TokenCost::new(prompt_cost + completion_cost).unwrap_or_default()
    }
}

/// Price charged for models missing from the table (GPT-4 list price, the
/// most expensive common default).
pub const FALLBACK_PRICE: ModelPrice = ModelPrice::new(0.03, 0.06);

/// Per-model price table with a fallback for unknown models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
    fallback: ModelPrice,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PriceTable {
    /// An empty table charging `fallback` for every model.
    pub fn empty(fallback: ModelPrice) -> Self {
        Self {
            prices: HashMap::new(),
            fallback,
        }
    }

    /// Default pricing for common models.
    pub fn with_defaults() -> Self {
        let mut table = Self::empty(FALLBACK_PRICE);
        for (model, price) in [
            ("gpt-4o", ModelPrice::new(0.0025, 0.01)),
            ("gpt-4o-mini", ModelPrice::new(0.000_15, 0.000_6)),
            ("gpt-4-turbo", ModelPrice::new(0.01, 0.03)),
            ("gpt-4", ModelPrice::new(0.03, 0.06)),
            ("gpt-3.5-turbo", ModelPrice::new(0.000_5, 0.001_5)),
            ("claude-3-5-sonnet-20241022", ModelPrice::new(0.003, 0.015)),
            ("claude-3-opus-20240229", ModelPrice::new(0.015, 0.075)),
            ("claude-3-haiku-20240307", ModelPrice::new(0.000_25, 0.001_25)),
        ] {
            table.prices.insert(model.to_string(), price);
        }
        table
    }

    /// Builder method to set (or override) one model's price.
    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    /// Price for `model`, or the fallback if unknown.
    pub fn price_for(&self, model: &ModelName) -> ModelPrice {
        self.prices
            .get(model.as_str())
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn contains(&self, model: &str) -> bool {
        self.prices.contains_key(model)
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// One completed provider call. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub timestamp: Timestamp,
    pub model: ModelName,
    pub prompt_tokens: TokenCount,
    pub completion_tokens: TokenCount,
    /// Always `prompt_tokens + completion_tokens`.
    pub total_tokens: TokenCount,
    pub cost: TokenCost,
    pub agent_name: Option<AgentName>,
    pub task_id: Option<TaskId>,
}

/// Aggregate view over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: TokenCost,
    pub total_tokens: TokenCount,
    pub total_requests: usize,
    pub cost_by_model: BTreeMap<String, TokenCost>,
    /// Only entries attributed to an agent appear here.
    pub cost_by_agent: BTreeMap<String, TokenCost>,
}

/// Cost tracker for monitoring LLM usage
#[derive(Debug)]
pub struct CostTracker {
    prices: PriceTable,
    budget: Option<CostBudget>,
    clock: Arc<dyn Clock>,
    entries: Mutex<Vec<CostEntry>>,
}

impl CostTracker {
    pub fn new(prices: PriceTable, budget: Option<CostBudget>, clock: Arc<dyn Clock>) -> Self {
        Self {
            prices,
            budget,
            clock,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn budget(&self) -> Option<CostBudget> {
        self.budget
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Prices `usage` for `model` and appends it to the ledger.
    ///
    /// Fails with [`HiveError::Validation`] for negative token counts and
    /// with [`HiveError::BudgetExceeded`] if the entry would take the running
    /// total above the budget; in both cases nothing is recorded.
    pub fn record(
        &self,
        model: &ModelName,
        usage: Usage,
        agent_name: Option<&AgentName>,
        task_id: Option<TaskId>,
    ) -> Result<CostEntry, HiveError> {
        let (prompt_tokens, completion_tokens) = usage.token_counts().ok_or_else(|| {
            HiveError::validation(format!(
                "token counts must be non-negative (prompt {}, completion {})",
                usage.prompt_tokens, usage.completion_tokens
            ))
        })?;
        let cost = self
            .prices
            .price_for(model)
            .cost(prompt_tokens, completion_tokens);

        let mut entries = self.lock();
        let accumulated = total_of(&entries) + cost;
        if let Some(limit) = self.budget {
            if limit.is_exceeded_by(accumulated) {
                warn!(
                    model = %model,
                    cost = %cost,
                    accumulated = %accumulated,
                    limit = %limit,
                    "Rejecting cost entry over budget"
                );
                return Err(HiveError::BudgetExceeded { accumulated, limit });
            }
        }

        let entry = CostEntry {
            timestamp: self.clock.now(),
            model: model.clone(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost,
            agent_name: agent_name.cloned(),
            task_id,
        };
        entries.push(entry.clone());
        debug!(
            model = %model,
            tokens = %entry.total_tokens,
            cost = %cost,
            "Recorded provider usage"
        );
        Ok(entry)
    }

    /// Pre-call check: fails once the ledger has reached the budget, so the
    /// caller can abort before issuing a provider call.
    pub fn ensure_budget_available(&self) -> Result<(), HiveError> {
        let Some(limit) = self.budget else {
            return Ok(());
        };
        let accumulated = self.current_cost();
        if limit.is_exhausted_by(accumulated) {
            return Err(HiveError::BudgetExceeded { accumulated, limit });
        }
        Ok(())
    }

    pub fn current_cost(&self) -> TokenCost {
        total_of(&self.lock())
    }

    /// Budget left, or `None` when no budget is configured.
    pub fn remaining_budget(&self) -> Option<TokenCost> {
        self.budget
            .map(|limit| limit.remaining_after(self.current_cost()))
    }

    /// Snapshot of the ledger in append order.
    pub fn entries(&self) -> Vec<CostEntry> {
        self.lock().clone()
    }

    /// Empties the ledger.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Aggregates recomputed from the full ledger.
    pub fn get_summary(&self) -> CostSummary {
        let entries = self.lock();
        let mut summary = CostSummary::default();
        for entry in entries.iter() {
            summary.total_cost += entry.cost;
            summary.total_tokens += entry.total_tokens;
            summary.total_requests += 1;
            *summary
                .cost_by_model
                .entry(entry.model.to_string())
                .or_default() += entry.cost;
            if let Some(agent) = &entry.agent_name {
                *summary
                    .cost_by_agent
                    .entry(agent.to_string())
                    .or_default() += entry.cost;
            }
        }
        summary
    }

    /// Plain-text report with a fixed section and field order.
    pub fn get_report(&self) -> String {
        let summary = self.get_summary();
        let mut out = String::new();
        let _ = writeln!(out, "Cost Report");
        let _ = writeln!(out, "===========");
        let _ = writeln!(out, "Total cost:     {}", summary.total_cost);
        let _ = writeln!(out, "Total tokens:   {}", summary.total_tokens);
        let _ = writeln!(out, "Total requests: {}", summary.total_requests);
        match self.budget {
            Some(limit) => {
                let _ = writeln!(
                    out,
                    "Budget:         {} (remaining {})",
                    limit,
                    limit.remaining_after(summary.total_cost)
                );
            }
            None => {
                let _ = writeln!(out, "Budget:         none");
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "By model:");
        for (model, cost) in &summary.cost_by_model {
            let _ = writeln!(out, "  {model:<32} {cost}");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "By agent:");
        for (agent, cost) in &summary.cost_by_agent {
            let _ = writeln!(out, "  {agent:<32} {cost}");
        }
        out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CostEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn total_of(entries: &[CostEntry]) -> TokenCost {
    entries.iter().map(|e| e.cost).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::SystemClock;

    fn model(name: &str) -> ModelName {
        ModelName::new(name).unwrap()
    }

    fn tracker(budget: Option<f64>) -> CostTracker {
        let prices = PriceTable::empty(FALLBACK_PRICE)
            .with_price("unit", ModelPrice::new(1.0, 2.0))
            .with_price("cheap", ModelPrice::new(0.001, 0.002));
        CostTracker::new(
            prices,
            budget.and_then(CostBudget::new),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn test_price_calculation_per_1k() {
        let price = ModelPrice::new(10.0, 20.0);
        let cost = price.cost(TokenCount::new(1_000), TokenCount::new(1_000));
        assert!((cost.as_f64() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let table = PriceTable::with_defaults();
        assert!(table.contains("gpt-4o-mini"));
        assert_eq!(table.price_for(&model("mystery-model")), FALLBACK_PRICE);
    }

    #[test]
    fn test_record_appends_entry_with_totals() {
        let tracker = tracker(None);
        let agent = AgentName::new("researcher").unwrap();
        let task = TaskId::new_random();
        let entry = tracker
            .record(&model("unit"), Usage::new(500, 250), Some(&agent), Some(task))
            .unwrap();
        assert_eq!(entry.total_tokens.as_u64(), 750);
        assert!((entry.cost.as_f64() - 1.0).abs() < 1e-9);
        assert_eq!(entry.agent_name, Some(agent));
        assert_eq!(entry.task_id, Some(task));
        assert_eq!(tracker.entries().len(), 1);
    }

    #[test]
    fn test_negative_tokens_rejected() {
        let tracker = tracker(None);
        let err = tracker
            .record(&model("unit"), Usage::new(-5, 10), None, None)
            .unwrap_err();
        assert!(matches!(err, HiveError::Validation { .. }));
        assert!(tracker.entries().is_empty());
    }

    #[test]
    fn test_budget_rejects_without_partial_charge() {
        let tracker = tracker(Some(1.0));
        tracker
            .record(&model("unit"), Usage::new(600, 0), None, None)
            .unwrap();
        let before = tracker.current_cost();

        let err = tracker
            .record(&model("unit"), Usage::new(500, 0), None, None)
            .unwrap_err();
        match err {
            HiveError::BudgetExceeded { accumulated, limit } => {
                assert!((accumulated.as_f64() - 1.1).abs() < 1e-9);
                assert_eq!(limit.as_f64(), 1.0);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tracker.current_cost(), before);
        assert_eq!(tracker.entries().len(), 1);

        // Spending exactly up to the ceiling is allowed, after which the
        // pre-call check refuses further work.
        tracker
            .record(&model("unit"), Usage::new(400, 0), None, None)
            .unwrap();
        assert!(tracker.ensure_budget_available().is_err());
        assert_eq!(tracker.remaining_budget(), Some(TokenCost::zero()));
    }

    #[test]
    fn test_budget_can_be_spent_to_the_cent() {
        let tracker = CostTracker::new(
            PriceTable::empty(FALLBACK_PRICE).with_price("dime", ModelPrice::new(0.1, 0.0)),
            CostBudget::new(0.3),
            Arc::new(SystemClock),
        );
        for _ in 0..3 {
            tracker.ensure_budget_available().unwrap();
            tracker
                .record(&model("dime"), Usage::new(1_000, 0), None, None)
                .unwrap();
        }
        assert_eq!(tracker.entries().len(), 3);
        assert!(tracker.ensure_budget_available().is_err());
        assert!(matches!(
            tracker.record(&model("dime"), Usage::new(1_000, 0), None, None),
            Err(HiveError::BudgetExceeded { .. })
        ));
        assert_eq!(tracker.entries().len(), 3);
    }

    #[test]
    fn test_summary_groups_by_model_and_agent() {
        let tracker = tracker(None);
        let a = AgentName::new("alpha").unwrap();
        let b = AgentName::new("beta").unwrap();
        tracker
            .record(&model("unit"), Usage::new(1_000, 0), Some(&a), None)
            .unwrap();
        tracker
            .record(&model("cheap"), Usage::new(1_000, 1_000), Some(&b), None)
            .unwrap();
        tracker
            .record(&model("cheap"), Usage::new(1_000, 0), None, None)
            .unwrap();

        let summary = tracker.get_summary();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.total_tokens.as_u64(), 4_000);
        assert!((summary.total_cost.as_f64() - 1.004).abs() < 1e-9);
        assert!((summary.cost_by_model["cheap"].as_f64() - 0.004).abs() < 1e-9);
        assert_eq!(summary.cost_by_agent.len(), 2);
        assert!((summary.cost_by_agent["alpha"].as_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_is_deterministic() {
        let tracker = tracker(Some(5.0));
        let z = AgentName::new("zeta").unwrap();
        let a = AgentName::new("alpha").unwrap();
        tracker
            .record(&model("unit"), Usage::new(100, 0), Some(&z), None)
            .unwrap();
        tracker
            .record(&model("cheap"), Usage::new(100, 0), Some(&a), None)
            .unwrap();

        let report = tracker.get_report();
        assert_eq!(report, tracker.get_report());
        assert!(report.starts_with("Cost Report\n"));
        let alpha = report.find("alpha").unwrap();
        let zeta = report.find("zeta").unwrap();
        assert!(alpha < zeta);
        assert!(report.contains("Total requests: 2"));
        assert!(report.contains("Budget:         $5.000000"));
    }

    #[test]
    fn test_reset_clears_ledger() {
        let tracker = tracker(Some(1.0));
        tracker
            .record(&model("unit"), Usage::new(900, 0), None, None)
            .unwrap();
        tracker.reset();
        assert_eq!(tracker.current_cost(), TokenCost::zero());
        assert!(tracker.ensure_budget_available().is_ok());
    }
}
