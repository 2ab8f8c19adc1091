//! Shared value types for the Hive execution domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. costs are finite and non-negative,
//! token counts are non-negative integers) and participate in domain
//! computations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Token and cost types
// ---------------------------------------------------------------------------

/// Number of tokens consumed in an LLM API call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenCount(u64);

impl TokenCount {
    /// Creates a [`TokenCount`] from a raw integer.
    pub fn new(count: u64) -> Self {
        Self(count)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if this count is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for TokenCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for TokenCount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for TokenCount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

// ---------------------------------------------------------------------------

/// Token usage as reported by a provider for one completion.
///
/// Counts are signed because they arrive from outside the process; negative
/// values are representable here so they can be rejected during cost
/// recording instead of silently wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the request (system prompt + messages).
    pub prompt_tokens: i64,
    /// Tokens generated by the model.
    pub completion_tokens: i64,
}

impl Usage {
    /// Creates a [`Usage`] from raw provider counts.
    pub fn new(prompt_tokens: i64, completion_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Returns the validated `(prompt, completion)` counts, or `None` if
    /// either count is negative.
    pub fn token_counts(self) -> Option<(TokenCount, TokenCount)> {
        let prompt = u64::try_from(self.prompt_tokens).ok()?;
        let completion = u64::try_from(self.completion_tokens).ok()?;
        Some((TokenCount::new(prompt), TokenCount::new(completion)))
    }
}

// ---------------------------------------------------------------------------

/// Monetary cost of LLM token usage, expressed in US dollars.
///
/// Used for per-call, per-agent, and per-run cost tracking. Arithmetic
/// operations are provided; callers are responsible for rounding to suitable
/// display precision.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TokenCost(f64);

impl TokenCost {
    /// Creates a [`TokenCost`] from a raw float value (USD).
    ///
    /// Returns `None` if `value` is negative, infinite, or NaN.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a [`TokenCost`] of exactly zero.
    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Returns the underlying `f64` value (USD).
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Returns `true` if this cost is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }
}

impl Default for TokenCost {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for TokenCost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.6}", self.0)
    }
}

impl std::ops::Add for TokenCost {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for TokenCost {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for TokenCost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, c| acc + c)
    }
}

// ---------------------------------------------------------------------------

/// Slack (USD) for binary rounding when summed decimal prices are compared
/// against a budget.
const BUDGET_TOLERANCE: f64 = 1e-9;

/// Maximum total token cost permitted for one cost ledger.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct CostBudget(f64);

impl CostBudget {
    /// Creates a [`CostBudget`] cap (USD).
    ///
    /// Returns `None` if `limit` is not strictly positive, infinite, or NaN.
    #[must_use]
    pub fn new(limit: f64) -> Option<Self> {
        if limit.is_finite() && limit > 0.0 {
            Some(Self(limit))
        } else {
            None
        }
    }

    /// Returns the budget limit as a `f64` (USD).
    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// Returns `true` if `accumulated` is strictly above this budget.
    ///
    /// Spending exactly up to the limit is allowed, including totals that
    /// only overshoot it by float rounding (`0.1 + 0.1 + 0.1` against `0.3`).
    pub fn is_exceeded_by(self, accumulated: TokenCost) -> bool {
        accumulated.as_f64() > self.0 + BUDGET_TOLERANCE
    }

    /// Returns `true` if `accumulated` has reached the limit, leaving nothing
    /// to spend on further calls.
    pub fn is_exhausted_by(self, accumulated: TokenCost) -> bool {
        accumulated.as_f64() >= self.0 - BUDGET_TOLERANCE
    }

    /// Returns the amount left before the limit is reached (never negative).
    pub fn remaining_after(self, accumulated: TokenCost) -> TokenCost {
        let remaining = self.0 - accumulated.as_f64();
        if remaining <= BUDGET_TOLERANCE {
            TokenCost::zero()
        } else {
            TokenCost(remaining)
        }
    }
}

impl std::fmt::Display for CostBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.6}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns this timestamp shifted forward by `delta`, saturating at the
    /// maximum representable time.
    pub fn plus(self, delta: std::time::Duration) -> Self {
        chrono::Duration::from_std(delta)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Returns the later of `self` and `other`.
    pub fn max(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_usage_rejects_negative_counts() {
        assert!(Usage::new(-1, 10).token_counts().is_none());
        assert!(Usage::new(10, -1).token_counts().is_none());

        let (prompt, completion) = Usage::new(12, 30).token_counts().unwrap();
        assert_eq!(prompt.as_u64(), 12);
        assert_eq!(completion.as_u64(), 30);
    }

    #[test]
    fn test_budget_allows_spending_exactly_the_limit() {
        let budget = CostBudget::new(1.0).unwrap();
        assert!(!budget.is_exceeded_by(TokenCost::new(1.0).unwrap()));
        assert!(budget.is_exhausted_by(TokenCost::new(1.0).unwrap()));
        assert!(budget.is_exceeded_by(TokenCost::new(1.000_001).unwrap()));
        assert_eq!(
            budget.remaining_after(TokenCost::new(1.5).unwrap()),
            TokenCost::zero()
        );
    }

    #[test]
    fn test_budget_ignores_rounding_in_summed_prices() {
        let budget = CostBudget::new(0.3).unwrap();
        let dime = TokenCost::new(0.1).unwrap();
        let spent: TokenCost = [dime, dime, dime].into_iter().sum();
        assert!(spent.as_f64() > 0.3);
        assert!(!budget.is_exceeded_by(spent));
        assert!(budget.is_exhausted_by(spent));
        assert_eq!(budget.remaining_after(spent), TokenCost::zero());
        assert!(budget.is_exceeded_by(spent + dime));
        assert!(!budget.is_exhausted_by(dime + dime));
    }

    #[test]
    fn test_budget_rejects_non_positive_limits() {
        assert!(CostBudget::new(0.0).is_none());
        assert!(CostBudget::new(-3.0).is_none());
        assert!(CostBudget::new(f64::NAN).is_none());
    }

    #[test]
    fn test_timestamp_plus_moves_forward() {
        let start = Timestamp::now();
        let later = start.plus(Duration::from_secs(5));
        assert!(later > start);
        assert_eq!(start.max(later), later);
        assert_eq!(later.max(start), later);
    }
}
