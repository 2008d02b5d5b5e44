// src/core/budget.rs — Token and cost budget for a run and its sub-calls

use serde::{Deserialize, Serialize};

use crate::infra::config::RunConfig;
use crate::provider::TokenUsage;

/// Rough token estimate: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as f32 / 4.0).ceil() as u32
}

/// Running counters for one orchestrator run, children folded in.
///
/// Every field only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub iterations: u32,
    pub provider_calls: u32,
    pub sub_calls: u32,
    /// Deepest nesting entered below this run (0 = never delegated).
    pub max_depth_reached: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl BudgetState {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn record_call(&mut self, usage: &TokenUsage, cost_usd: f64) {
        self.provider_calls += 1;
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
        self.cost_usd += cost_usd;
    }

    /// Fold a finished child run into this one. Child iterations stay with the child.
    pub fn absorb_child(&mut self, child: &BudgetState) {
        self.provider_calls += child.provider_calls;
        self.sub_calls += child.sub_calls + 1;
        self.max_depth_reached = self.max_depth_reached.max(child.max_depth_reached + 1);
        self.input_tokens += child.input_tokens;
        self.output_tokens += child.output_tokens;
        self.cost_usd += child.cost_usd;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} iteration(s), {} call(s) ({} sub-call(s)), {} tokens, ${:.4}",
            self.iterations,
            self.provider_calls,
            self.sub_calls,
            self.total_tokens(),
            self.cost_usd
        )
    }
}

/// Upper bounds on consumption. `None` means unbounded on that axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetCeiling {
    pub max_tokens: Option<u64>,
    pub max_cost_usd: Option<f64>,
}

impl BudgetCeiling {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn new(max_tokens: Option<u64>, max_cost_usd: Option<f64>) -> Self {
        Self {
            max_tokens,
            max_cost_usd,
        }
    }

    pub fn tokens(max_tokens: u64) -> Self {
        Self::new(Some(max_tokens), None)
    }

    /// Would a call projected at `tokens` / `cost` stay within the ceiling?
    pub fn allows(&self, state: &BudgetState, tokens: u64, cost: f64) -> bool {
        let tokens_ok = self
            .max_tokens
            .map_or(true, |max| state.total_tokens() + tokens <= max);
        let cost_ok = self
            .max_cost_usd
            .map_or(true, |max| state.cost_usd + cost <= max);
        tokens_ok && cost_ok
    }

    pub fn is_exhausted(&self, state: &BudgetState) -> bool {
        self.max_tokens
            .is_some_and(|max| state.total_tokens() >= max)
            || self.max_cost_usd.is_some_and(|max| state.cost_usd >= max)
    }

    /// What is left after `state` has been spent.
    pub fn remaining(&self, state: &BudgetState) -> BudgetCeiling {
        BudgetCeiling {
            max_tokens: self
                .max_tokens
                .map(|max| max.saturating_sub(state.total_tokens())),
            max_cost_usd: self
                .max_cost_usd
                .map(|max| (max - state.cost_usd).max(0.0)),
        }
    }

    pub fn scaled(&self, fraction: f64) -> BudgetCeiling {
        BudgetCeiling {
            max_tokens: self
                .max_tokens
                .map(|max| (max as f64 * fraction).floor() as u64),
            max_cost_usd: self.max_cost_usd.map(|max| max * fraction),
        }
    }

    /// Human-readable explanation of why a projected call does not fit.
    pub fn explain_overrun(&self, state: &BudgetState, tokens: u64, cost: f64) -> String {
        let mut parts = Vec::new();
        if let Some(max) = self.max_tokens {
            if state.total_tokens() + tokens > max {
                parts.push(format!(
                    "tokens: {} spent + ~{} projected > {} allowed",
                    state.total_tokens(),
                    tokens,
                    max
                ));
            }
        }
        if let Some(max) = self.max_cost_usd {
            if state.cost_usd + cost > max {
                parts.push(format!(
                    "cost: ${:.4} spent + ~${:.4} projected > ${:.4} allowed",
                    state.cost_usd, cost, max
                ));
            }
        }
        if parts.is_empty() {
            "budget exhausted".into()
        } else {
            parts.join("; ")
        }
    }
}

impl From<&RunConfig> for BudgetCeiling {
    fn from(run: &RunConfig) -> Self {
        Self::new(run.max_tokens, run.max_cost_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spent(tokens_in: u32, tokens_out: u32, cost: f64) -> BudgetState {
        let mut s = BudgetState::default();
        s.record_call(&TokenUsage::new(tokens_in, tokens_out), cost);
        s
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_record_call() {
        let s = spent(100, 50, 0.01);
        assert_eq!(s.provider_calls, 1);
        assert_eq!(s.total_tokens(), 150);
        assert!((s.cost_usd - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_absorb_child() {
        let mut parent = spent(100, 50, 0.01);
        let mut child = spent(40, 10, 0.002);
        child.sub_calls = 2;
        child.max_depth_reached = 1;
        child.iterations = 3;

        parent.absorb_child(&child);
        assert_eq!(parent.provider_calls, 2);
        assert_eq!(parent.sub_calls, 3);
        assert_eq!(parent.max_depth_reached, 2);
        assert_eq!(parent.total_tokens(), 200);
        assert_eq!(parent.iterations, 0);
    }

    #[test]
    fn test_unlimited_allows_everything() {
        let c = BudgetCeiling::unlimited();
        assert!(c.allows(&spent(u32::MAX, u32::MAX, 1e9), u64::MAX / 4, 1e9));
        assert!(!c.is_exhausted(&spent(1, 1, 1.0)));
    }

    #[test]
    fn test_allows_and_exhausted() {
        let c = BudgetCeiling::new(Some(1_000), Some(0.10));
        let s = spent(600, 100, 0.05);
        assert!(c.allows(&s, 300, 0.05));
        assert!(!c.allows(&s, 301, 0.0));
        assert!(!c.allows(&s, 0, 0.051));
        assert!(!c.is_exhausted(&s));
        assert!(c.is_exhausted(&spent(1_000, 0, 0.0)));
    }

    #[test]
    fn test_remaining_and_scaled() {
        let c = BudgetCeiling::new(Some(1_000), Some(1.0));
        let r = c.remaining(&spent(300, 100, 0.4));
        assert_eq!(r.max_tokens, Some(600));
        assert!((r.max_cost_usd.unwrap() - 0.6).abs() < 1e-9);

        let half = r.scaled(0.5);
        assert_eq!(half.max_tokens, Some(300));
        assert!((half.max_cost_usd.unwrap() - 0.3).abs() < 1e-9);

        // overspent clamps to zero
        let over = c.remaining(&spent(2_000, 0, 5.0));
        assert_eq!(over.max_tokens, Some(0));
        assert_eq!(over.max_cost_usd, Some(0.0));
        assert!(over.is_exhausted(&BudgetState::default()));
    }

    #[test]
    fn test_explain_overrun() {
        let c = BudgetCeiling::tokens(10);
        let msg = c.explain_overrun(&BudgetState::default(), 500, 0.0);
        assert!(msg.contains("500 projected > 10 allowed"), "{msg}");
    }

    #[test]
    fn test_from_run_config() {
        let c = BudgetCeiling::from(&RunConfig::default());
        assert_eq!(c.max_tokens, Some(1_000_000));
        assert_eq!(c.max_cost_usd, Some(0.50));
    }
}
