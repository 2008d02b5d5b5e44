// src/core/cost.rs — Per-model pricing

use serde::{Deserialize, Serialize};

use crate::provider::{ModelInfo, TokenUsage};

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Pricing {
    pub const FREE: Pricing = Pricing {
        input_per_mtok: 0.0,
        output_per_mtok: 0.0,
    };

    pub fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    /// Price for `model`: explicit overrides, then the provider's catalog, then
    /// the name heuristic.
    pub fn resolve(
        model: &str,
        catalog: &[ModelInfo],
        input_override: Option<f64>,
        output_override: Option<f64>,
    ) -> Self {
        let base = catalog
            .iter()
            .find(|m| m.id == model)
            .map(|m| Pricing::new(m.input_price_per_mtok, m.output_price_per_mtok))
            .unwrap_or_else(|| {
                let (i, o) = model_pricing(model);
                Pricing::new(i, o)
            });
        Pricing {
            input_per_mtok: input_override.unwrap_or(base.input_per_mtok),
            output_per_mtok: output_override.unwrap_or(base.output_per_mtok),
        }
    }

    /// Cost in USD of one call's usage.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let input_cost = (usage.input_tokens as f64 / 1_000_000.0) * self.input_per_mtok;
        let output_cost = (usage.output_tokens as f64 / 1_000_000.0) * self.output_per_mtok;

        // Cached tokens are cheaper (Anthropic)
        let cache_read_cost =
            (usage.cache_read_tokens as f64 / 1_000_000.0) * (self.input_per_mtok * 0.1);
        let cache_write_cost =
            (usage.cache_write_tokens as f64 / 1_000_000.0) * (self.input_per_mtok * 1.25);

        input_cost + output_cost + cache_read_cost + cache_write_cost
    }

    /// Cost of a call that has not happened yet.
    pub fn projected(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_mtok
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_mtok
    }
}

/// Returns (input_price_per_mtok, output_price_per_mtok).
pub fn model_pricing(model: &str) -> (f64, f64) {
    match model {
        // Anthropic
        m if m.contains("claude-opus") => (15.0, 75.0),
        m if m.contains("claude-sonnet") => (3.0, 15.0),
        m if m.contains("claude-haiku") || m.contains("haiku") => (0.8, 4.0),

        // OpenAI
        m if m.contains("gpt-4.1-mini") => (0.4, 1.6),
        m if m.contains("gpt-4.1") => (2.0, 8.0),
        m if m.contains("gpt-4o-mini") => (0.15, 0.6),
        m if m.contains("gpt-4o") => (2.5, 10.0),
        m if m.contains("o3-mini") || m.contains("o4-mini") => (1.1, 4.4),
        m if m.contains("o3") => (10.0, 40.0),

        // Local models (free)
        m if m.contains("llama")
            || m.contains("mistral")
            || m.contains("gemma")
            || m.contains("qwen")
            || m.contains("deepseek") =>
        {
            (0.0, 0.0)
        }

        // Default: assume moderate pricing
        _ => (1.0, 3.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u32, output: u32) -> TokenUsage {
        TokenUsage::new(input, output)
    }

    #[test]
    fn test_pricing_heuristics() {
        assert_eq!(model_pricing("claude-sonnet-4-20250514"), (3.0, 15.0));
        assert_eq!(model_pricing("gpt-4.1-mini"), (0.4, 1.6));
        assert_eq!(model_pricing("o3"), (10.0, 40.0));
        assert_eq!(model_pricing("llama3.3-70b"), (0.0, 0.0));
        assert_eq!(model_pricing("mystery-model"), (1.0, 3.0));
    }

    #[test]
    fn test_cost_basic() {
        let p = Pricing::new(3.0, 15.0);
        // 1M input × $3 + 100K output × $15 = $3 + $1.5
        let cost = p.cost(&usage(1_000_000, 100_000));
        assert!((cost - 4.5).abs() < 1e-9);
        assert_eq!(p.cost(&usage(0, 0)), 0.0);
    }

    #[test]
    fn test_cost_with_cache() {
        let u = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_read_tokens: 500_000,
            cache_write_tokens: 200_000,
        };
        let cost = Pricing::new(3.0, 15.0).cost(&u);
        let expected = 3.0 + 0.15 + 0.75;
        assert!((cost - expected).abs() < 0.001);
    }

    #[test]
    fn test_resolve_prefers_catalog_then_override() {
        let catalog = vec![ModelInfo {
            id: "house-model".into(),
            name: "House".into(),
            context_window: 8_000,
            max_output_tokens: 1_000,
            input_price_per_mtok: 7.0,
            output_price_per_mtok: 9.0,
        }];
        assert_eq!(
            Pricing::resolve("house-model", &catalog, None, None),
            Pricing::new(7.0, 9.0)
        );
        assert_eq!(
            Pricing::resolve("house-model", &catalog, None, Some(1.0)),
            Pricing::new(7.0, 1.0)
        );
        assert_eq!(
            Pricing::resolve("claude-opus-4", &[], None, None),
            Pricing::new(15.0, 75.0)
        );
    }

    #[test]
    fn test_projected() {
        let p = Pricing::new(2.0, 8.0);
        assert!((p.projected(500_000, 250_000) - 3.0).abs() < 1e-9);
        assert_eq!(Pricing::FREE.projected(10, 10), 0.0);
    }
}
