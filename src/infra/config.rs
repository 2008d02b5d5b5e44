// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub sub_call: SubCallConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `provider/model`, or a bare model id resolved against available keys.
    pub name: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout_seconds: u64,
    /// Retries on transient provider errors (rate limits, 5xx).
    pub max_retries: u32,
    /// Overrides the catalog price (USD per million input tokens).
    pub input_price_per_mtok: Option<f64>,
    /// Overrides the catalog price (USD per million output tokens).
    pub output_price_per_mtok: Option<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_output_tokens: 4096,
            temperature: None,
            timeout_seconds: 300,
            max_retries: 4,
            input_price_per_mtok: None,
            output_price_per_mtok: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_iterations: u32,
    pub recursion_depth: u32,
    /// Total tokens (input + output) the root run may consume, children included.
    pub max_tokens: Option<u64>,
    pub max_cost_usd: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            recursion_depth: 1,
            max_tokens: Some(1_000_000),
            max_cost_usd: Some(0.50),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub timeout_ms: u64,
    pub max_operations: u64,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_call_levels: usize,
    /// Captured print output kept per execution.
    pub max_capture_bytes: usize,
    /// Output characters echoed back to the model per execution.
    pub max_output_chars: usize,
    /// Contexts up to this size are bound verbatim as `context`.
    pub inline_context_chars: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_operations: 50_000_000,
            max_string_size: 16 * 1024 * 1024,
            max_array_size: 100_000,
            max_map_size: 100_000,
            max_call_levels: 64,
            max_capture_bytes: 1024 * 1024,
            max_output_chars: 20_000,
            inline_context_chars: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubCallConfig {
    pub max_prompt_chars: usize,
    pub max_iterations: u32,
    pub max_calls_per_run: u32,
    /// Share of the parent's remaining budget handed to each child.
    pub budget_fraction: f64,
}

impl Default for SubCallConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: 500_000,
            max_iterations: 6,
            max_calls_per_run: 16,
            budget_fraction: 0.5,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a run unbounded or meaningless.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run.max_iterations == 0 {
            anyhow::bail!("run.max_iterations must be at least 1");
        }
        if self.sub_call.max_iterations == 0 {
            anyhow::bail!("sub_call.max_iterations must be at least 1");
        }
        if !(self.sub_call.budget_fraction > 0.0 && self.sub_call.budget_fraction <= 1.0) {
            anyhow::bail!(
                "sub_call.budget_fraction must be in (0, 1], got {}",
                self.sub_call.budget_fraction
            );
        }
        if self.sandbox.timeout_ms == 0 {
            anyhow::bail!("sandbox.timeout_ms must be positive");
        }
        Ok(())
    }
}
