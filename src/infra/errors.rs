// src/infra/errors.rs — Error types for rlm

use thiserror::Error;

/// Errors that abort a run or a CLI command.
///
/// Script failures, exhausted budgets and refused sub-calls are not errors:
/// they are values fed back to the model or returned as a `Failure` outcome.
#[derive(Error, Debug)]
pub enum RlmError {
    // Provider errors (some retriable)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Provider '{provider}' did not answer within {timeout_secs}s")]
    ProviderTimeout { provider: String, timeout_secs: u64 },

    // User errors
    #[error("No provider configured. Set ANTHROPIC_API_KEY or OPENAI_API_KEY, or pass --scripted.")]
    NoProvider,

    #[error("Context error: {0}")]
    Context(String),

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RlmError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RlmError::Provider {
                retriable: true,
                ..
            } | RlmError::RateLimited { .. }
                | RlmError::ProviderTimeout { .. }
        )
    }

    /// Short label used in traces and in strings handed back to scripts.
    pub fn kind(&self) -> &'static str {
        match self {
            RlmError::Provider { .. } => "provider",
            RlmError::RateLimited { .. } => "rate_limited",
            RlmError::ProviderTimeout { .. } => "provider_timeout",
            RlmError::NoProvider => "no_provider",
            RlmError::Context(_) => "context",
            RlmError::Config(_) => "config",
            RlmError::Io(_) => "io",
            RlmError::Json(_) => "json",
            RlmError::Other(_) => "other",
        }
    }
}
