// src/core/types.rs — Core domain types

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::budget::{estimate_tokens, BudgetCeiling, BudgetState};
use super::trace::RunTrace;
use crate::infra::config::{Config, RunConfig, SubCallConfig};
use crate::provider::Message;
use crate::sandbox::{ExecutionErrorKind, SandboxLimits};

/// Name of the variable generated code binds to finish a run.
pub const FINAL_ANSWER: &str = "final_answer";

/// Ordered turns of one orchestrator run. Append-only.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.turns.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The turns plus one transient instruction that is not kept.
    pub fn with_instruction(&self, instruction: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.extend(self.turns.iter().cloned());
        messages.push(Message::user(instruction));
        messages
    }

    pub fn estimate_tokens(&self) -> u64 {
        self.turns
            .iter()
            .map(|m| u64::from(estimate_tokens(&m.content)))
            .sum()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.turns
    }
}

/// Per-run knobs supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunOptions {
    pub max_iterations: u32,
    pub budget: BudgetCeiling,
    /// How many more levels of sub-calls this run may start.
    pub recursion_depth: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for RunOptions {
    fn from(run: &RunConfig) -> Self {
        Self {
            max_iterations: run.max_iterations,
            budget: BudgetCeiling::from(run),
            recursion_depth: run.recursion_depth,
        }
    }
}

/// Settings shared by a run and every sub-call it starts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
    pub provider_timeout: Duration,
    pub input_price_override: Option<f64>,
    pub output_price_override: Option<f64>,
    pub sandbox: SandboxLimits,
    /// Execution output kept in each feedback turn.
    pub max_output_chars: usize,
    /// Contexts up to this size are bound verbatim as `context`.
    pub inline_context_chars: usize,
    pub sub_call: SubCallConfig,
}

impl EngineConfig {
    pub fn new(model: impl Into<String>, config: &Config) -> Self {
        Self {
            model: model.into(),
            max_output_tokens: config.model.max_output_tokens,
            temperature: config.model.temperature,
            provider_timeout: Duration::from_secs(config.model.timeout_seconds),
            input_price_override: config.model.input_price_per_mtok,
            output_price_override: config.model.output_price_per_mtok,
            sandbox: SandboxLimits::from(&config.sandbox),
            max_output_chars: config.sandbox.max_output_chars,
            inline_context_chars: config.sandbox.inline_context_chars,
            sub_call: config.sub_call.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    /// `final_answer` bound by executed code.
    Variable,
    /// `FINAL_VAR(name)` in the completion.
    VariableMarker,
    /// `FINAL(text)` in the completion.
    Literal,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
    pub iterations: u32,
    pub budget: BudgetState,
    pub trace: RunTrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    IterationsExhausted,
    BudgetExhausted,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::IterationsExhausted => write!(f, "iterations_exhausted"),
            FailureReason::BudgetExhausted => write!(f, "budget_exhausted"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,
    pub iterations: u32,
    pub budget: BudgetState,
    pub trace: RunTrace,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Answer(Answer),
    Failure(Failure),
}

impl RunOutcome {
    pub fn answer(&self) -> Option<&Answer> {
        match self {
            RunOutcome::Answer(a) => Some(a),
            RunOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RunOutcome::Answer(_) => None,
            RunOutcome::Failure(f) => Some(f),
        }
    }

    pub fn iterations(&self) -> u32 {
        match self {
            RunOutcome::Answer(a) => a.iterations,
            RunOutcome::Failure(f) => f.iterations,
        }
    }

    pub fn budget(&self) -> &BudgetState {
        match self {
            RunOutcome::Answer(a) => &a.budget,
            RunOutcome::Failure(f) => &f.budget,
        }
    }

    pub fn trace(&self) -> &RunTrace {
        match self {
            RunOutcome::Answer(a) => &a.trace,
            RunOutcome::Failure(f) => &f.trace,
        }
    }

    pub fn into_trace(self) -> RunTrace {
        match self {
            RunOutcome::Answer(a) => a.trace,
            RunOutcome::Failure(f) => f.trace,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RunOutcome::Answer(_) => "answer".into(),
            RunOutcome::Failure(f) => f.reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress events (for real-time CLI feedback)
// ---------------------------------------------------------------------------

/// Events emitted by the root orchestrator at key lifecycle transitions.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RunStart {
        run_id: String,
        max_iterations: u32,
        recursion_depth: u32,
    },
    IterationStart {
        iteration: u32,
        max_iterations: u32,
    },
    Completion {
        iteration: u32,
        fragments: usize,
        has_marker: bool,
        output_tokens: u32,
    },
    FragmentExecuted {
        iteration: u32,
        index: usize,
        error: Option<ExecutionErrorKind>,
        duration_ms: u64,
    },
    IterationEnd {
        iteration: u32,
        total_tokens: u64,
        cost_so_far: f64,
    },
    Complete {
        outcome: String,
        iterations: u32,
        total_tokens: u64,
        cost: f64,
    },
}
