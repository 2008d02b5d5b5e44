// src/core/trace.rs — Structured audit record of a run and its sub-calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::extractor::FinalMarker;
use crate::provider::{Message, TokenUsage};
use crate::sandbox::ExecutionResult;

/// Everything one orchestrator run did, with child runs nested inside the
/// sub-call that started them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTrace {
    pub run_id: String,
    /// Nesting level: 0 for the root run.
    pub depth: u32,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub iterations: Vec<IterationRecord>,
    pub sub_calls: Vec<SubCallRecord>,
    /// Conversation as it stood when the run ended.
    pub final_turns: Vec<Message>,
}

impl RunTrace {
    pub fn new(depth: u32, query: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            depth,
            query: query.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            iterations: Vec::new(),
            sub_calls: Vec::new(),
            final_turns: Vec::new(),
        }
    }

    pub fn finish(&mut self, final_turns: Vec<Message>) {
        self.finished_at = Some(Utc::now());
        self.final_turns = final_turns;
    }

    /// Sub-calls at every level below this run.
    pub fn total_sub_calls(&self) -> usize {
        self.sub_calls
            .iter()
            .map(|s| 1 + s.child.as_ref().map_or(0, |c| c.total_sub_calls()))
            .sum()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based.
    pub iteration: u32,
    pub completion: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub fragments: Vec<FragmentRecord>,
    pub marker: Option<FinalMarker>,
    pub notes: Vec<String>,
}

impl IterationRecord {
    pub fn new(iteration: u32, completion: &str, usage: TokenUsage, cost_usd: f64) -> Self {
        Self {
            iteration,
            completion: completion.to_string(),
            usage,
            cost_usd,
            fragments: Vec::new(),
            marker: None,
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentRecord {
    /// Line of the opening fence in the completion.
    pub line: usize,
    pub code: String,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubCallRecord {
    /// Parent iteration that issued the call.
    pub iteration: u32,
    /// Nesting level the child ran (or would have run) at.
    pub depth: u32,
    pub prompt_preview: String,
    pub prompt_chars: usize,
    pub outcome: SubCallOutcome,
    pub child: Option<Box<RunTrace>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubCallOutcome {
    Answered { answer: String },
    /// A repeat of an earlier answered call; no child ran.
    Cached { answer: String },
    Failed { reason: String },
    Denied { reason: String },
    Error { message: String },
}

impl SubCallOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SubCallOutcome::Answered { .. } => "answered",
            SubCallOutcome::Cached { .. } => "cached",
            SubCallOutcome::Failed { .. } => "failed",
            SubCallOutcome::Denied { .. } => "denied",
            SubCallOutcome::Error { .. } => "error",
        }
    }
}
