// src/core/dispatcher.rs — Recursive sub-calls behind `llm_query`
//
// Each call that passes the depth, size, allowance and budget checks runs a
// fresh orchestrator one level down and returns its answer as a string.
// Refusals and failures are strings too; nothing raises into the script.
// Answered calls are cached per (query, data) for the life of the dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::budget::{BudgetCeiling, BudgetState};
use super::orchestrator::Orchestrator;
use super::trace::{SubCallOutcome, SubCallRecord};
use super::types::{EngineConfig, RunOptions, RunOutcome};
use crate::provider::CompletionProvider;
use crate::sandbox::{Context, ContextLoader, Delegate};
use crate::util::one_line;

/// Prompts up to this many characters are passed to the child verbatim as its query.
const INLINE_QUERY_CHARS: usize = 4_000;

const PREVIEW_CHARS: usize = 200;

pub struct SubCallDispatcher {
    provider: Arc<dyn CompletionProvider>,
    config: EngineConfig,
    loader: Arc<dyn ContextLoader>,
    /// Nesting level of the run that owns this dispatcher.
    level: u32,
    depth_remaining: u32,
    ceiling: BudgetCeiling,
    budget: Arc<Mutex<BudgetState>>,
    calls: AtomicU32,
    iteration: AtomicU32,
    records: Mutex<Vec<SubCallRecord>>,
    answers: Mutex<HashMap<(String, Option<String>), String>>,
    cache_hits: AtomicU32,
}

impl SubCallDispatcher {
    /// `budget` is the owning run's live state; children are charged to it.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        config: EngineConfig,
        loader: Arc<dyn ContextLoader>,
        level: u32,
        depth_remaining: u32,
        ceiling: BudgetCeiling,
        budget: Arc<Mutex<BudgetState>>,
    ) -> Self {
        Self {
            provider,
            config,
            loader,
            level,
            depth_remaining,
            ceiling,
            budget,
            calls: AtomicU32::new(0),
            iteration: AtomicU32::new(0),
            records: Mutex::new(Vec::new()),
            answers: Mutex::new(HashMap::new()),
            cache_hits: AtomicU32::new(0),
        }
    }

    /// Tag subsequent records with the owning run's iteration.
    pub fn set_iteration(&self, iteration: u32) {
        self.iteration.store(iteration, Ordering::SeqCst);
    }

    /// Sub-calls actually started (refusals excluded).
    pub fn calls_made(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls answered from the cache without running a child.
    pub fn cache_hits(&self) -> u32 {
        self.cache_hits.load(Ordering::SeqCst)
    }

    /// Drain the records collected since the last call.
    pub fn take_records(&self) -> Vec<SubCallRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn cached(&self, query: &str, data: Option<&str>) -> Option<String> {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(query.to_string(), data.map(str::to_string)))
            .cloned()
    }

    fn remember(&self, query: &str, data: Option<&str>, answer: &str) {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((query.to_string(), data.map(str::to_string)), answer.to_string());
    }

    fn lock_budget(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, query: &str, prompt_chars: usize, outcome: SubCallOutcome, child: Option<RunOutcome>) {
        let record = SubCallRecord {
            iteration: self.iteration.load(Ordering::SeqCst),
            depth: self.level + 1,
            prompt_preview: one_line(query, PREVIEW_CHARS),
            prompt_chars,
            outcome,
            child: child.map(|c| Box::new(c.into_trace())),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    fn deny(&self, query: &str, prompt_chars: usize, reason: String) -> String {
        tracing::info!(level = self.level, prompt_chars, "Sub-call denied: {}", reason);
        let text = format!("[llm_query denied] {reason}");
        self.record(query, prompt_chars, SubCallOutcome::Denied { reason }, None);
        text
    }

    /// Check every limit, then run the child. Returns text for the script.
    pub async fn dispatch(&self, query: &str, data: Option<&str>) -> String {
        let prompt_chars = query.chars().count() + data.map_or(0, |d| d.chars().count());

        if let Some(answer) = self.cached(query, data) {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(level = self.level, prompt_chars, "Sub-call answered from cache");
            self.record(
                query,
                prompt_chars,
                SubCallOutcome::Cached {
                    answer: one_line(&answer, PREVIEW_CHARS),
                },
                None,
            );
            return answer;
        }

        if self.depth_remaining == 0 {
            return self.deny(
                query,
                prompt_chars,
                "recursion depth exhausted; answer with the sandbox alone".into(),
            );
        }
        if prompt_chars > self.config.sub_call.max_prompt_chars {
            return self.deny(
                query,
                prompt_chars,
                format!(
                    "prompt is {} chars, limit is {}; pass a smaller chunk",
                    prompt_chars, self.config.sub_call.max_prompt_chars
                ),
            );
        }
        let allowance = self.config.sub_call.max_calls_per_run;
        if self.calls_made() >= allowance {
            return self.deny(
                query,
                prompt_chars,
                format!("all {allowance} sub-calls for this run are used"),
            );
        }

        let child_ceiling = {
            let state = self.lock_budget();
            if self.ceiling.is_exhausted(&state) {
                drop(state);
                return self.deny(query, prompt_chars, "budget exhausted".into());
            }
            self.ceiling
                .remaining(&state)
                .scaled(self.config.sub_call.budget_fraction)
        };
        if child_ceiling.is_exhausted(&BudgetState::default()) {
            return self.deny(
                query,
                prompt_chars,
                "remaining budget is too small for a sub-call".into(),
            );
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        let (context, child_query) = child_inputs(query, data);
        let options = RunOptions {
            max_iterations: self.config.sub_call.max_iterations,
            budget: child_ceiling,
            recursion_depth: self.depth_remaining - 1,
        };

        tracing::info!(
            level = self.level + 1,
            prompt_chars,
            max_iterations = options.max_iterations,
            "Starting sub-call"
        );

        let child = Orchestrator::new(self.provider.clone(), self.config.clone(), options)
            .with_loader(self.loader.clone())
            .at_level(self.level + 1);

        match child.run(context, &child_query).await {
            Ok(outcome) => {
                self.lock_budget().absorb_child(outcome.budget());
                let (text, summary) = match &outcome {
                    RunOutcome::Answer(a) => {
                        self.remember(query, data, &a.text);
                        (
                            a.text.clone(),
                            SubCallOutcome::Answered {
                                answer: one_line(&a.text, PREVIEW_CHARS),
                            },
                        )
                    }
                    RunOutcome::Failure(f) => (
                        format!("[llm_query failed] {}: {}", f.reason, f.message),
                        SubCallOutcome::Failed {
                            reason: f.reason.to_string(),
                        },
                    ),
                };
                tracing::info!(level = self.level + 1, outcome = summary.label(), "Sub-call finished");
                self.record(query, prompt_chars, summary, Some(outcome));
                text
            }
            Err(e) => {
                tracing::warn!(level = self.level + 1, "Sub-call error: {}", e);
                self.lock_budget().sub_calls += 1;
                self.record(
                    query,
                    prompt_chars,
                    SubCallOutcome::Error {
                        message: e.to_string(),
                    },
                    None,
                );
                format!("[llm_query error] {e}")
            }
        }
    }
}

impl Delegate for SubCallDispatcher {
    /// Called from a sandbox worker thread; blocks it on the nested run.
    fn delegate(&self, query: &str, data: Option<&str>) -> String {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.dispatch(query, data)),
            Err(_) => "[llm_query error] no async runtime".to_string(),
        }
    }
}

/// Context and query for a child run.
///
/// With `data` the child reads `data` as its context. Without it, the prompt
/// itself is the context, and long prompts are replaced by a pointer to it.
fn child_inputs(query: &str, data: Option<&str>) -> (Context, String) {
    match data {
        Some(data) => (Context::from(data), query.to_string()),
        None if query.chars().count() <= INLINE_QUERY_CHARS => {
            (Context::from(query), query.to_string())
        }
        None => (
            Context::from(query),
            "The task is in `context`. Read it and carry it out.".to_string(),
        ),
    }
}
