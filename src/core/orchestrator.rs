// src/core/orchestrator.rs — Iteration controller

use std::sync::{Arc, Mutex, PoisonError};

use super::budget::BudgetState;
use super::cost::Pricing;
use super::dispatcher::SubCallDispatcher;
use super::extractor::{extract, FinalMarker};
use super::system_prompt::{self, PromptInputs};
use super::trace::{FragmentRecord, IterationRecord, RunTrace};
use super::types::*;
use crate::infra::errors::RlmError;
use crate::provider::{CompletionProvider, CompletionRequest, Message};
use crate::sandbox::{
    Capabilities, Context, ContextLoader, DefaultLoader, Namespace, Sandbox, Value,
};

/// Drives one query-answering loop: ask the model, run its code, feed the
/// results back, until an answer appears or a limit is hit.
///
/// `run` consumes the orchestrator, so each instance owns exactly one
/// conversation and one namespace. Sub-calls build new instances.
pub struct Orchestrator {
    provider: Arc<dyn CompletionProvider>,
    config: EngineConfig,
    options: RunOptions,
    loader: Arc<dyn ContextLoader>,
    /// Nesting level: 0 for the root run.
    level: u32,
    /// Optional callback for real-time progress events.
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send>>,
}

enum Resolution {
    Answer(String, AnswerSource),
    MissingVariable(String),
    EmptyLiteral,
    Pending,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: EngineConfig, options: RunOptions) -> Self {
        let loader = Arc::new(DefaultLoader::new(config.inline_context_chars));
        Self {
            provider,
            config,
            options,
            loader,
            level: 0,
            on_progress: None,
        }
    }

    /// Replace the context loader (also used for sub-calls).
    pub fn with_loader(mut self, loader: Arc<dyn ContextLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub(crate) fn at_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Fire a progress event if a callback is set.
    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    /// Run the loop for `query` over `context`.
    ///
    /// Only provider failures are `Err`. Running out of iterations or budget
    /// is a `RunOutcome::Failure`.
    pub async fn run(self, context: impl Into<Context>, query: &str) -> Result<RunOutcome, RlmError> {
        let context = context.into();
        let loaded = self.loader.load(&context)?;
        let max_iterations = self.options.max_iterations;
        let pricing = Pricing::resolve(
            &self.config.model,
            &self.provider.models(),
            self.config.input_price_override,
            self.config.output_price_override,
        );

        let budget = Arc::new(Mutex::new(BudgetState::default()));
        let dispatcher = Arc::new(SubCallDispatcher::new(
            self.provider.clone(),
            self.config.clone(),
            self.loader.clone(),
            self.level,
            self.options.recursion_depth,
            self.options.budget,
            budget.clone(),
        ));

        let mut sandbox = Sandbox::new(
            self.config.sandbox.clone(),
            Capabilities {
                context: Some(loaded.clone()),
                delegate: Some(dispatcher.clone()),
            },
        );
        sandbox.bind_constant("query", Value::from(query));
        sandbox.namespace_mut().set(FINAL_ANSWER, Value::Unit);

        let mut history = ConversationHistory::new();
        history.push(Message::system(system_prompt::build_system_prompt(&PromptInputs {
            context_description: &loaded.description,
            max_iterations,
            depth_remaining: self.options.recursion_depth,
            sub_calls_allowed: self.config.sub_call.max_calls_per_run,
            max_output_chars: self.config.max_output_chars,
            sandbox_timeout_ms: self.config.sandbox.timeout.as_millis() as u64,
        })));
        history.push(Message::user(system_prompt::format_query(query)));

        let mut trace = RunTrace::new(self.level, query);
        tracing::info!(
            level = self.level,
            run_id = %trace.run_id,
            max_iterations,
            recursion_depth = self.options.recursion_depth,
            context = context.kind(),
            "Run started"
        );
        self.emit(ProgressEvent::RunStart {
            run_id: trace.run_id.clone(),
            max_iterations,
            recursion_depth: self.options.recursion_depth,
        });

        for iteration in 1..=max_iterations {
            let instruction = system_prompt::iteration_instruction(iteration, max_iterations);

            // Budget check before the call, on a projection of its size.
            let projected_input =
                history.estimate_tokens() + u64::from(super::budget::estimate_tokens(&instruction));
            let projected_output = u64::from(self.config.max_output_tokens);
            let projected_cost = pricing.projected(projected_input, projected_output);
            {
                let state = lock(&budget);
                if !self
                    .options
                    .budget
                    .allows(&state, projected_input + projected_output, projected_cost)
                {
                    let message = self.options.budget.explain_overrun(
                        &state,
                        projected_input + projected_output,
                        projected_cost,
                    );
                    let spent = state.clone();
                    drop(state);
                    return Ok(self.fail(
                        FailureReason::BudgetExhausted,
                        message,
                        spent,
                        trace,
                        history,
                    ));
                }
            }

            lock(&budget).iterations = iteration;
            dispatcher.set_iteration(iteration);
            self.emit(ProgressEvent::IterationStart {
                iteration,
                max_iterations,
            });

            let request = CompletionRequest {
                model: self.config.model.clone(),
                messages: history.with_instruction(&instruction),
                max_tokens: Some(self.config.max_output_tokens),
                temperature: self.config.temperature,
            };
            let completion =
                match tokio::time::timeout(self.config.provider_timeout, self.provider.complete(request)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(RlmError::ProviderTimeout {
                            provider: self.provider.id().to_string(),
                            timeout_secs: self.config.provider_timeout.as_secs(),
                        })
                    }
                };

            let cost = pricing.cost(&completion.usage);
            lock(&budget).record_call(&completion.usage, cost);

            let extraction = extract(&completion.text);
            tracing::debug!(
                level = self.level,
                iteration,
                fragments = extraction.fragments.len(),
                marker = extraction.marker.is_some(),
                tokens = completion.usage.total(),
                "Completion received"
            );
            self.emit(ProgressEvent::Completion {
                iteration,
                fragments: extraction.fragments.len(),
                has_marker: extraction.marker.is_some(),
                output_tokens: completion.usage.output_tokens,
            });

            history.push(Message::assistant(completion.text.clone()));
            let mut record = IterationRecord::new(iteration, &completion.text, completion.usage.clone(), cost);
            record.marker = extraction.marker.clone();

            let total = extraction.fragments.len();
            for (index, fragment) in extraction.fragments.into_iter().enumerate() {
                let result = sandbox.execute(&fragment.code).await;
                history.push(Message::tool_result(system_prompt::format_execution_feedback(
                    index,
                    total,
                    &result,
                    self.config.max_output_chars,
                )));
                self.emit(ProgressEvent::FragmentExecuted {
                    iteration,
                    index,
                    error: result.error.as_ref().map(|e| e.kind),
                    duration_ms: result.duration_ms,
                });
                record.fragments.push(FragmentRecord {
                    line: fragment.line,
                    code: fragment.code,
                    result,
                });
            }
            trace.sub_calls.extend(dispatcher.take_records());

            match resolve(sandbox.namespace(), extraction.marker.as_ref()) {
                Resolution::Answer(text, source) => {
                    trace.iterations.push(record);
                    let spent = lock(&budget).clone();
                    return Ok(self.succeed(text, source, spent, trace, history));
                }
                Resolution::MissingVariable(name) => {
                    record
                        .notes
                        .push(format!("FINAL_VAR({name}) ignored: variable unset or empty"));
                    history.push(Message::user(system_prompt::missing_variable_feedback(&name)));
                }
                Resolution::EmptyLiteral => {
                    record.notes.push("FINAL() ignored: empty answer".into());
                }
                Resolution::Pending => {
                    if total == 0 {
                        record.notes.push("no code and no answer marker".into());
                    }
                }
            }
            trace.iterations.push(record);

            let spent = lock(&budget).clone();
            self.emit(ProgressEvent::IterationEnd {
                iteration,
                total_tokens: spent.total_tokens(),
                cost_so_far: spent.cost_usd,
            });
        }

        let spent = lock(&budget).clone();
        let message = format!("no answer after {max_iterations} iteration(s)");
        Ok(self.fail(FailureReason::IterationsExhausted, message, spent, trace, history))
    }

    fn succeed(
        &self,
        text: String,
        source: AnswerSource,
        budget: BudgetState,
        mut trace: RunTrace,
        history: ConversationHistory,
    ) -> RunOutcome {
        trace.finish(history.into_messages());
        tracing::info!(
            level = self.level,
            iterations = budget.iterations,
            tokens = budget.total_tokens(),
            source = ?source,
            "Run answered"
        );
        self.emit(ProgressEvent::Complete {
            outcome: "answer".into(),
            iterations: budget.iterations,
            total_tokens: budget.total_tokens(),
            cost: budget.cost_usd,
        });
        RunOutcome::Answer(Answer {
            text,
            source,
            iterations: budget.iterations,
            budget,
            trace,
        })
    }

    fn fail(
        &self,
        reason: FailureReason,
        message: String,
        budget: BudgetState,
        mut trace: RunTrace,
        history: ConversationHistory,
    ) -> RunOutcome {
        trace.finish(history.into_messages());
        tracing::info!(
            level = self.level,
            iterations = budget.iterations,
            tokens = budget.total_tokens(),
            %reason,
            "Run failed: {}",
            message
        );
        self.emit(ProgressEvent::Complete {
            outcome: reason.to_string(),
            iterations: budget.iterations,
            total_tokens: budget.total_tokens(),
            cost: budget.cost_usd,
        });
        RunOutcome::Failure(Failure {
            reason,
            message,
            iterations: budget.iterations,
            budget,
            trace,
        })
    }
}

fn lock(budget: &Mutex<BudgetState>) -> std::sync::MutexGuard<'_, BudgetState> {
    budget.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Code-bound `final_answer` first, then `FINAL_VAR`, then `FINAL`.
fn resolve(namespace: &Namespace, marker: Option<&FinalMarker>) -> Resolution {
    if let Some(text) = namespace.text(FINAL_ANSWER) {
        return Resolution::Answer(text, AnswerSource::Variable);
    }
    match marker {
        Some(FinalMarker::Variable(name)) => match namespace.text(name) {
            Some(text) => Resolution::Answer(text, AnswerSource::VariableMarker),
            None => Resolution::MissingVariable(name.clone()),
        },
        Some(FinalMarker::Literal(text)) if text.trim().is_empty() => Resolution::EmptyLiteral,
        Some(FinalMarker::Literal(text)) => Resolution::Answer(text.clone(), AnswerSource::Literal),
        None => Resolution::Pending,
    }
}
