// tests/orchestrator_test.rs — Integration test: orchestrator loop with scripted providers

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rlm::core::budget::BudgetCeiling;
use rlm::core::orchestrator::Orchestrator;
use rlm::core::types::*;
use rlm::infra::config::Config;
use rlm::infra::errors::RlmError;
use rlm::provider::scripted::ScriptedProvider;
use rlm::provider::*;
use rlm::sandbox::Context;

fn engine() -> EngineConfig {
    EngineConfig::new("scripted", &Config::default())
}

fn options(max_iterations: u32) -> RunOptions {
    RunOptions {
        max_iterations,
        budget: BudgetCeiling::unlimited(),
        recursion_depth: 0,
    }
}

fn orchestrator(provider: &Arc<ScriptedProvider>, max_iterations: u32) -> Orchestrator {
    Orchestrator::new(provider.clone(), engine(), options(max_iterations))
}

fn rhai(code: &str) -> String {
    format!("```rhai\n{code}\n```")
}

#[tokio::test]
async fn test_json_value_answered_in_two_iterations() {
    let provider = Arc::new(ScriptedProvider::new([
        format!("Let me look.\n{}", rhai("let v = context[\"value\"];\nprint(v);")),
        rhai("final_answer = v.to_string();"),
    ]));

    let outcome = orchestrator(&provider, 10)
        .run(serde_json::json!({"value": 42}), "What is the value?")
        .await
        .unwrap();

    let answer = outcome.answer().expect("answer");
    assert_eq!(answer.text, "42");
    assert_eq!(answer.source, AnswerSource::Variable);
    assert_eq!(answer.iterations, 2);
    assert_eq!(provider.calls(), 2);
    assert_eq!(answer.budget.provider_calls, 2);

    // the printed value reached the model on the second request
    let second = &provider.requests()[1];
    assert!(second
        .messages
        .iter()
        .any(|m| m.role == Role::Tool && m.content.contains("output:\n42")));
}

#[tokio::test]
async fn test_iterations_exhausted_without_code() {
    let provider = Arc::new(ScriptedProvider::new(["Let me think about it."]));

    let outcome = orchestrator(&provider, 1)
        .run("some text", "Summarise")
        .await
        .unwrap();

    let failure = outcome.failure().expect("failure");
    assert_eq!(failure.reason, FailureReason::IterationsExhausted);
    assert_eq!(failure.iterations, 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        failure.trace.iterations[0].notes,
        vec!["no code and no answer marker".to_string()]
    );
}

#[tokio::test]
async fn test_token_ceiling_stops_before_any_call() {
    let provider = Arc::new(ScriptedProvider::new(["FINAL(never)"]));
    let run = RunOptions {
        budget: BudgetCeiling::tokens(10),
        ..options(5)
    };

    let outcome = Orchestrator::new(provider.clone(), engine(), run)
        .run("text", "q")
        .await
        .unwrap();

    let failure = outcome.failure().expect("failure");
    assert_eq!(failure.reason, FailureReason::BudgetExhausted);
    assert_eq!(failure.iterations, 0);
    assert!(failure.message.contains("allowed"), "{}", failure.message);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_cost_ceiling_uses_pricing() {
    let provider = Arc::new(ScriptedProvider::new(["FINAL(never)"]).with_price(1_000.0, 1_000.0));
    let run = RunOptions {
        budget: BudgetCeiling::new(None, Some(0.001)),
        ..options(5)
    };

    let outcome = Orchestrator::new(provider.clone(), engine(), run)
        .run("text", "q")
        .await
        .unwrap();

    assert_eq!(
        outcome.failure().map(|f| f.reason),
        Some(FailureReason::BudgetExhausted)
    );
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_budget_runs_out_mid_run() {
    // Each call reports 3,000 tokens and projects 1,000 output tokens, so the
    // ceiling fits the first call only.
    let provider = Arc::new(
        ScriptedProvider::new([rhai("let a = 1;")]).with_usage(TokenUsage::new(2_000, 1_000)),
    );
    let mut config = engine();
    config.max_output_tokens = 1_000;
    let run = RunOptions {
        budget: BudgetCeiling::tokens(4_000),
        ..options(5)
    };

    let outcome = Orchestrator::new(provider.clone(), config, run)
        .run("text", "q")
        .await
        .unwrap();

    let failure = outcome.failure().expect("failure");
    assert_eq!(failure.reason, FailureReason::BudgetExhausted);
    assert_eq!(failure.iterations, 1);
    assert_eq!(failure.budget.total_tokens(), 3_000);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_namespace_persists_across_iterations() {
    let provider = Arc::new(ScriptedProvider::new([
        rhai("let a = 20;"),
        rhai("let b = a + 22;\nprint(b);"),
        "I have it.\nFINAL_VAR(b)".to_string(),
    ]));

    let outcome = orchestrator(&provider, 5).run("ctx", "q").await.unwrap();

    let answer = outcome.answer().expect("answer");
    assert_eq!(answer.text, "42");
    assert_eq!(answer.source, AnswerSource::VariableMarker);
    assert_eq!(answer.iterations, 3);
}

#[tokio::test]
async fn test_code_bound_answer_beats_literal_marker() {
    let provider = Arc::new(ScriptedProvider::new([format!(
        "{}\nFINAL(from marker)",
        rhai("final_answer = \"from code\";")
    )]));

    let outcome = orchestrator(&provider, 3).run("ctx", "q").await.unwrap();

    let answer = outcome.answer().expect("answer");
    assert_eq!(answer.text, "from code");
    assert_eq!(answer.source, AnswerSource::Variable);
    assert_eq!(answer.iterations, 1);
}

#[tokio::test]
async fn test_literal_marker_answers() {
    let provider = Arc::new(ScriptedProvider::new(["The answer:\nFINAL(Paris (France))"]));

    let outcome = orchestrator(&provider, 3).run("ctx", "q").await.unwrap();

    let answer = outcome.answer().expect("answer");
    assert_eq!(answer.text, "Paris (France)");
    assert_eq!(answer.source, AnswerSource::Literal);
}

#[tokio::test]
async fn test_execution_error_is_fed_back() {
    let provider = Arc::new(ScriptedProvider::new([
        rhai("print(\"partial\");\nlet y = missing_var + 1;"),
        "FINAL(recovered)".to_string(),
    ]));

    let outcome = orchestrator(&provider, 3).run("ctx", "q").await.unwrap();
    assert_eq!(outcome.answer().map(|a| a.text.as_str()), Some("recovered"));

    let feedback: Vec<String> = provider.requests()[1]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0].contains("runtime error"), "{}", feedback[0]);
    assert!(feedback[0].contains("partial"), "{}", feedback[0]);

    let fragment = &outcome.trace().iterations[0].fragments[0];
    assert!(fragment.result.error.is_some());
}

#[tokio::test]
async fn test_missing_final_var_is_not_terminal() {
    let provider = Arc::new(ScriptedProvider::new(["FINAL_VAR(nothing)", "FINAL(ok)"]));

    let outcome = orchestrator(&provider, 3).run("ctx", "q").await.unwrap();

    assert_eq!(outcome.answer().map(|a| a.text.as_str()), Some("ok"));
    assert_eq!(outcome.iterations(), 2);
    let second = &provider.requests()[1];
    assert!(second
        .messages
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("FINAL_VAR(nothing) was ignored")));
}

#[tokio::test]
async fn test_instruction_turn_is_transient() {
    let provider = Arc::new(ScriptedProvider::new([rhai("let a = 1;"), "FINAL(done)".into()]));

    orchestrator(&provider, 3).run("ctx", "q").await.unwrap();

    let requests = provider.requests();
    let first = requests[0].messages.last().unwrap();
    assert_eq!(first.role, Role::User);
    assert!(first.content.starts_with("Iteration 1 of 3"));

    let second = &requests[1].messages;
    assert!(second.last().unwrap().content.starts_with("Iteration 2 of 3"));
    assert!(!second.iter().any(|m| m.content.starts_with("Iteration 1 of 3")));
    assert_eq!(requests[0].messages[0].role, Role::System);
}

#[tokio::test]
async fn test_large_context_uses_accessors() {
    let provider = Arc::new(ScriptedProvider::new([rhai(
        "let head = context_slice(0, 5);\nfinal_answer = head + \"/\" + context_len();",
    )]));
    let mut config = engine();
    config.inline_context_chars = 3;

    let outcome = Orchestrator::new(provider.clone(), config, options(2))
        .run(Context::from("hello world"), "q")
        .await
        .unwrap();

    assert_eq!(outcome.answer().map(|a| a.text.as_str()), Some("hello/11"));
    let system = &provider.requests()[0].messages[0].content;
    assert!(system.contains("too large to bind verbatim"));
}

#[tokio::test]
async fn test_provider_error_aborts_run() {
    let provider = Arc::new(ScriptedProvider::new(["FINAL(x)"]));
    provider.fail_next("boom", false);

    let result = orchestrator(&provider, 3).run("ctx", "q").await;
    match result {
        Err(RlmError::Provider { message, .. }) => assert_eq!(message, "boom"),
        other => panic!("expected provider error, got {other:?}"),
    }
}

/// A provider that never answers in time.
struct SlowProvider;

#[async_trait]
impl CompletionProvider for SlowProvider {
    fn id(&self) -> &str {
        "slow"
    }

    fn name(&self) -> &str {
        "Slow Provider"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![]
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, RlmError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Completion {
            text: "FINAL(late)".into(),
            usage: TokenUsage::default(),
            stop_reason: StopReason::EndTurn,
        })
    }
}

#[tokio::test]
async fn test_provider_timeout() {
    let mut config = engine();
    config.provider_timeout = Duration::from_millis(50);

    let result = Orchestrator::new(Arc::new(SlowProvider), config, options(2))
        .run("ctx", "q")
        .await;

    assert!(matches!(result, Err(RlmError::ProviderTimeout { ref provider, .. }) if provider == "slow"));
}

#[tokio::test]
async fn test_progress_events_and_trace() {
    let provider = Arc::new(ScriptedProvider::new([rhai("print(query);"), "FINAL(done)".into()]));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let outcome = orchestrator(&provider, 3)
        .with_progress(move |e| sink.lock().unwrap().push(e))
        .run("ctx", "the query")
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(ProgressEvent::RunStart { .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Complete { outcome, iterations: 2, .. }) if outcome == "answer"
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::FragmentExecuted { error: None, .. })));

    let trace = outcome.trace();
    assert_eq!(trace.iterations.len(), 2);
    assert_eq!(trace.iterations[0].fragments[0].result.output, "the query\n");
    assert!(trace.finished_at.is_some());
    let json: serde_json::Value = serde_json::from_str(&trace.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["query"], "the query");
    assert_eq!(json["iterations"][1]["marker"]["kind"], "literal");
}
