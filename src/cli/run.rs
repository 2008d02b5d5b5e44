// src/cli/run.rs — Default command: answer a query over a context

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use super::Cli;
use crate::core::orchestrator::Orchestrator;
use crate::core::trace::RunTrace;
use crate::core::types::{EngineConfig, RunOptions, RunOutcome};
use crate::infra::config::Config;
use crate::infra::paths;
use crate::provider::scripted::ScriptedProvider;
use crate::provider::retry::RetryPolicy;
use crate::provider::{resolver, CompletionProvider, ModelRef};
use crate::sandbox::Context;

/// Run the query from the command line. Returns `false` when the run ended
/// without an answer.
pub async fn run_query(cli: &Cli, mut config: Config) -> anyhow::Result<bool> {
    let query = cli.query.join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("no query given. Usage: rlm [--context FILE] QUERY...");
    }

    apply_overrides(&mut config, cli);
    config.validate()?;

    let context = load_context(cli.context.as_deref())?;

    let (provider, model_ref): (Arc<dyn CompletionProvider>, ModelRef) = match cli.scripted {
        Some(ref path) => {
            let scripted = ScriptedProvider::from_file(Path::new(path))?;
            (Arc::new(scripted), ModelRef::new("scripted", "scripted"))
        }
        None => {
            let providers = resolver::discover_providers();
            let requested = cli.model.as_deref().or(config.model.name.as_deref());
            resolver::resolve(
                &providers,
                requested,
                RetryPolicy::new(
                    config.model.max_retries,
                    Duration::from_secs(config.model.timeout_seconds),
                ),
            )?
        }
    };
    tracing::debug!("Using model {}", model_ref);

    let engine = EngineConfig::new(model_ref.model.clone(), &config);
    let options = RunOptions::from(&config.run);

    let mut orchestrator = Orchestrator::new(provider, engine, options);
    if !cli.quiet {
        orchestrator = orchestrator.with_progress(super::progress::terminal_progress());
        eprintln!(
            "[rlm] {} | model: {} | context: {}",
            crate::util::one_line(&query, 60),
            model_ref,
            context.kind(),
        );
    }

    let outcome = orchestrator.run(context, &query).await?;

    if let Some(ref requested) = cli.trace {
        let path = write_trace(outcome.trace(), requested)?;
        if !cli.quiet {
            eprintln!("[trace] {}", path.display());
        }
    }

    match outcome {
        RunOutcome::Answer(answer) => {
            println!("{}", answer.text);
            if !cli.quiet {
                eprintln!("[usage] {}", answer.budget.summary());
            }
            Ok(true)
        }
        RunOutcome::Failure(failure) => {
            eprintln!("no answer ({}): {}", failure.reason, failure.message);
            if !cli.quiet {
                eprintln!("[usage] {}", failure.budget.summary());
            }
            Ok(false)
        }
    }
}

/// Command-line flags win over the config file.
pub fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(n) = cli.max_iterations {
        config.run.max_iterations = n;
    }
    if let Some(depth) = cli.depth {
        config.run.recursion_depth = depth;
    }
    if let Some(tokens) = cli.max_tokens {
        config.run.max_tokens = Some(tokens);
    }
    if let Some(cost) = cli.max_cost {
        config.run.max_cost_usd = Some(cost);
    }
}

/// `None` is an empty context, `-` reads stdin, anything else is a file.
pub fn load_context(arg: Option<&str>) -> anyhow::Result<Context> {
    match arg {
        None => Ok(Context::Text(String::new())),
        Some("-") => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("reading context from stdin")?;
            Ok(parse_stdin_context(input))
        }
        Some(path) => Ok(Context::from_path(Path::new(path))?),
    }
}

/// Stdin that parses as a JSON object or array is JSON; anything else is text.
fn parse_stdin_context(input: String) -> Context {
    let trimmed = input.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&input) {
            return Context::Json(value);
        }
    }
    Context::Text(input)
}

/// Write `trace` to `requested`, or under the traces directory when empty.
pub fn write_trace(trace: &RunTrace, requested: &str) -> anyhow::Result<PathBuf> {
    let path = if requested.is_empty() {
        paths::traces_dir().join(format!("{}.json", trace.run_id))
    } else {
        PathBuf::from(requested)
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(&path, trace.to_json_pretty()?)
        .with_context(|| format!("writing trace to {}", path.display()))?;
    Ok(path)
}
