// src/cli/progress.rs — Terminal progress renderer for real-time run feedback

use crate::core::types::ProgressEvent;

/// One line of progress text for `event`.
pub fn format_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::RunStart {
            run_id,
            max_iterations,
            recursion_depth,
        } => format!(
            "[run] {} | up to {} iteration(s), sub-call depth {}",
            short_id(run_id),
            max_iterations,
            recursion_depth,
        ),
        ProgressEvent::IterationStart {
            iteration,
            max_iterations,
        } => format!("[iter {}/{}] asking model...", iteration, max_iterations),
        ProgressEvent::Completion {
            iteration,
            fragments,
            has_marker,
            output_tokens,
        } => {
            let marker = if *has_marker { ", answer marker" } else { "" };
            format!(
                "[iter {}]   {} block(s){} ({} tokens out)",
                iteration, fragments, marker, output_tokens,
            )
        }
        ProgressEvent::FragmentExecuted {
            iteration,
            index,
            error,
            duration_ms,
        } => match error {
            None => format!("[iter {}]   block {} ok ({}ms)", iteration, index + 1, duration_ms),
            Some(kind) => format!(
                "[iter {}]   block {} {} ({}ms)",
                iteration,
                index + 1,
                kind,
                duration_ms,
            ),
        },
        ProgressEvent::IterationEnd {
            iteration,
            total_tokens,
            cost_so_far,
        } => format!(
            "[iter {}] no answer yet | {} tokens (${:.4})",
            iteration, total_tokens, cost_so_far,
        ),
        ProgressEvent::Complete {
            outcome,
            iterations,
            total_tokens,
            cost,
        } => format!(
            "[done] {} iterations={} tokens={} cost=${:.4}",
            outcome, iterations, total_tokens, cost,
        ),
    }
}

fn short_id(run_id: &str) -> &str {
    crate::util::truncate_str(run_id, 8)
}

/// Build a progress callback that writes formatted output to stderr.
///
/// All progress output goes to stderr so stdout only carries the answer.
/// Returns a closure suitable for `Orchestrator::with_progress()`.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + 'static {
    move |event| eprintln!("{}", format_event(&event))
}
