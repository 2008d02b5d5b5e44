// src/core/system_prompt.rs — System turn, per-iteration instructions and sandbox feedback

use super::truncation::truncate_output;
use super::types::FINAL_ANSWER;
use crate::sandbox::ExecutionResult;

/// What the model needs to know about its environment.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub context_description: &'a str,
    pub max_iterations: u32,
    /// Levels of `llm_query` still allowed below this run.
    pub depth_remaining: u32,
    pub sub_calls_allowed: u32,
    pub max_output_chars: usize,
    pub sandbox_timeout_ms: u64,
}

/// Build the system turn that opens every run.
///
/// Sections (in order):
///   1. Role
///   2. Sandbox: language, persistence, helpers
///   3. Context: shape and how to read it
///   4. Sub-calls: whether and how to delegate
///   5. Answer protocol
pub fn build_system_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str(
        "# Role\n\n\
         You answer a query about a context that is too large to read at once. \
         You work by writing code that runs in a sandbox, reading what it prints, \
         and repeating until you can answer.\n\n",
    );

    append_sandbox_section(&mut prompt, inputs);
    append_context_section(&mut prompt, inputs);
    append_sub_call_section(&mut prompt, inputs);
    append_answer_section(&mut prompt);

    prompt
}

// ─── Section builders ───────────────────────────────────────────────────────

fn append_sandbox_section(prompt: &mut String, inputs: &PromptInputs<'_>) {
    prompt.push_str("# Sandbox\n\n");
    prompt.push_str(
        "Write Rhai code in fenced blocks tagged `rhai` (or `repl`). Every block \
         runs in order and variables and functions you define persist across \
         blocks and iterations. Use `print(...)` to see values: only printed \
         output comes back to you.\n\n",
    );
    prompt.push_str(&format!(
        "- Each block may run for at most {} ms.\n\
         - Printed output longer than {} characters is shortened.\n\
         - You have {} iteration(s) in total.\n\
         - Helpers: `chunk_text(text, size)`, `regex_find_all(text, pattern)`, \
         `parse_json(text)`, `to_json(value)`, `log(msg)`.\n\
         - There is no file, network or process access.\n\n",
        inputs.sandbox_timeout_ms, inputs.max_output_chars, inputs.max_iterations
    ));
}

fn append_context_section(prompt: &mut String, inputs: &PromptInputs<'_>) {
    prompt.push_str("# Context\n\n");
    prompt.push_str(inputs.context_description);
    prompt.push_str("\n\n");
    prompt.push_str(
        "The same description is in `context_info`. The query is in `query`. \
         Accessors over the full context text:\n\
         - `context_len()`, `context_line_count()`\n\
         - `context_slice(start, end)` (byte offsets), `context_lines(start, end)`\n\
         - `context_find(needle)` -> offsets, `context_grep(pattern)` -> [#{line, text}]\n\
         - `context_chunks(size)` -> array of strings\n\n",
    );
}

fn append_sub_call_section(prompt: &mut String, inputs: &PromptInputs<'_>) {
    prompt.push_str("# Sub-calls\n\n");
    if inputs.depth_remaining == 0 {
        prompt.push_str(
            "Sub-calls are not available at this level. Work with the sandbox only.\n\n",
        );
        return;
    }
    prompt.push_str(&format!(
        "`llm_query(prompt)` asks a fresh assistant with its own sandbox and returns \
         its answer as a string. `llm_query(question, data)` hands it `data` as its \
         context. `llm_batch([prompts])` asks several in turn. Use them to summarise \
         or search chunks you cannot read yourself.\n\
         - {} more level(s) of nesting allowed; at most {} sub-call(s) from this run.\n\
         - A refused or failed sub-call returns a string starting with `[llm_query`.\n\n",
        inputs.depth_remaining, inputs.sub_calls_allowed
    ));
}

fn append_answer_section(prompt: &mut String) {
    prompt.push_str("# Answer\n\n");
    prompt.push_str(&format!(
        "When you know the answer, finish in one of these ways:\n\
         - assign it in code: `{FINAL_ANSWER} = ...;` (preferred)\n\
         - write `FINAL_VAR(name)` on its own line to answer with a variable's value\n\
         - write `FINAL(your answer)` on its own line\n\
         If code sets `{FINAL_ANSWER}`, that value wins over any marker.\n"
    ));
}

/// First user turn.
pub fn format_query(query: &str) -> String {
    format!("Query: {query}")
}

/// Transient instruction appended to each request.
pub fn iteration_instruction(iteration: u32, max_iterations: u32) -> String {
    if iteration >= max_iterations {
        format!(
            "Iteration {iteration} of {max_iterations}: this is the last one. \
             Give your best answer now by setting `{FINAL_ANSWER}` or writing FINAL(...)."
        )
    } else if iteration == 1 {
        format!(
            "Iteration 1 of {max_iterations}. You have not looked at the context yet. \
             Start by exploring it with code; do not answer before you have seen it."
        )
    } else {
        format!(
            "Iteration {iteration} of {max_iterations}. Continue from what the sandbox \
             returned. Answer once you are sure."
        )
    }
}

/// Tool-result turn for one executed block.
pub fn format_execution_feedback(
    index: usize,
    total: usize,
    result: &ExecutionResult,
    max_chars: usize,
) -> String {
    let mut out = format!("[block {}/{}]", index + 1, total);

    match &result.error {
        None => out.push_str(" ok"),
        Some(e) => out.push_str(&format!(" {}: {}", e.kind, e.message)),
    }

    if !result.changed.is_empty() {
        out.push_str(&format!("\nvariables set: {}", result.changed.join(", ")));
    }

    if result.output.is_empty() {
        out.push_str("\n(no output)");
    } else {
        let truncated = truncate_output(result.output.trim_end(), max_chars);
        out.push_str("\noutput:\n");
        out.push_str(&truncated.content);
    }
    if result.output_truncated {
        out.push_str("\n[output capture limit reached; later prints were dropped]");
    }

    out
}

/// Feedback when `FINAL_VAR(name)` points at nothing usable.
pub fn missing_variable_feedback(name: &str) -> String {
    format!(
        "FINAL_VAR({name}) was ignored: `{name}` is not set or is empty. \
         Bind it in code first, or set `{FINAL_ANSWER}`."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecutionError, ExecutionErrorKind};

    fn inputs(depth_remaining: u32) -> PromptInputs<'static> {
        PromptInputs {
            context_description: "The context is text, 5 bytes, 1 lines.",
            max_iterations: 10,
            depth_remaining,
            sub_calls_allowed: 16,
            max_output_chars: 20_000,
            sandbox_timeout_ms: 30_000,
        }
    }

    #[test]
    fn test_system_prompt_sections() {
        let prompt = build_system_prompt(&inputs(1));
        assert!(prompt.contains("# Sandbox"));
        assert!(prompt.contains("The context is text, 5 bytes"));
        assert!(prompt.contains("llm_query(prompt)"));
        assert!(prompt.contains("1 more level(s)"));
        assert!(prompt.contains("FINAL_VAR(name)"));
    }

    #[test]
    fn test_system_prompt_without_sub_calls() {
        let prompt = build_system_prompt(&inputs(0));
        assert!(prompt.contains("not available at this level"));
        assert!(!prompt.contains("llm_batch"));
    }

    #[test]
    fn test_iteration_instruction_variants() {
        assert!(iteration_instruction(1, 5).contains("not looked at the context"));
        assert!(iteration_instruction(3, 5).contains("Iteration 3 of 5"));
        assert!(iteration_instruction(5, 5).contains("last one"));
        // a single-iteration run must answer straight away
        assert!(iteration_instruction(1, 1).contains("last one"));
    }

    #[test]
    fn test_feedback_ok() {
        let result = ExecutionResult {
            output: "42\n".into(),
            output_truncated: false,
            error: None,
            changed: vec!["v".into()],
            duration_ms: 1,
        };
        let text = format_execution_feedback(0, 2, &result, 100);
        assert_eq!(text, "[block 1/2] ok\nvariables set: v\noutput:\n42");
    }

    #[test]
    fn test_feedback_error_and_truncation() {
        let result = ExecutionResult {
            output: "x".repeat(500),
            output_truncated: true,
            error: Some(ExecutionError {
                kind: ExecutionErrorKind::Runtime,
                message: "Variable not found: y".into(),
            }),
            changed: vec![],
            duration_ms: 1,
        };
        let text = format_execution_feedback(1, 2, &result, 60);
        assert!(text.starts_with("[block 2/2] runtime error: Variable not found: y"));
        assert!(text.contains("chars omitted"));
        assert!(text.ends_with("later prints were dropped]"));
    }
}
