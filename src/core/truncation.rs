// src/core/truncation.rs — Execution output truncation
//
// Keeps sandbox feedback from blowing up the conversation. The head and the
// tail of long output are kept; the middle is replaced by a note.

/// Result of a truncation operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TruncationResult {
    /// The (possibly truncated) content.
    pub content: String,
    pub was_truncated: bool,
    /// Original size in characters.
    pub original_chars: usize,
}

/// Truncate `content` to about `max_chars` characters.
///
/// Two thirds of the budget go to the head, the rest to the tail.
pub fn truncate_output(content: &str, max_chars: usize) -> TruncationResult {
    let original_chars = content.chars().count();
    if original_chars <= max_chars {
        return TruncationResult {
            content: content.to_string(),
            was_truncated: false,
            original_chars,
        };
    }

    let head_chars = max_chars * 2 / 3;
    let tail_chars = max_chars - head_chars;
    let head: String = content.chars().take(head_chars).collect();
    let tail: String = content
        .chars()
        .skip(original_chars - tail_chars)
        .collect();
    let omitted = original_chars - head_chars - tail_chars;

    TruncationResult {
        content: format!(
            "{head}\n[... {omitted} of {original_chars} chars omitted ...]\n{tail}"
        ),
        was_truncated: true,
        original_chars,
    }
}
