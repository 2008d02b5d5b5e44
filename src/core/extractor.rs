// src/core/extractor.rs — Pull executable fragments and final-answer markers out of a completion

use serde::{Deserialize, Serialize};

/// Fence languages that mark a block as sandbox code.
pub const EXECUTABLE_LANGUAGES: &[&str] = &["repl", "rhai"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub language: String,
    pub code: String,
    /// 1-based line of the opening fence in the completion.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FinalMarker {
    /// `FINAL_VAR(name)`: the answer is the value bound to `name`.
    Variable(String),
    /// `FINAL(text)`: the answer is the literal text.
    Literal(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub fragments: Vec<Fragment>,
    pub marker: Option<FinalMarker>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.marker.is_none()
    }
}

enum Section<'a> {
    Prose,
    Code {
        language: String,
        open: usize,
        body: Vec<&'a str>,
    },
    OtherFence,
}

/// Split a completion into sandbox fragments (in order) and the first
/// final-answer marker found outside executable fences.
///
/// Pure: same text, same result. Unterminated fences are never executed.
pub fn extract(text: &str) -> Extraction {
    let lines: Vec<&str> = text.lines().collect();
    let mut extraction = Extraction::default();
    let mut section = Section::Prose;
    // Set after a `FINAL(` with no `)` before the next fence; no marker can
    // parse again until that fence.
    let mut literal_unclosed = false;

    for (i, &line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        section = match section {
            Section::Prose => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    literal_unclosed = false;
                    let language = info.trim().to_ascii_lowercase();
                    if EXECUTABLE_LANGUAGES.contains(&language.as_str()) {
                        Section::Code {
                            language,
                            open: i + 1,
                            body: Vec::new(),
                        }
                    } else {
                        Section::OtherFence
                    }
                } else {
                    if extraction.marker.is_none() && !literal_unclosed {
                        extraction.marker = parse_marker(&lines[i..]);
                        literal_unclosed = extraction.marker.is_none()
                            && trimmed.starts_with("FINAL(");
                    }
                    Section::Prose
                }
            }
            Section::Code {
                language,
                open,
                mut body,
            } => {
                if trimmed == "```" {
                    extraction.fragments.push(Fragment {
                        language,
                        code: body.join("\n"),
                        line: open,
                    });
                    Section::Prose
                } else {
                    body.push(line);
                    Section::Code {
                        language,
                        open,
                        body,
                    }
                }
            }
            Section::OtherFence => {
                if trimmed == "```" {
                    Section::Prose
                } else {
                    Section::OtherFence
                }
            }
        };
    }

    if let Section::Code { open, .. } = section {
        tracing::debug!(line = open, "Ignoring unterminated code fence");
    }

    extraction
}

/// Recognize a marker at the start of `lines[0]`.
///
/// `FINAL(...)` ends at the `)` that balances its opening paren, which may sit
/// on a later line. When the parens never balance before the next fence, the
/// last `)` in that span closes it.
fn parse_marker(lines: &[&str]) -> Option<FinalMarker> {
    let first = lines.first()?.trim_start();

    if let Some(rest) = first.strip_prefix("FINAL_VAR(") {
        let name = rest.split(')').next()?;
        let name = name.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_alphanumeric() || c == '_')
            && rest.contains(')');
        return valid.then(|| FinalMarker::Variable(name.to_string()));
    }

    let rest = first.strip_prefix("FINAL(")?;
    let mut span = String::new();
    let mut depth = 1usize;
    let following = lines[1..]
        .iter()
        .take_while(|line| !line.trim_start().starts_with("```"));

    for (n, line) in std::iter::once(&rest).chain(following).enumerate() {
        if n > 0 {
            span.push('\n');
        }
        for c in line.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(FinalMarker::Literal(span.trim().to_string()));
                    }
                }
                _ => {}
            }
            span.push(c);
        }
    }

    let close = span.rfind(')')?;
    Some(FinalMarker::Literal(span[..close].trim().to_string()))
}
