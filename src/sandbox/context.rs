// src/sandbox/context.rs — Context ingestion and read accessors
//
// The loader decides what lands in the namespace: small contexts are bound
// verbatim as `context`, large ones only through the accessor functions
// registered here. Offsets are byte offsets snapped to char boundaries.

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult};

use super::value::Value;
use crate::infra::errors::RlmError;
use crate::util::truncate_str;

/// Upper bound on results returned by search accessors.
const MAX_MATCHES: usize = 500;

/// The payload a run reasons over.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    Text(String),
    Json(serde_json::Value),
}

impl Context {
    /// Read a context file: `.json` parses as JSON, anything else is text.
    pub fn from_path(path: &Path) -> Result<Self, RlmError> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            let value = serde_json::from_str(&content)
                .map_err(|e| RlmError::Context(format!("{}: {}", path.display(), e)))?;
            Ok(Context::Json(value))
        } else {
            Ok(Context::Text(content))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Context::Text(_) => "text",
            Context::Json(_) => "json",
        }
    }

    /// Text form backing the accessors. JSON is pretty-printed.
    pub fn as_text(&self) -> String {
        match self {
            Context::Text(s) => s.clone(),
            Context::Json(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
        }
    }
}

impl From<&str> for Context {
    fn from(s: &str) -> Self {
        Context::Text(s.to_string())
    }
}

impl From<String> for Context {
    fn from(s: String) -> Self {
        Context::Text(s)
    }
}

impl From<serde_json::Value> for Context {
    fn from(v: serde_json::Value) -> Self {
        Context::Json(v)
    }
}

/// What a loader hands the sandbox.
#[derive(Debug, Clone)]
pub struct LoadedContext {
    /// Bound as constants, in order.
    pub bindings: Vec<(String, Value)>,
    /// One-paragraph description for the system turn and `context_info`.
    pub description: String,
    /// Backing text for the accessor functions.
    pub text: Arc<str>,
}

/// Ingestion seam: turns a raw context into namespace bindings.
pub trait ContextLoader: Send + Sync {
    fn load(&self, context: &Context) -> Result<LoadedContext, RlmError>;
}

/// Binds text and JSON contexts, verbatim when they fit under `inline_limit`.
#[derive(Debug, Clone)]
pub struct DefaultLoader {
    pub inline_limit: usize,
    pub preview_chars: usize,
}

impl DefaultLoader {
    pub fn new(inline_limit: usize) -> Self {
        Self {
            inline_limit,
            preview_chars: 400,
        }
    }
}

impl ContextLoader for DefaultLoader {
    fn load(&self, context: &Context) -> Result<LoadedContext, RlmError> {
        let text: Arc<str> = Arc::from(context.as_text());
        let inline = text.len() <= self.inline_limit;
        let line_count = text.lines().count();

        let shape = match context {
            Context::Text(_) => format!(
                "text, {} bytes, {} lines",
                text.len(),
                line_count
            ),
            Context::Json(v) => format!("JSON {}, {} bytes serialized", json_shape(v), text.len()),
        };

        let mut bindings = Vec::new();
        let access = if inline {
            let value = match context {
                Context::Text(s) => Value::Text(s.clone()),
                Context::Json(v) => Value::from_json(v),
            };
            bindings.push(("context".to_string(), value));
            "bound verbatim as `context`"
        } else {
            "too large to bind verbatim; read it with the context_* functions"
        };

        let preview = truncate_str(&text, self.preview_chars);
        let ellipsis = if preview.len() < text.len() { "..." } else { "" };
        let description = format!(
            "The context is {shape}, {access}.\nPreview:\n{preview}{ellipsis}"
        );
        bindings.push(("context_info".to_string(), Value::Text(description.clone())));

        Ok(LoadedContext {
            bindings,
            description,
            text,
        })
    }
}

fn json_shape(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(8).map(String::as_str).collect();
            let more = if map.len() > keys.len() { ", ..." } else { "" };
            format!("object with {} key(s): {}{}", map.len(), keys.join(", "), more)
        }
        serde_json::Value::Array(items) => format!("array of {} item(s)", items.len()),
        serde_json::Value::String(_) => "string".into(),
        serde_json::Value::Number(_) => "number".into(),
        serde_json::Value::Bool(_) => "boolean".into(),
        serde_json::Value::Null => "null".into(),
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Byte range `[start, end)` clamped to the text and snapped to char boundaries.
pub fn slice(text: &str, start: i64, end: i64) -> &str {
    let start = floor_boundary(text, start.max(0) as usize);
    let end = floor_boundary(text, end.max(0) as usize);
    if start >= end {
        ""
    } else {
        &text[start..end]
    }
}

/// Lines `[start, end)`, 0-based, joined with newlines.
pub fn lines(text: &str, start: i64, end: i64) -> String {
    let start = start.max(0) as usize;
    let end = end.max(0) as usize;
    if start >= end {
        return String::new();
    }
    text.lines()
        .skip(start)
        .take(end - start)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split into pieces of at most `size` bytes, preferring to break after a newline
/// in the second half of each window.
pub fn chunk(text: &str, size: usize) -> Vec<&str> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= size {
            chunks.push(rest);
            break;
        }
        let mut cut = floor_boundary(rest, size);
        if let Some(nl) = rest[..cut].rfind('\n') {
            if nl + 1 > size / 2 {
                cut = nl + 1;
            }
        }
        if cut == 0 {
            // a single char wider than `size`
            cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        chunks.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    chunks
}

/// Lines matching `pattern` as (0-based line number, line).
pub fn grep<'a>(text: &'a str, pattern: &str) -> Result<Vec<(usize, &'a str)>, regex::Error> {
    let re = Regex::new(pattern)?;
    Ok(text
        .lines()
        .enumerate()
        .filter(|(_, line)| re.is_match(line))
        .take(MAX_MATCHES)
        .collect())
}

/// Byte offsets of every occurrence of `needle`.
pub fn find_all(text: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    text.match_indices(needle)
        .map(|(i, _)| i)
        .take(MAX_MATCHES)
        .collect()
}

/// Register the `context_*` accessors over `text`.
pub fn register_accessors(engine: &mut Engine, text: Arc<str>) {
    let t = text.clone();
    engine.register_fn("context_len", move || t.len() as i64);

    let t = text.clone();
    engine.register_fn("context_line_count", move || t.lines().count() as i64);

    let t = text.clone();
    engine.register_fn("context_slice", move |start: i64, end: i64| {
        slice(&t, start, end).to_string()
    });

    let t = text.clone();
    engine.register_fn("context_lines", move |start: i64, end: i64| lines(&t, start, end));

    let t = text.clone();
    engine.register_fn("context_find", move |needle: &str| {
        find_all(&t, needle)
            .into_iter()
            .map(|i| Dynamic::from(i as i64))
            .collect::<rhai::Array>()
    });

    let t = text.clone();
    engine.register_fn(
        "context_grep",
        move |pattern: &str| -> Result<rhai::Array, Box<EvalAltResult>> {
            let hits = grep(&t, pattern).map_err(|e| format!("invalid pattern: {e}"))?;
            Ok(hits
                .into_iter()
                .map(|(line, content)| {
                    let mut map = rhai::Map::new();
                    map.insert("line".into(), Dynamic::from(line as i64));
                    map.insert("text".into(), Dynamic::from(content.to_string()));
                    Dynamic::from(map)
                })
                .collect())
        },
    );

    let t = text;
    engine.register_fn(
        "context_chunks",
        move |size: i64| -> Result<rhai::Array, Box<EvalAltResult>> {
            if size <= 0 {
                return Err("chunk size must be positive".into());
            }
            Ok(chunk(&t, size as usize)
                .into_iter()
                .map(|c| Dynamic::from(c.to_string()))
                .collect())
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_is_inline() {
        let loaded = DefaultLoader::new(100).load(&Context::from("hello")).unwrap();
        assert_eq!(loaded.bindings[0], ("context".to_string(), Value::from("hello")));
        assert!(loaded.description.contains("bound verbatim"));
        assert_eq!(&*loaded.text, "hello");
    }

    #[test]
    fn test_large_text_is_accessor_only() {
        let big = "line\n".repeat(100);
        let loaded = DefaultLoader::new(50).load(&Context::from(big)).unwrap();
        assert!(loaded.bindings.iter().all(|(name, _)| name != "context"));
        assert!(loaded.description.contains("100 lines"));
        assert!(loaded.description.ends_with("..."));
    }

    #[test]
    fn test_json_is_bound_structurally() {
        let loaded = DefaultLoader::new(1_000)
            .load(&Context::from(serde_json::json!({"value": 42})))
            .unwrap();
        match &loaded.bindings[0].1 {
            Value::Map(m) => assert_eq!(m.get("value"), Some(&Value::Int(42))),
            other => panic!("expected map, got {other:?}"),
        }
        assert!(loaded.description.contains("object with 1 key(s): value"));
    }

    #[test]
    fn test_from_path_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("data.json");
        std::fs::write(&json_path, r#"{"a": [1, 2]}"#).unwrap();
        assert_eq!(Context::from_path(&json_path).unwrap().kind(), "json");

        let txt_path = dir.path().join("notes.txt");
        std::fs::write(&txt_path, "{not json").unwrap();
        assert_eq!(Context::from_path(&txt_path).unwrap().kind(), "text");

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{oops").unwrap();
        assert!(matches!(Context::from_path(&bad), Err(RlmError::Context(_))));
    }

    #[test]
    fn test_slice_clamps_and_snaps() {
        assert_eq!(slice("hello", 1, 3), "el");
        assert_eq!(slice("hello", -5, 100), "hello");
        assert_eq!(slice("hello", 4, 2), "");
        // "é" is two bytes; an end inside it snaps back
        assert_eq!(slice("café", 0, 4), "caf");
    }

    #[test]
    fn test_lines_range() {
        let text = "a\nb\nc\nd";
        assert_eq!(lines(text, 1, 3), "b\nc");
        assert_eq!(lines(text, 3, 10), "d");
        assert_eq!(lines(text, 2, 2), "");
    }

    #[test]
    fn test_chunk_prefers_newlines() {
        let text = "aaaa\nbbbb\ncccc\n";
        let chunks = chunk(text, 7);
        assert_eq!(chunks, vec!["aaaa\n", "bbbb\n", "cccc\n"]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_without_newlines_and_multibyte() {
        let text = "ééééé";
        let chunks = chunk(text, 3);
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), text);
        assert!(chunk("", 4).is_empty());
    }

    #[test]
    fn test_grep_and_find() {
        let text = "alpha 1\nbeta 2\nalpha 3";
        let hits = grep(text, r"^alpha \d").unwrap();
        assert_eq!(hits, vec![(0, "alpha 1"), (2, "alpha 3")]);
        assert!(grep(text, "(").is_err());
        assert_eq!(find_all(text, "alpha"), vec![0, 15]);
        assert!(find_all(text, "").is_empty());
    }
}
