// src/sandbox/mod.rs — Rhai sandbox with a persistent namespace
//
// Fragments run in an embedded Rhai interpreter with no I/O. The host
// exposes print capture, a few text helpers, read-only context accessors
// and, when a delegate is attached, `llm_query` / `llm_batch`.

pub mod context;
pub mod namespace;
pub mod value;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult};
use serde::{Deserialize, Serialize};

use crate::infra::config::SandboxConfig;

pub use context::{Context, ContextLoader, DefaultLoader, LoadedContext};
pub use namespace::Namespace;
pub use value::Value;

// ---------------------------------------------------------------------------
// Limits and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub timeout: Duration,
    /// 0 disables the operation limit.
    pub max_operations: u64,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_call_levels: usize,
    /// Captured output beyond this many bytes is dropped.
    pub max_capture_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::from(&SandboxConfig::default())
    }
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_operations: config.max_operations,
            max_string_size: config.max_string_size,
            max_array_size: config.max_array_size,
            max_map_size: config.max_map_size,
            max_call_levels: config.max_call_levels,
            max_capture_bytes: config.max_capture_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Syntax,
    Runtime,
    Timeout,
    Limit,
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionErrorKind::Syntax => "syntax error",
            ExecutionErrorKind::Runtime => "runtime error",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::Limit => "resource limit",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of running one fragment. Failures are data, never panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Everything printed, in order, up to the capture limit.
    pub output: String,
    pub output_truncated: bool,
    pub error: Option<ExecutionError>,
    /// Script variables that were created or changed.
    pub changed: Vec<String>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Host side of `llm_query`. Returns the answer, or an explanatory string
/// when the query was denied or failed; it never raises into the script.
pub trait Delegate: Send + Sync {
    fn delegate(&self, query: &str, data: Option<&str>) -> String;
}

/// What the host grants a sandbox beyond the base language.
#[derive(Default, Clone)]
pub struct Capabilities {
    pub context: Option<LoadedContext>,
    pub delegate: Option<Arc<dyn Delegate>>,
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Capture {
    text: String,
    truncated: bool,
    limit: usize,
}

impl Capture {
    fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.text.len());
        if line.len() + 1 > room {
            self.text
                .push_str(crate::util::truncate_str(line, room));
            self.truncated = true;
        } else {
            self.text.push_str(line);
            self.text.push('\n');
        }
    }

    fn take(&mut self) -> (String, bool) {
        let truncated = std::mem::replace(&mut self.truncated, false);
        (std::mem::take(&mut self.text), truncated)
    }
}

type Shared<T> = Arc<Mutex<T>>;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An isolated interpreter plus the namespace it executes in.
///
/// Each orchestrator level owns one; nothing is shared between sandboxes.
pub struct Sandbox {
    engine: Arc<Engine>,
    namespace: Namespace,
    capture: Shared<Capture>,
    deadline: Shared<Option<Instant>>,
    limits: SandboxLimits,
    /// Host bindings, kept to reseed the namespace if a worker is lost.
    seed: Vec<(String, Dynamic)>,
}

impl Sandbox {
    pub fn new(limits: SandboxLimits, capabilities: Capabilities) -> Self {
        let capture: Shared<Capture> = Arc::new(Mutex::new(Capture {
            limit: limits.max_capture_bytes,
            ..Capture::default()
        }));
        let deadline: Shared<Option<Instant>> = Arc::new(Mutex::new(None));

        let mut engine = create_engine(&limits, &capture, &deadline);
        if let Some(delegate) = &capabilities.delegate {
            register_delegate(&mut engine, delegate.clone());
        }

        let mut seed = Vec::new();
        if let Some(loaded) = &capabilities.context {
            context::register_accessors(&mut engine, loaded.text.clone());
            for (name, value) in &loaded.bindings {
                seed.push((name.clone(), value.to_dynamic()));
            }
        }

        let mut sandbox = Self {
            engine: Arc::new(engine),
            namespace: Namespace::new(),
            capture,
            deadline,
            limits,
            seed,
        };
        sandbox.reseed();
        sandbox
    }

    /// A sandbox with default limits and no context or delegate.
    pub fn bare() -> Self {
        Self::new(SandboxLimits::default(), Capabilities::default())
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn namespace_mut(&mut self) -> &mut Namespace {
        &mut self.namespace
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Bind a read-only host value that survives a namespace reset.
    pub fn bind_constant(&mut self, name: &str, value: Value) {
        let value = value.to_dynamic();
        self.namespace.bind_constant(name, value.clone());
        self.seed.push((name.to_string(), value));
    }

    fn reseed(&mut self) {
        let mut namespace = Namespace::new();
        for (name, value) in &self.seed {
            namespace.bind_constant(name, value.clone());
        }
        self.namespace = namespace;
    }

    /// Run `code` with the configured timeout.
    pub async fn execute(&mut self, code: &str) -> ExecutionResult {
        let timeout = self.limits.timeout;
        self.execute_with_timeout(code, timeout).await
    }

    /// Run `code` on the blocking pool so host callbacks may block on the
    /// runtime (nested runs). The namespace moves into the worker and back.
    pub async fn execute_with_timeout(&mut self, code: &str, timeout: Duration) -> ExecutionResult {
        let engine = self.engine.clone();
        let capture = self.capture.clone();
        let deadline = self.deadline.clone();
        let mut namespace = std::mem::take(&mut self.namespace);
        let code = code.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            let result = run_fragment(&engine, &capture, &deadline, &mut namespace, &code, timeout);
            (namespace, result)
        })
        .await;

        match joined {
            Ok((namespace, result)) => {
                self.namespace = namespace;
                result
            }
            Err(e) => {
                tracing::error!("Sandbox worker failed, namespace reset: {}", e);
                self.reseed();
                ExecutionResult {
                    output: String::new(),
                    output_truncated: false,
                    error: Some(ExecutionError::new(
                        ExecutionErrorKind::Runtime,
                        format!("sandbox worker failed: {e}; variables were reset"),
                    )),
                    changed: Vec::new(),
                    duration_ms: 0,
                }
            }
        }
    }

    /// Run `code` on the current thread.
    pub fn execute_blocking(&mut self, code: &str, timeout: Duration) -> ExecutionResult {
        run_fragment(
            &self.engine,
            &self.capture,
            &self.deadline,
            &mut self.namespace,
            code,
            timeout,
        )
    }
}

fn run_fragment(
    engine: &Engine,
    capture: &Mutex<Capture>,
    deadline: &Mutex<Option<Instant>>,
    namespace: &mut Namespace,
    code: &str,
    timeout: Duration,
) -> ExecutionResult {
    let started = Instant::now();
    lock(capture).take();
    *lock(deadline) = Some(started + timeout);

    let before = namespace.snapshot();
    let error = match engine.compile_with_scope(namespace.scope(), code) {
        Err(e) => Some(ExecutionError::new(ExecutionErrorKind::Syntax, e.to_string())),
        Ok(ast) => {
            namespace.remember_functions(&ast);
            let full = namespace.with_functions(&ast);
            engine
                .run_ast_with_scope(namespace.scope_mut(), &full)
                .err()
                .map(|e| classify(&e, timeout))
        }
    };

    *lock(deadline) = None;
    let changed = namespace.changed_since(&before);
    let (output, output_truncated) = lock(capture).take();
    let duration_ms = started.elapsed().as_millis() as u64;

    match &error {
        Some(e) => tracing::debug!(kind = %e.kind, duration_ms, "Fragment failed: {}", e.message),
        None => tracing::debug!(duration_ms, changed = changed.len(), "Fragment executed"),
    }

    ExecutionResult {
        output,
        output_truncated,
        error,
        changed,
        duration_ms,
    }
}

fn innermost(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => innermost(inner),
        _ => err,
    }
}

fn classify(err: &EvalAltResult, timeout: Duration) -> ExecutionError {
    match innermost(err) {
        EvalAltResult::ErrorTerminated(..) => ExecutionError::new(
            ExecutionErrorKind::Timeout,
            format!("execution exceeded {}ms and was stopped", timeout.as_millis()),
        ),
        EvalAltResult::ErrorTooManyOperations(..)
        | EvalAltResult::ErrorDataTooLarge(..)
        | EvalAltResult::ErrorStackOverflow(..) => {
            ExecutionError::new(ExecutionErrorKind::Limit, err.to_string())
        }
        _ => ExecutionError::new(ExecutionErrorKind::Runtime, err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Engine factory
// ---------------------------------------------------------------------------

/// Build an engine with limits, print capture and the deadline check.
///
/// Rhai has no built-in I/O; only the functions registered here exist.
fn create_engine(
    limits: &SandboxLimits,
    capture: &Shared<Capture>,
    deadline: &Shared<Option<Instant>>,
) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(128, 64);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_max_call_levels(limits.max_call_levels);

    let out = capture.clone();
    engine.on_print(move |s| lock(&out).push_line(s));
    let out = capture.clone();
    engine.on_debug(move |s, _source, _pos| lock(&out).push_line(s));

    let deadline = deadline.clone();
    engine.on_progress(move |ops| {
        if ops % 1024 != 0 {
            return None;
        }
        match *lock(&deadline) {
            Some(at) if Instant::now() >= at => Some(Dynamic::from("deadline".to_string())),
            _ => None,
        }
    });

    engine.register_fn("log", |msg: &str| {
        tracing::info!(target: "rlm_script", "{}", msg);
    });
    engine.register_fn("log_debug", |msg: &str| {
        tracing::debug!(target: "rlm_script", "{}", msg);
    });
    engine.register_fn("log_warn", |msg: &str| {
        tracing::warn!(target: "rlm_script", "{}", msg);
    });

    engine.register_fn(
        "chunk_text",
        |text: &str, size: i64| -> Result<rhai::Array, Box<EvalAltResult>> {
            if size <= 0 {
                return Err(format!("chunk_text: size must be positive, got {size}").into());
            }
            Ok(context::chunk(text, size as usize)
                .into_iter()
                .map(|c| Dynamic::from(c.to_string()))
                .collect())
        },
    );
    engine.register_fn(
        "regex_find_all",
        |text: &str, pattern: &str| -> Result<rhai::Array, Box<EvalAltResult>> {
            let re = regex::Regex::new(pattern)
                .map_err(|e| format!("regex_find_all: invalid pattern: {e}"))?;
            Ok(re
                .find_iter(text)
                .map(|m| Dynamic::from(m.as_str().to_string()))
                .collect())
        },
    );
    engine.register_fn("to_json", |value: Dynamic| -> String {
        Value::from_dynamic(&value).to_json().to_string()
    });
    engine.register_fn(
        "parse_json",
        |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
            let json: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| format!("parse_json: {e}"))?;
            Ok(Value::from_json(&json).to_dynamic())
        },
    );

    engine
}

fn register_delegate(engine: &mut Engine, delegate: Arc<dyn Delegate>) {
    let d = delegate.clone();
    engine.register_fn("llm_query", move |prompt: &str| -> String {
        d.delegate(prompt, None)
    });
    let d = delegate.clone();
    engine.register_fn("llm_query", move |query: &str, data: &str| -> String {
        d.delegate(query, Some(data))
    });
    engine.register_fn("llm_batch", move |prompts: rhai::Array| -> rhai::Array {
        prompts
            .iter()
            .map(|p| Dynamic::from(delegate.delegate(&Value::from_dynamic(p).render(), None)))
            .collect()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const T: Duration = Duration::from_secs(5);

    struct Echo;

    impl Delegate for Echo {
        fn delegate(&self, query: &str, data: Option<&str>) -> String {
            match data {
                Some(d) => format!("{query}|{}", d.len()),
                None => format!("echo:{query}"),
            }
        }
    }

    #[test]
    fn test_print_capture_and_persistence() {
        let mut sb = Sandbox::bare();
        let r1 = sb.execute_blocking("let total = 40;", T);
        assert!(r1.is_ok(), "{:?}", r1.error);
        assert_eq!(r1.changed, vec!["total".to_string()]);

        let r2 = sb.execute_blocking("total += 2; print(total); print(\"done\");", T);
        assert!(r2.is_ok(), "{:?}", r2.error);
        assert_eq!(r2.output, "42\ndone\n");
        assert_eq!(sb.namespace().get("total"), Some(Value::Int(42)));
    }

    #[test]
    fn test_redeclared_variable_is_reported() {
        let mut sb = Sandbox::bare();
        sb.execute_blocking("let x = 1;", T);
        let r = sb.execute_blocking("let x = 2;", T);
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.changed, vec!["x".to_string()]);
        assert_eq!(sb.namespace().get("x"), Some(Value::Int(2)));

        let r = sb.execute_blocking("let x = 2;", T);
        assert!(r.changed.is_empty());
    }

    #[test]
    fn test_functions_persist() {
        let mut sb = Sandbox::bare();
        assert!(sb.execute_blocking("fn double(x) { x * 2 }", T).is_ok());
        let r = sb.execute_blocking("print(double(21));", T);
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.output, "42\n");
        assert_eq!(sb.namespace().function_names(), vec!["double".to_string()]);
    }

    #[test]
    fn test_syntax_error_keeps_namespace() {
        let mut sb = Sandbox::bare();
        sb.execute_blocking("let keep = 1;", T);
        let r = sb.execute_blocking("let = ;", T);
        assert_eq!(r.error.map(|e| e.kind), Some(ExecutionErrorKind::Syntax));
        assert_eq!(sb.namespace().get("keep"), Some(Value::Int(1)));
    }

    #[test]
    fn test_runtime_error_keeps_partial_output() {
        let mut sb = Sandbox::bare();
        let r = sb.execute_blocking("print(\"before\"); let y = undefined_fn(1);", T);
        assert_eq!(r.output, "before\n");
        let err = r.error.expect("runtime error");
        assert_eq!(err.kind, ExecutionErrorKind::Runtime);
        assert!(err.message.contains("undefined_fn"), "{}", err.message);
    }

    #[test]
    fn test_timeout() {
        let mut sb = Sandbox::new(
            SandboxLimits {
                max_operations: 0,
                ..SandboxLimits::default()
            },
            Capabilities::default(),
        );
        let r = sb.execute_blocking("let n = 0; loop { n += 1; }", Duration::from_millis(50));
        assert_eq!(r.error.map(|e| e.kind), Some(ExecutionErrorKind::Timeout));

        // still usable afterwards
        let r = sb.execute_blocking("print(\"alive\");", T);
        assert_eq!(r.output, "alive\n");
    }

    #[test]
    fn test_operation_limit() {
        let mut sb = Sandbox::new(
            SandboxLimits {
                max_operations: 1_000,
                ..SandboxLimits::default()
            },
            Capabilities::default(),
        );
        let r = sb.execute_blocking("let n = 0; loop { n += 1; }", T);
        assert_eq!(r.error.map(|e| e.kind), Some(ExecutionErrorKind::Limit));
    }

    #[test]
    fn test_capture_limit() {
        let mut sb = Sandbox::new(
            SandboxLimits {
                max_capture_bytes: 10,
                ..SandboxLimits::default()
            },
            Capabilities::default(),
        );
        let r = sb.execute_blocking("for i in 0..100 { print(\"line\"); }", T);
        assert!(r.output_truncated);
        assert!(r.output.len() <= 10);
    }

    #[test]
    fn test_context_is_constant() {
        let loaded = DefaultLoader::new(1_000)
            .load(&Context::from(serde_json::json!({"value": 42})))
            .unwrap();
        let mut sb = Sandbox::new(
            SandboxLimits::default(),
            Capabilities {
                context: Some(loaded),
                delegate: None,
            },
        );
        let r = sb.execute_blocking("print(context.value);", T);
        assert_eq!(r.output, "42\n");
        assert!(r.changed.is_empty());

        let r = sb.execute_blocking("context = 1;", T);
        assert!(!r.is_ok());
    }

    #[test]
    fn test_delegate_functions() {
        let mut sb = Sandbox::new(
            SandboxLimits::default(),
            Capabilities {
                context: None,
                delegate: Some(Arc::new(Echo)),
            },
        );
        let r = sb.execute_blocking(
            "print(llm_query(\"hi\")); print(llm_query(\"q\", \"abcd\")); let b = llm_batch([\"a\", \"b\"]); print(b[1]);",
            T,
        );
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.output, "echo:hi\nq|4\necho:b\n");
    }

    #[test]
    fn test_without_delegate_llm_query_is_missing() {
        let mut sb = Sandbox::bare();
        let r = sb.execute_blocking("llm_query(\"hi\")", T);
        assert_eq!(r.error.map(|e| e.kind), Some(ExecutionErrorKind::Runtime));
    }

    #[test]
    fn test_helpers() {
        let mut sb = Sandbox::bare();
        let r = sb.execute_blocking(
            r#"
let parts = chunk_text("abcdef", 4);
print(parts.len());
let hits = regex_find_all("a1 b22 c333", "[0-9]+");
print(hits[2]);
let m = parse_json("{\"k\": [1, 2]}");
print(m.k[1]);
print(to_json(#{ n: 1 }));
"#,
            T,
        );
        assert!(r.is_ok(), "{:?}", r.error);
        assert_eq!(r.output, "2\n333\n2\n{\"n\":1}\n");
    }

    #[tokio::test]
    async fn test_async_execute_restores_namespace() {
        let mut sb = Sandbox::bare();
        sb.execute("let a = 1;").await;
        let r = sb.execute("a += 1; print(a);").await;
        assert_eq!(r.output, "2\n");
        assert_eq!(sb.namespace().get("a"), Some(Value::Int(2)));
    }
}
