// src/provider/scripted.rs — Canned-response provider for offline runs and tests
//
// Replies are served in order; once the script runs out the last reply repeats.
// Queued failures are served before any reply. Every request is recorded.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{Completion, CompletionProvider, CompletionRequest, ModelInfo, StopReason, TokenUsage};
use crate::core::budget::estimate_tokens;
use crate::infra::errors::RlmError;

struct Failure {
    message: String,
    retriable: bool,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<String>,
    last: Option<String>,
    failures: VecDeque<Failure>,
}

pub struct ScriptedProvider {
    script: Mutex<Script>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicU32,
    fixed_usage: Option<TokenUsage>,
    price: (f64, f64),
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(Script {
                replies: replies.into_iter().map(Into::into).collect(),
                ..Default::default()
            }),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            fixed_usage: None,
            price: (0.0, 0.0),
        }
    }

    /// Load replies from a JSON array of strings.
    pub fn from_file(path: &Path) -> Result<Self, RlmError> {
        let content = std::fs::read_to_string(path)?;
        let replies: Vec<String> = serde_json::from_str(&content)?;
        if replies.is_empty() {
            return Err(RlmError::Config(format!(
                "{} holds no scripted replies",
                path.display()
            )));
        }
        Ok(Self::new(replies))
    }

    /// Report the same usage for every call instead of estimating it.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.fixed_usage = Some(usage);
        self
    }

    /// Advertise a price for the `scripted` model so cost ceilings apply.
    pub fn with_price(mut self, input_per_mtok: f64, output_per_mtok: f64) -> Self {
        self.price = (input_per_mtok, output_per_mtok);
        self
    }

    /// Queue a provider error served before the next reply.
    pub fn fail_next(&self, message: &str, retriable: bool) {
        self.lock_script().failures.push_back(Failure {
            message: message.to_string(),
            retriable,
        });
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self) -> Result<String, RlmError> {
        let mut script = self.lock_script();
        if let Some(failure) = script.failures.pop_front() {
            return Err(RlmError::Provider {
                provider: "scripted".into(),
                message: failure.message,
                retriable: failure.retriable,
            });
        }
        if let Some(reply) = script.replies.pop_front() {
            script.last = Some(reply.clone());
            return Ok(reply);
        }
        script.last.clone().ok_or_else(|| RlmError::Provider {
            provider: "scripted".into(),
            message: "script is empty".into(),
            retriable: false,
        })
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "scripted".into(),
            name: "Scripted replies".into(),
            context_window: 1_000_000,
            max_output_tokens: 32_768,
            input_price_per_mtok: self.price.0,
            output_price_per_mtok: self.price.1,
        }]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, RlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let text = self.next_reply()?;
        let usage = self.fixed_usage.clone().unwrap_or_else(|| {
            let input: usize = request
                .messages
                .iter()
                .map(|m| estimate_tokens(&m.content) as usize)
                .sum();
            TokenUsage::new(input as u32, estimate_tokens(&text))
        });

        Ok(Completion {
            text,
            usage,
            stop_reason: StopReason::EndTurn,
        })
    }
}
