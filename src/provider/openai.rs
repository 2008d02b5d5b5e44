// src/provider/openai.rs — OpenAI Chat Completions provider

use async_trait::async_trait;

use super::{
    merge_consecutive, Completion, CompletionProvider, CompletionRequest, ModelInfo, Role,
    StopReason, TokenUsage,
};
use crate::infra::errors::RlmError;

pub struct OpenAIProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1".into())
    }

    /// Any endpoint speaking the Chat Completions protocol.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        // Sandbox feedback has no tool_call_id to pair with, so it goes in as user text.
        let turns = request.messages.iter().map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::Assistant => "assistant",
                Role::User | Role::Tool => "user",
            };
            (role, m.content.as_str())
        });

        let messages: Vec<serde_json::Value> = merge_consecutive(turns)
            .into_iter()
            .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

fn parse_response(resp: &serde_json::Value) -> Completion {
    let choice = &resp["choices"][0];
    let text = choice["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();

    let usage = TokenUsage {
        input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        cache_read_tokens: resp["usage"]["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
        cache_write_tokens: 0,
    };

    let stop_reason = match choice["finish_reason"].as_str() {
        Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::Unknown,
    };

    Completion {
        text,
        usage,
        stop_reason,
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "gpt-4.1".into(),
                name: "GPT-4.1".into(),
                context_window: 1_047_576,
                max_output_tokens: 32_768,
                input_price_per_mtok: 2.0,
                output_price_per_mtok: 8.0,
            },
            ModelInfo {
                id: "gpt-4.1-mini".into(),
                name: "GPT-4.1 Mini".into(),
                context_window: 1_047_576,
                max_output_tokens: 32_768,
                input_price_per_mtok: 0.4,
                output_price_per_mtok: 1.6,
            },
            ModelInfo {
                id: "o3-mini".into(),
                name: "o3-mini".into(),
                context_window: 200_000,
                max_output_tokens: 100_000,
                input_price_per_mtok: 1.1,
                output_price_per_mtok: 4.4,
            },
        ]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, RlmError> {
        let body = self.build_request_body(&request);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| RlmError::Provider {
                provider: "openai".into(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RlmError::RateLimited {
                provider: "openai".into(),
                retry_after_ms: 5000,
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(RlmError::Provider {
                provider: "openai".into(),
                message: format!("HTTP {}: {}", status, error_body),
                retriable: status.is_server_error(),
            });
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| RlmError::Provider {
            provider: "openai".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })?;

        Ok(parse_response(&resp))
    }
}
