// src/provider/anthropic.rs — Anthropic Messages API provider

use async_trait::async_trait;

use super::{
    merge_consecutive, Completion, CompletionProvider, CompletionRequest, ModelInfo, Role,
    StopReason, TokenUsage,
};
use crate::infra::errors::RlmError;

pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self) -> &str {
        "https://api.anthropic.com/v1/messages"
    }

    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let turns = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    // Tool results are fed back as user turns.
                    _ => "user",
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
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });

        if let Some(system) = request.system_text() {
            body["system"] = serde_json::json!([{
                "type": "text",
                "text": system,
                "cache_control": { "type": "ephemeral" }
            }]);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }
}

pub(crate) fn parse_response(resp: &serde_json::Value) -> Completion {
    let text = resp["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|c| c["type"] == "text")
                .map(|c| c["text"].as_str().unwrap_or(""))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = TokenUsage {
        input_tokens: resp["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: resp["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        cache_read_tokens: resp["usage"]["cache_read_input_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
        cache_write_tokens: resp["usage"]["cache_creation_input_tokens"]
            .as_u64()
            .unwrap_or(0) as u32,
    };

    let stop_reason = match resp["stop_reason"].as_str() {
        Some("end_turn") => StopReason::EndTurn,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::Unknown,
    };

    Completion {
        text,
        usage,
        stop_reason,
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "claude-sonnet-4-20250514".into(),
                name: "Claude Sonnet 4".into(),
                context_window: 200_000,
                max_output_tokens: 16_384,
                input_price_per_mtok: 3.0,
                output_price_per_mtok: 15.0,
            },
            ModelInfo {
                id: "claude-opus-4-20250514".into(),
                name: "Claude Opus 4".into(),
                context_window: 200_000,
                max_output_tokens: 32_768,
                input_price_per_mtok: 15.0,
                output_price_per_mtok: 75.0,
            },
            ModelInfo {
                id: "claude-haiku-3-5-20241022".into(),
                name: "Claude 3.5 Haiku".into(),
                context_window: 200_000,
                max_output_tokens: 8_192,
                input_price_per_mtok: 0.8,
                output_price_per_mtok: 4.0,
            },
        ]
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, RlmError> {
        let body = self.build_request_body(&request);

        let response = self
            .client
            .post(self.api_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RlmError::Provider {
                provider: "anthropic".into(),
                message: e.to_string(),
                retriable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(RlmError::RateLimited {
                provider: "anthropic".into(),
                retry_after_ms: retry_after * 1000,
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(RlmError::Provider {
                provider: "anthropic".into(),
                message: format!("HTTP {}: {}", status, error_body),
                retriable: status.is_server_error(),
            });
        }

        let resp: serde_json::Value = response.json().await.map_err(|e| RlmError::Provider {
            provider: "anthropic".into(),
            message: format!("Failed to parse response: {}", e),
            retriable: false,
        })?;

        Ok(parse_response(&resp))
    }
}
