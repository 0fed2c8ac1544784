use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::time::Instant;

use super::api_client::{ApiClient, AuthMethod};
use super::base::{
    DoctorResult, FinishReason, GenerateRequest, GenerateResponse, MessageRole, ProviderAdapter,
    ProviderCapabilities, Usage,
};
use super::errors::{map_http_error, ProviderError};
use super::retry::with_backoff;
use super::utils::{model_in_family, read_env};
use crate::schema::transform::to_claude;

pub const ANTHROPIC_PROVIDER_NAME: &str = "anthropic";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-opus-4-5";
const ANTHROPIC_DEFAULT_HOST: &str = "https://api.anthropic.com";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Beta header gating the structured outputs API.
const STRUCTURED_OUTPUTS_BETA: &str = "structured-outputs-2025-11-13";

/// Claude 4.x supports `output_format`; Claude 3.x does not.
const STRUCTURED_OUTPUT_MODELS: &[&str] = &[
    "claude-opus-4-5",
    "claude-opus-4-1",
    "claude-sonnet-4-5",
    "claude-haiku-4-5",
];

const STRUCTURED_OUTPUT_MODEL_PREFIXES: &[&str] = &[
    "claude-opus-4",
    "claude-sonnet-4",
    "claude-haiku-4",
    "claude-4",
];

/// Valid extended-thinking budget range in tokens.
const THINKING_BUDGET_MIN: u32 = 1024;
const THINKING_BUDGET_MAX: u32 = 128_000;
const THINKING_BUDGET_DEFAULT: u32 = 8192;

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug)]
pub struct AnthropicProvider {
    api_client: ApiClient,
    default_model: String,
    name: String,
}

impl AnthropicProvider {
    pub fn from_env() -> Result<Self> {
        let api_key = read_env("ANTHROPIC_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        let host = read_env("ANTHROPIC_HOST").unwrap_or_else(|| ANTHROPIC_DEFAULT_HOST.to_string());
        Self::new(host, api_key, ANTHROPIC_DEFAULT_MODEL.to_string())
    }

    pub fn new(host: String, api_key: String, default_model: String) -> Result<Self> {
        let auth = AuthMethod::ApiKey {
            header_name: "x-api-key".to_string(),
            key: api_key,
        };
        let api_client =
            ApiClient::new(host, auth)?.with_header("anthropic-version", ANTHROPIC_API_VERSION)?;
        Ok(AnthropicProvider {
            api_client,
            default_model,
            name: ANTHROPIC_PROVIDER_NAME.to_string(),
        })
    }

    fn supports_structured_output(model: &str) -> bool {
        model_in_family(
            model,
            STRUCTURED_OUTPUT_MODELS,
            STRUCTURED_OUTPUT_MODEL_PREFIXES,
        )
    }

    /// Build the messages payload; Anthropic takes system text as a
    /// top-level field rather than a message.
    fn create_request(&self, request: &GenerateRequest) -> (Value, bool) {
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();
        for message in &request.messages {
            match message.role {
                MessageRole::System => system_parts.push(&message.content),
                _ => messages.push(json!({
                    "role": message.role.as_str(),
                    "content": message.content,
                })),
            }
        }

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(model));
        payload.insert("messages".to_string(), json!(messages));
        payload.insert(
            "max_tokens".to_string(),
            json!(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if !system_parts.is_empty() {
            payload.insert("system".to_string(), json!(system_parts.join("\n\n")));
        }
        if let Some(temperature) = request.temperature {
            payload.insert("temperature".to_string(), json!(temperature));
        }

        let mut use_beta = false;

        if let Some(structured) = &request.structured_output {
            if Self::supports_structured_output(model) {
                use_beta = true;
                payload.insert(
                    "output_format".to_string(),
                    json!({
                        "type": "json_schema",
                        "schema": to_claude(&structured.json_schema),
                    }),
                );
            } else {
                tracing::warn!(
                    "model {} does not support structured output, relying on prompt",
                    model
                );
            }
        }

        if let Some(reasoning) = &request.reasoning {
            if reasoning.enabled {
                use_beta = true;
                let requested = reasoning.budget_tokens.unwrap_or(THINKING_BUDGET_DEFAULT);
                let budget = requested.clamp(THINKING_BUDGET_MIN, THINKING_BUDGET_MAX);
                if budget != requested {
                    tracing::warn!(
                        "thinking budget clamped from {} to {} (valid range: {}-{})",
                        requested,
                        budget,
                        THINKING_BUDGET_MIN,
                        THINKING_BUDGET_MAX
                    );
                }
                payload.insert(
                    "thinking".to_string(),
                    json!({"type": "enabled", "budget_tokens": budget}),
                );
            }
        }

        (Value::Object(payload), use_beta)
    }

    fn parse_response(response: &Value) -> Result<GenerateResponse, ProviderError> {
        let blocks = response
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                ProviderError::RequestFailed("response contained no content blocks".to_string())
            })?;

        let mut text = String::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => tool_calls.push(block.clone()),
                _ => {}
            }
        }

        let usage = response.get("usage").map(|u| {
            Usage::new(
                u.get("input_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
                u.get("output_tokens").and_then(|v| v.as_u64()).map(|v| v as u32),
            )
        });

        let finish_reason = response
            .get("stop_reason")
            .and_then(|r| r.as_str())
            .map(|r| match r {
                "end_turn" | "stop_sequence" => FinishReason::Stop,
                "max_tokens" => FinishReason::Length,
                "refusal" => FinishReason::ContentFilter,
                "tool_use" => FinishReason::ToolCalls,
                _ => FinishReason::Error,
            });

        Ok(GenerateResponse {
            content: Some(Value::String(text.clone())),
            text: Some(text),
            tool_calls: (!tool_calls.is_empty()).then(|| Value::Array(tool_calls)),
            usage,
            model: super::utils::get_model(response),
            finish_reason,
            raw: Some(response.clone()),
        })
    }

    async fn post(&self, payload: &Value, use_beta: bool) -> Result<Value, ProviderError> {
        let mut request = self.api_client.request("v1/messages");
        if use_beta {
            request = request.header("anthropic-beta", STRUCTURED_OUTPUTS_BETA)?;
        }
        let response = request.api_post(payload).await?;

        match response.status {
            StatusCode::OK => response.payload.ok_or_else(|| {
                ProviderError::RequestFailed("response body is not valid JSON".to_string())
            }),
            status => Err(map_http_error(status, response.payload.as_ref())),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: false,
            tool_use: true,
            structured_output: true,
            multimodal: true,
            max_tokens: Some(8192),
        }
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        let (payload, use_beta) = self.create_request(request);
        let json_response =
            with_backoff("anthropic generate", || self.post(&payload, use_beta)).await?;
        Self::parse_response(&json_response)
    }

    async fn doctor(&self) -> DoctorResult {
        let start = Instant::now();
        match self.api_client.api_get("v1/models").await {
            Ok(response) if response.status == StatusCode::OK => DoctorResult::healthy(
                "Anthropic API is accessible",
                start.elapsed().as_millis() as u64,
            ),
            Ok(response) => {
                let err = map_http_error(response.status, response.payload.as_ref());
                DoctorResult {
                    ok: false,
                    message: err.to_string(),
                    latency_ms: Some(start.elapsed().as_millis() as u64),
                    details: response.payload,
                }
            }
            Err(err) => DoctorResult::unhealthy(format!("API error: {}", err)),
        }
    }
}
