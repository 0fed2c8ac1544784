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
use super::utils::read_env;
use crate::schema::transform::to_gemini;

pub const GOOGLE_PROVIDER_NAME: &str = "google";
pub const GOOGLE_DEFAULT_MODEL: &str = "gemini-3-flash-preview";
const GOOGLE_DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";

/// Valid thinking budget range in tokens for budget-style requests.
const THINKING_BUDGET_MIN: u32 = 128;
const THINKING_BUDGET_MAX: u32 = 24_576;

#[derive(Debug)]
pub struct GoogleProvider {
    api_client: ApiClient,
    default_model: String,
    name: String,
}

impl GoogleProvider {
    pub fn from_env() -> Result<Self> {
        let api_key = read_env("GOOGLE_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        let host = read_env("GOOGLE_HOST").unwrap_or_else(|| GOOGLE_DEFAULT_HOST.to_string());
        Self::new(host, api_key, GOOGLE_DEFAULT_MODEL.to_string())
    }

    pub fn new(host: String, api_key: String, default_model: String) -> Result<Self> {
        let auth = AuthMethod::ApiKey {
            header_name: "x-goog-api-key".to_string(),
            key: api_key,
        };
        let api_client = ApiClient::new(host, auth)?;
        Ok(GoogleProvider {
            api_client,
            default_model,
            name: GOOGLE_PROVIDER_NAME.to_string(),
        })
    }

    fn effective_model<'a>(&'a self, request: &'a GenerateRequest) -> &'a str {
        request.model.as_deref().unwrap_or(&self.default_model)
    }

    /// Gemini takes system text as `systemInstruction` and chat turns as
    /// user/model `contents`.
    fn create_request(&self, request: &GenerateRequest) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();
        for message in &request.messages {
            match message.role {
                MessageRole::System => system_parts.push(&message.content),
                MessageRole::User => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": message.content}],
                })),
                MessageRole::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": message.content}],
                })),
            }
        }

        let mut generation_config = Map::new();
        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }

        if let Some(structured) = &request.structured_output {
            generation_config.insert(
                "responseMimeType".to_string(),
                json!("application/json"),
            );
            generation_config.insert(
                "responseSchema".to_string(),
                to_gemini(&structured.json_schema),
            );
        }

        if let Some(reasoning) = &request.reasoning {
            if reasoning.enabled {
                let mut thinking = Map::new();
                if let Some(level) = reasoning.thinking_level {
                    thinking.insert("thinkingLevel".to_string(), json!(level.as_str()));
                } else {
                    let requested = reasoning.budget_tokens.unwrap_or(THINKING_BUDGET_MAX);
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
                    thinking.insert("thinkingBudget".to_string(), json!(budget));
                }
                generation_config
                    .insert("thinkingConfig".to_string(), Value::Object(thinking));
            }
        }

        let mut payload = Map::new();
        payload.insert("contents".to_string(), json!(contents));
        if !system_parts.is_empty() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": system_parts.join("\n\n")}]}),
            );
        }
        if !generation_config.is_empty() {
            payload.insert(
                "generationConfig".to_string(),
                Value::Object(generation_config),
            );
        }

        Value::Object(payload)
    }

    fn parse_response(response: &Value) -> Result<GenerateResponse, ProviderError> {
        let candidate = response
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| {
                ProviderError::RequestFailed("response contained no candidates".to_string())
            })?;

        let text: String = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = response.get("usageMetadata").map(|u| {
            Usage::new(
                u.get("promptTokenCount")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32),
                u.get("candidatesTokenCount")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32),
            )
        });

        let finish_reason = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .map(|r| match r {
                "STOP" => FinishReason::Stop,
                "MAX_TOKENS" => FinishReason::Length,
                "SAFETY" | "RECITATION" | "BLOCKLIST" => FinishReason::ContentFilter,
                _ => FinishReason::Error,
            });

        Ok(GenerateResponse {
            content: Some(Value::String(text.clone())),
            text: Some(text),
            tool_calls: None,
            usage,
            model: super::utils::get_model(response),
            finish_reason,
            raw: Some(response.clone()),
        })
    }

    async fn post(&self, model: &str, payload: &Value) -> Result<Value, ProviderError> {
        let path = format!("v1beta/models/{}:generateContent", model);
        let response = self.api_client.api_post(&path, payload).await?;

        match response.status {
            StatusCode::OK => response.payload.ok_or_else(|| {
                ProviderError::RequestFailed("response body is not valid JSON".to_string())
            }),
            status => Err(map_http_error(status, response.payload.as_ref())),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleProvider {
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
        let model = self.effective_model(request).to_string();
        let payload = self.create_request(request);
        let json_response =
            with_backoff("google generate", || self.post(&model, &payload)).await?;
        Self::parse_response(&json_response)
    }

    async fn doctor(&self) -> DoctorResult {
        let start = Instant::now();
        match self.api_client.api_get("v1beta/models").await {
            Ok(response) if response.status == StatusCode::OK => DoctorResult::healthy(
                "Google AI API is accessible",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{Message, ReasoningConfig, StructuredOutputConfig, ThinkingLevel};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(host: &str) -> GoogleProvider {
        GoogleProvider::new(
            host.to_string(),
            "test-key".to_string(),
            GOOGLE_DEFAULT_MODEL.to_string(),
        )
        .unwrap()
    }

    fn basic_request() -> GenerateRequest {
        GenerateRequest {
            messages: vec![Message::system("be terse"), Message::user("hi")],
            max_tokens: Some(500),
            temperature: Some(0.2),
            ..Default::default()
        }
    }

    #[test]
    fn test_contents_use_model_role() {
        let provider = provider_for(GOOGLE_DEFAULT_HOST);
        let mut request = basic_request();
        request.messages.push(Message::assistant("earlier reply"));

        let payload = provider.create_request(&request);
        let contents = payload["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            payload["systemInstruction"]["parts"][0]["text"],
            "be terse"
        );
    }

    #[test]
    fn test_structured_output_in_generation_config() {
        let provider = provider_for(GOOGLE_DEFAULT_HOST);
        let mut request = basic_request();
        request.structured_output = Some(StructuredOutputConfig::new(
            json!({
                "$schema": "x",
                "title": "Out",
                "type": "object",
                "properties": {"a": {"type": "string", "maxLength": 10}}
            }),
            "out",
        ));

        let payload = provider.create_request(&request);
        let config = &payload["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        let schema = &config["responseSchema"];
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert!(schema["properties"]["a"].get("maxLength").is_none());
    }

    #[test]
    fn test_thinking_level_preferred_over_budget() {
        let provider = provider_for(GOOGLE_DEFAULT_HOST);
        let mut request = basic_request();
        request.reasoning = Some(ReasoningConfig {
            enabled: true,
            thinking_level: Some(ThinkingLevel::High),
            budget_tokens: Some(1000),
            ..Default::default()
        });

        let payload = provider.create_request(&request);
        let thinking = &payload["generationConfig"]["thinkingConfig"];
        assert_eq!(thinking["thinkingLevel"], "high");
        assert!(thinking.get("thinkingBudget").is_none());
    }

    #[test]
    fn test_thinking_budget_clamped_to_provider_max() {
        let provider = provider_for(GOOGLE_DEFAULT_HOST);
        let mut request = basic_request();
        request.reasoning = Some(ReasoningConfig {
            enabled: true,
            budget_tokens: Some(200_000),
            ..Default::default()
        });

        let payload = provider.create_request(&request);
        assert_eq!(
            payload["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            THINKING_BUDGET_MAX
        );
    }

    #[test]
    fn test_parse_response() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "gemini "}, {"text": "says hi"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 8,
                "candidatesTokenCount": 4,
                "totalTokenCount": 12
            }
        });

        let response = GoogleProvider::parse_response(&body).unwrap();
        assert_eq!(response.text.as_deref(), Some("gemini says hi"));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.unwrap().input_tokens, Some(8));
    }

    #[tokio::test]
    async fn test_generate_hits_model_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!(
                "/v1beta/models/{}:generateContent",
                GOOGLE_DEFAULT_MODEL
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "ok"}]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri());
        let response = provider.generate(&basic_request()).await.unwrap();
        assert_eq!(response.text.as_deref(), Some("ok"));
    }
}
