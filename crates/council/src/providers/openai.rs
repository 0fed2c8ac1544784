use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Instant;

use super::api_client::{ApiClient, AuthMethod};
use super::base::{
    DoctorResult, GenerateRequest, GenerateResponse, ProviderAdapter, ProviderCapabilities,
    ReasoningEffort, ResponseStream,
};
use super::errors::{map_http_error, ProviderError};
use super::formats::openai::{
    create_request, parse_response, response_to_stream, RequestOptions, StructuredMode,
};
use super::retry::with_backoff;
use super::utils::{model_in_family, read_env};

pub const OPENAI_PROVIDER_NAME: &str = "openai";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-5.1";
const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";

/// Models with native schema enforcement via `response_format.json_schema`.
const STRUCTURED_OUTPUT_MODELS: &[&str] = &[
    "gpt-5.2",
    "gpt-5.2-codex",
    "gpt-5.1",
    "gpt-5.1-codex",
    "gpt-5.1-mini",
    "gpt-5.1-nano",
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-4.1-nano",
    "o1",
    "o1-mini",
    "o3-mini",
    "o4-mini",
];

const STRUCTURED_OUTPUT_MODEL_PREFIXES: &[&str] =
    &["gpt-5", "gpt-4o", "gpt-4.1", "o1", "o3", "o4"];

/// Older models that only take `{"type": "json_object"}` with no schema.
const JSON_MODE_ONLY_MODELS: &[&str] = &[
    "gpt-4-turbo",
    "gpt-4-turbo-preview",
    "gpt-4-1106-preview",
    "gpt-4-0125-preview",
    "gpt-3.5-turbo",
];

const REASONING_MODEL_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

/// These families renamed max_tokens to max_completion_tokens.
const MAX_COMPLETION_TOKENS_PREFIXES: &[&str] = &["gpt-5", "o1", "o3", "o4"];

#[derive(Debug)]
pub struct OpenAiProvider {
    api_client: ApiClient,
    default_model: String,
    name: String,
}

impl OpenAiProvider {
    pub fn from_env() -> Result<Self> {
        let api_key = read_env("OPENAI_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let host = read_env("OPENAI_HOST").unwrap_or_else(|| OPENAI_DEFAULT_HOST.to_string());
        Self::new(host, api_key, OPENAI_DEFAULT_MODEL.to_string())
    }

    pub fn new(host: String, api_key: String, default_model: String) -> Result<Self> {
        let api_client = ApiClient::new(host, AuthMethod::BearerToken(api_key))?;
        Ok(OpenAiProvider {
            api_client,
            default_model,
            name: OPENAI_PROVIDER_NAME.to_string(),
        })
    }

    fn effective_model<'a>(&'a self, request: &'a GenerateRequest) -> &'a str {
        request.model.as_deref().unwrap_or(&self.default_model)
    }

    fn request_options(&self, model: &str, request: &GenerateRequest) -> RequestOptions {
        let structured = if request.structured_output.is_none() {
            StructuredMode::Unsupported
        } else if model_in_family(
            model,
            STRUCTURED_OUTPUT_MODELS,
            STRUCTURED_OUTPUT_MODEL_PREFIXES,
        ) {
            StructuredMode::JsonSchema
        } else if model_in_family(model, JSON_MODE_ONLY_MODELS, &[]) {
            StructuredMode::JsonObject
        } else {
            tracing::warn!(
                "model {} supports no structured output mode, emitting plain text",
                model
            );
            StructuredMode::Unsupported
        };

        let reasoning_effort = match &request.reasoning {
            Some(reasoning) if reasoning.enabled => {
                if REASONING_MODEL_PREFIXES.iter().any(|p| model.starts_with(p)) {
                    let effort = reasoning.effort.unwrap_or(ReasoningEffort::Medium);
                    Some(effort.as_str().to_string())
                } else {
                    tracing::warn!(
                        "model {} does not support reasoning_effort, dropping reasoning config",
                        model
                    );
                    None
                }
            }
            _ => None,
        };

        RequestOptions {
            use_completion_tokens_field: MAX_COMPLETION_TOKENS_PREFIXES
                .iter()
                .any(|p| model.starts_with(p)),
            structured,
            reasoning_effort,
        }
    }

    fn build_payload(&self, request: &GenerateRequest) -> serde_json::Value {
        let model = self.effective_model(request);
        let opts = self.request_options(model, request);
        create_request(model, request, &opts)
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .api_client
            .api_post("v1/chat/completions", payload)
            .await?;

        match response.status {
            StatusCode::OK => response.payload.ok_or_else(|| {
                ProviderError::RequestFailed("response body is not valid JSON".to_string())
            }),
            status => Err(map_http_error(status, response.payload.as_ref())),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_use: true,
            structured_output: true,
            multimodal: true,
            max_tokens: Some(16384),
        }
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        let payload = self.build_payload(request);
        let json_response = with_backoff("openai generate", || self.post(&payload)).await?;
        parse_response(&json_response)
    }

    async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<ResponseStream, ProviderError> {
        let mut payload = self.build_payload(request);
        payload["stream"] = serde_json::Value::Bool(true);
        payload["stream_options"] = serde_json::json!({"include_usage": true});

        let response = self
            .api_client
            .request("v1/chat/completions")
            .response_post(&payload)
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.json().await.ok();
            return Err(map_http_error(status, body.as_ref()));
        }

        Ok(response_to_stream(response))
    }

    async fn doctor(&self) -> DoctorResult {
        let start = Instant::now();
        match self.api_client.api_get("v1/models").await {
            Ok(response) if response.status == StatusCode::OK => DoctorResult::healthy(
                "OpenAI API is accessible",
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
    use crate::providers::base::{Message, ReasoningConfig, StructuredOutputConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(host: &str) -> OpenAiProvider {
        OpenAiProvider::new(host.to_string(), "sk-test".to_string(), "gpt-5.1".to_string())
            .unwrap()
    }

    fn request_with_model(model: &str) -> GenerateRequest {
        GenerateRequest {
            model: Some(model.to_string()),
            messages: vec![Message::user("hi")],
            max_tokens: Some(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_completion_tokens_routing_for_reasoning_families() {
        let provider = provider_for("https://api.openai.com");

        let payload = provider.build_payload(&request_with_model("o3-mini"));
        assert_eq!(payload["max_completion_tokens"], 100);

        let payload = provider.build_payload(&request_with_model("gpt-4o"));
        assert_eq!(payload["max_tokens"], 100);
    }

    #[test]
    fn test_structured_output_downgrades_for_json_mode_models() {
        let provider = provider_for("https://api.openai.com");

        let mut request = request_with_model("gpt-4-turbo");
        request.structured_output = Some(StructuredOutputConfig::new(
            json!({"type": "object", "properties": {}}),
            "out",
        ));
        let payload = provider.build_payload(&request);
        assert_eq!(payload["response_format"], json!({"type": "json_object"}));

        request.model = Some("gpt-5.1".to_string());
        let payload = provider.build_payload(&request);
        assert_eq!(payload["response_format"]["type"], "json_schema");
    }

    #[test]
    fn test_structured_output_dropped_for_unknown_model() {
        let provider = provider_for("https://api.openai.com");
        let mut request = request_with_model("davinci-002");
        request.structured_output = Some(StructuredOutputConfig::new(
            json!({"type": "object", "properties": {}}),
            "out",
        ));
        let payload = provider.build_payload(&request);
        assert!(payload.get("response_format").is_none());
    }

    #[test]
    fn test_reasoning_effort_defaults_to_medium() {
        let provider = provider_for("https://api.openai.com");
        let mut request = request_with_model("o3");
        request.reasoning = Some(ReasoningConfig {
            enabled: true,
            ..Default::default()
        });
        let payload = provider.build_payload(&request);
        assert_eq!(payload["reasoning_effort"], "medium");
    }

    #[test]
    fn test_reasoning_dropped_for_non_reasoning_model() {
        let provider = provider_for("https://api.openai.com");
        let mut request = request_with_model("gpt-4o");
        request.reasoning = Some(ReasoningConfig {
            enabled: true,
            effort: Some(ReasoningEffort::High),
            ..Default::default()
        });
        let payload = provider.build_payload(&request);
        assert!(payload.get("reasoning_effort").is_none());
    }

    #[tokio::test]
    async fn test_generate_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-5.1",
                "choices": [{
                    "message": {"content": "draft text"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri());
        let response = provider.generate(&request_with_model("gpt-5.1")).await.unwrap();
        assert_eq!(response.text.as_deref(), Some("draft text"));
        assert_eq!(response.usage.unwrap().total_tokens, Some(15));
    }

    #[tokio::test]
    async fn test_generate_maps_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri());
        let err = provider
            .generate(&request_with_model("gpt-5.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
    }
}
