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
use super::utils::read_env;

pub const OPENROUTER_PROVIDER_NAME: &str = "openrouter";
pub const OPENROUTER_DEFAULT_MODEL: &str = "anthropic/claude-opus-4-5";
const OPENROUTER_DEFAULT_HOST: &str = "https://openrouter.ai/api";

/// OpenRouter speaks the OpenAI chat-completions dialect and routes
/// structured-output requests to schema-capable upstream models itself.
#[derive(Debug)]
pub struct OpenRouterProvider {
    api_client: ApiClient,
    default_model: String,
    name: String,
}

impl OpenRouterProvider {
    pub fn from_env() -> Result<Self> {
        Self::for_model(OPENROUTER_DEFAULT_MODEL.to_string())
    }

    /// Virtual provider pinned to one OpenRouter model id. Multi-model
    /// councils register several of these, named by model id, so drafts
    /// fan out across distinct upstream LLMs.
    pub fn for_model(model_id: String) -> Result<Self> {
        let api_key = read_env("OPENROUTER_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("OPENROUTER_API_KEY environment variable not set"))?;
        let host =
            read_env("OPENROUTER_HOST").unwrap_or_else(|| OPENROUTER_DEFAULT_HOST.to_string());
        Self::new(host, api_key, model_id)
    }

    pub fn new(host: String, api_key: String, model_id: String) -> Result<Self> {
        let api_client = ApiClient::new(host, AuthMethod::BearerToken(api_key))?;
        let name = if model_id == OPENROUTER_DEFAULT_MODEL {
            OPENROUTER_PROVIDER_NAME.to_string()
        } else {
            model_id.clone()
        };
        Ok(OpenRouterProvider {
            api_client,
            default_model: model_id,
            name,
        })
    }

    /// Named virtual provider regardless of model id.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn build_payload(&self, request: &GenerateRequest) -> serde_json::Value {
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let reasoning_effort = request.reasoning.as_ref().and_then(|r| {
            r.enabled
                .then(|| r.effort.unwrap_or(ReasoningEffort::Medium).as_str().to_string())
        });

        let opts = RequestOptions {
            use_completion_tokens_field: false,
            structured: if request.structured_output.is_some() {
                StructuredMode::JsonSchema
            } else {
                StructuredMode::Unsupported
            },
            reasoning_effort,
        };
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
impl ProviderAdapter for OpenRouterProvider {
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
        let json_response = with_backoff("openrouter generate", || self.post(&payload)).await?;
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
                "OpenRouter API is accessible",
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
