use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use super::errors::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Canonical message format used across providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Capability flags and limits declared by a provider adapter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub streaming: bool,
    pub tool_use: bool,
    pub structured_output: bool,
    pub multimodal: bool,
    pub max_tokens: Option<u32>,
}

impl ProviderCapabilities {
    /// `max_tokens` counts as supported when the provider exposes a limit.
    pub fn supports(&self, capability: &str) -> bool {
        match capability {
            "streaming" => self.streaming,
            "tool_use" => self.tool_use,
            "structured_output" => self.structured_output,
            "multimodal" => self.multimodal,
            "max_tokens" => self.max_tokens.is_some(),
            _ => false,
        }
    }
}

/// Provider-agnostic structured output request.
///
/// Each adapter translates this into its backend's dialect:
/// OpenAI-compatible `response_format.json_schema`, Claude `output_format`
/// with a beta header, Gemini `responseSchema` inside `generationConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredOutputConfig {
    pub json_schema: Value,
    pub name: String,
    pub strict: bool,
}

impl StructuredOutputConfig {
    pub fn new(json_schema: Value, name: impl Into<String>) -> Self {
        StructuredOutputConfig {
            json_schema,
            name: name.into(),
            strict: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingLevel::Minimal => "minimal",
            ThinkingLevel::Low => "low",
            ThinkingLevel::Medium => "medium",
            ThinkingLevel::High => "high",
        }
    }
}

/// Provider-agnostic reasoning/thinking request.
///
/// Effort-style backends get an effort token, token-budget backends get a
/// clamped integer, thinking-level backends get the enumerated level.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub budget_tokens: Option<u32>,
    #[serde(default)]
    pub thinking_level: Option<ThinkingLevel>,
}

/// Input parameters for a generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
    pub structured_output: Option<StructuredOutputConfig>,
    pub reasoning: Option<ReasoningConfig>,
    /// Legacy opaque response_format, passed through verbatim when set.
    pub response_format: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl Usage {
    pub fn new(input_tokens: Option<u32>, output_tokens: Option<u32>) -> Self {
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        };
        Usage {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
}

/// Provider-agnostic response payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateResponse {
    pub text: Option<String>,
    pub content: Option<Value>,
    pub tool_calls: Option<Value>,
    pub usage: Option<Usage>,
    pub model: Option<String>,
    pub finish_reason: Option<FinishReason>,
    /// Raw provider payload kept for audit.
    pub raw: Option<Value>,
}

/// Health check result for a provider.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorResult {
    pub ok: bool,
    pub message: String,
    pub latency_ms: Option<u64>,
    pub details: Option<Value>,
}

impl DoctorResult {
    pub fn healthy(message: impl Into<String>, latency_ms: u64) -> Self {
        DoctorResult {
            ok: true,
            message: message.into(),
            latency_ms: Some(latency_ms),
            details: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        DoctorResult {
            ok: false,
            message: message.into(),
            latency_ms: None,
            details: None,
        }
    }
}

pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<GenerateResponse, ProviderError>> + Send>>;

/// Uniform contract over heterogeneous LLM backends.
///
/// Adapters own all backend-specific translation: message layout, max-token
/// field routing, structured-output dialect, and reasoning negotiation.
/// Dialect differences must not leak upward.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable, unique provider identifier.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn generate(&self, request: &GenerateRequest)
        -> Result<GenerateResponse, ProviderError>;

    /// Yield partial responses as they arrive. Adapters without server-side
    /// streaming keep the default.
    async fn generate_stream(
        &self,
        _request: &GenerateRequest,
    ) -> Result<ResponseStream, ProviderError> {
        Err(ProviderError::NotImplemented(format!(
            "{} does not support streaming",
            self.name()
        )))
    }

    fn supports(&self, capability: &str) -> bool {
        self.capabilities().supports(capability)
    }

    async fn doctor(&self) -> DoctorResult;
}

impl std::fmt::Debug for dyn ProviderAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAdapter").field("name", &self.name()).finish()
    }
}
