//! Request/response translation for the OpenAI chat-completions wire format,
//! shared by every OpenAI-compatible adapter.

use async_stream::try_stream;
use futures::TryStreamExt;
use serde_json::{json, Map, Value};
use std::io;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use super::super::base::{
    FinishReason, GenerateRequest, GenerateResponse, ResponseStream, Usage,
};
use super::super::errors::ProviderError;
use crate::schema::transform::to_openai_strict;

/// How the adapter decided to express structured output for this model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredMode {
    /// Native schema enforcement via `response_format.json_schema`.
    JsonSchema,
    /// Schema-free `{"type": "json_object"}` fallback.
    JsonObject,
    /// Plain emission; the caller validates post-hoc.
    Unsupported,
}

/// Adapter decisions the format layer cannot make on its own.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Reasoning-oriented model families take `max_completion_tokens`.
    pub use_completion_tokens_field: bool,
    pub structured: StructuredMode,
    pub reasoning_effort: Option<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            use_completion_tokens_field: false,
            structured: StructuredMode::Unsupported,
            reasoning_effort: None,
        }
    }
}

pub fn create_request(model: &str, request: &GenerateRequest, opts: &RequestOptions) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
        .collect();

    let mut payload = Map::new();
    payload.insert("model".to_string(), json!(model));
    payload.insert("messages".to_string(), json!(messages));

    if let Some(max_tokens) = request.max_tokens {
        let field = if opts.use_completion_tokens_field {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        payload.insert(field.to_string(), json!(max_tokens));
    }

    if let Some(temperature) = request.temperature {
        payload.insert("temperature".to_string(), json!(temperature));
    }

    if let Some(structured) = &request.structured_output {
        match opts.structured {
            StructuredMode::JsonSchema => {
                payload.insert(
                    "response_format".to_string(),
                    json!({
                        "type": "json_schema",
                        "json_schema": {
                            "name": structured.name,
                            "strict": structured.strict,
                            "schema": to_openai_strict(&structured.json_schema),
                        }
                    }),
                );
            }
            StructuredMode::JsonObject => {
                payload.insert("response_format".to_string(), json!({"type": "json_object"}));
            }
            StructuredMode::Unsupported => {}
        }
    } else if let Some(legacy) = &request.response_format {
        payload.insert("response_format".to_string(), legacy.clone());
    }

    if let Some(effort) = &opts.reasoning_effort {
        payload.insert("reasoning_effort".to_string(), json!(effort));
    }

    Value::Object(payload)
}

pub fn parse_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" | "end_turn" => FinishReason::Stop,
        "length" | "max_tokens" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        _ => FinishReason::Error,
    }
}

pub fn get_usage(response: &Value) -> Option<Usage> {
    let usage = response.get("usage")?;
    let input = usage.get("prompt_tokens").and_then(|v| v.as_u64());
    let output = usage.get("completion_tokens").and_then(|v| v.as_u64());
    Some(Usage::new(
        input.map(|v| v as u32),
        output.map(|v| v as u32),
    ))
}

pub fn parse_response(response: &Value) -> Result<GenerateResponse, ProviderError> {
    let choice = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            ProviderError::RequestFailed("response contained no choices".to_string())
        })?;

    let message = choice.get("message").ok_or_else(|| {
        ProviderError::RequestFailed("response choice contained no message".to_string())
    })?;

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string);
    let tool_calls = message.get("tool_calls").cloned();
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|r| r.as_str())
        .map(parse_finish_reason);

    Ok(GenerateResponse {
        content: text.clone().map(Value::String),
        text,
        tool_calls,
        usage: get_usage(response),
        model: super::super::utils::get_model(response),
        finish_reason,
        raw: Some(response.clone()),
    })
}

/// Decode an SSE chat-completions stream into partial responses.
///
/// Each `data:` line carries a chunk with a text delta; the terminal
/// `[DONE]` sentinel ends the stream. With `stream_options.include_usage`
/// the final chunk carries usage and an empty choices array.
pub fn response_to_stream(response: reqwest::Response) -> ResponseStream {
    let byte_stream = response.bytes_stream().map_err(io::Error::other);

    Box::pin(try_stream! {
        let reader = StreamReader::new(byte_stream);
        let mut lines = FramedRead::new(reader, LinesCodec::new());

        while let Some(line) = lines.next().await {
            let line = line.map_err(|e| {
                ProviderError::RequestFailed(format!("stream decode error: {}", e))
            })?;
            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                continue;
            };
            if data.is_empty() || data == "[DONE]" {
                continue;
            }

            let chunk: Value = serde_json::from_str(data).map_err(|e| {
                ProviderError::RequestFailed(format!("invalid stream chunk: {}", e))
            })?;

            let choice = chunk.get("choices").and_then(|c| c.as_array()).and_then(|c| c.first());
            let delta = choice
                .and_then(|c| c.get("delta"))
                .and_then(|d| d.get("content"))
                .and_then(|c| c.as_str())
                .map(str::to_string);
            let finish_reason = choice
                .and_then(|c| c.get("finish_reason"))
                .and_then(|r| r.as_str())
                .map(parse_finish_reason);
            let usage = get_usage(&chunk);

            if delta.is_some() || finish_reason.is_some() || usage.is_some() {
                yield GenerateResponse {
                    text: delta,
                    usage,
                    finish_reason,
                    ..Default::default()
                };
            }
        }
    })
}
