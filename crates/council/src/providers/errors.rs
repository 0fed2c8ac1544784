use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Rate limit exceeded: {details}")]
    RateLimitExceeded {
        details: String,
        retry_delay: Option<Duration>,
    },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Credits exhausted: {0}")]
    CreditsExhausted(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Unsupported operation: {0}")]
    NotImplemented(String),
}

impl ProviderError {
    /// Stable short name for logs and degradation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Authentication(_) => "auth",
            ProviderError::ContextLengthExceeded(_) => "context_length",
            ProviderError::RateLimitExceeded { .. } => "rate_limit",
            ProviderError::ServerError(_) => "server",
            ProviderError::NetworkError(_) => "network",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::RequestFailed(_) => "request",
            ProviderError::CreditsExhausted(_) => "billing",
            ProviderError::ModelUnavailable(_) => "model_unavailable",
            ProviderError::NotImplemented(_) => "not_implemented",
        }
    }

    /// Whether a fresh attempt against the same provider can succeed.
    ///
    /// Auth and billing failures are permanent until the operator fixes
    /// them; retrying those burns money and time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimitExceeded { .. }
                | ProviderError::ServerError(_)
                | ProviderError::NetworkError(_)
        )
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimitExceeded { retry_delay, .. } => *retry_delay,
            _ => None,
        }
    }
}

fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || (err.status().is_none() && err.is_request())
}

fn provider_error_from_reqwest(error: &reqwest::Error) -> ProviderError {
    if is_network_error(error) {
        let msg = if error.is_timeout() {
            "request timed out".to_string()
        } else if error.is_connect() {
            match error.url().and_then(|u| u.host_str().map(str::to_string)) {
                Some(host) => format!("could not connect to {}", host),
                None => "could not connect to the provider".to_string(),
            }
        } else {
            "network error".to_string()
        };
        return ProviderError::NetworkError(msg);
    }

    let msg = match error.status() {
        Some(status) => format!("{} (status: {})", error, status),
        None => error.to_string(),
    };
    ProviderError::RequestFailed(msg)
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        provider_error_from_reqwest(&error)
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(error: anyhow::Error) -> Self {
        if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
            return provider_error_from_reqwest(reqwest_err);
        }
        ProviderError::RequestFailed(error.to_string())
    }
}

/// Pull a human-readable message out of a provider error body.
///
/// Both OpenAI-shaped (`{"error": {"message": ...}}`) and Google-shaped
/// (`{"error": {"status": ..., "message": ...}}`) payloads resolve here.
fn error_message(payload: Option<&Value>) -> Option<String> {
    let payload = payload?;
    payload
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| payload.get("message").and_then(|m| m.as_str()))
        .map(str::to_string)
}

/// Map a non-2xx HTTP response to a typed error.
pub fn map_http_error(status: StatusCode, payload: Option<&Value>) -> ProviderError {
    let detail = error_message(payload).unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(detail)
        }
        StatusCode::PAYMENT_REQUIRED => ProviderError::CreditsExhausted(detail),
        StatusCode::NOT_FOUND => ProviderError::ModelUnavailable(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimitExceeded {
            details: detail,
            retry_delay: None,
        },
        StatusCode::BAD_REQUEST => {
            let lower = detail.to_lowercase();
            if lower.contains("too long") || lower.contains("too many") {
                ProviderError::ContextLengthExceeded(detail)
            } else if lower.contains("quota") || lower.contains("billing") {
                ProviderError::CreditsExhausted(detail)
            } else {
                ProviderError::RequestFailed(detail)
            }
        }
        s if s.is_server_error() => ProviderError::ServerError(detail),
        _ => ProviderError::RequestFailed(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_http_error_auth() {
        let err = map_http_error(StatusCode::UNAUTHORIZED, None);
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_map_http_error_rate_limit_is_retryable() {
        let body = json!({"error": {"message": "slow down"}});
        let err = map_http_error(StatusCode::TOO_MANY_REQUESTS, Some(&body));
        assert_eq!(err.kind(), "rate_limit");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_map_http_error_context_length() {
        let body = json!({"error": {"message": "prompt is too long: 250000 tokens"}});
        let err = map_http_error(StatusCode::BAD_REQUEST, Some(&body));
        assert!(matches!(err, ProviderError::ContextLengthExceeded(_)));
    }

    #[test]
    fn test_map_http_error_server() {
        let err = map_http_error(StatusCode::BAD_GATEWAY, None);
        assert!(matches!(err, ProviderError::ServerError(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_billing_not_retryable() {
        let err = map_http_error(StatusCode::PAYMENT_REQUIRED, None);
        assert_eq!(err.kind(), "billing");
        assert!(!err.is_retryable());
    }
}
