//! End-to-end council runs over scripted provider adapters.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use council::config::{CouncilConfig, RunOptions};
use council::council::Council;
use council::providers::base::{
    DoctorResult, FinishReason, GenerateRequest, GenerateResponse, ProviderAdapter,
    ProviderCapabilities, Usage,
};
use council::providers::errors::ProviderError;
use council::providers::registry::ProviderRegistry;
use council::store::RunStatus;

/// Adapter that replays a fixed script of responses, one per call.
struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<GenerateResponse, ProviderError>>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    fn new(name: &str, script: Vec<Result<GenerateResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(ScriptedProvider {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            delay: None,
        })
    }

    fn hanging(name: &str) -> Arc<Self> {
        Arc::new(ScriptedProvider {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            delay: Some(Duration::from_secs(600)),
        })
    }
}

fn text_response(text: &str) -> Result<GenerateResponse, ProviderError> {
    Ok(GenerateResponse {
        text: Some(text.to_string()),
        usage: Some(Usage::new(Some(100), Some(50))),
        model: Some("scripted-model".to_string()),
        finish_reason: Some(FinishReason::Stop),
        ..Default::default()
    })
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            structured_output: true,
            max_tokens: Some(8192),
            ..Default::default()
        }
    }

    async fn generate(
        &self,
        _request: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| text_response("unscripted response"))
    }

    async fn doctor(&self) -> DoctorResult {
        DoctorResult::healthy("scripted", 0)
    }
}

fn valid_synthesis() -> String {
    json!({"solution": "use a token bucket", "confidence": "high"}).to_string()
}

async fn council_with(
    providers: Vec<(&str, Arc<ScriptedProvider>)>,
    artifact_dir: &TempDir,
) -> Council {
    let mut registry = ProviderRegistry::new();
    let mut names = Vec::new();
    for (name, provider) in providers {
        registry.register_instance(name, provider);
        names.push(name.to_string());
    }

    let mut config = CouncilConfig::default();
    config.providers = Some(names);
    config.artifact_dir = Some(artifact_dir.path().to_path_buf());

    Council::with_registry(config, registry).await.unwrap()
}

#[tokio::test]
async fn test_happy_path_three_providers() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new(
        "a",
        vec![
            text_response("draft from a"),
            text_response("critique: draft b ignores backpressure"),
            text_response(&valid_synthesis()),
        ],
    );
    let b = ScriptedProvider::new("b", vec![text_response("draft from b")]);
    let c = ScriptedProvider::new("c", vec![text_response("draft from c")]);

    let council = council_with(vec![("a", a), ("b", b), ("c", c)], &dir).await;
    let result = council
        .run("Design a rate limiter", "drafter", Some("impl"), None)
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.drafts.len(), 3);
    assert_eq!(result.drafts["b"], "draft from b");
    assert!(result.critique.as_deref().unwrap().contains("backpressure"));
    assert_eq!(result.output.as_ref().unwrap()["confidence"], "high");
    assert_eq!(result.synthesis_attempts, 1);
    assert_eq!(result.retry_count, 0);
    assert!(result.validation_errors.is_empty());

    // One artifact per draft, one critique, one synthesis.
    assert_eq!(result.artifact_ids.len(), 5);
    assert!(result.run_id.is_some());

    let phases: Vec<&str> = result
        .phase_timings
        .iter()
        .map(|t| t.phase.as_str())
        .collect();
    assert_eq!(phases, vec!["drafts", "critique", "synthesis"]);

    // Usage was accumulated for every provider.
    assert_eq!(result.usage.len(), 3);
    assert_eq!(result.cost_estimate.tokens, 3 * 150 + 2 * 150);
}

#[tokio::test]
async fn test_partial_degradation_continues() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new(
        "a",
        vec![
            text_response("draft from a"),
            text_response("critique text"),
            text_response(&valid_synthesis()),
        ],
    );
    let b = ScriptedProvider::new(
        "b",
        vec![Err(ProviderError::Timeout(Duration::from_secs(120)))],
    );
    let c = ScriptedProvider::new("c", vec![text_response("draft from c")]);

    let council = council_with(vec![("a", a), ("b", b), ("c", c)], &dir).await;
    let result = council
        .run("Design a rate limiter", "drafter", Some("impl"), None)
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.drafts.len(), 2);
    assert!(!result.drafts.contains_key("b"));
    assert!(result.provider_errors.contains_key("b"));
    assert!(result
        .degradation_events
        .iter()
        .any(|e| e.to_string() == "b: timeout"));
    // 2 drafts + critique + synthesis.
    assert_eq!(result.artifact_ids.len(), 4);
}

#[tokio::test]
async fn test_zero_drafts_is_fatal() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new(
        "a",
        vec![Err(ProviderError::NetworkError("down".to_string()))],
    );
    let b = ScriptedProvider::new(
        "b",
        vec![Err(ProviderError::NetworkError("down".to_string()))],
    );

    let council = council_with(vec![("a", a), ("b", b)], &dir).await;
    let result = council.run("task", "drafter", Some("impl"), None).await;

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error.is_some());
    assert!(result.critique.is_none());
}

#[tokio::test]
async fn test_draft_failure_without_degradation_is_fatal() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new("a", vec![text_response("draft from a")]);
    let b = ScriptedProvider::new(
        "b",
        vec![Err(ProviderError::NetworkError("down".to_string()))],
    );

    let council = council_with(vec![("a", a), ("b", b)], &dir).await;
    let options = RunOptions {
        enable_degradation: Some(false),
        ..Default::default()
    };
    let result = council
        .run("task", "drafter", Some("impl"), Some(options))
        .await;

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_synthesis_retry_recovers() {
    let dir = TempDir::new().unwrap();
    // First synthesis attempt is missing the required "confidence" field.
    let a = ScriptedProvider::new(
        "a",
        vec![
            text_response("draft from a"),
            text_response("critique text"),
            text_response(&json!({"solution": "incomplete"}).to_string()),
            text_response(&valid_synthesis()),
        ],
    );

    let council = council_with(vec![("a", a)], &dir).await;
    let result = council.run("task", "drafter", Some("impl"), None).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.synthesis_attempts, 2);
    assert_eq!(result.retry_count, 1);
    assert!(result.validation_errors.is_empty());
    // Draft + critique + two synthesis attempts all preserved.
    assert_eq!(result.artifact_ids.len(), 4);
}

#[tokio::test]
async fn test_max_retries_zero_single_attempt() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new(
        "a",
        vec![
            text_response("draft from a"),
            text_response("critique text"),
            text_response(&json!({"solution": "incomplete"}).to_string()),
            // Would succeed, but must never be reached.
            text_response(&valid_synthesis()),
        ],
    );

    let council = council_with(vec![("a", a)], &dir).await;
    let options = RunOptions {
        max_retries: Some(0),
        ..Default::default()
    };
    let result = council
        .run("task", "drafter", Some("impl"), Some(options))
        .await;

    assert!(!result.success);
    assert_eq!(result.synthesis_attempts, 1);
    assert!(!result.validation_errors.is_empty());
    assert!(result
        .validation_errors
        .iter()
        .any(|e| e.contains("confidence")));
}

#[tokio::test]
async fn test_synthesis_parse_failure_feeds_retry() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new(
        "a",
        vec![
            text_response("draft from a"),
            text_response("critique text"),
            text_response("this is not json at all"),
            text_response(&valid_synthesis()),
        ],
    );

    let council = council_with(vec![("a", a)], &dir).await;
    let result = council.run("task", "drafter", Some("impl"), None).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.retry_count, 1);
}

#[tokio::test]
async fn test_alias_resolves_to_canonical_role_and_mode() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new(
        "a",
        vec![
            text_response("draft from a"),
            text_response("critique text"),
            text_response(&valid_synthesis()),
        ],
    );

    let council = council_with(vec![("a", a)], &dir).await;
    let result = council.run("task", "implementer", None, None).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.resolved_role, "drafter");
    assert_eq!(result.mode.as_deref(), Some("impl"));
}

#[tokio::test]
async fn test_unknown_mode_fails_immediately() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new("a", vec![]);

    let council = council_with(vec![("a", a)], &dir).await;
    let result = council.run("task", "drafter", Some("sing"), None).await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("unknown mode"));
    assert!(result.drafts.is_empty());
}

#[tokio::test]
async fn test_global_timeout_preserves_completed_drafts() {
    let dir = TempDir::new().unwrap();
    let fast = ScriptedProvider::new("fast", vec![text_response("quick draft")]);
    let slow = ScriptedProvider::hanging("slow");

    let council = council_with(vec![("fast", fast), ("slow", slow)], &dir).await;
    let options = RunOptions {
        global_timeout: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    let result = council
        .run("task", "drafter", Some("impl"), Some(options))
        .await;

    assert!(!result.success);
    assert_eq!(result.status, RunStatus::TimedOut);
    assert!(result.error.as_deref().unwrap().contains("deadline"));
    // The fast provider's draft survived the cancellation.
    assert_eq!(result.drafts.len(), 1);
    assert!(result.drafts.contains_key("fast"));
    assert_eq!(result.artifact_ids.len(), 1);
}

#[tokio::test]
async fn test_doctor_reports_every_provider() {
    let dir = TempDir::new().unwrap();
    let a = ScriptedProvider::new("a", vec![]);
    let b = ScriptedProvider::new("b", vec![]);

    let council = council_with(vec![("a", a), ("b", b)], &dir).await;
    let report = council.doctor().await;

    assert_eq!(report.len(), 2);
    assert!(report["a"].ok);
    assert!(report["b"].ok);
}
