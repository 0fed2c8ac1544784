//! Degradation policy: keeps a run alive when individual providers fail.
//!
//! Decisions key off the typed provider error: permanent failures (auth,
//! billing) are skipped immediately, transient ones (rate limit, network,
//! 5xx) earn bounded retries, and a run aborts only when too few providers
//! remain for the phase to proceed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::providers::errors::ProviderError;

const BASE_RETRY_DELAY: Duration = Duration::from_millis(1000);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationAction {
    /// Proceed without this provider.
    Continue,
    /// Retry with backoff.
    Retry,
    /// Drop this provider for the current phase only.
    Skip,
    /// Abort the entire run.
    Abort,
}

/// Record of one provider failure and how it was handled.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub provider: String,
    pub phase: String,
    pub error_kind: String,
    pub error_message: String,
    pub action: DegradationAction,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for FailureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.error_kind)
    }
}

#[derive(Debug, Clone)]
pub struct DegradationDecision {
    pub action: DegradationAction,
    pub reason: String,
    pub retry_delay: Duration,
}

/// Summary of degradation events attached to the run result.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DegradationReport {
    pub failures: Vec<FailureEvent>,
    pub total_retries: u32,
    pub providers_skipped: Vec<String>,
    pub aborted: bool,
}

impl DegradationReport {
    fn add(&mut self, event: FailureEvent) {
        match event.action {
            DegradationAction::Retry => self.total_retries += 1,
            DegradationAction::Skip => {
                if !self.providers_skipped.contains(&event.provider) {
                    self.providers_skipped.push(event.provider.clone());
                }
            }
            DegradationAction::Abort => self.aborted = true,
            DegradationAction::Continue => {}
        }
        self.failures.push(event);
    }
}

pub struct DegradationPolicy {
    max_retries: u32,
    min_providers_required: usize,
    retry_counts: HashMap<String, u32>,
    report: DegradationReport,
}

impl DegradationPolicy {
    pub fn new(max_retries: u32, min_providers_required: usize) -> Self {
        DegradationPolicy {
            max_retries,
            min_providers_required,
            retry_counts: HashMap::new(),
            report: DegradationReport::default(),
        }
    }

    pub fn report(&self) -> &DegradationReport {
        &self.report
    }

    pub fn into_report(self) -> DegradationReport {
        self.report
    }

    /// Decide how to handle a provider failure, recording the event.
    pub fn decide(
        &mut self,
        provider: &str,
        error: &ProviderError,
        phase: &str,
        remaining_providers: usize,
    ) -> DegradationDecision {
        let retry_key = format!("{}:{}", provider, phase);
        let current_retries = *self.retry_counts.get(&retry_key).unwrap_or(&0);

        let decision = self.determine(error, phase, current_retries, remaining_providers);

        self.report.add(FailureEvent {
            provider: provider.to_string(),
            phase: phase.to_string(),
            error_kind: error.kind().to_string(),
            error_message: truncated(&error.to_string(), 200),
            action: decision.action,
            retry_count: current_retries,
            timestamp: Utc::now(),
        });

        if decision.action == DegradationAction::Retry {
            self.retry_counts.insert(retry_key, current_retries + 1);
        }

        tracing::warn!(
            "provider {} failed in {}: {} (action={:?})",
            provider,
            phase,
            error.kind(),
            decision.action
        );

        decision
    }

    fn determine(
        &self,
        error: &ProviderError,
        phase: &str,
        current_retries: u32,
        remaining_providers: usize,
    ) -> DegradationDecision {
        let critical_phase = matches!(phase, "critique" | "synthesis");

        // Permanent failures: never retry.
        if !error.is_retryable() {
            if remaining_providers == 0 && critical_phase {
                return DegradationDecision {
                    action: DegradationAction::Abort,
                    reason: format!("non-retryable failure in {}: {}", phase, error.kind()),
                    retry_delay: Duration::ZERO,
                };
            }
            return DegradationDecision {
                action: DegradationAction::Skip,
                reason: format!("non-retryable error: {}", error.kind()),
                retry_delay: Duration::ZERO,
            };
        }

        if current_retries < self.max_retries {
            let delay = error.retry_delay().unwrap_or_else(|| {
                (BASE_RETRY_DELAY * 2u32.pow(current_retries)).min(MAX_RETRY_DELAY)
            });
            return DegradationDecision {
                action: DegradationAction::Retry,
                reason: format!(
                    "retryable error ({}), attempt {}",
                    error.kind(),
                    current_retries + 1
                ),
                retry_delay: delay,
            };
        }

        // Retries exhausted.
        if remaining_providers == 0 {
            return DegradationDecision {
                action: DegradationAction::Abort,
                reason: format!("all providers exhausted in {}", phase),
                retry_delay: Duration::ZERO,
            };
        }
        if remaining_providers >= self.min_providers_required {
            return DegradationDecision {
                action: DegradationAction::Continue,
                reason: format!(
                    "continuing with {} remaining provider(s)",
                    remaining_providers
                ),
                retry_delay: Duration::ZERO,
            };
        }
        DegradationDecision {
            action: DegradationAction::Skip,
            reason: "retries exhausted, below minimum providers".to_string(),
            retry_delay: Duration::ZERO,
        }
    }
}

fn truncated(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_skipped_not_retried() {
        let mut policy = DegradationPolicy::new(2, 1);
        let err = ProviderError::Authentication("bad key".to_string());

        let decision = policy.decide("openai", &err, "drafts", 2);
        assert_eq!(decision.action, DegradationAction::Skip);
        assert_eq!(policy.report().providers_skipped, vec!["openai"]);
    }

    #[test]
    fn test_auth_error_aborts_critical_phase_without_providers() {
        let mut policy = DegradationPolicy::new(2, 1);
        let err = ProviderError::Authentication("bad key".to_string());

        let decision = policy.decide("openai", &err, "synthesis", 0);
        assert_eq!(decision.action, DegradationAction::Abort);
        assert!(policy.report().aborted);
    }

    #[test]
    fn test_transient_error_retries_with_backoff() {
        let mut policy = DegradationPolicy::new(2, 1);
        let err = ProviderError::ServerError("502".to_string());

        let first = policy.decide("openai", &err, "drafts", 1);
        assert_eq!(first.action, DegradationAction::Retry);
        assert_eq!(first.retry_delay, Duration::from_millis(1000));

        let second = policy.decide("openai", &err, "drafts", 1);
        assert_eq!(second.action, DegradationAction::Retry);
        assert_eq!(second.retry_delay, Duration::from_millis(2000));

        // Exhausted: continue without this provider.
        let third = policy.decide("openai", &err, "drafts", 1);
        assert_eq!(third.action, DegradationAction::Continue);
        assert_eq!(policy.report().total_retries, 2);
    }

    #[test]
    fn test_rate_limit_hint_overrides_backoff() {
        let mut policy = DegradationPolicy::new(2, 1);
        let err = ProviderError::RateLimitExceeded {
            details: "slow down".to_string(),
            retry_delay: Some(Duration::from_secs(5)),
        };

        let decision = policy.decide("openrouter", &err, "drafts", 1);
        assert_eq!(decision.action, DegradationAction::Retry);
        assert_eq!(decision.retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_exhausted_retries_abort_when_no_providers_remain() {
        let mut policy = DegradationPolicy::new(0, 1);
        let err = ProviderError::NetworkError("down".to_string());

        let decision = policy.decide("openai", &err, "drafts", 0);
        assert_eq!(decision.action, DegradationAction::Abort);
    }

    #[test]
    fn test_failure_event_display_format() {
        let mut policy = DegradationPolicy::new(0, 1);
        let err = ProviderError::Timeout(Duration::from_secs(120));
        policy.decide("B", &err, "drafts", 2);

        let event = &policy.report().failures[0];
        assert_eq!(event.to_string(), "B: timeout");
    }
}
