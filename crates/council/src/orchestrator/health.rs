//! Preflight provider health checks.
//!
//! Runs every adapter's `doctor()` in parallel under a short deadline and
//! drops unusable providers before the draft phase spends money on them.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::providers::base::ProviderAdapter;

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    /// Responding but slow or flaky; still usable.
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub status: HealthStatus,
    pub message: String,
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

impl ProviderHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self.status, HealthStatus::Ok | HealthStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub providers: Vec<ProviderHealth>,
    pub all_healthy: bool,
    pub usable_count: usize,
    pub total_count: usize,
    pub check_duration_ms: u64,
}

async fn check_one(name: &str, adapter: &Arc<dyn ProviderAdapter>, timeout: Duration) -> ProviderHealth {
    let start = Instant::now();
    match tokio::time::timeout(timeout, adapter.doctor()).await {
        Ok(result) => {
            let status = if result.ok {
                HealthStatus::Ok
            } else {
                HealthStatus::Down
            };
            ProviderHealth {
                provider: name.to_string(),
                status,
                message: result.message,
                latency_ms: result
                    .latency_ms
                    .or(Some(start.elapsed().as_millis() as u64)),
                checked_at: Utc::now(),
            }
        }
        Err(_) => ProviderHealth {
            provider: name.to_string(),
            status: HealthStatus::Degraded,
            message: format!("health check timed out after {:?}", timeout),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            checked_at: Utc::now(),
        },
    }
}

/// Check all providers in parallel and return the usable subset with the
/// full report.
pub async fn preflight_check(
    providers: &[(String, Arc<dyn ProviderAdapter>)],
    timeout: Duration,
) -> (Vec<(String, Arc<dyn ProviderAdapter>)>, HealthReport) {
    let start = Instant::now();

    let checks = providers
        .iter()
        .map(|(name, adapter)| check_one(name, adapter, timeout));
    let results = join_all(checks).await;

    let usable: Vec<(String, Arc<dyn ProviderAdapter>)> = providers
        .iter()
        .zip(&results)
        .filter(|(_, health)| health.is_usable())
        .map(|((name, adapter), _)| (name.clone(), Arc::clone(adapter)))
        .collect();

    let report = HealthReport {
        all_healthy: results.iter().all(|h| h.status == HealthStatus::Ok),
        usable_count: usable.len(),
        total_count: results.len(),
        check_duration_ms: start.elapsed().as_millis() as u64,
        providers: results,
    };

    tracing::info!(
        "health check: {}/{} providers usable",
        report.usable_count,
        report.total_count
    );

    (usable, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{
        DoctorResult, GenerateRequest, GenerateResponse, ProviderCapabilities,
    };
    use crate::providers::errors::ProviderError;
    use async_trait::async_trait;

    struct FixedHealthProvider {
        name: String,
        healthy: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ProviderAdapter for FixedHealthProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, ProviderError> {
            Ok(GenerateResponse::default())
        }

        async fn doctor(&self) -> DoctorResult {
            tokio::time::sleep(self.delay).await;
            if self.healthy {
                DoctorResult::healthy("ok", 1)
            } else {
                DoctorResult::unhealthy("API key missing")
            }
        }
    }

    fn provider(name: &str, healthy: bool, delay: Duration) -> (String, Arc<dyn ProviderAdapter>) {
        (
            name.to_string(),
            Arc::new(FixedHealthProvider {
                name: name.to_string(),
                healthy,
                delay,
            }),
        )
    }

    #[tokio::test]
    async fn test_down_provider_dropped() {
        let providers = vec![
            provider("good", true, Duration::ZERO),
            provider("bad", false, Duration::ZERO),
        ];

        let (usable, report) = preflight_check(&providers, Duration::from_secs(1)).await;
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].0, "good");
        assert!(!report.all_healthy);
        assert_eq!(report.usable_count, 1);
        assert_eq!(report.total_count, 2);
    }

    #[tokio::test]
    async fn test_slow_doctor_degraded_but_usable() {
        let providers = vec![provider("slow", true, Duration::from_millis(100))];

        let (usable, report) = preflight_check(&providers, Duration::from_millis(10)).await;
        assert_eq!(usable.len(), 1);
        assert_eq!(report.providers[0].status, HealthStatus::Degraded);
    }
}
