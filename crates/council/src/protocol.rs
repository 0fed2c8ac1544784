//! Result and timing types shared across the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::orchestrator::degradation::FailureEvent;
use crate::orchestrator::health::HealthReport;
use crate::providers::base::{FinishReason, Usage};
use crate::store::RunStatus;

/// Summarization detail levels, in increasing depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryTier {
    /// ~50 tokens, one-liner.
    Gist,
    /// ~150 tokens, key points.
    Findings,
    /// ~300 tokens, actionable items.
    Actions,
    /// ~500 tokens, reasoning included.
    Rationale,
    /// Full detail for the audit trail.
    Audit,
}

impl SummaryTier {
    pub fn token_limit(&self) -> usize {
        match self {
            SummaryTier::Gist => 50,
            SummaryTier::Findings => 150,
            SummaryTier::Actions => 300,
            SummaryTier::Rationale => 500,
            SummaryTier::Audit => 10_000,
        }
    }

    pub fn char_limit(&self) -> usize {
        self.token_limit() * 4
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryTier::Gist => "gist",
            SummaryTier::Findings => "findings",
            SummaryTier::Actions => "actions",
            SummaryTier::Rationale => "rationale",
            SummaryTier::Audit => "audit",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub duration_ms: u64,
}

/// Estimated cost for a run, from recorded token usage and per-provider
/// cost-per-1k weights.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    pub provider_calls: HashMap<String, u32>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Result payload for a council run. Always returned; recoverable failures
/// set `success: false` instead of raising.
#[derive(Debug, Clone, Serialize)]
pub struct CouncilResult {
    pub success: bool,
    pub error: Option<String>,
    /// Validated structured output, present on success.
    pub output: Option<Value>,
    /// Raw drafts keyed by provider name.
    pub drafts: HashMap<String, String>,
    pub critique: Option<String>,
    pub resolved_role: String,
    pub mode: Option<String>,
    pub status: RunStatus,
    pub synthesis_attempts: u32,
    pub retry_count: u32,
    pub duration_ms: u64,
    pub phase_timings: Vec<PhaseTiming>,
    pub validation_errors: Vec<String>,
    /// Provider resolution/call errors keyed by provider name.
    pub provider_errors: HashMap<String, String>,
    pub degradation_events: Vec<FailureEvent>,
    pub finish_reason: Option<FinishReason>,
    pub usage: HashMap<String, Usage>,
    pub cost_estimate: CostEstimate,
    pub run_id: Option<String>,
    /// Artifact ids recorded for this run, for audit.
    pub artifact_ids: Vec<String>,
    /// Preflight health report, when health checks ran.
    pub health: Option<HealthReport>,
}

impl CouncilResult {
    pub fn failure(role: &str, mode: Option<&str>, error: impl Into<String>) -> Self {
        CouncilResult {
            success: false,
            error: Some(error.into()),
            output: None,
            drafts: HashMap::new(),
            critique: None,
            resolved_role: role.to_string(),
            mode: mode.map(str::to_string),
            status: RunStatus::Failed,
            synthesis_attempts: 0,
            retry_count: 0,
            duration_ms: 0,
            phase_timings: Vec::new(),
            validation_errors: Vec::new(),
            provider_errors: HashMap::new(),
            degradation_events: Vec::new(),
            finish_reason: None,
            usage: HashMap::new(),
            cost_estimate: CostEstimate::default(),
            run_id: None,
            artifact_ids: Vec::new(),
            health: None,
        }
    }
}
