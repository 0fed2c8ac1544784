//! Three-phase deliberation engine: parallel drafts, adversarial critique,
//! schema-validated synthesis with retry.

use futures::future::join_all;
use indoc::indoc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::degradation::{DegradationAction, DegradationPolicy, FailureEvent};
use super::health::{preflight_check, HealthReport, DEFAULT_HEALTH_TIMEOUT};
use crate::config::CouncilConfig;
use crate::config::RunOptions;
use crate::error::CouncilError;
use crate::model::{ModelCatalog, ModelPack};
use crate::protocol::{CostEstimate, CouncilResult, PhaseTiming, SummaryTier};
use crate::providers::base::{
    DoctorResult, FinishReason, GenerateRequest, GenerateResponse, Message, ProviderAdapter,
    StructuredOutputConfig, Usage,
};
use crate::providers::errors::ProviderError;
use crate::providers::openrouter::OpenRouterProvider;
use crate::providers::registry::ProviderRegistry;
use crate::roles::{ResolvedRole, RoleRegistry};
use crate::schema::{extract_json_object, validate_instance, SchemaCatalog};
use crate::store::{summarize, ArtifactStore, Phase, RunStatus};

const CRITIQUE_SYSTEM_PROMPT: &str = indoc! {"
    You are an adversarial reviewer. Identify errors, gaps, contradictions,
    and schema violations across the drafts. You MUST find at least one flaw.
    Attack ideas, not sources. Provide concrete fixes.
"};

const SYNTHESIS_SYSTEM_PROMPT: &str = indoc! {"
    You are the synthesizer. Combine the drafts and the critique into a
    single response, weighing arguments by evidence quality rather than
    source. Return ONLY valid JSON that matches the provided schema.
"};

type SharedAdapter = Arc<dyn ProviderAdapter>;
type ProviderSet = Vec<(String, SharedAdapter)>;

/// Coordinates multi-provider council runs.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    roles: Arc<RoleRegistry>,
    schemas: Arc<SchemaCatalog>,
    store: Option<Arc<ArtifactStore>>,
    models: ModelCatalog,
    config: CouncilConfig,
}

/// Mutable per-run state, shared across phases so partial results survive a
/// global-deadline cancellation.
#[derive(Default, Clone)]
struct RunState {
    drafts: HashMap<String, String>,
    draft_artifacts: HashMap<String, String>,
    critique: Option<String>,
    output: Option<Value>,
    finish_reason: Option<FinishReason>,
    synthesis_attempts: u32,
    validation_errors: Vec<String>,
    provider_errors: HashMap<String, String>,
    artifact_ids: Vec<String>,
    usage: HashMap<String, Usage>,
    calls: HashMap<String, u32>,
    phase_timings: Vec<PhaseTiming>,
}

type SharedState = Arc<Mutex<RunState>>;
type SharedPolicy = Arc<std::sync::Mutex<Option<DegradationPolicy>>>;

enum Fatal {
    Message(String),
    GlobalTimeout(Duration),
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        roles: Arc<RoleRegistry>,
        schemas: Arc<SchemaCatalog>,
        store: Option<Arc<ArtifactStore>>,
        models: ModelCatalog,
        config: CouncilConfig,
    ) -> Self {
        Orchestrator {
            registry,
            roles,
            schemas,
            store,
            models,
            config,
        }
    }

    /// Run the full drafts -> critique -> synthesis workflow.
    ///
    /// Always returns a result; recoverable failures set `success: false`.
    pub async fn run(
        &self,
        task: &str,
        subagent: &str,
        mode: Option<&str>,
        options: Option<&RunOptions>,
    ) -> CouncilResult {
        let started = Instant::now();
        let cfg = self.config.merged(options);

        if let Err(err) = cfg.validate() {
            return CouncilResult::failure(subagent, mode, err.to_string());
        }

        let resolved = match self.roles.resolve(subagent, mode) {
            Ok(resolved) => resolved,
            Err(err) => return CouncilResult::failure(subagent, mode, err.to_string()),
        };
        let role_name = resolved.role.name.clone();
        let effective_mode = resolved.mode.clone();

        let schema = match resolved
            .role
            .schema
            .as_deref()
            .map(|name| self.schemas.load(name))
            .transpose()
        {
            Ok(schema) => schema,
            Err(err) => {
                return CouncilResult::failure(
                    &role_name,
                    effective_mode.as_deref(),
                    format!("failed to load schema: {}", err),
                )
            }
        };

        let mut providers = match self.resolve_providers(&cfg, &resolved) {
            Ok(providers) => providers,
            Err(err) => {
                return CouncilResult::failure(&role_name, effective_mode.as_deref(), err.to_string())
            }
        };
        if providers.is_empty() {
            return CouncilResult::failure(
                &role_name,
                effective_mode.as_deref(),
                "no usable providers configured",
            );
        }

        let store = if cfg.enable_artifacts {
            self.store.clone()
        } else {
            None
        };
        let run_id = match &store {
            Some(store) => {
                if let Err(err) = store.sweep_stale_runs(cfg.stale_threshold).await {
                    tracing::debug!("stale-run sweep failed: {}", err);
                }
                match store
                    .create_run(&role_name, effective_mode.as_deref(), task)
                    .await
                {
                    Ok(run) => Some(run.run_id),
                    Err(err) => {
                        tracing::warn!("artifact store unavailable for this run: {}", err);
                        None
                    }
                }
            }
            None => None,
        };

        let mut health: Option<HealthReport> = None;
        if cfg.enable_health_check {
            let (usable, report) = preflight_check(&providers, DEFAULT_HEALTH_TIMEOUT).await;
            providers = usable;
            health = Some(report);
            if providers.is_empty() {
                return CouncilResult {
                    health,
                    run_id,
                    ..CouncilResult::failure(
                        &role_name,
                        effective_mode.as_deref(),
                        "no providers passed the preflight health check",
                    )
                };
            }
        }

        let state: SharedState = Arc::new(Mutex::new(RunState::default()));
        let policy: SharedPolicy = Arc::new(std::sync::Mutex::new(
            cfg.enable_degradation
                .then(|| DegradationPolicy::new(0, 1)),
        ));

        let execution = self.execute(
            task,
            &cfg,
            &resolved,
            schema.as_ref(),
            &providers,
            run_id.as_deref(),
            &store,
            &state,
            &policy,
        );

        let outcome = match cfg.global_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, execution).await {
                Ok(outcome) => outcome,
                // Outstanding provider calls are dropped with the future.
                Err(_) => Err(Fatal::GlobalTimeout(deadline)),
            },
            None => execution.await,
        };

        let state = state.lock().await.clone();
        let degradation_events: Vec<FailureEvent> = policy
            .lock()
            .expect("degradation lock poisoned")
            .as_ref()
            .map(|p| p.report().failures.clone())
            .unwrap_or_default();

        let (status, error) = match &outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(Fatal::Message(message)) => (RunStatus::Failed, Some(message.clone())),
            Err(Fatal::GlobalTimeout(deadline)) => (
                RunStatus::TimedOut,
                Some(CouncilError::GlobalTimeout(*deadline).to_string()),
            ),
        };

        if let (Some(store), Some(run_id)) = (&store, run_id.as_deref()) {
            let timings_json = serde_json::to_string(&state.phase_timings).ok();
            if let Err(err) = store
                .complete_run(run_id, status, error.as_deref(), timings_json.as_deref())
                .await
            {
                tracing::debug!("failed to complete run in artifact store: {}", err);
            }
        }

        let cost_estimate = build_cost_estimate(&cfg, &state.usage, &state.calls);

        CouncilResult {
            success: status == RunStatus::Completed,
            error,
            output: state.output,
            drafts: state.drafts,
            critique: state.critique,
            resolved_role: role_name,
            mode: effective_mode,
            status,
            synthesis_attempts: state.synthesis_attempts,
            retry_count: state.synthesis_attempts.saturating_sub(1),
            duration_ms: started.elapsed().as_millis() as u64,
            phase_timings: state.phase_timings,
            validation_errors: state.validation_errors,
            provider_errors: state.provider_errors,
            degradation_events,
            finish_reason: state.finish_reason,
            usage: state.usage,
            cost_estimate,
            run_id,
            artifact_ids: state.artifact_ids,
            health,
        }
    }

    /// Check availability of every configured provider.
    pub async fn doctor(&self) -> HashMap<String, DoctorResult> {
        let names = self
            .config
            .providers
            .clone()
            .unwrap_or_else(|| self.registry.list());

        let checks = names.into_iter().map(|name| async move {
            match self.registry.get(&name) {
                Ok(adapter) => {
                    let result = adapter.doctor().await;
                    (name, result)
                }
                Err(err) => (name.clone(), DoctorResult::unhealthy(err.to_string())),
            }
        });
        join_all(checks).await.into_iter().collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        task: &str,
        cfg: &CouncilConfig,
        role: &ResolvedRole,
        schema: Option<&Value>,
        providers: &ProviderSet,
        run_id: Option<&str>,
        store: &Option<Arc<ArtifactStore>>,
        state: &SharedState,
        policy: &SharedPolicy,
    ) -> Result<(), Fatal> {
        let phase_start = Instant::now();
        self.run_drafts(task, cfg, role, schema, providers, run_id, store, state, policy)
            .await?;
        record_timing(state, "drafts", phase_start).await;

        let phase_start = Instant::now();
        self.run_critique(task, cfg, role, schema, providers, run_id, store, state, policy)
            .await?;
        record_timing(state, "critique", phase_start).await;

        let phase_start = Instant::now();
        self.run_synthesis(task, cfg, role, schema, providers, run_id, store, state, policy)
            .await?;
        record_timing(state, "synthesis", phase_start).await;

        Ok(())
    }

    /// Phase 1: every resolved provider drafts independently, in parallel.
    #[allow(clippy::too_many_arguments)]
    async fn run_drafts(
        &self,
        task: &str,
        cfg: &CouncilConfig,
        role: &ResolvedRole,
        schema: Option<&Value>,
        providers: &ProviderSet,
        run_id: Option<&str>,
        store: &Option<Arc<ArtifactStore>>,
        state: &SharedState,
        policy: &SharedPolicy,
    ) -> Result<(), Fatal> {
        let system_prompt = role.composed_prompt();
        let user_prompt = format_draft_prompt(task, schema, cfg.summary_tier);

        // Each draft is appended to state and the store the moment it
        // completes, so a later global-deadline cancellation preserves it.
        let calls = providers.iter().map(|(name, adapter)| {
            let request = GenerateRequest {
                model: self.model_for(cfg, role, name, role.role.model_pack),
                messages: vec![
                    Message::system(&system_prompt),
                    Message::user(&user_prompt),
                ],
                max_tokens: Some(cfg.max_draft_tokens),
                temperature: Some(cfg.draft_temperature),
                reasoning: role.role.reasoning,
                ..Default::default()
            };
            async move {
                match self.call_provider(cfg, name, adapter, request, state).await {
                    Ok(response) => {
                        let text = response.text.unwrap_or_default();
                        if text.trim().is_empty() {
                            return Some((
                                name.clone(),
                                ProviderError::RequestFailed("empty draft".to_string()),
                            ));
                        }
                        if let (Some(store), Some(run_id)) = (store, run_id) {
                            match store.store_artifact(run_id, Phase::Draft, name, &text).await
                            {
                                Ok(artifact) => {
                                    let mut st = state.lock().await;
                                    st.artifact_ids.push(artifact.artifact_id.clone());
                                    st.draft_artifacts
                                        .insert(name.clone(), artifact.artifact_id);
                                }
                                Err(err) => {
                                    tracing::debug!("failed to store draft artifact: {}", err)
                                }
                            }
                        }
                        state.lock().await.drafts.insert(name.clone(), text);
                        None
                    }
                    Err(err) => Some((name.clone(), err)),
                }
            }
        });

        let failures: Vec<(String, ProviderError)> =
            join_all(calls).await.into_iter().flatten().collect();

        let succeeded = state.lock().await.drafts.len();
        for (name, err) in &failures {
            state
                .lock()
                .await
                .provider_errors
                .insert(name.clone(), err.to_string());
            let decision = policy
                .lock()
                .expect("degradation lock poisoned")
                .as_mut()
                .map(|p| p.decide(name, err, "drafts", succeeded));
            if let Some(decision) = decision {
                if decision.action == DegradationAction::Abort {
                    return Err(Fatal::Message(format!(
                        "aborting due to provider failure: {}",
                        decision.reason
                    )));
                }
            }
        }

        if succeeded == 0 {
            return Err(Fatal::Message("no drafts succeeded".to_string()));
        }
        if !failures.is_empty() && !cfg.enable_degradation {
            let (name, err) = &failures[0];
            return Err(Fatal::Message(format!(
                "draft failed for provider '{}': {}",
                name, err
            )));
        }

        Ok(())
    }

    /// Phase 2: one adversarial critique over all surviving drafts.
    #[allow(clippy::too_many_arguments)]
    async fn run_critique(
        &self,
        task: &str,
        cfg: &CouncilConfig,
        role: &ResolvedRole,
        schema: Option<&Value>,
        providers: &ProviderSet,
        run_id: Option<&str>,
        store: &Option<Arc<ArtifactStore>>,
        state: &SharedState,
        policy: &SharedPolicy,
    ) -> Result<(), Fatal> {
        let (name, adapter) = providers.first().expect("providers checked non-empty");

        let drafts = state.lock().await.drafts.clone();
        let user_prompt = format_critique_prompt(task, &drafts, schema, cfg.summary_tier);

        let request = GenerateRequest {
            model: self.model_for(cfg, role, name, Some(ModelPack::Critic)),
            messages: vec![
                Message::system(CRITIQUE_SYSTEM_PROMPT),
                Message::user(&user_prompt),
            ],
            max_tokens: Some(cfg.max_critique_tokens),
            temperature: Some(cfg.critique_temperature),
            ..Default::default()
        };

        let response = match self.call_provider(cfg, name, adapter, request, state).await {
            Ok(response) => response,
            Err(err) => {
                state
                    .lock()
                    .await
                    .provider_errors
                    .insert(name.clone(), err.to_string());
                if let Some(p) = policy.lock().expect("degradation lock poisoned").as_mut() {
                    p.decide(name, &err, "critique", 0);
                }
                return Err(Fatal::Message(format!("critique failed: {}", err)));
            }
        };

        let critique = response.text.unwrap_or_default();
        if let (Some(store), Some(run_id)) = (store, run_id) {
            match store
                .store_artifact(run_id, Phase::Critique, name, &critique)
                .await
            {
                Ok(artifact) => state.lock().await.artifact_ids.push(artifact.artifact_id),
                Err(err) => tracing::debug!("failed to store critique artifact: {}", err),
            }
        }
        state.lock().await.critique = Some(critique);

        Ok(())
    }

    /// Phase 3: synthesis with schema validation and state-carrying retry.
    #[allow(clippy::too_many_arguments)]
    async fn run_synthesis(
        &self,
        task: &str,
        cfg: &CouncilConfig,
        role: &ResolvedRole,
        schema: Option<&Value>,
        providers: &ProviderSet,
        run_id: Option<&str>,
        store: &Option<Arc<ArtifactStore>>,
        state: &SharedState,
        policy: &SharedPolicy,
    ) -> Result<(), Fatal> {
        let (name, adapter) = providers
            .iter()
            .find(|(_, adapter)| adapter.supports("structured_output"))
            .unwrap_or_else(|| providers.first().expect("providers checked non-empty"));

        // Simple roles keep their fast model; everything else synthesizes
        // with the reasoning pack.
        let pack = match role.role.model_pack {
            Some(ModelPack::Fast) => ModelPack::Fast,
            _ => ModelPack::Reasoning,
        };
        let model = self.model_for(cfg, role, name, Some(pack));

        let findings = self.drafts_at_tier(state, SummaryTier::Findings).await;
        let critique = state.lock().await.critique.clone().unwrap_or_default();

        let max_attempts = cfg.max_retries + 1;
        let mut errors: Vec<String> = Vec::new();
        let mut last_raw: Option<String> = None;

        for attempt in 1..=max_attempts {
            let user_prompt = format_synthesis_prompt(
                task,
                &findings,
                &critique,
                schema,
                cfg.summary_tier,
                &errors,
                last_raw.as_deref(),
            );

            let mut request = GenerateRequest {
                model: model.clone(),
                messages: vec![
                    Message::system(SYNTHESIS_SYSTEM_PROMPT),
                    Message::user(&user_prompt),
                ],
                max_tokens: Some(cfg.max_synthesis_tokens),
                temperature: Some(cfg.synthesis_temperature),
                reasoning: role.role.reasoning,
                ..Default::default()
            };
            if let Some(schema) = schema {
                if adapter.supports("structured_output") {
                    request.structured_output = Some(StructuredOutputConfig::new(
                        schema.clone(),
                        role.role.name.clone(),
                    ));
                }
            }

            let response = match self.call_provider(cfg, name, adapter, request, state).await {
                Ok(response) => response,
                Err(err) => {
                    state
                        .lock()
                        .await
                        .provider_errors
                        .insert(name.clone(), err.to_string());
                    if let Some(p) = policy.lock().expect("degradation lock poisoned").as_mut() {
                        p.decide(name, &err, "synthesis", 0);
                    }
                    return Err(Fatal::Message(format!("synthesis failed: {}", err)));
                }
            };

            state.lock().await.synthesis_attempts = attempt;
            let raw = response.text.clone().unwrap_or_default();

            // Every attempt is preserved; only the last success counts.
            if let (Some(store), Some(run_id)) = (store, run_id) {
                match store
                    .store_artifact(run_id, Phase::Synthesis, "synthesis", &raw)
                    .await
                {
                    Ok(artifact) => state.lock().await.artifact_ids.push(artifact.artifact_id),
                    Err(err) => tracing::debug!("failed to store synthesis artifact: {}", err),
                }
            }

            let parsed = match extract_json_object(&raw) {
                Some(parsed) => parsed,
                None => {
                    errors = vec!["failed to parse response as JSON".to_string()];
                    last_raw = Some(raw);
                    tracing::warn!("synthesis attempt {} was not valid JSON", attempt);
                    continue;
                }
            };

            if cfg.enable_schema_validation {
                if let Some(schema) = schema {
                    let violations = validate_instance(schema, &parsed);
                    if !violations.is_empty() {
                        tracing::warn!(
                            "synthesis attempt {} failed validation with {} error(s)",
                            attempt,
                            violations.len()
                        );
                        errors = violations;
                        last_raw = Some(raw);
                        continue;
                    }
                }
            }

            let mut st = state.lock().await;
            st.output = Some(parsed);
            st.finish_reason = response.finish_reason.or(Some(FinishReason::Stop));
            st.validation_errors.clear();
            return Ok(());
        }

        state.lock().await.validation_errors = errors;
        Err(Fatal::Message(format!(
            "synthesis failed schema validation after {} attempt(s)",
            max_attempts
        )))
    }

    /// Summarize stored drafts to a tier for follow-up prompts, falling
    /// back to inline summarization when the store is disabled.
    async fn drafts_at_tier(
        &self,
        state: &SharedState,
        tier: SummaryTier,
    ) -> HashMap<String, String> {
        let (drafts, artifacts) = {
            let st = state.lock().await;
            (st.drafts.clone(), st.draft_artifacts.clone())
        };

        let mut summarized = HashMap::new();
        for (provider, text) in drafts {
            let summary = match (self.store.as_ref(), artifacts.get(&provider)) {
                (Some(store), Some(artifact_id)) => store
                    .summary(artifact_id, tier)
                    .await
                    .unwrap_or_else(|_| summarize::summarize(&text, tier)),
                _ => summarize::summarize(&text, tier),
            };
            summarized.insert(provider, summary);
        }
        summarized
    }

    /// Effective model for a provider: run override > role override > model
    /// pack (openrouter-routed names only) > adapter default.
    fn model_for(
        &self,
        cfg: &CouncilConfig,
        role: &ResolvedRole,
        provider: &str,
        pack: Option<ModelPack>,
    ) -> Option<String> {
        if let Some(model) = cfg.model_overrides.get(provider) {
            return Some(model.clone());
        }
        if let Some(model) = role.role.model_for_provider(provider) {
            return Some(model.to_string());
        }
        // Pack models are OpenRouter-style ids; direct providers would
        // reject them, and virtual model providers are already pinned.
        if provider == "openrouter" {
            return pack.map(|p| self.models.model_for_pack(p));
        }
        None
    }

    async fn call_provider(
        &self,
        cfg: &CouncilConfig,
        name: &str,
        adapter: &SharedAdapter,
        request: GenerateRequest,
        state: &SharedState,
    ) -> Result<GenerateResponse, ProviderError> {
        let result = tokio::time::timeout(cfg.timeout, adapter.generate(&request)).await;

        let mut st = state.lock().await;
        *st.calls.entry(name.to_string()).or_insert(0) += 1;

        match result {
            Err(_) => Err(ProviderError::Timeout(cfg.timeout)),
            Ok(Err(err)) => Err(err),
            Ok(Ok(response)) => {
                if let Some(usage) = response.usage {
                    let entry = st.usage.entry(name.to_string()).or_default();
                    entry.input_tokens = add_opt(entry.input_tokens, usage.input_tokens);
                    entry.output_tokens = add_opt(entry.output_tokens, usage.output_tokens);
                    entry.total_tokens = add_opt(entry.total_tokens, usage.total_tokens);
                }
                Ok(response)
            }
        }
    }

    /// Resolve the provider set for this run, expanding a lone `openrouter`
    /// into one virtual provider per configured council model.
    fn resolve_providers(
        &self,
        cfg: &CouncilConfig,
        role: &ResolvedRole,
    ) -> Result<ProviderSet, CouncilError> {
        let resolved = self.registry.resolve_for_role(
            cfg.providers.as_deref(),
            &role.role.provider_preferences(),
            cfg.strict_providers,
        )?;

        let models = cfg
            .models
            .clone()
            .unwrap_or_else(|| {
                if self.models.multi_model_enabled() {
                    self.models.council_models()
                } else {
                    Vec::new()
                }
            });

        if models.len() > 1 && resolved.len() == 1 && resolved[0].0 == "openrouter" {
            tracing::info!(
                "multi-model council enabled with {} models: {}",
                models.len(),
                models.join(", ")
            );
            let mut virtual_providers: ProviderSet = Vec::new();
            for model in &models {
                match OpenRouterProvider::for_model(model.clone()) {
                    Ok(provider) => {
                        virtual_providers.push((model.clone(), Arc::new(provider) as SharedAdapter))
                    }
                    Err(err) if cfg.strict_providers => {
                        return Err(CouncilError::Configuration(format!(
                            "failed to create provider for model '{}': {}",
                            model, err
                        )))
                    }
                    Err(err) => {
                        tracing::warn!("skipping model '{}': {}", model, err);
                    }
                }
            }
            return Ok(virtual_providers);
        }

        Ok(resolved)
    }
}

fn add_opt(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

async fn record_timing(state: &SharedState, phase: &str, start: Instant) {
    state.lock().await.phase_timings.push(PhaseTiming {
        phase: phase.to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    });
}

fn build_cost_estimate(
    cfg: &CouncilConfig,
    usage: &HashMap<String, Usage>,
    calls: &HashMap<String, u32>,
) -> CostEstimate {
    let mut total_input: u64 = 0;
    let mut total_output: u64 = 0;
    let mut cost = 0.0_f64;

    for (provider, u) in usage {
        let input = u.input_tokens.unwrap_or(0) as u64;
        let output = u.output_tokens.unwrap_or(0) as u64;
        total_input += input;
        total_output += output;
        cost += (input as f64 / 1000.0) * cfg.cost_per_1k_input.get(provider).copied().unwrap_or(0.0);
        cost += (output as f64 / 1000.0)
            * cfg.cost_per_1k_output.get(provider).copied().unwrap_or(0.0);
    }

    CostEstimate {
        provider_calls: calls.clone(),
        total_input_tokens: total_input,
        total_output_tokens: total_output,
        tokens: total_input + total_output,
        estimated_cost_usd: (cost * 1e6).round() / 1e6,
    }
}

fn format_draft_prompt(task: &str, schema: Option<&Value>, tier: SummaryTier) -> String {
    let schema_hint = if schema.is_some() {
        "\nReturn a draft that aligns with the JSON schema."
    } else {
        ""
    };
    format!(
        "Task:\n{}\n{}\nSummary tier: {}\n",
        task,
        schema_hint,
        tier.as_str()
    )
}

fn format_critique_prompt(
    task: &str,
    drafts: &HashMap<String, String>,
    schema: Option<&Value>,
    tier: SummaryTier,
) -> String {
    let mut names: Vec<&String> = drafts.keys().collect();
    names.sort();
    let draft_blocks: Vec<String> = names
        .iter()
        .map(|name| format!("Provider: {}\nDraft:\n{}", name, drafts[*name]))
        .collect();

    let schema_block = schema
        .map(|s| {
            format!(
                "\nSchema (JSON):\n{}",
                serde_json::to_string_pretty(s).unwrap_or_default()
            )
        })
        .unwrap_or_default();

    format!(
        "Task:\n{}\n{}\nSummary tier: {}\n\nDrafts:\n{}",
        task,
        schema_block,
        tier.as_str(),
        draft_blocks.join("\n\n")
    )
}

fn format_synthesis_prompt(
    task: &str,
    drafts: &HashMap<String, String>,
    critique: &str,
    schema: Option<&Value>,
    tier: SummaryTier,
    errors: &[String],
    last_attempt: Option<&str>,
) -> String {
    let mut names: Vec<&String> = drafts.keys().collect();
    names.sort();
    let draft_blocks: Vec<String> = names
        .iter()
        .map(|name| format!("Provider: {}\nDraft:\n{}", name, drafts[*name]))
        .collect();

    let schema_block = schema
        .map(|s| serde_json::to_string_pretty(s).unwrap_or_default())
        .unwrap_or_else(|| "{}".to_string());

    let mut prompt = format!(
        "Task:\n{}\n\nSchema (JSON):\n{}\n\nSummary tier: {}\n\nCritique:\n{}\n\nDrafts:\n{}\n",
        task,
        schema_block,
        tier.as_str(),
        critique,
        draft_blocks.join("\n\n")
    );

    // Retry is state-carrying: the model sees its prior invalid attempt
    // alongside the concise error list, not just a re-ask.
    if let Some(last) = last_attempt {
        prompt.push_str(&format!("\nYour previous attempt:\n{}\n", last));
    }
    if errors.is_empty() {
        prompt.push_str("\nValidation errors to fix (if any):\nNone\n");
    } else {
        let list: Vec<String> = errors.iter().map(|e| format!("- {}", e)).collect();
        prompt.push_str(&format!(
            "\nValidation errors to fix (if any):\n{}\n",
            list.join("\n")
        ));
    }
    prompt.push_str("\nReturn ONLY JSON that matches the schema.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cost_estimate_uses_per_provider_weights() {
        let mut cfg = CouncilConfig::default();
        cfg.cost_per_1k_input.insert("a".to_string(), 0.5);
        cfg.cost_per_1k_output.insert("a".to_string(), 1.0);

        let usage = HashMap::from([("a".to_string(), Usage::new(Some(2000), Some(1000)))]);
        let calls = HashMap::from([("a".to_string(), 3)]);

        let estimate = build_cost_estimate(&cfg, &usage, &calls);
        assert_eq!(estimate.total_input_tokens, 2000);
        assert_eq!(estimate.total_output_tokens, 1000);
        assert_eq!(estimate.tokens, 3000);
        assert!((estimate.estimated_cost_usd - 2.0).abs() < 1e-9);
        assert_eq!(estimate.provider_calls["a"], 3);
    }

    #[test]
    fn test_synthesis_prompt_carries_prior_attempt_and_errors() {
        let drafts = HashMap::from([("a".to_string(), "draft a".to_string())]);
        let prompt = format_synthesis_prompt(
            "do the thing",
            &drafts,
            "critique text",
            Some(&json!({"type": "object"})),
            SummaryTier::Actions,
            &["missing required field 'answer'".to_string()],
            Some("{\"wrong\": true}"),
        );

        assert!(prompt.contains("Your previous attempt:"));
        assert!(prompt.contains("{\"wrong\": true}"));
        assert!(prompt.contains("- missing required field 'answer'"));
        assert!(prompt.contains("Return ONLY JSON"));
    }

    #[test]
    fn test_critique_prompt_orders_drafts_deterministically() {
        let drafts = HashMap::from([
            ("zeta".to_string(), "z draft".to_string()),
            ("alpha".to_string(), "a draft".to_string()),
        ]);
        let prompt = format_critique_prompt("task", &drafts, None, SummaryTier::Actions);
        let alpha_idx = prompt.find("Provider: alpha").unwrap();
        let zeta_idx = prompt.find("Provider: zeta").unwrap();
        assert!(alpha_idx < zeta_idx);
    }
}
