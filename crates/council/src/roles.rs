//! Role registry: role definitions, deprecated-alias resolution, and prompt
//! composition.
//!
//! Legacy role names resolve to (canonical role, mode) pairs through a flat
//! table; modes compose prompts by concatenating a fragment onto the base
//! prompt rather than overriding behavior.

use indoc::indoc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::CouncilError;
use crate::model::ModelPack;
use crate::providers::base::ReasoningConfig;
use crate::schema::validate_name;

/// Deliberation ground rules appended to every role's system prompt.
pub const COUNCIL_PROTOCOL: &str = indoc! {r#"
    ## Council Deliberation Protocol

    ### 1. Equal Standing
    All council members have equal authority regardless of speaking order.
    The synthesizer evaluates arguments on merit, not position.

    ### 2. Constructive Dissent (REQUIRED)
    You MUST challenge assumptions and express unorthodox opinions
    when grounded in logic, evidence, and facts.
    - Do not simply agree with previous agents
    - If you see a flaw, state it clearly with reasoning
    - Groupthink is the enemy of good reasoning

    ### 3. Pass When Empty
    If you have nothing substantive to add beyond what's been stated:
    - Respond with: **PASS**
    - Silence is better than redundancy

    ### 4. Collaborative Rivalry
    Aim to produce the winning argument through merit:
    - Accuracy, evidence, and clarity are rewarded
    - Attack ideas, not agents

    ### 5. Evidence Required
    All claims require supporting reasoning.
    Cite sources, examples, or logical derivation.
"#};

/// Legacy role names and the (canonical role, mode) they resolve to.
const ROLE_ALIASES: &[(&str, &str, Option<&str>)] = &[
    ("implementer", "drafter", Some("impl")),
    ("architect", "drafter", Some("arch")),
    ("test-designer", "drafter", Some("test")),
    ("reviewer", "critic", Some("review")),
    ("red-team", "critic", Some("security")),
    ("assessor", "planner", Some("assess")),
    ("shipper", "synthesizer", None),
];

/// Aliases that already emitted their deprecation notice this process.
static NOTICED_ALIASES: Lazy<Mutex<HashSet<String>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderPreferences {
    #[serde(default)]
    pub preferred: Vec<String>,
    #[serde(default)]
    pub fallback: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One role definition, deserialized from a YAML file keyed by canonical
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    #[serde(default)]
    pub model_pack: Option<ModelPack>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub providers: Option<ProviderPreferences>,
    /// Per-provider model overrides (provider name -> model id).
    #[serde(default)]
    pub models: Option<HashMap<String, String>>,
    #[serde(default)]
    pub reasoning: Option<ReasoningConfig>,
    pub system_prompt: String,
    #[serde(default)]
    pub modes: Option<HashMap<String, String>>,
}

impl RoleConfig {
    pub fn provider_preferences(&self) -> ProviderPreferences {
        self.providers.clone().unwrap_or_default()
    }

    pub fn model_for_provider(&self, provider: &str) -> Option<&str> {
        self.models
            .as_ref()
            .and_then(|m| m.get(provider))
            .map(String::as_str)
    }
}

/// A role after alias and mode resolution.
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    pub role: RoleConfig,
    pub mode: Option<String>,
    /// The deprecated name this resolution came through, if any.
    pub alias: Option<String>,
}

impl ResolvedRole {
    /// Base prompt + mode fragment + deliberation protocol.
    pub fn composed_prompt(&self) -> String {
        let mut parts = vec![self.role.system_prompt.trim().to_string()];
        if let (Some(mode), Some(modes)) = (&self.mode, &self.role.modes) {
            if let Some(fragment) = modes.get(mode) {
                parts.push(fragment.trim().to_string());
            }
        }
        parts.push(COUNCIL_PROTOCOL.trim().to_string());
        parts.join("\n\n")
    }
}

static BUILTIN_ROLES: &[&str] = &[
    include_str!("../assets/subagents/drafter.yaml"),
    include_str!("../assets/subagents/critic.yaml"),
    include_str!("../assets/subagents/planner.yaml"),
    include_str!("../assets/subagents/synthesizer.yaml"),
    include_str!("../assets/subagents/researcher.yaml"),
    include_str!("../assets/subagents/router.yaml"),
];

pub struct RoleRegistry {
    roles: HashMap<String, RoleConfig>,
}

impl RoleRegistry {
    pub fn builtin() -> Self {
        let mut roles = HashMap::new();
        for raw in BUILTIN_ROLES {
            let role: RoleConfig =
                serde_yaml::from_str(raw).expect("built-in role must be valid YAML");
            roles.insert(role.name.clone(), role);
        }
        RoleRegistry { roles }
    }

    /// Extend the built-ins with role files from a directory; same-named
    /// files override.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self, CouncilError> {
        let dir = dir.into();
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            CouncilError::Configuration(format!("cannot read {}: {}", dir.display(), e))
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                CouncilError::Configuration(format!("cannot read {}: {}", path.display(), e))
            })?;
            let role: RoleConfig = serde_yaml::from_str(&raw).map_err(|e| {
                CouncilError::Configuration(format!("invalid role file {}: {}", path.display(), e))
            })?;
            validate_name(&role.name, "subagent")?;
            self.roles.insert(role.name.clone(), role);
        }
        Ok(self)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.roles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a subagent name (canonical or deprecated alias) and mode.
    ///
    /// Alias resolution emits a deprecation notice once per process per
    /// alias; an explicit mode wins over the alias's baked-in mode.
    pub fn resolve(
        &self,
        name: &str,
        mode: Option<&str>,
    ) -> Result<ResolvedRole, CouncilError> {
        validate_name(name, "subagent")?;

        let (canonical, effective_mode, alias) = match ROLE_ALIASES
            .iter()
            .find(|(legacy, _, _)| *legacy == name)
        {
            Some((legacy, canonical, default_mode)) => {
                let mut noticed = NOTICED_ALIASES.lock().expect("alias notice lock poisoned");
                if noticed.insert((*legacy).to_string()) {
                    tracing::warn!(
                        "subagent '{}' is deprecated; use '{}'{}",
                        legacy,
                        canonical,
                        default_mode
                            .map(|m| format!(" with mode '{}'", m))
                            .unwrap_or_default()
                    );
                }
                (
                    *canonical,
                    mode.map(str::to_string)
                        .or_else(|| default_mode.map(str::to_string)),
                    Some((*legacy).to_string()),
                )
            }
            None => (name, mode.map(str::to_string), None),
        };

        let role = self
            .roles
            .get(canonical)
            .cloned()
            .ok_or_else(|| CouncilError::UnknownRole(name.to_string()))?;

        if let Some(mode) = &effective_mode {
            let known = role
                .modes
                .as_ref()
                .map(|m| m.contains_key(mode))
                .unwrap_or(false);
            if !known {
                return Err(CouncilError::UnknownMode {
                    role: role.name.clone(),
                    mode: mode.clone(),
                });
            }
        }

        Ok(ResolvedRole {
            role,
            mode: effective_mode,
            alias,
        })
    }
}
