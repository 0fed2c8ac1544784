//! Model packs: default model selection per task category, with environment
//! overrides for multi-model councils.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::providers::utils::read_env;

pub const ENV_COUNCIL_MODELS: &str = "COUNCIL_MODELS";
pub const ENV_MODEL_FAST: &str = "COUNCIL_MODEL_FAST";
pub const ENV_MODEL_REASONING: &str = "COUNCIL_MODEL_REASONING";
pub const ENV_MODEL_CODE: &str = "COUNCIL_MODEL_CODE";
pub const ENV_MODEL_CRITIC: &str = "COUNCIL_MODEL_CRITIC";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelPack {
    /// Quick classification and routing.
    Fast,
    /// Deep analysis and planning.
    Reasoning,
    /// Code generation.
    Code,
    /// Adversarial review.
    Critic,
    Default,
}

impl ModelPack {
    fn default_model(&self) -> &'static str {
        match self {
            ModelPack::Fast => "anthropic/claude-3-5-haiku",
            ModelPack::Reasoning => "anthropic/claude-opus-4-5",
            ModelPack::Code => "openai/gpt-5.1",
            ModelPack::Critic => "anthropic/claude-sonnet-4-5",
            ModelPack::Default => "anthropic/claude-opus-4-5",
        }
    }

    fn env_var(&self) -> Option<&'static str> {
        match self {
            ModelPack::Fast => Some(ENV_MODEL_FAST),
            ModelPack::Reasoning => Some(ENV_MODEL_REASONING),
            ModelPack::Code => Some(ENV_MODEL_CODE),
            ModelPack::Critic => Some(ENV_MODEL_CRITIC),
            ModelPack::Default => None,
        }
    }
}

pub fn parse_models_string(models: &str) -> Vec<String> {
    models
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

/// Snapshot of model configuration, built once per `Council` from the
/// environment. Not a process singleton.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: Option<Vec<String>>,
    pack_overrides: HashMap<ModelPack, String>,
}

impl ModelCatalog {
    pub fn from_env() -> Self {
        let models = read_env(ENV_COUNCIL_MODELS).map(|raw| parse_models_string(&raw));

        let mut pack_overrides = HashMap::new();
        for pack in [
            ModelPack::Fast,
            ModelPack::Reasoning,
            ModelPack::Code,
            ModelPack::Critic,
        ] {
            if let Some(var) = pack.env_var() {
                if let Some(value) = read_env(var) {
                    pack_overrides.insert(pack, value.trim().to_string());
                }
            }
        }

        ModelCatalog {
            models,
            pack_overrides,
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = Some(models);
        self
    }

    /// Models for a multi-model council run. Falls back to a single default.
    pub fn council_models(&self) -> Vec<String> {
        match &self.models {
            Some(models) if !models.is_empty() => models.clone(),
            _ => vec![ModelPack::Default.default_model().to_string()],
        }
    }

    pub fn model_for_pack(&self, pack: ModelPack) -> String {
        self.pack_overrides
            .get(&pack)
            .cloned()
            .unwrap_or_else(|| pack.default_model().to_string())
    }

    pub fn multi_model_enabled(&self) -> bool {
        self.models.as_ref().map(|m| m.len() > 1).unwrap_or(false)
    }
}
