//! Council configuration and per-run overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CouncilError;
use crate::protocol::SummaryTier;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);
pub const MIN_CALL_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Explicit provider list. When set it is used verbatim; when unset the
    /// role's provider preferences decide.
    pub providers: Option<Vec<String>>,
    /// OpenRouter model ids for a multi-model council. With only
    /// `openrouter` resolved, each model becomes a virtual provider.
    pub models: Option<Vec<String>>,
    /// Deadline per provider call.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Deadline for the whole run; unset means unbounded.
    #[serde(default, with = "opt_duration_secs")]
    pub global_timeout: Option<Duration>,
    /// Synthesis retries after the first attempt. Zero means exactly one
    /// attempt.
    pub max_retries: u32,
    pub summary_tier: SummaryTier,
    pub max_draft_tokens: u32,
    pub max_critique_tokens: u32,
    pub max_synthesis_tokens: u32,
    pub draft_temperature: f32,
    pub critique_temperature: f32,
    pub synthesis_temperature: f32,
    pub enable_schema_validation: bool,
    /// Fail the run when any named provider cannot be resolved; otherwise
    /// unresolvable providers are skipped.
    pub strict_providers: bool,
    pub enable_artifacts: bool,
    pub enable_health_check: bool,
    pub enable_degradation: bool,
    /// Artifact store root; defaults to the platform data dir (or
    /// `COUNCIL_ARTIFACT_DIR`).
    pub artifact_dir: Option<PathBuf>,
    #[serde(with = "duration_secs")]
    pub stale_threshold: Duration,
    pub cost_per_1k_input: HashMap<String, f64>,
    pub cost_per_1k_output: HashMap<String, f64>,
    /// Per-provider model overrides applied to every phase.
    pub model_overrides: HashMap<String, String>,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        CouncilConfig {
            providers: None,
            models: None,
            timeout: DEFAULT_CALL_TIMEOUT,
            global_timeout: None,
            max_retries: 3,
            summary_tier: SummaryTier::Actions,
            max_draft_tokens: 4000,
            max_critique_tokens: 2000,
            max_synthesis_tokens: 8000,
            draft_temperature: 0.7,
            critique_temperature: 0.2,
            synthesis_temperature: 0.2,
            enable_schema_validation: true,
            strict_providers: true,
            enable_artifacts: true,
            enable_health_check: false,
            enable_degradation: true,
            artifact_dir: None,
            stale_threshold: Duration::from_secs(3600),
            cost_per_1k_input: HashMap::new(),
            cost_per_1k_output: HashMap::new(),
            model_overrides: HashMap::new(),
        }
    }
}

impl CouncilConfig {
    pub fn validate(&self) -> Result<(), CouncilError> {
        for (name, value) in [
            ("draft_temperature", self.draft_temperature),
            ("critique_temperature", self.critique_temperature),
            ("synthesis_temperature", self.synthesis_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(CouncilError::Configuration(format!(
                    "{} must be within [0.0, 2.0], got {}",
                    name, value
                )));
            }
        }

        if self.timeout < MIN_CALL_TIMEOUT || self.timeout > MAX_CALL_TIMEOUT {
            return Err(CouncilError::Configuration(format!(
                "timeout must be within [{:?}, {:?}], got {:?}",
                MIN_CALL_TIMEOUT, MAX_CALL_TIMEOUT, self.timeout
            )));
        }

        if self.stale_threshold.is_zero() {
            return Err(CouncilError::Configuration(
                "stale_threshold must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply per-run overrides on top of the base config.
    pub fn merged(&self, options: Option<&RunOptions>) -> CouncilConfig {
        let mut merged = self.clone();
        let Some(options) = options else {
            return merged;
        };

        if let Some(providers) = &options.providers {
            merged.providers = Some(providers.clone());
        }
        if let Some(overrides) = &options.model_overrides {
            merged.model_overrides.extend(overrides.clone());
        }
        if let Some(timeout) = options.timeout {
            merged.timeout = timeout;
        }
        if let Some(global_timeout) = options.global_timeout {
            merged.global_timeout = Some(global_timeout);
        }
        if let Some(max_retries) = options.max_retries {
            merged.max_retries = max_retries;
        }
        if let Some(enable_artifacts) = options.enable_artifacts {
            merged.enable_artifacts = enable_artifacts;
        }
        if let Some(enable_degradation) = options.enable_degradation {
            merged.enable_degradation = enable_degradation;
        }
        merged
    }
}

/// Per-run overrides accepted by `Council::run`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub providers: Option<Vec<String>>,
    pub model_overrides: Option<HashMap<String, String>>,
    pub timeout: Option<Duration>,
    pub global_timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub enable_artifacts: Option<bool>,
    pub enable_degradation: Option<bool>,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod opt_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(CouncilConfig::default().validate().is_ok());
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        let mut config = CouncilConfig::default();
        config.draft_temperature = 2.5;
        assert!(config.validate().is_err());

        config.draft_temperature = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_bounds_enforced() {
        let mut config = CouncilConfig::default();
        config.timeout = Duration::from_secs(5);
        assert!(config.validate().is_err());

        config.timeout = Duration::from_secs(901);
        assert!(config.validate().is_err());

        config.timeout = Duration::from_secs(900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merged_overrides() {
        let config = CouncilConfig::default();
        let options = RunOptions {
            providers: Some(vec!["openai".to_string()]),
            max_retries: Some(0),
            enable_artifacts: Some(false),
            ..Default::default()
        };

        let merged = config.merged(Some(&options));
        assert_eq!(merged.providers, Some(vec!["openai".to_string()]));
        assert_eq!(merged.max_retries, 0);
        assert!(!merged.enable_artifacts);
        // Untouched fields keep their defaults.
        assert_eq!(merged.timeout, DEFAULT_CALL_TIMEOUT);
        assert!(merged.enable_degradation);
    }

    #[test]
    fn test_config_deserializes_from_partial_yaml() {
        let config: CouncilConfig =
            serde_yaml::from_str("timeout: 60\nmax_retries: 1\n").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 1);
        assert!(config.enable_artifacts);
    }
}
