use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::anthropic::AnthropicProvider;
use super::base::ProviderAdapter;
use super::google::GoogleProvider;
use super::openai::OpenAiProvider;
use super::openrouter::OpenRouterProvider;
use crate::error::CouncilError;
use crate::roles::ProviderPreferences;

type AdapterFactory = Box<dyn Fn() -> Result<Arc<dyn ProviderAdapter>> + Send + Sync>;

/// Registry of provider adapters, addressable by name only.
///
/// Factories are registered once at init; instances are constructed lazily
/// on first resolution and cached. Nothing is mutated after registration, so
/// the registry is safe to share read-only across runs.
pub struct ProviderRegistry {
    factories: HashMap<String, AdapterFactory>,
    instances: Mutex<HashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            factories: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with every built-in adapter registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("openai", || Ok(Arc::new(OpenAiProvider::from_env()?)));
        registry.register("anthropic", || Ok(Arc::new(AnthropicProvider::from_env()?)));
        registry.register("google", || Ok(Arc::new(GoogleProvider::from_env()?)));
        registry.register("openrouter", || {
            Ok(Arc::new(OpenRouterProvider::from_env()?))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn ProviderAdapter>> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.trim().to_lowercase(), Box::new(factory));
    }

    /// Register an already-constructed adapter (used by tests and by
    /// multi-model expansion).
    pub fn register_instance(&mut self, name: &str, adapter: Arc<dyn ProviderAdapter>) {
        let normalized = name.trim().to_lowercase();
        self.instances
            .lock()
            .expect("registry lock poisoned")
            .insert(normalized.clone(), adapter);
        self.factories
            .insert(normalized, Box::new(|| unreachable!("instance pre-cached")));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>, CouncilError> {
        let normalized = name.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(CouncilError::Configuration(
                "provider name must be a non-empty string".to_string(),
            ));
        }

        if let Some(instance) = self
            .instances
            .lock()
            .expect("registry lock poisoned")
            .get(&normalized)
        {
            return Ok(Arc::clone(instance));
        }

        let factory = self.factories.get(&normalized).ok_or_else(|| {
            CouncilError::ProviderResolution {
                name: normalized.clone(),
                available: self.list().join(", "),
            }
        })?;

        let adapter = factory().map_err(|e| CouncilError::Configuration(e.to_string()))?;
        self.instances
            .lock()
            .expect("registry lock poisoned")
            .insert(normalized, Arc::clone(&adapter));
        Ok(adapter)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the provider set for a run.
    ///
    /// An explicit caller list wins verbatim. Otherwise the role's preferred
    /// list (minus excludes) is extended with fallbacks not already present.
    /// Under strict mode any unresolvable name fails the run; otherwise it
    /// is skipped and the remainder is used.
    pub fn resolve_for_role(
        &self,
        explicit: Option<&[String]>,
        preferences: &ProviderPreferences,
        strict: bool,
    ) -> Result<Vec<(String, Arc<dyn ProviderAdapter>)>, CouncilError> {
        let names: Vec<String> = match explicit {
            Some(list) => list.to_vec(),
            None => {
                let mut names: Vec<String> = preferences
                    .preferred
                    .iter()
                    .filter(|p| !preferences.exclude.contains(p))
                    .cloned()
                    .collect();
                for fallback in &preferences.fallback {
                    if !names.contains(fallback) && !preferences.exclude.contains(fallback) {
                        names.push(fallback.clone());
                    }
                }
                names
            }
        };

        let mut resolved = Vec::new();
        for name in &names {
            match self.get(name) {
                Ok(adapter) => resolved.push((name.clone(), adapter)),
                Err(err) if strict => return Err(err),
                Err(err) => {
                    tracing::warn!("skipping unresolvable provider '{}': {}", name, err);
                }
            }
        }
        Ok(resolved)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{
        DoctorResult, GenerateRequest, GenerateResponse, ProviderCapabilities,
    };
    use async_trait::async_trait;

    struct StubProvider {
        name: String,
    }

    #[async_trait]
    impl ProviderAdapter for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> Result<GenerateResponse, crate::providers::errors::ProviderError> {
            Ok(GenerateResponse::default())
        }

        async fn doctor(&self) -> DoctorResult {
            DoctorResult::healthy("stub", 0)
        }
    }

    fn registry_with(names: &[&str]) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for name in names {
            let name = name.to_string();
            registry.register(&name.clone(), move || {
                Ok(Arc::new(StubProvider { name: name.clone() }))
            });
        }
        registry
    }

    fn prefs(preferred: &[&str], fallback: &[&str], exclude: &[&str]) -> ProviderPreferences {
        ProviderPreferences {
            preferred: preferred.iter().map(|s| s.to_string()).collect(),
            fallback: fallback.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_get_unknown_provider_lists_available() {
        let registry = registry_with(&["alpha", "beta"]);
        let err = registry.get("gamma").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("gamma"));
        assert!(message.contains("alpha, beta"));
    }

    #[test]
    fn test_get_caches_instances() {
        let registry = registry_with(&["alpha"]);
        let first = registry.get("alpha").unwrap();
        let second = registry.get("ALPHA ").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_explicit_list_used_verbatim() {
        let registry = registry_with(&["a", "b", "c"]);
        let explicit = vec!["c".to_string(), "a".to_string()];
        let resolved = registry
            .resolve_for_role(Some(&explicit), &prefs(&["b"], &[], &[]), true)
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn test_preferences_filter_and_append() {
        let registry = registry_with(&["a", "b", "c", "d"]);
        let resolved = registry
            .resolve_for_role(None, &prefs(&["a", "b"], &["b", "c"], &["b"]), true)
            .unwrap();
        let names: Vec<&str> = resolved.iter().map(|(n, _)| n.as_str()).collect();
        // b excluded, c appended from fallback without duplicating a.
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_strict_mode_fails_on_missing_provider() {
        let registry = registry_with(&["a"]);
        let result = registry.resolve_for_role(None, &prefs(&["a", "missing"], &[], &[]), true);
        assert!(result.is_err());
    }

    #[test]
    fn test_non_strict_skips_missing_provider() {
        let registry = registry_with(&["a"]);
        let resolved = registry
            .resolve_for_role(None, &prefs(&["a", "missing"], &[], &[]), false)
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0, "a");
    }
}
