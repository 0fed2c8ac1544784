//! One-shot facade over the deliberation engine.

use etcetera::{choose_base_strategy, BaseStrategy};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{CouncilConfig, RunOptions};
use crate::error::CouncilError;
use crate::model::ModelCatalog;
use crate::orchestrator::Orchestrator;
use crate::protocol::CouncilResult;
use crate::providers::base::DoctorResult;
use crate::providers::registry::ProviderRegistry;
use crate::providers::utils::read_env;
use crate::roles::RoleRegistry;
use crate::schema::SchemaCatalog;
use crate::store::ArtifactStore;

/// Multi-model deliberation council.
///
/// Holds its own configuration, registries, and artifact store; there are
/// no process-level singletons.
pub struct Council {
    orchestrator: Orchestrator,
}

impl Council {
    /// Build a council with the default provider registry and built-in
    /// roles and schemas.
    pub async fn new(config: CouncilConfig) -> Result<Self, CouncilError> {
        Self::with_registry(config, ProviderRegistry::with_defaults()).await
    }

    /// Build a council over a custom provider registry. Tests and embedders
    /// use this to install their own adapters.
    pub async fn with_registry(
        config: CouncilConfig,
        registry: ProviderRegistry,
    ) -> Result<Self, CouncilError> {
        config.validate()?;

        let store = if config.enable_artifacts {
            let root = artifact_root(&config);
            match ArtifactStore::open(root).await {
                Ok(store) => Some(Arc::new(store)),
                Err(err) => {
                    tracing::warn!("artifact store disabled: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            Arc::new(RoleRegistry::builtin()),
            Arc::new(SchemaCatalog::builtin()),
            store,
            ModelCatalog::from_env(),
            config,
        );

        Ok(Council { orchestrator })
    }

    /// Run one deliberation for `task` under the named subagent.
    pub async fn run(
        &self,
        task: &str,
        subagent: &str,
        mode: Option<&str>,
        options: Option<RunOptions>,
    ) -> CouncilResult {
        self.orchestrator
            .run(task, subagent, mode, options.as_ref())
            .await
    }

    /// Health-check every configured provider. Side-effect-free modulo
    /// network.
    pub async fn doctor(&self) -> HashMap<String, DoctorResult> {
        self.orchestrator.doctor().await
    }
}

fn artifact_root(config: &CouncilConfig) -> PathBuf {
    if let Some(dir) = &config.artifact_dir {
        return dir.clone();
    }
    if let Some(dir) = read_env("COUNCIL_ARTIFACT_DIR") {
        return PathBuf::from(dir);
    }
    match choose_base_strategy() {
        Ok(strategy) => strategy.data_dir().join("council"),
        Err(_) => PathBuf::from(".council"),
    }
}
