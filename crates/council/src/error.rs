use std::time::Duration;
use thiserror::Error;

use crate::providers::errors::ProviderError;

/// Top-level error taxonomy for a council run.
///
/// Only configuration-shaped errors surface to callers as `Err`; everything
/// that happens during a run is folded into the returned `CouncilResult`.
#[derive(Error, Debug)]
pub enum CouncilError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown subagent '{0}'")]
    UnknownRole(String),

    #[error("unknown mode '{mode}' for subagent '{role}'")]
    UnknownMode { role: String, mode: String },

    #[error("provider '{name}' is not registered (available: {available})")]
    ProviderResolution { name: String, available: String },

    #[error("provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("run exceeded global deadline of {0:?}")]
    GlobalTimeout(Duration),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CouncilError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        CouncilError::Storage(err.to_string())
    }
}
