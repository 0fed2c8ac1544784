//! Council - A multi-model deliberation engine
//!
//! Fans a task out to several LLM backends in parallel, drives an adversarial
//! critique over the drafts, and synthesizes a single structured answer
//! validated against a role-specific JSON Schema.
//!
//! # Architecture
//!
//! A deliberation consists of three phases:
//!
//! 1. **Drafts**: every resolved provider independently answers the task
//!    under the role's composed system prompt.
//!
//! 2. **Critique**: a single adversarial reviewer examines all surviving
//!    drafts and is required to find at least one flaw.
//!
//! 3. **Synthesis**: a reasoning-biased provider merges drafts and critique
//!    into one JSON document, retried with embedded validation errors until
//!    it conforms to the role's schema or retries are exhausted.
//!
//! # Example
//!
//! ```no_run
//! use council::{Council, CouncilConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let council = Council::new(CouncilConfig::default()).await?;
//! let result = council.run("Design a rate limiter", "drafter", Some("arch"), None).await;
//!
//! if result.success {
//!     println!("{}", serde_json::to_string_pretty(&result.output)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod council;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod protocol;
pub mod providers;
pub mod roles;
pub mod schema;
pub mod store;

pub use config::{CouncilConfig, RunOptions};
pub use council::Council;
pub use error::CouncilError;
pub use orchestrator::Orchestrator;
pub use protocol::{CostEstimate, CouncilResult, PhaseTiming, SummaryTier};
