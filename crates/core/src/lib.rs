//! # Inquest Core
//!
//! The research engine behind Inquest: the research document and its edit
//! applier, question executors, the planner, the synthesizer and the
//! orchestrator that merges their work.
//!
//! ## Architecture
//!
//! - `state/` - Research document, typed edits, schema versions and stores
//! - `skills/` - Planner, question executor, synthesizer and the generation capability
//! - `swarm/` - Orchestrator, edit bridge, events and the session service
//! - `tools/` - Retrieval capability, SearXNG adapter, retry policy
//! - `models` - LLM provider configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use inquest_core::swarm::{ResearchDeps, ResearchService};
//!
//! let service = ResearchService::new(deps, ResearchConfig::load(None)?);
//! let (handle, _events) = service
//!     .start_research("Which async runtime should we use?", vec!["name one".into()])
//!     .await?;
//! let outcome = service.wait(&handle.session_id).await?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ResearchConfig;
pub use error::{GenerationError, ResearchError, RetrievalError};
