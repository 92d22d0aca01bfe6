//! # Research Orchestration
//!
//! Runs research sessions: executors stream edits to a single merge point,
//! the planner decides between more questions and synthesis.
//!
//! ## Run Flow
//!
//! ```text
//! Objective → Kickoff → Executors ⟶ merge → Evaluate ⟲ → Synthesizer → Final answer
//! ```

pub mod bridge;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod service;

pub use bridge::{edit_channel, EditEnvelope, QuestionWriter, WriteError, EDIT_CHANNEL_CAPACITY};
pub use events::{NullSink, ProgressSink, ResearchEvent, ResearchEventKind};
pub use orchestrator::{Orchestrator, ResearchDeps, RunOutcome};
pub use pipeline::{Phase, Pipeline};
pub use service::{EventReceiver, ResearchService, SessionHandle};
