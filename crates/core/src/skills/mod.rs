//! # Research Skills
//!
//! The reasoning parts of a research run and the generation capability they
//! share.
//!
//! ## Architecture
//!
//! ```text
//! PlannerSkill ──────┐
//! QuestionExecutor ──┼── StructuredGenerator (radkit LlmFunction per role)
//! SynthesizerSkill ──┘
//! ```
//!
//! - `PlannerSkill` - kickoff questions, then spawn-or-synthesize decisions
//! - `QuestionExecutor` - bounded search → reflect cycles for one question
//! - `SynthesizerSkill` - the final answer

pub mod generation;
pub mod llm_helpers;
pub mod prompts;
pub mod radkit_generator;

pub mod planner_skill;
pub mod researcher_skill;
pub mod synthesizer_skill;

pub use generation::{generate, StructuredGenerator, Validate};
pub use planner_skill::{check_narrow, forced_synthesis, Plan, PlannerSkill};
pub use radkit_generator::RadkitGenerator;
pub use researcher_skill::{abandon_question, ExecutorOutcome, QuestionExecutor};
pub use synthesizer_skill::{final_edits, synthesis_context, SynthesizerSkill};
