//! Default prompt templates bundled at compile time.

/// Planner kickoff - splits the objective into initial questions
pub const KICKOFF: &str = include_str!("defaults/kickoff.md");

/// Planner evaluate - spawn more questions or synthesize
pub const EVALUATE: &str = include_str!("defaults/evaluate.md");

/// Researcher - plans the next batch of search queries
pub const RESEARCHER: &str = include_str!("defaults/researcher.md");

/// Researcher - judges what a cycle contributed
pub const REFLECT: &str = include_str!("defaults/reflect.md");

/// Summarizer - condenses a finished question
pub const SUMMARIZER: &str = include_str!("defaults/summarizer.md");

/// Synthesizer - writes the final answer
pub const SYNTHESIZER: &str = include_str!("defaults/synthesizer.md");

/// All default prompts with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("kickoff", KICKOFF),
        ("evaluate", EVALUATE),
        ("researcher", RESEARCHER),
        ("reflect", REFLECT),
        ("summarizer", SUMMARIZER),
        ("synthesizer", SYNTHESIZER),
    ]
}
