//! # Research Pipeline
//!
//! The orchestrator's phase machine and global step budget.
//!
//! ```text
//! Kickoff -> Researching <-> Replanning -> Synthesizing -> Complete
//!    \___________\______________\______________\-----> Stopped
//! ```

use crate::state::{DocumentStatus, ResearchDocument};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Planner proposing the first questions
    Kickoff,
    /// Executors running the open questions
    Researching,
    /// Planner deciding between more questions and synthesis
    Replanning,
    Synthesizing,
    Complete,
    /// Cancelled before completion
    Stopped,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Stopped)
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub phase: Phase,
    /// Planner calls plus executor launches so far
    pub steps: u32,
    pub max_steps: u32,
}

impl Pipeline {
    pub fn new(max_steps: u32) -> Self {
        Self {
            phase: Phase::Kickoff,
            steps: 0,
            max_steps,
        }
    }

    /// Pick up a persisted document where it left off
    pub fn resume(doc: &ResearchDocument, max_steps: u32) -> Self {
        let phase = match doc.status {
            DocumentStatus::Complete => Phase::Complete,
            DocumentStatus::Synthesizing => Phase::Synthesizing,
            DocumentStatus::Running if doc.questions.is_empty() => Phase::Kickoff,
            DocumentStatus::Running if doc.open_questions().next().is_some() => Phase::Researching,
            DocumentStatus::Running => Phase::Replanning,
        };
        // Every decision was a planner call and every question an executor launch.
        let steps = (doc.decision_log.len() + doc.questions.len()) as u32;
        Self {
            phase,
            steps,
            max_steps,
        }
    }

    fn transition(&mut self, allowed: &[Phase], next: Phase) -> bool {
        if allowed.contains(&self.phase) {
            tracing::debug!(from = ?self.phase, to = ?next, "Pipeline transition");
            self.phase = next;
            true
        } else {
            tracing::warn!(from = ?self.phase, to = ?next, "Ignoring illegal pipeline transition");
            false
        }
    }

    /// New questions were added; run them
    pub fn research(&mut self) -> bool {
        self.transition(&[Phase::Kickoff, Phase::Replanning], Phase::Researching)
    }

    /// All executors of the round have finished
    pub fn replan(&mut self) -> bool {
        self.transition(&[Phase::Researching], Phase::Replanning)
    }

    pub fn synthesize(&mut self) -> bool {
        self.transition(
            &[Phase::Kickoff, Phase::Researching, Phase::Replanning],
            Phase::Synthesizing,
        )
    }

    pub fn complete(&mut self) -> bool {
        self.transition(&[Phase::Synthesizing], Phase::Complete)
    }

    pub fn stop(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = Phase::Stopped;
        true
    }

    pub fn count_steps(&mut self, n: u32) {
        self.steps = self.steps.saturating_add(n);
    }

    pub fn steps_left(&self) -> u32 {
        self.max_steps.saturating_sub(self.steps)
    }

    pub fn is_exhausted(&self) -> bool {
        self.steps >= self.max_steps
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{QuestionStatus, ResearchQuestion};

    #[test]
    fn test_pipeline_cycle() {
        let mut pipeline = Pipeline::new(10);
        assert_eq!(pipeline.phase, Phase::Kickoff);

        assert!(pipeline.research());
        assert!(pipeline.replan());
        assert!(pipeline.research());
        assert!(pipeline.replan());
        assert!(pipeline.synthesize());
        assert!(pipeline.complete());
        assert!(pipeline.is_complete());
        assert!(!pipeline.stop());
    }

    #[test]
    fn test_illegal_transition_is_ignored() {
        let mut pipeline = Pipeline::new(10);
        assert!(!pipeline.complete());
        assert!(!pipeline.replan());
        assert_eq!(pipeline.phase, Phase::Kickoff);
    }

    #[test]
    fn test_stop_from_any_live_phase() {
        let mut pipeline = Pipeline::new(10);
        pipeline.research();
        assert!(pipeline.stop());
        assert_eq!(pipeline.phase, Phase::Stopped);
    }

    #[test]
    fn test_step_budget() {
        let mut pipeline = Pipeline::new(3);
        pipeline.count_steps(2);
        assert_eq!(pipeline.steps_left(), 1);
        assert!(!pipeline.is_exhausted());
        pipeline.count_steps(1);
        assert!(pipeline.is_exhausted());
    }

    #[test]
    fn test_resume_phase() {
        let mut doc = ResearchDocument::new("o", vec![]);
        assert_eq!(Pipeline::resume(&doc, 10).phase, Phase::Kickoff);

        let mut q = ResearchQuestion::new("t", "q?", "g", 2);
        q.status = QuestionStatus::Running;
        doc.questions.push(q);
        let pipeline = Pipeline::resume(&doc, 10);
        assert_eq!(pipeline.phase, Phase::Researching);
        assert_eq!(pipeline.steps, 1);

        doc.questions[0].status = QuestionStatus::Done;
        assert_eq!(Pipeline::resume(&doc, 10).phase, Phase::Replanning);

        doc.status = DocumentStatus::Synthesizing;
        assert_eq!(Pipeline::resume(&doc, 10).phase, Phase::Synthesizing);
    }
}
