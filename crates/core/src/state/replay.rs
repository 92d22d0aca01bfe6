//! Journal replay and timeline narration.

use super::document::{DecisionAction, MemoryEntry, ResearchDocument};
use super::edits::{apply, Edit};
use std::fmt::Write;

/// Fold a journal of edits over a base document.
///
/// Because `apply` is deterministic, replaying the journal the orchestrator
/// recorded reproduces the document it ended with.
pub fn replay<'a, I>(base: &ResearchDocument, edits: I) -> ResearchDocument
where
    I: IntoIterator<Item = &'a Edit>,
{
    edits
        .into_iter()
        .fold(base.clone(), |doc, edit| apply(&doc, edit))
}

/// Human-readable timeline rebuilt from the decision log and question memory.
pub fn narrate(doc: &ResearchDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", doc.objective);
    if !doc.success_criteria.is_empty() {
        let _ = writeln!(out, "\nSuccess criteria:");
        for criterion in &doc.success_criteria {
            let _ = writeln!(out, "- {}", criterion);
        }
    }

    for (round, decision) in doc.decision_log.iter().enumerate() {
        let action = match decision.action {
            DecisionAction::Spawn => "spawn",
            DecisionAction::Synthesize => "synthesize",
        };
        let _ = writeln!(
            out,
            "\n## Decision {} [{}] {}{}",
            round + 1,
            decision.timestamp.format("%Y-%m-%d %H:%M:%S"),
            action,
            if decision.forced { " (forced)" } else { "" }
        );
        for line in decision.reasoning.lines() {
            let _ = writeln!(out, "> {}", line);
        }
        if !decision.unfindable_criteria.is_empty() {
            let _ = writeln!(
                out,
                "Declared unfindable: {}",
                decision.unfindable_criteria.join("; ")
            );
        }

        for qid in &decision.question_ids {
            let Some(question) = doc.question(qid) else {
                continue;
            };
            let _ = writeln!(
                out,
                "\n### {} ({}) - {:?}, {}/{} cycles",
                question.title, question.id, question.status, question.cycles, question.max_cycles
            );
            for entry in &question.memory {
                match entry {
                    MemoryEntry::Search { query } => {
                        let _ = writeln!(out, "- searched: {}", query);
                    }
                    MemoryEntry::Result { sources, .. } => {
                        let _ = writeln!(out, "  - result with {} sources", sources.len());
                    }
                    MemoryEntry::Reflect { thought, delta } => {
                        let _ = writeln!(out, "- reflected ({:?}): {}", delta, thought);
                    }
                }
            }
            if let Some(summary) = &question.summary {
                let _ = writeln!(
                    out,
                    "Answer ({} confidence): {}",
                    summary.confidence, summary.answer
                );
            }
        }
    }

    if let Some(answer) = &doc.final_answer {
        let _ = writeln!(out, "\n## Final answer ({} confidence)", answer.confidence);
        let _ = writeln!(out, "{}", answer.answer);
        for limitation in &answer.limitations {
            let _ = writeln!(out, "- limitation: {}", limitation);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::document::{
        Confidence, Decision, Delta, DocumentStatus, FinalAnswer, QuestionSummary,
        Recommendation, ResearchQuestion,
    };

    fn journal() -> Vec<Edit> {
        let q = ResearchQuestion::new("Runtime", "Which runtime does X use?", "name it", 3);
        let qid = q.id.clone();
        let decision = Decision::new(
            DecisionAction::Spawn,
            vec![qid.clone()],
            "Learned: nothing\nMissing: runtime\nAction: spawn".to_string(),
        );
        vec![
            Edit::AddQuestion { question: q },
            Edit::RecordDecision { decision },
            Edit::StartQuestion {
                question_id: qid.clone(),
            },
            Edit::BeginCycle {
                question_id: qid.clone(),
            },
            Edit::AppendMemory {
                question_id: qid.clone(),
                entry: MemoryEntry::search("x runtime"),
            },
            Edit::AppendMemory {
                question_id: qid.clone(),
                entry: MemoryEntry::reflect("found it", Delta::Progress),
            },
            Edit::CompleteQuestion {
                question_id: qid,
                summary: QuestionSummary {
                    answer: "tokio".to_string(),
                    key_findings: vec![],
                    confidence: Confidence::High,
                    limitations: vec![],
                    sources: vec![],
                },
                recommendation: Recommendation::Promising,
            },
            Edit::SetStatus {
                status: DocumentStatus::Synthesizing,
            },
            Edit::SetFinalAnswer {
                answer: FinalAnswer {
                    answer: "X uses tokio".to_string(),
                    confidence: Confidence::High,
                    criteria: vec![],
                    limitations: vec![],
                    budget_exhausted: false,
                },
            },
            Edit::SetStatus {
                status: DocumentStatus::Complete,
            },
        ]
    }

    #[test]
    fn test_replay_reconstructs_document() {
        let base = ResearchDocument::new("Which runtime?", vec!["name the runtime".to_string()]);
        let edits = journal();

        let mut live = base.clone();
        for edit in &edits {
            live = apply(&live, edit);
        }
        let replayed = replay(&base, &edits);

        assert_eq!(live, replayed);
        assert_eq!(
            serde_json::to_string(&live).unwrap(),
            serde_json::to_string(&replayed).unwrap()
        );
        assert!(replayed.is_sealed());
    }

    #[test]
    fn test_narrate_uses_log_and_memory() {
        let base = ResearchDocument::new("Which runtime?", vec!["name the runtime".to_string()]);
        let doc = replay(&base, &journal());
        let story = narrate(&doc);

        assert!(story.contains("# Which runtime?"));
        assert!(story.contains("Decision 1"));
        assert!(story.contains("> Action: spawn"));
        assert!(story.contains("searched: x runtime"));
        assert!(story.contains("Final answer (high confidence)"));
    }
}
