//! # Edit Applier
//!
//! Typed mutation intents for a [`ResearchDocument`] and the pure functions
//! that apply them. Edits address questions and findings by stable id, never
//! by position.
//!
//! [`apply`] never fails: an edit that cannot be applied leaves the document
//! unchanged and logs a warning. [`try_apply`] exposes the reason.

use super::document::{
    normalize_query, Decision, Delta, DocumentStatus, FinalAnswer, Finding, FindingStatus,
    MemoryEntry, QuestionStatus, QuestionSummary, Recommendation, ResearchDocument,
    ResearchQuestion,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A replayable mutation intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Edit {
    AddQuestion {
        question: ResearchQuestion,
    },
    StartQuestion {
        question_id: String,
    },
    BeginCycle {
        question_id: String,
    },
    AppendMemory {
        question_id: String,
        entry: MemoryEntry,
    },
    CompactMemory {
        question_id: String,
        keep_recent: usize,
    },
    CompleteQuestion {
        question_id: String,
        summary: QuestionSummary,
        recommendation: Recommendation,
    },
    AddFinding {
        finding: Finding,
    },
    DisqualifyFinding {
        finding_id: String,
        reason: String,
    },
    RecordDecision {
        decision: Decision,
    },
    SetStatus {
        status: DocumentStatus,
    },
    SetFinalAnswer {
        answer: FinalAnswer,
    },
}

impl Edit {
    /// Wire name of the edit action
    pub fn action(&self) -> &'static str {
        match self {
            Edit::AddQuestion { .. } => "add_question",
            Edit::StartQuestion { .. } => "start_question",
            Edit::BeginCycle { .. } => "begin_cycle",
            Edit::AppendMemory { .. } => "append_memory",
            Edit::CompactMemory { .. } => "compact_memory",
            Edit::CompleteQuestion { .. } => "complete_question",
            Edit::AddFinding { .. } => "add_finding",
            Edit::DisqualifyFinding { .. } => "disqualify_finding",
            Edit::RecordDecision { .. } => "record_decision",
            Edit::SetStatus { .. } => "set_status",
            Edit::SetFinalAnswer { .. } => "set_final_answer",
        }
    }

    /// The question this edit touches, if any
    pub fn question_id(&self) -> Option<&str> {
        match self {
            Edit::AddQuestion { question } => Some(&question.id),
            Edit::StartQuestion { question_id }
            | Edit::BeginCycle { question_id }
            | Edit::AppendMemory { question_id, .. }
            | Edit::CompactMemory { question_id, .. }
            | Edit::CompleteQuestion { question_id, .. } => Some(question_id),
            Edit::AddFinding { finding } => Some(&finding.question_id),
            _ => None,
        }
    }
}

/// Why an edit was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("document is complete and accepts no further edits")]
    Sealed,
    #[error("unknown question `{0}`")]
    UnknownQuestion(String),
    #[error("question `{0}` already exists")]
    DuplicateQuestion(String),
    #[error("new question `{0}` must be pending with no history")]
    InvalidNewQuestion(String),
    #[error("question `{id}` cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        id: String,
        from: QuestionStatus,
        to: QuestionStatus,
    },
    #[error("question `{0}` is not running")]
    NotRunning(String),
    #[error("question `{id}` has used all {max} cycles")]
    CycleBudgetExhausted { id: String, max: u32 },
    #[error("unknown finding `{0}`")]
    UnknownFinding(String),
    #[error("finding `{0}` already exists")]
    DuplicateFinding(String),
    #[error("disqualifying a finding requires a reason")]
    MissingReason,
    #[error("decision `{0}` already recorded")]
    DuplicateDecision(String),
    #[error("document status cannot move from {from:?} to {to:?}")]
    IllegalStatus {
        from: DocumentStatus,
        to: DocumentStatus,
    },
    #[error("document cannot complete without a final answer")]
    MissingFinalAnswer,
    #[error("final answer is already set")]
    AnswerAlreadySet,
}

/// Apply an edit, returning the new document or the reason it was rejected
pub fn try_apply(doc: &ResearchDocument, edit: &Edit) -> Result<ResearchDocument, EditError> {
    if doc.is_sealed() {
        return match edit {
            Edit::SetStatus {
                status: DocumentStatus::Complete,
            } => Ok(doc.clone()),
            _ => Err(EditError::Sealed),
        };
    }

    let mut next = doc.clone();
    match edit {
        Edit::AddQuestion { question } => {
            if next.question(&question.id).is_some() {
                return Err(EditError::DuplicateQuestion(question.id.clone()));
            }
            if question.status != QuestionStatus::Pending
                || question.cycles != 0
                || !question.memory.is_empty()
                || question.summary.is_some()
            {
                return Err(EditError::InvalidNewQuestion(question.id.clone()));
            }
            next.questions.push(question.clone());
        }
        Edit::StartQuestion { question_id }
        | Edit::BeginCycle { question_id }
        | Edit::AppendMemory { question_id, .. }
        | Edit::CompactMemory { question_id, .. }
        | Edit::CompleteQuestion { question_id, .. } => {
            let question = next
                .questions
                .iter_mut()
                .find(|q| &q.id == question_id)
                .ok_or_else(|| EditError::UnknownQuestion(question_id.clone()))?;
            apply_to_question(question, edit)?;
            if let Edit::AppendMemory {
                entry: MemoryEntry::Search { query },
                ..
            } = edit
            {
                next.queries_run.insert(normalize_query(query));
            }
        }
        Edit::AddFinding { finding } => {
            if next.question(&finding.question_id).is_none() {
                return Err(EditError::UnknownQuestion(finding.question_id.clone()));
            }
            if next.finding(&finding.id).is_some() {
                return Err(EditError::DuplicateFinding(finding.id.clone()));
            }
            let mut finding = finding.clone();
            finding.status = FindingStatus::Active;
            finding.disqualify_reason = None;
            next.findings.push(finding);
        }
        Edit::DisqualifyFinding { finding_id, reason } => {
            if reason.trim().is_empty() {
                return Err(EditError::MissingReason);
            }
            let finding = next
                .findings
                .iter_mut()
                .find(|f| &f.id == finding_id)
                .ok_or_else(|| EditError::UnknownFinding(finding_id.clone()))?;
            if finding.status == FindingStatus::Disqualified {
                return Ok(doc.clone());
            }
            finding.status = FindingStatus::Disqualified;
            finding.disqualify_reason = Some(reason.trim().to_string());
        }
        Edit::RecordDecision { decision } => {
            if next.decision_log.iter().any(|d| d.id == decision.id) {
                return Err(EditError::DuplicateDecision(decision.id.clone()));
            }
            next.decision_log.push(decision.clone());
        }
        Edit::SetStatus { status } => {
            if *status == next.status {
                return Ok(doc.clone());
            }
            if !next.status.can_move_to(*status) {
                return Err(EditError::IllegalStatus {
                    from: next.status,
                    to: *status,
                });
            }
            if *status == DocumentStatus::Complete && next.final_answer.is_none() {
                return Err(EditError::MissingFinalAnswer);
            }
            next.status = *status;
        }
        Edit::SetFinalAnswer { answer } => {
            if next.final_answer.is_some() {
                return Err(EditError::AnswerAlreadySet);
            }
            next.final_answer = Some(answer.clone());
        }
    }

    Ok(next)
}

/// Apply an edit. Rejected edits are logged and leave the document unchanged.
pub fn apply(doc: &ResearchDocument, edit: &Edit) -> ResearchDocument {
    match try_apply(doc, edit) {
        Ok(next) => next,
        Err(err) => {
            tracing::warn!(
                document_id = %doc.id,
                action = edit.action(),
                question_id = edit.question_id().unwrap_or("-"),
                error = %err,
                "Rejected edit; document left unchanged"
            );
            doc.clone()
        }
    }
}

/// Apply a question-scoped edit to a single question.
///
/// Shared by the document applier and by executors keeping a private replica
/// of their own question, so both sides agree on every transition.
pub fn apply_to_question(question: &mut ResearchQuestion, edit: &Edit) -> Result<(), EditError> {
    match edit {
        Edit::StartQuestion { .. } => {
            if question.status != QuestionStatus::Pending {
                return Err(EditError::IllegalTransition {
                    id: question.id.clone(),
                    from: question.status,
                    to: QuestionStatus::Running,
                });
            }
            question.status = QuestionStatus::Running;
        }
        Edit::BeginCycle { .. } => {
            ensure_running(question)?;
            if !question.has_budget() {
                return Err(EditError::CycleBudgetExhausted {
                    id: question.id.clone(),
                    max: question.max_cycles,
                });
            }
            question.cycles += 1;
        }
        Edit::AppendMemory { entry, .. } => {
            ensure_running(question)?;
            if let MemoryEntry::Search { query } = entry {
                question.queries_run.insert(normalize_query(query));
            }
            question.memory.push(entry.clone());
        }
        Edit::CompactMemory { keep_recent, .. } => {
            compact_memory(&mut question.memory, *keep_recent);
        }
        Edit::CompleteQuestion {
            summary,
            recommendation,
            ..
        } => {
            if question.status != QuestionStatus::Running {
                return Err(EditError::IllegalTransition {
                    id: question.id.clone(),
                    from: question.status,
                    to: QuestionStatus::Done,
                });
            }
            question.status = QuestionStatus::Done;
            question.confidence = Some(summary.confidence);
            question.recommendation = Some(*recommendation);
            question.summary = Some(summary.clone());
        }
        _ => {}
    }
    Ok(())
}

fn ensure_running(question: &ResearchQuestion) -> Result<(), EditError> {
    if question.status == QuestionStatus::Running {
        Ok(())
    } else {
        Err(EditError::NotRunning(question.id.clone()))
    }
}

/// Replace all but the `keep_recent` newest entries with one reflect entry
/// recording what was dropped. Returns how many entries were folded away.
pub fn compact_memory(memory: &mut Vec<MemoryEntry>, keep_recent: usize) -> usize {
    // Folding a single entry into a note would not shrink anything.
    if memory.len() <= keep_recent + 1 {
        return 0;
    }

    let cut = memory.len() - keep_recent;
    let removed: Vec<MemoryEntry> = memory.drain(..cut).collect();

    let (mut searches, mut results, mut reflections) = (0, 0, 0);
    let mut queries = Vec::new();
    for entry in &removed {
        match entry {
            MemoryEntry::Search { query } => {
                searches += 1;
                queries.push(query.as_str());
            }
            MemoryEntry::Result { .. } => results += 1,
            MemoryEntry::Reflect { .. } => reflections += 1,
        }
    }

    let mut thought = format!(
        "Compacted {} earlier entries ({} searches, {} results, {} reflections).",
        removed.len(),
        searches,
        results,
        reflections
    );
    if !queries.is_empty() {
        thought.push_str(&format!(" Queries covered: {}.", queries.join("; ")));
    }

    memory.insert(0, MemoryEntry::reflect(thought, Delta::NoChange));
    removed.len()
}
