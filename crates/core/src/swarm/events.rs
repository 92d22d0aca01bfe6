//! # Research Events
//!
//! Progress notifications published while a session runs. Sinks are
//! fire-and-forget: a slow or closed consumer never stalls the orchestrator.

use crate::state::{DocumentStatus, Edit, MemoryEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Kind of research event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchEventKind {
    ResearchStarted,
    ResearchResumed,
    QuestionAdded,
    QuestionStarted,
    CycleStarted,
    SearchIssued,
    ResultRecorded,
    Reflected,
    MemoryCompacted,
    QuestionCompleted,
    FindingAdded,
    FindingDisqualified,
    DecisionMade,
    SynthesisStarted,
    FinalAnswerSet,
    ResearchCompleted,
    ResearchStopped,
    /// An edit reached the merge point but could not be applied
    EditRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub kind: ResearchEventKind,
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ResearchEvent {
    pub fn new(kind: ResearchEventKind, session_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            kind,
            question_id: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_question(mut self, question_id: &str) -> Self {
        self.question_id = Some(question_id.to_string());
        self
    }

    /// The event announcing an applied edit
    pub fn for_edit(session_id: &str, edit: &Edit) -> Self {
        let (kind, data) = match edit {
            Edit::AddQuestion { question } => (
                ResearchEventKind::QuestionAdded,
                json!({ "title": question.title, "question": question.question }),
            ),
            Edit::StartQuestion { .. } => (ResearchEventKind::QuestionStarted, json!({})),
            Edit::BeginCycle { .. } => (ResearchEventKind::CycleStarted, json!({})),
            Edit::AppendMemory { entry, .. } => match entry {
                MemoryEntry::Search { query } => {
                    (ResearchEventKind::SearchIssued, json!({ "query": query }))
                }
                MemoryEntry::Result { query, sources, .. } => (
                    ResearchEventKind::ResultRecorded,
                    json!({ "query": query, "sources": sources.len() }),
                ),
                MemoryEntry::Reflect { thought, delta } => (
                    ResearchEventKind::Reflected,
                    json!({ "thought": thought, "delta": delta }),
                ),
            },
            Edit::CompactMemory { keep_recent, .. } => (
                ResearchEventKind::MemoryCompacted,
                json!({ "keep_recent": keep_recent }),
            ),
            Edit::CompleteQuestion {
                summary,
                recommendation,
                ..
            } => (
                ResearchEventKind::QuestionCompleted,
                json!({
                    "recommendation": recommendation,
                    "confidence": summary.confidence,
                    "answer": summary.answer,
                }),
            ),
            Edit::AddFinding { finding } => (
                ResearchEventKind::FindingAdded,
                json!({ "finding_id": finding.id, "content": finding.content }),
            ),
            Edit::DisqualifyFinding { finding_id, reason } => (
                ResearchEventKind::FindingDisqualified,
                json!({ "finding_id": finding_id, "reason": reason }),
            ),
            Edit::RecordDecision { decision } => (
                ResearchEventKind::DecisionMade,
                json!({
                    "action": decision.action,
                    "question_ids": decision.question_ids,
                    "forced": decision.forced,
                }),
            ),
            Edit::SetStatus { status } => (
                match status {
                    DocumentStatus::Running => ResearchEventKind::ResearchStarted,
                    DocumentStatus::Synthesizing => ResearchEventKind::SynthesisStarted,
                    DocumentStatus::Complete => ResearchEventKind::ResearchCompleted,
                },
                json!({ "status": status }),
            ),
            Edit::SetFinalAnswer { answer } => (
                ResearchEventKind::FinalAnswerSet,
                json!({ "confidence": answer.confidence, "answer": answer.answer }),
            ),
        };

        let event = Self::new(kind, session_id).with_data(data);
        match edit.question_id() {
            Some(qid) => event.with_question(qid),
            None => event,
        }
    }
}

/// Where progress events go
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ResearchEvent);
}

impl ProgressSink for mpsc::UnboundedSender<ResearchEvent> {
    fn emit(&self, event: ResearchEvent) {
        let _ = self.send(event);
    }
}

impl ProgressSink for broadcast::Sender<ResearchEvent> {
    fn emit(&self, event: ResearchEvent) {
        // No subscribers is not an error.
        let _ = self.send(event);
    }
}

/// Drops every event
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ResearchEvent) {}
}
