//! # Persisted Document Schema
//!
//! Documents are stored as a versioned JSON envelope:
//!
//! ```json
//! { "schema_version": 2, "document": { ... } }
//! ```
//!
//! Older blobs are migrated here, at the persistence boundary, so the rest of
//! the crate only ever sees the current [`ResearchDocument`] shape.
//!
//! Version 1 blobs were written bare (no envelope), camelCase, with findings
//! nested under each question and the final answer as a plain string.

use super::document::{
    new_id, normalize_query, Confidence, CriterionCoverage, Decision, DecisionAction,
    DocumentStatus, FinalAnswer, Finding, FindingStatus, MemoryEntry, QuestionStatus,
    QuestionSummary, Recommendation, ResearchDocument, ResearchQuestion, Source,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Version written by [`encode`]
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed document blob: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("document schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("cannot migrate document: {0}")]
    Migration(String),
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema_version: u32,
    document: &'a ResearchDocument,
}

#[derive(Deserialize)]
struct Envelope {
    schema_version: u32,
    document: serde_json::Value,
}

/// Serialize a document into the current envelope
pub fn encode(doc: &ResearchDocument) -> Result<Vec<u8>, SchemaError> {
    Ok(serde_json::to_vec(&EnvelopeRef {
        schema_version: CURRENT_SCHEMA_VERSION,
        document: doc,
    })?)
}

/// Deserialize a stored blob, migrating older versions.
///
/// `session_id` names the document when a legacy blob carries no id of its own.
pub fn decode(bytes: &[u8], session_id: &str) -> Result<ResearchDocument, SchemaError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    if value.get("schema_version").is_none() {
        return migrate_v1(serde_json::from_value(value)?, session_id);
    }

    let envelope: Envelope = serde_json::from_value(value)?;
    match envelope.schema_version {
        CURRENT_SCHEMA_VERSION => Ok(serde_json::from_value(envelope.document)?),
        1 => migrate_v1(serde_json::from_value(envelope.document)?, session_id),
        found if found > CURRENT_SCHEMA_VERSION => Err(SchemaError::UnsupportedVersion {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        }),
        found => Err(SchemaError::Migration(format!(
            "no migration path from version {}",
            found
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDocument {
    #[serde(default)]
    id: Option<String>,
    objective: String,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default)]
    items: Vec<LegacyItem>,
    #[serde(default)]
    decisions: Vec<LegacyDecision>,
    #[serde(default)]
    status: DocumentStatus,
    #[serde(default)]
    final_answer: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyItem {
    id: String,
    #[serde(default)]
    title: String,
    question: String,
    #[serde(default)]
    goal: String,
    #[serde(default)]
    status: QuestionStatus,
    #[serde(default)]
    cycles: u32,
    max_cycles: u32,
    #[serde(default)]
    memory: Vec<MemoryEntry>,
    #[serde(default)]
    confidence: Option<Confidence>,
    #[serde(default)]
    recommendation: Option<Recommendation>,
    #[serde(default)]
    findings: Vec<LegacyFinding>,
    #[serde(default)]
    summary: Option<LegacySummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyFinding {
    content: String,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    disqualified: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySummary {
    answer: String,
    #[serde(default)]
    key_findings: Vec<String>,
    confidence: Confidence,
    #[serde(default)]
    limitations: Vec<String>,
    #[serde(default)]
    sources: Vec<Source>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDecision {
    timestamp: DateTime<Utc>,
    action: DecisionAction,
    #[serde(default)]
    question_ids: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

fn migrate_v1(legacy: LegacyDocument, session_id: &str) -> Result<ResearchDocument, SchemaError> {
    if legacy.status == DocumentStatus::Complete && legacy.final_answer.is_none() {
        return Err(SchemaError::Migration(
            "complete document without a final answer".to_string(),
        ));
    }

    let mut questions = Vec::with_capacity(legacy.items.len());
    let mut findings = Vec::new();
    let mut queries_run = BTreeSet::new();

    for item in legacy.items {
        if item.cycles > item.max_cycles {
            return Err(SchemaError::Migration(format!(
                "question `{}` ran {} of {} cycles",
                item.id, item.cycles, item.max_cycles
            )));
        }

        let item_queries: BTreeSet<String> = item
            .memory
            .iter()
            .filter_map(|entry| match entry {
                MemoryEntry::Search { query } => Some(normalize_query(query)),
                _ => None,
            })
            .collect();
        queries_run.extend(item_queries.iter().cloned());

        for (index, finding) in item.findings.into_iter().enumerate() {
            // Legacy disqualifications had no mandatory reason.
            let (status, disqualify_reason) = if finding.disqualified {
                (
                    FindingStatus::Disqualified,
                    Some(
                        finding
                            .reason
                            .filter(|r| !r.trim().is_empty())
                            .unwrap_or_else(|| "disqualified before migration".to_string()),
                    ),
                )
            } else {
                (FindingStatus::Active, None)
            };
            findings.push(Finding {
                id: format!("f-{}-{}", item.id, index),
                question_id: item.id.clone(),
                content: finding.content,
                sources: finding.sources,
                status,
                disqualify_reason,
            });
        }

        questions.push(ResearchQuestion {
            id: item.id,
            title: item.title,
            question: item.question,
            goal: item.goal,
            status: item.status,
            cycles: item.cycles,
            max_cycles: item.max_cycles,
            memory: item.memory,
            queries_run: item_queries,
            confidence: item.confidence,
            recommendation: item.recommendation,
            summary: item.summary.map(|s| QuestionSummary {
                answer: s.answer,
                key_findings: s.key_findings,
                confidence: s.confidence,
                limitations: s.limitations,
                sources: s.sources,
            }),
        });
    }

    let decision_log = legacy
        .decisions
        .into_iter()
        .enumerate()
        .map(|(index, d)| Decision {
            id: format!("d-legacy-{}", index),
            timestamp: d.timestamp,
            action: d.action,
            question_ids: d.question_ids,
            reasoning: d.reasoning,
            unfindable_criteria: Vec::new(),
            forced: false,
        })
        .collect();

    let final_answer = legacy.final_answer.map(|answer| FinalAnswer {
        answer,
        confidence: Confidence::Low,
        criteria: legacy
            .success_criteria
            .iter()
            .map(|criterion| CriterionCoverage {
                criterion: criterion.clone(),
                addressed: false,
                question_ids: Vec::new(),
            })
            .collect(),
        limitations: vec![
            "Migrated from a version 1 record without per-criterion coverage".to_string(),
        ],
        budget_exhausted: false,
    });

    Ok(ResearchDocument {
        id: legacy
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| {
                if session_id.is_empty() {
                    new_id("session")
                } else {
                    session_id.to_string()
                }
            }),
        objective: legacy.objective,
        success_criteria: legacy.success_criteria,
        questions,
        findings,
        decision_log,
        status: legacy.status,
        final_answer,
        queries_run,
        created_at: legacy.created_at.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_current_version() {
        let mut doc = ResearchDocument::new("objective", vec!["c1".to_string()]);
        doc.questions
            .push(ResearchQuestion::new("t", "What is X?", "g", 3));

        let bytes = encode(&doc).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["schema_version"], 2);

        let decoded = decode(&bytes, &doc.id).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_migrates_legacy_v1_blob() {
        let legacy = json!({
            "objective": "Which runtime does X use?",
            "successCriteria": ["name the runtime"],
            "items": [{
                "id": "q-legacy1",
                "title": "Runtime",
                "question": "Which runtime does X use?",
                "status": "done",
                "cycles": 2,
                "maxCycles": 3,
                "memory": [
                    {"type": "search", "query": "X  Runtime"},
                    {"type": "reflect", "thought": "found", "delta": "progress"}
                ],
                "recommendation": "promising",
                "findings": [
                    {"content": "X uses tokio", "sources": [{"url": "https://x.example", "title": "X"}]},
                    {"content": "X uses glommio", "disqualified": true}
                ],
                "summary": {"answer": "tokio", "keyFindings": ["X uses tokio"], "confidence": "high"}
            }],
            "decisions": [{
                "timestamp": "2024-05-01T10:00:00Z",
                "action": "spawn",
                "questionIds": ["q-legacy1"],
                "reasoning": "start"
            }],
            "status": "complete",
            "finalAnswer": "X uses tokio."
        });

        let doc = decode(legacy.to_string().as_bytes(), "session-7").unwrap();
        assert_eq!(doc.id, "session-7");
        assert_eq!(doc.questions.len(), 1);
        assert!(doc.questions[0].has_run_query("x runtime"));
        assert!(doc.queries_run.contains("x runtime"));
        assert_eq!(doc.findings.len(), 2);
        assert_eq!(doc.findings[0].question_id, "q-legacy1");
        assert_eq!(doc.findings[1].status, FindingStatus::Disqualified);
        assert!(doc.findings[1].disqualify_reason.is_some());
        assert_eq!(doc.decision_log[0].question_ids, vec!["q-legacy1"]);

        let answer = doc.final_answer.as_ref().unwrap();
        assert_eq!(answer.confidence, Confidence::Low);
        assert_eq!(answer.criteria.len(), 1);
        assert!(doc.is_sealed());

        // Re-encoding writes the current envelope.
        let again = decode(&encode(&doc).unwrap(), "ignored").unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn test_rejects_newer_version() {
        let blob = json!({"schema_version": 9, "document": {}});
        match decode(blob.to_string().as_bytes(), "s") {
            Err(SchemaError::UnsupportedVersion { found, supported }) => {
                assert_eq!(found, 9);
                assert_eq!(supported, CURRENT_SCHEMA_VERSION);
            }
            other => panic!("expected unsupported version, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_blob() {
        assert!(matches!(
            decode(b"not json", "s"),
            Err(SchemaError::Malformed(_))
        ));
    }

    #[test]
    fn test_legacy_cycle_overrun_is_rejected() {
        let legacy = json!({
            "objective": "o",
            "items": [{"id": "q-1", "question": "q?", "cycles": 5, "maxCycles": 3}]
        });
        assert!(matches!(
            decode(legacy.to_string().as_bytes(), "s"),
            Err(SchemaError::Migration(_))
        ));
    }
}
