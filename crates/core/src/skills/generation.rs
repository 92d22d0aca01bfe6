//! # Structured Generation
//!
//! The language-generation capability the planner, executors and synthesizer
//! consume. One typed method per task; every output derives `JsonSchema` so
//! the provider can be constrained to it, and every output is checked with
//! [`Validate`] before anything acts on it.

use crate::error::GenerationError;
use crate::state::{
    Confidence, Delta, MemoryEntry, QuestionStatus, Recommendation, ResearchDocument,
    ResearchQuestion,
};
use crate::tools::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use radkit::macros::LLMOutput;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Checks a generated value before use
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn kickoff(&self, ctx: &KickoffContext) -> Result<KickoffOutput, GenerationError>;

    async fn evaluate(&self, ctx: &EvaluateContext) -> Result<EvaluateOutput, GenerationError>;

    async fn plan_queries(&self, ctx: &QuestionContext) -> Result<QueryBatch, GenerationError>;

    async fn reflect(&self, ctx: &ReflectContext) -> Result<ReflectOutput, GenerationError>;

    async fn summarize_question(
        &self,
        ctx: &QuestionContext,
    ) -> Result<SummaryOutput, GenerationError>;

    async fn synthesize(&self, ctx: &SynthesisContext) -> Result<SynthesisOutput, GenerationError>;
}

/// Run a generation call under the retry policy, treating validation
/// failures like any other retryable failure
pub async fn generate<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, GenerationError>
where
    T: Validate,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    with_retry(policy, label, || {
        let attempt = op();
        async move {
            let output = attempt.await?;
            output.validate().map_err(GenerationError::Validation)?;
            Ok(output)
        }
    })
    .await
}

// ============================================================================
// Contexts
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct KickoffContext {
    pub objective: String,
    pub success_criteria: Vec<String>,
    pub max_questions: usize,
    /// Why earlier candidates were rejected, if this is a re-request
    pub feedback: Vec<String>,
}

/// Compact view of a question for planning and synthesis
#[derive(Debug, Clone, Serialize)]
pub struct QuestionDigest {
    pub id: String,
    pub title: String,
    pub question: String,
    pub status: QuestionStatus,
    pub recommendation: Option<Recommendation>,
    pub confidence: Option<Confidence>,
    pub answer: Option<String>,
    pub limitations: Vec<String>,
}

impl From<&ResearchQuestion> for QuestionDigest {
    fn from(q: &ResearchQuestion) -> Self {
        Self {
            id: q.id.clone(),
            title: q.title.clone(),
            question: q.question.clone(),
            status: q.status,
            recommendation: q.recommendation,
            confidence: q.confidence,
            answer: q.summary.as_ref().map(|s| s.answer.clone()),
            limitations: q
                .summary
                .as_ref()
                .map(|s| s.limitations.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FindingDigest {
    pub id: String,
    pub question_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateContext {
    pub objective: String,
    pub success_criteria: Vec<String>,
    pub questions: Vec<QuestionDigest>,
    pub findings: Vec<FindingDigest>,
    pub max_new_questions: usize,
    pub feedback: Vec<String>,
}

impl EvaluateContext {
    pub fn from_document(doc: &ResearchDocument, max_new_questions: usize) -> Self {
        Self {
            objective: doc.objective.clone(),
            success_criteria: doc.success_criteria.clone(),
            questions: doc.questions.iter().map(QuestionDigest::from).collect(),
            findings: doc
                .active_findings()
                .map(|f| FindingDigest {
                    id: f.id.clone(),
                    question_id: f.question_id.clone(),
                    content: f.content.clone(),
                })
                .collect(),
            max_new_questions,
            feedback: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionContext {
    pub objective: String,
    pub title: String,
    pub question: String,
    pub goal: String,
    pub cycle: u32,
    pub max_cycles: u32,
    pub memory: Vec<MemoryEntry>,
    pub max_queries: usize,
}

impl QuestionContext {
    pub fn new(objective: &str, q: &ResearchQuestion, max_queries: usize) -> Self {
        Self {
            objective: objective.to_string(),
            title: q.title.clone(),
            question: q.question.clone(),
            goal: q.goal.clone(),
            cycle: q.cycles,
            max_cycles: q.max_cycles,
            memory: q.memory.clone(),
            max_queries,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectContext {
    pub question: QuestionContext,
    /// Entries recorded during the cycle being reflected on
    pub this_cycle: Vec<MemoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisContext {
    pub objective: String,
    pub success_criteria: Vec<String>,
    pub questions: Vec<QuestionDigest>,
    pub findings: Vec<FindingDigest>,
    pub unfindable_criteria: Vec<String>,
    pub budget_exhausted: bool,
}

// ============================================================================
// Outputs
// ============================================================================

/// A candidate question proposed by the planner
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput, PartialEq, Eq)]
pub struct ProposedQuestion {
    /// Short label, a few words
    pub title: String,
    /// One narrow, self-contained question
    pub question: String,
    /// What answering it contributes to the objective
    #[serde(default)]
    pub goal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct KickoffOutput {
    /// 1 to 5 initial questions
    pub questions: Vec<ProposedQuestion>,
    /// Optional note on how the questions divide the objective
    #[serde(default)]
    pub strategy: Option<String>,
}

impl Validate for KickoffOutput {
    fn validate(&self) -> Result<(), String> {
        if self.questions.is_empty() {
            return Err("kickoff proposed no questions".to_string());
        }
        validate_proposed(&self.questions)
    }
}

fn validate_proposed(questions: &[ProposedQuestion]) -> Result<(), String> {
    if let Some(q) = questions.iter().find(|q| q.question.trim().is_empty()) {
        return Err(format!("question `{}` has no text", q.title));
    }
    Ok(())
}

/// Planner's view of one success criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageStatus {
    Covered,
    Unfindable,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct CoverageAssessment {
    pub criterion: String,
    /// "covered", "unfindable" or "missing"
    pub status: String,
    /// Completed questions that answer the criterion, when covered
    #[serde(default)]
    pub question_ids: Vec<String>,
    /// Why the criterion cannot be answered, when unfindable
    #[serde(default)]
    pub reason: Option<String>,
}

impl CoverageAssessment {
    pub fn coverage(&self) -> Option<CoverageStatus> {
        match self.status.trim().to_ascii_lowercase().as_str() {
            "covered" => Some(CoverageStatus::Covered),
            "unfindable" => Some(CoverageStatus::Unfindable),
            "missing" => Some(CoverageStatus::Missing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct Disqualification {
    pub finding_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct EvaluateOutput {
    /// "spawn_new" or "synthesize"
    pub action: String,
    /// What the completed questions established
    pub learned: String,
    /// What is still unknown
    pub missing: String,
    pub rationale: String,
    #[serde(default)]
    pub coverage: Vec<CoverageAssessment>,
    /// Questions to add when spawning, up to five
    #[serde(default)]
    pub new_questions: Vec<ProposedQuestion>,
    /// Findings that should no longer be relied on
    #[serde(default)]
    pub disqualify: Vec<Disqualification>,
}

impl EvaluateOutput {
    pub fn wants_synthesis(&self) -> bool {
        self.action.trim().eq_ignore_ascii_case("synthesize")
    }
}

impl Validate for EvaluateOutput {
    fn validate(&self) -> Result<(), String> {
        let action = self.action.trim().to_ascii_lowercase();
        match action.as_str() {
            "synthesize" => {}
            "spawn_new" | "spawn" => {
                if self.new_questions.is_empty() {
                    return Err("spawn_new without new questions".to_string());
                }
                if self.new_questions.len() > 5 {
                    return Err(format!(
                        "spawn_new proposed {} questions, at most 5 allowed",
                        self.new_questions.len()
                    ));
                }
                validate_proposed(&self.new_questions)?;
            }
            other => return Err(format!("unknown action `{}`", other)),
        }
        if let Some(bad) = self.coverage.iter().find(|c| c.coverage().is_none()) {
            return Err(format!(
                "coverage for `{}` has unknown status `{}`",
                bad.criterion, bad.status
            ));
        }
        if let Some(d) = self.disqualify.iter().find(|d| d.reason.trim().is_empty()) {
            return Err(format!("disqualifying `{}` needs a reason", d.finding_id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct QueryBatch {
    pub queries: Vec<String>,
}

impl Validate for QueryBatch {
    fn validate(&self) -> Result<(), String> {
        if self.queries.iter().all(|q| q.trim().is_empty()) {
            return Err("no usable queries".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct ReflectOutput {
    pub thought: String,
    /// "progress", "no_change" or "dead_end"
    pub delta: String,
    /// Whether the question is answered well enough to stop
    #[serde(default)]
    pub done: bool,
}

impl ReflectOutput {
    pub fn delta(&self) -> Delta {
        self.delta.parse().unwrap_or(Delta::NoChange)
    }
}

impl Validate for ReflectOutput {
    fn validate(&self) -> Result<(), String> {
        self.delta.parse::<Delta>().map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SummaryOutput {
    pub answer: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    /// "low", "medium" or "high"
    pub confidence: String,
    #[serde(default)]
    pub limitations: Vec<String>,
}

impl SummaryOutput {
    pub fn confidence(&self) -> Confidence {
        self.confidence.parse().unwrap_or(Confidence::Low)
    }
}

impl Validate for SummaryOutput {
    fn validate(&self) -> Result<(), String> {
        if self.answer.trim().is_empty() {
            return Err("summary has no answer".to_string());
        }
        self.confidence.parse::<Confidence>().map(|_| ())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct CriterionAnswer {
    pub criterion: String,
    pub addressed: bool,
    /// Questions whose results support this criterion
    #[serde(default)]
    pub question_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, LLMOutput)]
pub struct SynthesisOutput {
    pub answer: String,
    /// "low", "medium" or "high"
    pub confidence: String,
    #[serde(default)]
    pub criteria: Vec<CriterionAnswer>,
    #[serde(default)]
    pub limitations: Vec<String>,
}

impl SynthesisOutput {
    pub fn confidence(&self) -> Confidence {
        self.confidence.parse().unwrap_or(Confidence::Low)
    }
}

impl Validate for SynthesisOutput {
    fn validate(&self) -> Result<(), String> {
        if self.answer.trim().is_empty() {
            return Err("synthesis has no answer".to_string());
        }
        self.confidence.parse::<Confidence>().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn evaluate(action: &str, new_questions: usize) -> EvaluateOutput {
        EvaluateOutput {
            action: action.to_string(),
            learned: String::new(),
            missing: String::new(),
            rationale: String::new(),
            coverage: vec![],
            new_questions: (0..new_questions)
                .map(|i| ProposedQuestion {
                    title: format!("t{}", i),
                    question: format!("What is {}?", i),
                    goal: String::new(),
                })
                .collect(),
            disqualify: vec![],
        }
    }

    #[test]
    fn test_evaluate_validation() {
        assert!(evaluate("synthesize", 0).validate().is_ok());
        assert!(evaluate("spawn_new", 2).validate().is_ok());
        assert!(evaluate("spawn_new", 0).validate().is_err());
        assert!(evaluate("spawn_new", 6).validate().is_err());
        assert!(evaluate("wander", 0).validate().is_err());

        let mut bad_coverage = evaluate("synthesize", 0);
        bad_coverage.coverage.push(CoverageAssessment {
            criterion: "c".to_string(),
            status: "mostly".to_string(),
            question_ids: vec![],
            reason: None,
        });
        assert!(bad_coverage.validate().is_err());
    }

    #[test]
    fn test_lenient_enum_fields() {
        let reflect = ReflectOutput {
            thought: "t".to_string(),
            delta: "Dead End".to_string(),
            done: false,
        };
        assert!(reflect.validate().is_ok());
        assert_eq!(reflect.delta(), Delta::DeadEnd);

        let summary = SummaryOutput {
            answer: "a".to_string(),
            key_findings: vec![],
            confidence: "certain".to_string(),
            limitations: vec![],
        };
        assert!(summary.validate().is_err());
    }

    #[tokio::test]
    async fn test_generate_retries_invalid_output() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
            call_timeout_secs: 5,
        };
        let calls = AtomicU32::new(0);
        let batch = generate(&policy, "plan_queries", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(QueryBatch {
                    queries: if n == 0 {
                        vec![" ".to_string()]
                    } else {
                        vec!["rust runtimes".to_string()]
                    },
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(batch.queries, vec!["rust runtimes"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
