//! # Synthesizer Skill
//!
//! Turns completed questions and active findings into the run's final
//! answer. The answer always states its confidence and says when a budget
//! ran out or criteria were given up on.

use crate::config::ResearchConfig;
use crate::skills::generation::{
    generate, FindingDigest, QuestionDigest, StructuredGenerator, SynthesisContext,
    SynthesisOutput,
};
use crate::state::{
    normalize_query, Confidence, CriterionCoverage, DecisionAction, DocumentStatus, Edit,
    FinalAnswer, ResearchDocument,
};
use std::collections::HashSet;
use std::sync::Arc;

pub struct SynthesizerSkill {
    generator: Arc<dyn StructuredGenerator>,
    config: Arc<ResearchConfig>,
}

/// The synthesis context for a document: done questions and active findings only
pub fn synthesis_context(doc: &ResearchDocument) -> SynthesisContext {
    let synthesis = doc
        .latest_decision()
        .filter(|d| d.action == DecisionAction::Synthesize);
    SynthesisContext {
        objective: doc.objective.clone(),
        success_criteria: doc.success_criteria.clone(),
        questions: doc.completed_questions().map(QuestionDigest::from).collect(),
        findings: doc
            .active_findings()
            .map(|f| FindingDigest {
                id: f.id.clone(),
                question_id: f.question_id.clone(),
                content: f.content.clone(),
            })
            .collect(),
        unfindable_criteria: synthesis
            .map(|d| d.unfindable_criteria.clone())
            .unwrap_or_default(),
        budget_exhausted: synthesis.map(|d| d.forced).unwrap_or(false),
    }
}

/// The edit pair that seals a document
pub fn final_edits(answer: FinalAnswer) -> Vec<Edit> {
    vec![
        Edit::SetFinalAnswer { answer },
        Edit::SetStatus {
            status: DocumentStatus::Complete,
        },
    ]
}

impl SynthesizerSkill {
    pub fn new(generator: Arc<dyn StructuredGenerator>, config: Arc<ResearchConfig>) -> Self {
        Self { generator, config }
    }

    #[tracing::instrument(skip(self, doc), fields(document_id = %doc.id))]
    pub async fn synthesize(&self, doc: &ResearchDocument) -> FinalAnswer {
        let ctx = synthesis_context(doc);
        let answer = match generate(&self.config.retry, "synthesize", || {
            self.generator.synthesize(&ctx)
        })
        .await
        {
            Ok(output) => from_output(&ctx, output),
            Err(err) => {
                tracing::warn!(error = %err, "Synthesis failed; assembling fallback answer");
                fallback_answer(&ctx, &err.to_string())
            }
        };
        tracing::info!(
            confidence = answer.confidence.as_str(),
            budget_exhausted = answer.budget_exhausted,
            "Final answer ready"
        );
        answer
    }
}

/// Reconcile a generated answer with what the document can actually support
fn from_output(ctx: &SynthesisContext, output: SynthesisOutput) -> FinalAnswer {
    let done: HashSet<&str> = ctx.questions.iter().map(|q| q.id.as_str()).collect();
    let mut limitations: Vec<String> = output
        .limitations
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    let criteria = ctx
        .success_criteria
        .iter()
        .map(|criterion| {
            let claimed = output
                .criteria
                .iter()
                .find(|c| normalize_query(&c.criterion) == normalize_query(criterion));
            let question_ids: Vec<String> = claimed
                .map(|c| {
                    c.question_ids
                        .iter()
                        .filter(|id| done.contains(id.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let addressed = claimed.map(|c| c.addressed).unwrap_or(false) && !question_ids.is_empty();
            if !addressed {
                limitations.push(format!("Criterion not addressed: {}", criterion));
            }
            CriterionCoverage {
                criterion: criterion.clone(),
                addressed,
                question_ids,
            }
        })
        .collect();

    let mut confidence = output.confidence();
    cap_confidence(ctx, &mut confidence, &mut limitations);

    FinalAnswer {
        answer: output.answer.trim().to_string(),
        confidence,
        criteria,
        limitations,
        budget_exhausted: ctx.budget_exhausted,
    }
}

fn cap_confidence(ctx: &SynthesisContext, confidence: &mut Confidence, limitations: &mut Vec<String>) {
    if ctx.budget_exhausted {
        *confidence = (*confidence).min(Confidence::Low);
        limitations.push(
            "The research step budget ran out before the planner chose to synthesize".to_string(),
        );
    } else if !ctx.unfindable_criteria.is_empty() {
        *confidence = (*confidence).min(Confidence::Medium);
    }
    if !ctx.unfindable_criteria.is_empty() {
        limitations.push(format!(
            "Declared unfindable: {}",
            ctx.unfindable_criteria.join("; ")
        ));
    }
}

/// Deterministic answer assembled from question summaries
fn fallback_answer(ctx: &SynthesisContext, error: &str) -> FinalAnswer {
    let usable: Vec<&QuestionDigest> = ctx
        .questions
        .iter()
        .filter(|q| q.answer.is_some())
        .collect();

    let answer = if usable.is_empty() {
        format!("No question produced an answer for: {}", ctx.objective)
    } else {
        let mut text = format!("Summary of research on: {}\n", ctx.objective);
        for q in &usable {
            if let Some(answer) = &q.answer {
                text.push_str(&format!("\n- {} ({}): {}", q.title, q.id, answer.trim()));
            }
        }
        text
    };

    let mut limitations = vec![format!("Synthesis generation failed: {}", error)];
    let mut confidence = Confidence::Low;
    cap_confidence(ctx, &mut confidence, &mut limitations);

    FinalAnswer {
        answer,
        confidence,
        criteria: ctx
            .success_criteria
            .iter()
            .map(|criterion| CriterionCoverage {
                criterion: criterion.clone(),
                addressed: false,
                question_ids: Vec::new(),
            })
            .collect(),
        limitations,
        budget_exhausted: ctx.budget_exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::skills::generation::CriterionAnswer;
    use crate::skills::planner_skill::forced_synthesis;
    use crate::state::{
        apply, Decision, Finding, QuestionStatus, QuestionSummary, Recommendation,
        ResearchQuestion,
    };
    use crate::test_support::{fast_config, ScriptedGenerator};

    fn document() -> (ResearchDocument, String) {
        let mut doc = ResearchDocument::new("Which runtime?", vec!["name one".to_string()]);
        let mut done = ResearchQuestion::new("Runtimes", "Which runtimes exist?", "", 2);
        done.status = QuestionStatus::Done;
        done.recommendation = Some(Recommendation::Promising);
        done.summary = Some(QuestionSummary {
            answer: "tokio and smol".to_string(),
            key_findings: vec![],
            confidence: Confidence::High,
            limitations: vec![],
            sources: vec![],
        });
        let id = done.id.clone();
        let mut running = ResearchQuestion::new("Perf", "How fast is tokio?", "", 2);
        running.status = QuestionStatus::Running;
        doc.questions.push(done);
        doc.questions.push(running);
        (doc, id)
    }

    fn skill(generator: ScriptedGenerator) -> SynthesizerSkill {
        SynthesizerSkill::new(Arc::new(generator), Arc::new(fast_config()))
    }

    #[test]
    fn test_context_reads_done_questions_and_active_findings() {
        let (mut doc, qid) = document();
        doc = apply(
            &doc,
            &Edit::AddFinding {
                finding: Finding::new(&qid, "kept", vec![]),
            },
        );
        doc = apply(
            &doc,
            &Edit::AddFinding {
                finding: Finding::new(&qid, "dropped", vec![]),
            },
        );
        let dropped = doc.findings[1].id.clone();
        doc = apply(
            &doc,
            &Edit::DisqualifyFinding {
                finding_id: dropped,
                reason: "wrong".to_string(),
            },
        );

        let ctx = synthesis_context(&doc);
        assert_eq!(ctx.questions.len(), 1);
        assert_eq!(ctx.findings.len(), 1);
        assert_eq!(ctx.findings[0].content, "kept");
        assert!(!ctx.budget_exhausted);
    }

    #[tokio::test]
    async fn test_synthesis_cites_only_done_questions() {
        let (doc, qid) = document();
        let running = doc.questions[1].id.clone();
        let cited = vec![qid.clone(), running];
        let generator = ScriptedGenerator::new().with_synthesis(move |_| {
            Ok(SynthesisOutput {
                answer: "Use tokio".to_string(),
                confidence: "high".to_string(),
                criteria: vec![CriterionAnswer {
                    criterion: "Name one".to_string(),
                    addressed: true,
                    question_ids: cited.clone(),
                }],
                limitations: vec![],
            })
        });

        let answer = skill(generator).synthesize(&doc).await;

        assert_eq!(answer.confidence, Confidence::High);
        assert_eq!(answer.criteria[0].question_ids, vec![qid]);
        assert!(answer.criteria[0].addressed);
        assert!(answer.limitations.is_empty());
    }

    #[tokio::test]
    async fn test_forced_synthesis_caps_confidence() {
        let (mut doc, _) = document();
        let forced = forced_synthesis(&doc, "step budget exhausted");
        doc = apply(&doc, &Edit::RecordDecision { decision: forced });

        let answer = skill(ScriptedGenerator::new()).synthesize(&doc).await;

        assert_eq!(answer.confidence, Confidence::Low);
        assert!(answer.budget_exhausted);
        assert!(answer.limitations.iter().any(|l| l.contains("budget")));
    }

    #[tokio::test]
    async fn test_unfindable_criteria_cap_at_medium() {
        let (mut doc, _) = document();
        let decision = Decision::new(DecisionAction::Synthesize, vec![], "r".to_string())
            .with_unfindable(vec!["name one".to_string()]);
        doc = apply(&doc, &Edit::RecordDecision { decision });

        let answer = skill(ScriptedGenerator::new()).synthesize(&doc).await;

        assert_eq!(answer.confidence, Confidence::Medium);
        assert!(!answer.budget_exhausted);
        assert!(answer
            .limitations
            .iter()
            .any(|l| l == "Declared unfindable: name one"));
    }

    #[tokio::test]
    async fn test_missing_criterion_is_reported() {
        let (doc, _) = document();
        let generator = ScriptedGenerator::new().with_synthesis(|_| {
            Ok(SynthesisOutput {
                answer: "Something".to_string(),
                confidence: "medium".to_string(),
                criteria: vec![],
                limitations: vec![],
            })
        });

        let answer = skill(generator).synthesize(&doc).await;

        assert!(!answer.criteria[0].addressed);
        assert!(answer.limitations[0].contains("name one"));
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back() {
        let (doc, qid) = document();
        let generator = ScriptedGenerator::new()
            .with_synthesis(|_| Err(GenerationError::Provider("no key".to_string())));

        let answer = skill(generator).synthesize(&doc).await;

        assert_eq!(answer.confidence, Confidence::Low);
        assert!(answer.answer.contains("tokio and smol"));
        assert!(answer.answer.contains(&qid));
        assert!(answer.limitations[0].contains("Synthesis generation failed"));
    }

    #[test]
    fn test_final_edits_seal_document() {
        let (doc, _) = document();
        let answer = FinalAnswer {
            answer: "a".to_string(),
            confidence: Confidence::Low,
            criteria: vec![],
            limitations: vec![],
            budget_exhausted: false,
        };
        let sealed = final_edits(answer)
            .iter()
            .fold(doc, |doc, edit| apply(&doc, edit));
        assert!(sealed.is_sealed());
        assert!(sealed.final_answer.is_some());
    }
}
