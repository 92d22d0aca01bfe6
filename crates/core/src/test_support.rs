//! Scripted capabilities for exercising executors and the orchestrator
//! without a provider or a search backend.

use crate::config::ResearchConfig;
use crate::error::{GenerationError, RetrievalError};
use crate::skills::generation::{
    CoverageAssessment, CriterionAnswer, EvaluateContext, EvaluateOutput, KickoffContext,
    KickoffOutput, ProposedQuestion, QueryBatch, QuestionContext, ReflectContext, ReflectOutput,
    StructuredGenerator, SummaryOutput, SynthesisContext, SynthesisOutput,
};
use crate::state::{Delta, QuestionStatus, Source};
use crate::tools::retrieval::{Retrieval, Retriever};
use crate::tools::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

type Script<C, T> = Arc<dyn Fn(&C) -> T + Send + Sync>;

/// Defaults with zero backoff so retries do not slow tests down
pub(crate) fn fast_config() -> ResearchConfig {
    ResearchConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
            call_timeout_secs: 5,
        },
        ..ResearchConfig::default()
    }
}

pub(crate) fn proposed(title: &str, question: &str) -> ProposedQuestion {
    ProposedQuestion {
        title: title.to_string(),
        question: question.to_string(),
        goal: format!("Answer {}", title),
    }
}

/// A planner verdict spawning `questions`
pub(crate) fn spawn(questions: Vec<ProposedQuestion>) -> EvaluateOutput {
    EvaluateOutput {
        action: "spawn_new".to_string(),
        learned: "Partial picture".to_string(),
        missing: "More angles".to_string(),
        rationale: "Gaps remain".to_string(),
        coverage: Vec::new(),
        new_questions: questions,
        disqualify: Vec::new(),
    }
}

/// A planner verdict that marks every criterion covered by every usable question
pub(crate) fn synthesize_all(ctx: &EvaluateContext) -> EvaluateOutput {
    let usable: Vec<String> = ctx
        .questions
        .iter()
        .filter(|q| q.status == QuestionStatus::Done)
        .map(|q| q.id.clone())
        .collect();
    EvaluateOutput {
        action: "synthesize".to_string(),
        learned: "Everything needed".to_string(),
        missing: "Nothing".to_string(),
        rationale: "All criteria covered".to_string(),
        coverage: ctx
            .success_criteria
            .iter()
            .map(|c| CoverageAssessment {
                criterion: c.clone(),
                status: "covered".to_string(),
                question_ids: usable.clone(),
                reason: None,
            })
            .collect(),
        new_questions: Vec::new(),
        disqualify: Vec::new(),
    }
}

#[derive(Clone)]
pub(crate) struct ScriptedGenerator {
    kickoff: Script<KickoffContext, Result<KickoffOutput, GenerationError>>,
    evaluate: Script<EvaluateContext, Result<EvaluateOutput, GenerationError>>,
    queries: Script<QuestionContext, Result<Vec<String>, GenerationError>>,
    reflection: Script<ReflectContext, Result<(String, Delta, bool), GenerationError>>,
    summary: Script<QuestionContext, Result<SummaryOutput, GenerationError>>,
    synthesis: Script<SynthesisContext, Result<SynthesisOutput, GenerationError>>,
    kickoff_calls: Arc<AtomicU32>,
    evaluate_calls: Arc<AtomicU32>,
    reflect_calls: Arc<AtomicU32>,
    evaluations: Arc<Mutex<Vec<EvaluateContext>>>,
    syntheses: Arc<Mutex<Vec<SynthesisContext>>>,
}

impl ScriptedGenerator {
    pub(crate) fn new() -> Self {
        Self {
            kickoff: Arc::new(|ctx: &KickoffContext| {
                let questions = if ctx.success_criteria.is_empty() {
                    vec![proposed("Objective", &ctx.objective)]
                } else {
                    ctx.success_criteria
                        .iter()
                        .map(|c| proposed(c, &format!("What is known about {}?", c)))
                        .collect()
                };
                Ok(KickoffOutput {
                    questions,
                    strategy: None,
                })
            }),
            evaluate: Arc::new(|ctx: &EvaluateContext| Ok(synthesize_all(ctx))),
            queries: Arc::new(|ctx: &QuestionContext| Ok(vec![ctx.question.clone()])),
            reflection: Arc::new(|_: &ReflectContext| {
                Ok(("Answered".to_string(), Delta::Progress, true))
            }),
            summary: Arc::new(|ctx: &QuestionContext| {
                Ok(SummaryOutput {
                    answer: format!("Answer to {}", ctx.question),
                    key_findings: vec![format!("Finding about {}", ctx.title)],
                    confidence: "medium".to_string(),
                    limitations: Vec::new(),
                })
            }),
            synthesis: Arc::new(|ctx: &SynthesisContext| {
                let done: Vec<String> = ctx
                    .questions
                    .iter()
                    .filter(|q| q.status == QuestionStatus::Done)
                    .map(|q| q.id.clone())
                    .collect();
                Ok(SynthesisOutput {
                    answer: format!("Synthesized answer for {}", ctx.objective),
                    confidence: "high".to_string(),
                    criteria: ctx
                        .success_criteria
                        .iter()
                        .map(|c| CriterionAnswer {
                            criterion: c.clone(),
                            addressed: true,
                            question_ids: done.clone(),
                        })
                        .collect(),
                    limitations: Vec::new(),
                })
            }),
            kickoff_calls: Arc::new(AtomicU32::new(0)),
            evaluate_calls: Arc::new(AtomicU32::new(0)),
            reflect_calls: Arc::new(AtomicU32::new(0)),
            evaluations: Arc::new(Mutex::new(Vec::new())),
            syntheses: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_kickoff<F>(mut self, f: F) -> Self
    where
        F: Fn(&KickoffContext) -> Result<KickoffOutput, GenerationError> + Send + Sync + 'static,
    {
        self.kickoff = Arc::new(f);
        self
    }

    pub(crate) fn with_evaluate<F>(mut self, f: F) -> Self
    where
        F: Fn(&EvaluateContext) -> Result<EvaluateOutput, GenerationError> + Send + Sync + 'static,
    {
        self.evaluate = Arc::new(f);
        self
    }

    pub(crate) fn with_queries<F>(mut self, f: F) -> Self
    where
        F: Fn(&QuestionContext) -> Vec<String> + Send + Sync + 'static,
    {
        self.queries = Arc::new(move |ctx: &QuestionContext| Ok(f(ctx)));
        self
    }

    pub(crate) fn failing_queries(mut self) -> Self {
        self.queries = Arc::new(|_: &QuestionContext| {
            Err(GenerationError::Provider("query planner offline".to_string()))
        });
        self
    }

    pub(crate) fn with_reflection<F>(mut self, f: F) -> Self
    where
        F: Fn(&ReflectContext) -> (String, Delta, bool) + Send + Sync + 'static,
    {
        self.reflection = Arc::new(move |ctx: &ReflectContext| Ok(f(ctx)));
        self
    }

    /// Every structured task fails with a provider error
    pub(crate) fn failing_everything(mut self) -> Self {
        fn offline<T>() -> Result<T, GenerationError> {
            Err(GenerationError::Provider("provider offline".to_string()))
        }
        self.kickoff = Arc::new(|_: &KickoffContext| offline::<KickoffOutput>());
        self.evaluate = Arc::new(|_: &EvaluateContext| offline::<EvaluateOutput>());
        self.queries = Arc::new(|_: &QuestionContext| offline::<Vec<String>>());
        self.reflection = Arc::new(|_: &ReflectContext| offline::<(String, Delta, bool)>());
        self.summary = Arc::new(|_: &QuestionContext| offline::<SummaryOutput>());
        self.synthesis = Arc::new(|_: &SynthesisContext| offline::<SynthesisOutput>());
        self
    }

    /// Reflection panics, taking the executor task down with it
    pub(crate) fn panicking_reflection(mut self) -> Self {
        self.reflection = Arc::new(
            |_: &ReflectContext| -> Result<(String, Delta, bool), GenerationError> {
                panic!("reflection crashed")
            },
        );
        self
    }

    pub(crate) fn failing_summaries(mut self) -> Self {
        self.summary = Arc::new(|_: &QuestionContext| {
            Err(GenerationError::Provider("summarizer offline".to_string()))
        });
        self
    }

    pub(crate) fn with_synthesis<F>(mut self, f: F) -> Self
    where
        F: Fn(&SynthesisContext) -> Result<SynthesisOutput, GenerationError>
            + Send
            + Sync
            + 'static,
    {
        self.synthesis = Arc::new(f);
        self
    }

    pub(crate) fn kickoff_calls(&self) -> u32 {
        self.kickoff_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn evaluate_calls(&self) -> u32 {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn reflect_calls(&self) -> u32 {
        self.reflect_calls.load(Ordering::SeqCst)
    }

    /// Every context the planner was asked to evaluate
    pub(crate) fn evaluations(&self) -> Vec<EvaluateContext> {
        self.evaluations.lock().unwrap().clone()
    }

    pub(crate) fn syntheses(&self) -> Vec<SynthesisContext> {
        self.syntheses.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuredGenerator for ScriptedGenerator {
    async fn kickoff(&self, ctx: &KickoffContext) -> Result<KickoffOutput, GenerationError> {
        self.kickoff_calls.fetch_add(1, Ordering::SeqCst);
        (self.kickoff)(ctx)
    }

    async fn evaluate(&self, ctx: &EvaluateContext) -> Result<EvaluateOutput, GenerationError> {
        self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        self.evaluations.lock().unwrap().push(ctx.clone());
        (self.evaluate)(ctx)
    }

    async fn plan_queries(&self, ctx: &QuestionContext) -> Result<QueryBatch, GenerationError> {
        (self.queries)(ctx).map(|queries| QueryBatch { queries })
    }

    async fn reflect(&self, ctx: &ReflectContext) -> Result<ReflectOutput, GenerationError> {
        self.reflect_calls.fetch_add(1, Ordering::SeqCst);
        let (thought, delta, done) = (self.reflection)(ctx)?;
        let delta = match delta {
            Delta::Progress => "progress",
            Delta::NoChange => "no_change",
            Delta::DeadEnd => "dead_end",
        };
        Ok(ReflectOutput {
            thought,
            delta: delta.to_string(),
            done,
        })
    }

    async fn summarize_question(
        &self,
        ctx: &QuestionContext,
    ) -> Result<SummaryOutput, GenerationError> {
        (self.summary)(ctx)
    }

    async fn synthesize(&self, ctx: &SynthesisContext) -> Result<SynthesisOutput, GenerationError> {
        self.syntheses.lock().unwrap().push(ctx.clone());
        (self.synthesis)(ctx)
    }
}

/// Answers every query with one synthetic source, recording the calls
#[derive(Clone, Default)]
pub(crate) struct ScriptedRetriever {
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedRetriever {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail every attempt at `query` with a transient error
    pub(crate) fn failing(mut self, query: &str) -> Self {
        let mut failing = (*self.failing).clone();
        failing.insert(query.to_string());
        self.failing = Arc::new(failing);
        self
    }

    /// Block each call until the gate hands out a permit
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    async fn retrieve(&self, query: &str) -> Result<Retrieval, RetrievalError> {
        self.calls.lock().unwrap().push(query.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| RetrievalError::Transient("gate closed".to_string()))?
                .forget();
        }
        if self.failing.contains(query) {
            return Err(RetrievalError::Transient(format!("backend down for {}", query)));
        }
        let slug = query.replace(' ', "-").to_lowercase();
        Ok(Retrieval {
            answer: format!("Result for {}", query),
            sources: vec![Source::new(format!("https://example.com/{}", slug), query)],
        })
    }
}
