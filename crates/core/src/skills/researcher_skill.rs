//! # Researcher Skill
//!
//! Runs one research question through bounded search -> reflect cycles.
//!
//! The executor never touches the live document. Everything it does is an
//! [`Edit`] sent through its [`QuestionWriter`]; the orchestrator merges those
//! into the document in order.

use crate::config::ResearchConfig;
use crate::skills::generation::{
    generate, QuestionContext, ReflectContext, StructuredGenerator,
};
use crate::state::{
    dedup_sources, normalize_query, Confidence, Delta, Edit, Finding, MemoryEntry,
    QuestionStatus, QuestionSummary, Recommendation, ResearchQuestion, Source,
};
use crate::swarm::bridge::{QuestionWriter, WriteError};
use crate::tools::retrieval::Retriever;
use crate::tools::retry::with_retry;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How an executor run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorOutcome {
    Completed(Recommendation),
    /// Cancelled between cycles; the question stays running
    Cancelled,
    /// The merge loop went away
    Disconnected,
    /// The executor produced an edit its own question could not take
    Failed,
}

/// Why the cycle loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Answered,
    DeadEnd,
    BudgetExhausted,
}

pub struct QuestionExecutor {
    objective: String,
    generator: Arc<dyn StructuredGenerator>,
    retriever: Arc<dyn Retriever>,
    config: Arc<ResearchConfig>,
    cancel: CancellationToken,
}

impl QuestionExecutor {
    pub fn new(
        objective: impl Into<String>,
        generator: Arc<dyn StructuredGenerator>,
        retriever: Arc<dyn Retriever>,
        config: Arc<ResearchConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            objective: objective.into(),
            generator,
            retriever,
            config,
            cancel,
        }
    }

    #[tracing::instrument(skip(self, writer), fields(question_id = %writer.id()))]
    pub async fn run(&self, mut writer: QuestionWriter) -> ExecutorOutcome {
        match self.drive(&mut writer).await {
            Ok(outcome) => outcome,
            Err(WriteError::Closed) => {
                tracing::warn!("Edit channel closed; abandoning question");
                ExecutorOutcome::Disconnected
            }
            Err(WriteError::Rejected(err)) => {
                tracing::warn!(error = %err, "Executor produced an invalid edit");
                ExecutorOutcome::Failed
            }
        }
    }

    async fn drive(&self, writer: &mut QuestionWriter) -> Result<ExecutorOutcome, WriteError> {
        let qid = writer.id().to_string();

        match writer.question().status {
            QuestionStatus::Done => {
                let recommendation = writer
                    .question()
                    .recommendation
                    .unwrap_or(Recommendation::NeedsMore);
                return Ok(ExecutorOutcome::Completed(recommendation));
            }
            QuestionStatus::Pending => {
                if self.cancel.is_cancelled() {
                    return Ok(ExecutorOutcome::Cancelled);
                }
                writer
                    .send(Edit::StartQuestion {
                        question_id: qid.clone(),
                    })
                    .await?;
                tracing::info!("Question started");
            }
            QuestionStatus::Running => {
                tracing::info!(cycles = writer.question().cycles, "Resuming question");
            }
        }

        let mut sources = sources_in(&writer.question().memory);

        let finish = loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Cancelled between cycles");
                return Ok(ExecutorOutcome::Cancelled);
            }
            if !writer.question().has_budget() {
                break Finish::BudgetExhausted;
            }

            writer
                .send(Edit::BeginCycle {
                    question_id: qid.clone(),
                })
                .await?;
            let answered = self.run_cycle(writer, &mut sources).await?;

            if writer.question().memory.len() > self.config.compaction_threshold {
                writer
                    .send(Edit::CompactMemory {
                        question_id: qid.clone(),
                        keep_recent: self.config.compaction_keep_recent,
                    })
                    .await?;
            }

            if answered {
                break Finish::Answered;
            }
            if writer.question().trailing_dead_ends() >= self.config.dead_end_streak.max(1) {
                break Finish::DeadEnd;
            }
        };

        let recommendation = self.complete(writer, finish, sources).await?;
        Ok(ExecutorOutcome::Completed(recommendation))
    }

    /// One search -> reflect cycle. Returns whether the question is answered.
    async fn run_cycle(
        &self,
        writer: &mut QuestionWriter,
        sources: &mut Vec<Source>,
    ) -> Result<bool, WriteError> {
        let qid = writer.id().to_string();
        let cycle = writer.question().cycles;
        let ctx = QuestionContext::new(&self.objective, writer.question(), self.config.queries_per_cycle);

        let planned = generate(&self.config.retry, "plan_queries", || {
            self.generator.plan_queries(&ctx)
        })
        .await;
        let proposed = match planned {
            Ok(batch) => batch.queries,
            Err(err) if cycle == 1 => {
                tracing::warn!(error = %err, "Query planning failed; searching the question itself");
                vec![writer.question().question.clone()]
            }
            Err(err) => {
                tracing::warn!(error = %err, "Query planning failed");
                writer
                    .send(Edit::AppendMemory {
                        question_id: qid,
                        entry: MemoryEntry::reflect(
                            format!("Could not plan queries for cycle {}: {}", cycle, err),
                            Delta::NoChange,
                        ),
                    })
                    .await?;
                return Ok(false);
            }
        };

        let queries = fresh_queries(writer.question(), proposed, self.config.queries_per_cycle);
        if queries.is_empty() {
            writer
                .send(Edit::AppendMemory {
                    question_id: qid,
                    entry: MemoryEntry::reflect(
                        format!("Cycle {} proposed only queries that were already searched", cycle),
                        Delta::NoChange,
                    ),
                })
                .await?;
            return Ok(false);
        }

        let cycle_start = writer.question().memory.len();
        for query in queries {
            writer
                .send(Edit::AppendMemory {
                    question_id: qid.clone(),
                    entry: MemoryEntry::search(&query),
                })
                .await?;

            let retrieved = with_retry(&self.config.retry, "retrieve", || {
                self.retriever.retrieve(&query)
            })
            .await;
            let entry = match retrieved {
                Ok(retrieval) => {
                    sources.extend(retrieval.sources.iter().cloned());
                    MemoryEntry::Result {
                        query: query.clone(),
                        answer: retrieval.answer,
                        sources: retrieval.sources,
                    }
                }
                Err(err) => MemoryEntry::reflect(
                    format!("Retrieval failed for `{}`: {}", query, err),
                    Delta::NoChange,
                ),
            };
            writer
                .send(Edit::AppendMemory {
                    question_id: qid.clone(),
                    entry,
                })
                .await?;
        }

        let reflect_ctx = ReflectContext {
            question: QuestionContext::new(
                &self.objective,
                writer.question(),
                self.config.queries_per_cycle,
            ),
            this_cycle: writer.question().memory[cycle_start..].to_vec(),
        };
        let reflected = generate(&self.config.retry, "reflect", || {
            self.generator.reflect(&reflect_ctx)
        })
        .await;
        let (entry, answered) = match reflected {
            Ok(out) => (MemoryEntry::reflect(&out.thought, out.delta()), out.done),
            Err(err) => {
                tracing::warn!(error = %err, "Reflection failed; recording no change");
                (
                    MemoryEntry::reflect(
                        format!("Reflection unavailable for cycle {}: {}", cycle, err),
                        Delta::NoChange,
                    ),
                    false,
                )
            }
        };
        writer
            .send(Edit::AppendMemory {
                question_id: qid,
                entry,
            })
            .await?;
        Ok(answered)
    }

    async fn complete(
        &self,
        writer: &mut QuestionWriter,
        finish: Finish,
        sources: Vec<Source>,
    ) -> Result<Recommendation, WriteError> {
        let qid = writer.id().to_string();
        let sources = dedup_sources(sources);
        let ctx = QuestionContext::new(&self.objective, writer.question(), self.config.queries_per_cycle);

        let mut summary = match generate(&self.config.retry, "summarize_question", || {
            self.generator.summarize_question(&ctx)
        })
        .await
        {
            Ok(out) => QuestionSummary {
                confidence: out.confidence(),
                answer: out.answer.trim().to_string(),
                key_findings: out
                    .key_findings
                    .into_iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
                limitations: out.limitations,
                sources: sources.clone(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "Summary generation failed; using fallback");
                fallback_summary(writer.question(), sources.clone(), &err.to_string())
            }
        };

        let recommendation = match finish {
            Finish::Answered => Recommendation::Promising,
            Finish::DeadEnd => {
                summary.limitations.push(format!(
                    "Abandoned after {} consecutive dead-end cycles",
                    self.config.dead_end_streak.max(1)
                ));
                Recommendation::DeadEnd
            }
            Finish::BudgetExhausted => {
                summary.confidence = Confidence::Low;
                summary.limitations.push(format!(
                    "Cycle budget of {} ran out before the question was answered",
                    writer.question().max_cycles
                ));
                Recommendation::NeedsMore
            }
        };

        for content in &summary.key_findings {
            writer
                .send(Edit::AddFinding {
                    finding: Finding::new(&qid, content.clone(), sources.clone()),
                })
                .await?;
        }
        writer
            .send(Edit::CompleteQuestion {
                question_id: qid,
                summary,
                recommendation,
            })
            .await?;

        tracing::info!(recommendation = recommendation.as_str(), "Question completed");
        Ok(recommendation)
    }
}

/// Close out a question whose executor ended without completing it. The
/// summary is built from whatever memory the question gathered.
pub fn abandon_question(question: &ResearchQuestion, reason: &str) -> Edit {
    let sources = dedup_sources(sources_in(&question.memory));
    let mut summary = fallback_summary(question, sources, reason);
    summary.limitations = vec![format!("Investigation ended early: {}", reason)];
    Edit::CompleteQuestion {
        question_id: question.id.clone(),
        summary,
        recommendation: Recommendation::DeadEnd,
    }
}

/// Sources cited by result entries still in memory
fn sources_in(memory: &[MemoryEntry]) -> Vec<Source> {
    memory
        .iter()
        .filter_map(|entry| match entry {
            MemoryEntry::Result { sources, .. } => Some(sources.iter().cloned()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Drop blank queries, queries this question already ran, and repeats within
/// the batch
fn fresh_queries(question: &ResearchQuestion, proposed: Vec<String>, limit: usize) -> Vec<String> {
    let mut batch = HashSet::new();
    let mut fresh = Vec::new();
    for query in proposed {
        let query = query.trim().to_string();
        if query.is_empty() {
            continue;
        }
        let normalized = normalize_query(&query);
        if question.has_run_query(&query) || !batch.insert(normalized) {
            tracing::debug!(question_id = %question.id, query = %query, "Skipping duplicate query");
            continue;
        }
        fresh.push(query);
        if fresh.len() >= limit {
            break;
        }
    }
    fresh
}

/// Deterministic summary built from memory when generation is unavailable
fn fallback_summary(question: &ResearchQuestion, sources: Vec<Source>, error: &str) -> QuestionSummary {
    let answers: Vec<&str> = question
        .memory
        .iter()
        .rev()
        .filter_map(|entry| match entry {
            MemoryEntry::Result { answer, .. } if !answer.trim().is_empty() => {
                Some(answer.trim())
            }
            _ => None,
        })
        .take(3)
        .collect();

    let answer = if answers.is_empty() {
        format!("No answer was found for: {}", question.question)
    } else {
        format!(
            "Unsummarized results for \"{}\":\n{}",
            question.question,
            answers.join("\n")
        )
    };

    QuestionSummary {
        answer,
        key_findings: Vec::new(),
        confidence: Confidence::Low,
        limitations: vec![format!("Summary generation failed: {}", error)],
        sources,
    }
}
