//! # Research Orchestrator
//!
//! Drives one research run from kickoff to final answer and owns the only
//! writable copy of its document.
//!
//! ```text
//! Kickoff ──▶ Researching ──▶ Replanning ──▶ Synthesizing ──▶ Complete
//!                  ▲               │
//!                  └─── spawn ─────┘
//! ```
//!
//! During a research round every open question gets an executor task. The
//! executors stream edits through one channel; the loop below is the single
//! merge point that applies them, journals them and republishes the snapshot.

use crate::config::ResearchConfig;
use crate::skills::generation::StructuredGenerator;
use crate::skills::planner_skill::{forced_synthesis, PlannerSkill};
use crate::skills::researcher_skill::{abandon_question, ExecutorOutcome, QuestionExecutor};
use crate::skills::synthesizer_skill::{final_edits, SynthesizerSkill};
use crate::state::{
    persist, try_apply, DecisionAction, DocumentStatus, DocumentStore, Edit, FinalAnswer,
    QuestionStatus, ResearchDocument,
};
use crate::tools::retrieval::Retriever;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::bridge::{edit_channel, QuestionWriter};
use super::events::{ProgressSink, ResearchEvent, ResearchEventKind};
use super::pipeline::{Phase, Pipeline};

/// The capabilities a run consumes
#[derive(Clone)]
pub struct ResearchDeps {
    pub retriever: Arc<dyn Retriever>,
    pub generator: Arc<dyn StructuredGenerator>,
    pub store: Arc<dyn DocumentStore>,
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub session_id: String,
    pub phase: Phase,
    /// Planner calls plus executor launches, including earlier runs of a resumed session
    pub steps: u32,
    pub document: ResearchDocument,
    /// Every edit applied during this run, in order
    pub journal: Vec<Edit>,
}

impl RunOutcome {
    pub fn final_answer(&self) -> Option<&FinalAnswer> {
        self.document.final_answer.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }
}

pub struct Orchestrator {
    doc: ResearchDocument,
    pipeline: Pipeline,
    journal: Vec<Edit>,
    deps: ResearchDeps,
    config: Arc<ResearchConfig>,
    sink: Arc<dyn ProgressSink>,
    snapshots: watch::Sender<ResearchDocument>,
    cancel: CancellationToken,
    planner: PlannerSkill,
    synthesizer: SynthesizerSkill,
}

impl Orchestrator {
    /// Set up a run over `doc`, new or persisted. The phase is derived from
    /// the document so a resumed run never repeats finished work.
    pub fn new(
        doc: ResearchDocument,
        deps: ResearchDeps,
        config: Arc<ResearchConfig>,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        let pipeline = Pipeline::resume(&doc, config.max_steps);
        let (snapshots, _) = watch::channel(doc.clone());
        Self {
            planner: PlannerSkill::new(deps.generator.clone(), config.clone()),
            synthesizer: SynthesizerSkill::new(deps.generator.clone(), config.clone()),
            doc,
            pipeline,
            journal: Vec::new(),
            deps,
            config,
            sink,
            snapshots,
            cancel,
        }
    }

    /// Live view of the document, updated after every applied edit
    pub fn subscribe(&self) -> watch::Receiver<ResearchDocument> {
        self.snapshots.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.pipeline.phase
    }

    #[tracing::instrument(skip(self), fields(session_id = %self.doc.id))]
    pub async fn run(mut self) -> RunOutcome {
        let resumed = !self.doc.questions.is_empty();
        let kind = if resumed {
            ResearchEventKind::ResearchResumed
        } else {
            ResearchEventKind::ResearchStarted
        };
        self.sink.emit(ResearchEvent::new(kind, &self.doc.id).with_data(json!({
            "objective": self.doc.objective,
            "phase": self.pipeline.phase,
        })));
        tracing::info!(phase = ?self.pipeline.phase, resumed, "Research run starting");

        while !self.pipeline.is_complete() {
            match self.pipeline.phase {
                Phase::Kickoff => self.kickoff().await,
                Phase::Researching => self.research_round().await,
                Phase::Replanning => self.replan().await,
                Phase::Synthesizing => self.synthesize().await,
                Phase::Complete | Phase::Stopped => break,
            }
        }

        self.save();
        tracing::info!(
            phase = ?self.pipeline.phase,
            steps = self.pipeline.steps,
            edits = self.journal.len(),
            "Research run finished"
        );

        RunOutcome {
            session_id: self.doc.id.clone(),
            phase: self.pipeline.phase,
            steps: self.pipeline.steps,
            document: self.doc,
            journal: self.journal,
        }
    }

    /// Apply one edit at the merge point
    fn commit(&mut self, edit: Edit) {
        match try_apply(&self.doc, &edit) {
            Ok(next) => {
                self.doc = next;
                self.sink.emit(ResearchEvent::for_edit(&self.doc.id, &edit));
                self.journal.push(edit);
                self.snapshots.send_replace(self.doc.clone());
            }
            Err(err) => {
                tracing::warn!(
                    document_id = %self.doc.id,
                    action = edit.action(),
                    question_id = edit.question_id().unwrap_or(""),
                    error = %err,
                    "Rejected edit at merge point"
                );
                let mut event = ResearchEvent::new(ResearchEventKind::EditRejected, &self.doc.id)
                    .with_data(json!({ "action": edit.action(), "error": err.to_string() }));
                if let Some(qid) = edit.question_id() {
                    event = event.with_question(qid);
                }
                self.sink.emit(event);
            }
        }
    }

    fn commit_all(&mut self, edits: Vec<Edit>) {
        for edit in edits {
            self.commit(edit);
        }
    }

    /// Persistence mid-run is best effort; the run keeps going without it.
    fn save(&self) {
        if let Err(err) = persist(self.deps.store.as_ref(), &self.doc) {
            tracing::warn!(session_id = %self.doc.id, error = %format!("{:#}", err), "Failed to persist document");
        }
    }

    fn stop(&mut self) {
        if self.pipeline.stop() {
            tracing::info!(
                running = self.doc.count_with_status(QuestionStatus::Running),
                "Research stopped"
            );
            self.save();
            self.sink.emit(
                ResearchEvent::new(ResearchEventKind::ResearchStopped, &self.doc.id).with_data(
                    json!({
                        "done": self.doc.count_with_status(QuestionStatus::Done),
                        "running": self.doc.count_with_status(QuestionStatus::Running),
                        "pending": self.doc.count_with_status(QuestionStatus::Pending),
                    }),
                ),
            );
        }
    }

    /// Record a forced synthesize decision and move on to synthesis
    fn force_synthesis(&mut self, reason: &str) {
        tracing::warn!(steps = self.pipeline.steps, max_steps = self.pipeline.max_steps, "{}", reason);
        let decision = forced_synthesis(&self.doc, reason);
        self.commit(Edit::RecordDecision { decision });
        self.begin_synthesis();
    }

    fn begin_synthesis(&mut self) {
        self.commit(Edit::SetStatus {
            status: DocumentStatus::Synthesizing,
        });
        self.save();
        self.pipeline.synthesize();
    }

    async fn kickoff(&mut self) {
        if self.cancel.is_cancelled() {
            self.stop();
            return;
        }
        // The kickoff call and at least one launch must both fit.
        if self.pipeline.steps_left() < 2 {
            self.force_synthesis("step budget too small to launch a question");
            return;
        }

        self.pipeline.count_steps(1);
        let limit = self
            .config
            .max_questions_per_round
            .min(self.pipeline.steps_left() as usize);
        let plan = self.planner.kickoff(&self.doc, limit).await;
        let action = plan.action();
        self.commit_all(plan.into_edits());
        self.save();

        match action {
            DecisionAction::Spawn => {
                self.pipeline.research();
            }
            DecisionAction::Synthesize => self.begin_synthesis(),
        }
    }

    async fn replan(&mut self) {
        if self.cancel.is_cancelled() {
            self.stop();
            return;
        }
        if self.pipeline.is_exhausted() {
            self.force_synthesis("step budget exhausted");
            return;
        }

        self.pipeline.count_steps(1);
        let max_new = self
            .config
            .max_questions_per_round
            .min(self.pipeline.steps_left() as usize);
        let plan = self.planner.evaluate(&self.doc, max_new).await;
        let action = plan.action();
        self.commit_all(plan.into_edits());
        self.save();

        match action {
            DecisionAction::Spawn => {
                self.pipeline.research();
            }
            DecisionAction::Synthesize => self.begin_synthesis(),
        }
    }

    /// Run every open question to completion or cancellation
    async fn research_round(&mut self) {
        if self.cancel.is_cancelled() {
            self.stop();
            return;
        }

        let open: Vec<_> = self.doc.open_questions().cloned().collect();
        if open.is_empty() {
            self.pipeline.replan();
            return;
        }
        // Resumed questions were counted when they were first launched.
        let launches = open
            .iter()
            .filter(|q| q.status == QuestionStatus::Pending)
            .count();
        self.pipeline.count_steps(launches as u32);
        tracing::info!(
            questions = open.len(),
            concurrency = self.config.max_concurrent_questions,
            "Research round starting"
        );

        let round: Vec<String> = open.iter().map(|q| q.id.clone()).collect();
        let (tx, mut rx) = edit_channel();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_questions.max(1)));
        let mut executors = JoinSet::new();

        for question in open {
            let executor = QuestionExecutor::new(
                self.doc.objective.clone(),
                self.deps.generator.clone(),
                self.deps.retriever.clone(),
                self.config.clone(),
                self.cancel.child_token(),
            );
            let writer = QuestionWriter::new(question, tx.clone());
            let semaphore = semaphore.clone();

            executors.spawn(async move {
                // Hold the permit until the executor finishes
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return ExecutorOutcome::Cancelled,
                };
                executor.run(writer).await
            });
        }
        // The channel closes once every executor has dropped its writer.
        drop(tx);

        while let Some(envelope) = rx.recv().await {
            tracing::trace!(
                question_id = %envelope.question_id,
                seq = envelope.seq,
                action = envelope.edit.action(),
                "Merging edit"
            );
            self.commit(envelope.edit);
        }

        while let Some(joined) = executors.join_next().await {
            match joined {
                Ok(outcome @ (ExecutorOutcome::Failed | ExecutorOutcome::Disconnected)) => {
                    tracing::warn!(?outcome, "Executor ended without completing its question");
                }
                Ok(outcome) => tracing::debug!(?outcome, "Executor finished"),
                Err(err) => tracing::warn!(error = %err, "Executor task failed"),
            }
        }

        if self.cancel.is_cancelled() {
            self.save();
            self.stop();
            return;
        }
        self.close_abandoned(&round);
        self.save();
        self.pipeline.replan();
    }

    /// Questions of a finished round are never left running for the planner
    fn close_abandoned(&mut self, round: &[String]) {
        let stranded: Vec<Edit> = round
            .iter()
            .filter_map(|id| self.doc.question(id))
            .filter(|q| q.status == QuestionStatus::Running)
            .map(|q| abandon_question(q, "executor stopped unexpectedly"))
            .collect();
        for edit in stranded {
            tracing::warn!(question_id = edit.question_id().unwrap_or(""), "Closing abandoned question");
            self.commit(edit);
        }
    }

    async fn synthesize(&mut self) {
        if self.cancel.is_cancelled() {
            self.stop();
            return;
        }
        if self.doc.status == DocumentStatus::Running {
            self.commit(Edit::SetStatus {
                status: DocumentStatus::Synthesizing,
            });
        }

        let answer = self.synthesizer.synthesize(&self.doc).await;
        self.commit_all(final_edits(answer));
        self.save();
        self.pipeline.complete();
    }
}
