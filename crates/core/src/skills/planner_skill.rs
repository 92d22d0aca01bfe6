//! # Planner Skill
//!
//! The brain of a research run. At kickoff it splits the objective into
//! narrow questions; after every research round it reviews the document and
//! either spawns more questions or calls for synthesis.
//!
//! Every planner call ends in exactly one [`Decision`]. Synthesis is only
//! accepted when each success criterion is covered by a completed,
//! non-dead-end question or has been declared unfindable.

use crate::config::ResearchConfig;
use crate::skills::generation::{
    generate, CoverageStatus, EvaluateContext, EvaluateOutput, KickoffContext, ProposedQuestion,
    StructuredGenerator,
};
use crate::state::{
    normalize_query, Decision, DecisionAction, Edit, ResearchDocument, ResearchQuestion,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

/// Hard cap on questions a single planner call may add
pub const MAX_QUESTIONS_PER_CALL: usize = 5;

const COMPOUND_PATTERN: &str = r"(?i)\band\b|\bor\b|\bas well as\b|\balong with\b|;";
const BACKREFERENCE_PATTERN: &str = r"(?i)\bthe above\b|\baforementioned\b|\bprevious(ly)?\b";

fn compound_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(COMPOUND_PATTERN).ok()).as_ref()
}

fn backreference_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(BACKREFERENCE_PATTERN).ok())
        .as_ref()
}

/// Reject questions that bundle several asks or lean on earlier context
pub fn check_narrow(question: &str) -> Result<(), String> {
    let text = question.trim();
    if text.is_empty() {
        return Err("question is empty".to_string());
    }
    if let Some(m) = compound_re().and_then(|re| re.find(text)) {
        return Err(format!(
            "`{}` combines several questions (`{}`); ask one thing",
            text,
            m.as_str()
        ));
    }
    if let Some(m) = backreference_re().and_then(|re| re.find(text)) {
        return Err(format!(
            "`{}` refers to earlier context (`{}`); make it self-contained",
            text,
            m.as_str()
        ));
    }
    Ok(())
}

/// What one planner call decided, ready to be applied in order
#[derive(Debug, Clone)]
pub struct Plan {
    pub disqualify: Vec<(String, String)>,
    pub questions: Vec<ResearchQuestion>,
    pub decision: Decision,
}

impl Plan {
    fn decide(decision: Decision) -> Self {
        Self {
            disqualify: Vec::new(),
            questions: Vec::new(),
            decision,
        }
    }

    pub fn action(&self) -> DecisionAction {
        self.decision.action
    }

    /// Disqualifications, then new questions, then the decision
    pub fn into_edits(self) -> Vec<Edit> {
        let mut edits = Vec::with_capacity(self.disqualify.len() + self.questions.len() + 1);
        edits.extend(
            self.disqualify
                .into_iter()
                .map(|(finding_id, reason)| Edit::DisqualifyFinding { finding_id, reason }),
        );
        edits.extend(
            self.questions
                .into_iter()
                .map(|question| Edit::AddQuestion { question }),
        );
        edits.push(Edit::RecordDecision {
            decision: self.decision,
        });
        edits
    }
}

fn reasoning(learned: &str, missing: &str, action: &str) -> String {
    format!(
        "Learned: {}\nMissing: {}\nAction: {}",
        learned.trim(),
        missing.trim(),
        action.trim()
    )
}

/// The synthesize decision recorded when a budget ends the run early
pub fn forced_synthesis(doc: &ResearchDocument, reason: &str) -> Decision {
    let usable = doc.questions.iter().filter(|q| q.is_usable()).count();
    Decision::new(
        DecisionAction::Synthesize,
        Vec::new(),
        reasoning(
            &format!(
                "{} of {} questions completed with usable results",
                usable,
                doc.questions.len()
            ),
            "Unknown; research stopped before the planner judged coverage",
            &format!("synthesize ({})", reason),
        ),
    )
    .forced()
}

pub struct PlannerSkill {
    generator: Arc<dyn StructuredGenerator>,
    config: Arc<ResearchConfig>,
}

impl PlannerSkill {
    pub fn new(generator: Arc<dyn StructuredGenerator>, config: Arc<ResearchConfig>) -> Self {
        Self { generator, config }
    }

    fn new_question(&self, proposed: &ProposedQuestion) -> ResearchQuestion {
        let title = if proposed.title.trim().is_empty() {
            proposed.question.trim()
        } else {
            proposed.title.trim()
        };
        ResearchQuestion::new(
            title,
            proposed.question.trim(),
            proposed.goal.trim(),
            self.config.max_cycles_per_question,
        )
    }

    /// Keep narrow, unseen candidates; return the rest as feedback
    fn screen(
        &self,
        doc: &ResearchDocument,
        candidates: &[ProposedQuestion],
        limit: usize,
    ) -> (Vec<ResearchQuestion>, Vec<String>) {
        let mut seen: HashSet<String> = doc
            .questions
            .iter()
            .map(|q| normalize_query(&q.question))
            .collect();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for candidate in candidates {
            if let Err(reason) = check_narrow(&candidate.question) {
                rejected.push(reason);
                continue;
            }
            if !seen.insert(normalize_query(&candidate.question)) {
                rejected.push(format!("`{}` was already asked", candidate.question.trim()));
                continue;
            }
            if accepted.len() >= limit {
                tracing::debug!(question = %candidate.question, "Dropping question over the round limit");
                continue;
            }
            accepted.push(self.new_question(candidate));
        }
        (accepted, rejected)
    }

    /// Propose the first questions for an empty document
    #[tracing::instrument(skip(self, doc), fields(document_id = %doc.id))]
    pub async fn kickoff(&self, doc: &ResearchDocument, max_questions: usize) -> Plan {
        let limit = max_questions.min(MAX_QUESTIONS_PER_CALL);
        if limit == 0 {
            tracing::warn!("No room for kickoff questions; synthesizing");
            return Plan::decide(forced_synthesis(doc, "no step budget left for questions"));
        }
        let attempts = self.config.planner_attempts.max(1);
        let mut feedback = Vec::new();
        let mut accepted = Vec::new();
        let mut strategy = None;

        for attempt in 1..=attempts {
            let ctx = KickoffContext {
                objective: doc.objective.clone(),
                success_criteria: doc.success_criteria.clone(),
                max_questions: limit,
                feedback: feedback.clone(),
            };
            let output = match generate(&self.config.retry, "kickoff", || {
                self.generator.kickoff(&ctx)
            })
            .await
            {
                Ok(output) => output,
                Err(err) => {
                    tracing::warn!(error = %err, "Kickoff generation failed");
                    break;
                }
            };

            let (valid, rejected) = self.screen(doc, &output.questions, limit);
            accepted = valid;
            strategy = output.strategy;
            if rejected.is_empty() {
                break;
            }
            tracing::info!(
                attempt,
                rejected = rejected.len(),
                "Kickoff proposed questions that are not narrow"
            );
            feedback = rejected;
        }

        let mut action = String::new();
        if accepted.is_empty() {
            tracing::warn!("No usable kickoff questions; researching the objective directly");
            accepted.push(ResearchQuestion::new(
                "Objective",
                doc.objective.trim(),
                "Answer the objective directly",
                self.config.max_cycles_per_question,
            ));
            action.push_str("fall back to the objective as the only question; ");
        }

        let titles: Vec<&str> = accepted.iter().map(|q| q.title.as_str()).collect();
        action.push_str(&format!(
            "spawn {} question(s): {}",
            accepted.len(),
            titles.join(", ")
        ));
        if let Some(strategy) = strategy.filter(|s| !s.trim().is_empty()) {
            action.push_str(&format!(". Strategy: {}", strategy.trim()));
        }

        let missing = if doc.success_criteria.is_empty() {
            "Everything; no success criteria were given".to_string()
        } else {
            doc.success_criteria.join("; ")
        };
        let decision = Decision::new(
            DecisionAction::Spawn,
            accepted.iter().map(|q| q.id.clone()).collect(),
            reasoning("Nothing yet; research is starting", &missing, &action),
        );
        tracing::info!(questions = accepted.len(), "Kickoff decided");

        Plan {
            disqualify: Vec::new(),
            questions: accepted,
            decision,
        }
    }

    /// Review the merged document and decide what happens next
    #[tracing::instrument(skip(self, doc), fields(document_id = %doc.id))]
    pub async fn evaluate(&self, doc: &ResearchDocument, max_new_questions: usize) -> Plan {
        let limit = max_new_questions.min(MAX_QUESTIONS_PER_CALL);
        let attempts = self.config.planner_attempts.max(1);
        let mut feedback = Vec::new();

        for attempt in 1..=attempts {
            let mut ctx = EvaluateContext::from_document(doc, limit);
            ctx.feedback = feedback.clone();

            let output = match generate(&self.config.retry, "evaluate", || {
                self.generator.evaluate(&ctx)
            })
            .await
            {
                Ok(output) => output,
                Err(err) => {
                    tracing::warn!(error = %err, "Planner evaluation failed; synthesizing");
                    return Plan::decide(self.unclosed_gaps(
                        doc,
                        None,
                        &format!("synthesize, planner unavailable ({})", err),
                    ));
                }
            };
            let disqualify = disqualifications(doc, &output);
            let last = attempt == attempts;

            if output.wants_synthesis() {
                let gaps = coverage_gaps(doc, &output);
                if gaps.is_empty() {
                    let unfindable = unfindable_criteria(doc, &output);
                    let mut action = format!("synthesize ({})", output.rationale.trim());
                    if !unfindable.is_empty() {
                        action.push_str(&format!(
                            ". Declared unfindable: {}",
                            unfindable.join("; ")
                        ));
                    }
                    tracing::info!(unfindable = unfindable.len(), "Planner chose synthesis");
                    return Plan {
                        disqualify,
                        questions: Vec::new(),
                        decision: Decision::new(
                            DecisionAction::Synthesize,
                            Vec::new(),
                            reasoning(&output.learned, &output.missing, &action),
                        )
                        .with_unfindable(unfindable),
                    };
                }
                if last {
                    tracing::warn!(gaps = gaps.len(), "Planner could not close coverage gaps");
                    let mut plan = Plan::decide(self.unclosed_gaps(
                        doc,
                        Some(&output),
                        "synthesize (planner could not close gaps)",
                    ));
                    plan.disqualify = disqualify;
                    return plan;
                }
                tracing::info!(attempt, gaps = gaps.len(), "Rejecting synthesis with uncovered criteria");
                feedback = gaps;
                continue;
            }

            if limit == 0 {
                tracing::info!("No room for new questions; synthesizing");
                let mut plan = Plan::decide(self.unclosed_gaps(
                    doc,
                    Some(&output),
                    "synthesize (no room left for new questions)",
                ));
                plan.disqualify = disqualify;
                return plan;
            }

            let (questions, rejected) = self.screen(doc, &output.new_questions, limit);
            if questions.is_empty() {
                if last {
                    let mut plan = Plan::decide(self.unclosed_gaps(
                        doc,
                        Some(&output),
                        "synthesize (planner proposed no usable questions)",
                    ));
                    plan.disqualify = disqualify;
                    return plan;
                }
                tracing::info!(attempt, "Every proposed question was rejected");
                feedback = rejected;
                continue;
            }

            let titles: Vec<&str> = questions.iter().map(|q| q.title.as_str()).collect();
            let action = format!(
                "spawn {} question(s): {} ({})",
                questions.len(),
                titles.join(", "),
                output.rationale.trim()
            );
            tracing::info!(questions = questions.len(), "Planner chose to spawn");
            return Plan {
                disqualify,
                decision: Decision::new(
                    DecisionAction::Spawn,
                    questions.iter().map(|q| q.id.clone()).collect(),
                    reasoning(&output.learned, &output.missing, &action),
                ),
                questions,
            };
        }

        // planner_attempts is at least one, so every path above returns.
        Plan::decide(self.unclosed_gaps(doc, None, "synthesize (planner made no decision)"))
    }

    /// Synthesize, declaring every criterion without usable coverage unfindable
    fn unclosed_gaps(
        &self,
        doc: &ResearchDocument,
        output: Option<&EvaluateOutput>,
        action: &str,
    ) -> Decision {
        let uncovered: Vec<String> = doc
            .success_criteria
            .iter()
            .filter(|criterion| !criterion_supported(doc, output, criterion))
            .cloned()
            .collect();
        let (learned, missing) = match output {
            Some(out) => (out.learned.clone(), out.missing.clone()),
            None => (
                format!(
                    "{} of {} questions completed",
                    doc.completed_questions().count(),
                    doc.questions.len()
                ),
                uncovered.join("; "),
            ),
        };
        let mut action = action.to_string();
        if !uncovered.is_empty() {
            action.push_str(&format!(". Declared unfindable: {}", uncovered.join("; ")));
        }
        Decision::new(
            DecisionAction::Synthesize,
            Vec::new(),
            reasoning(&learned, &missing, &action),
        )
        .with_unfindable(uncovered)
    }
}

fn same_criterion(a: &str, b: &str) -> bool {
    normalize_query(a) == normalize_query(b)
}

fn usable_ids(doc: &ResearchDocument) -> HashSet<&str> {
    doc.questions
        .iter()
        .filter(|q| q.is_usable())
        .map(|q| q.id.as_str())
        .collect()
}

/// Whether a criterion is backed by a usable question the planner cited
fn criterion_supported(
    doc: &ResearchDocument,
    output: Option<&EvaluateOutput>,
    criterion: &str,
) -> bool {
    let usable = usable_ids(doc);
    output
        .map(|out| {
            out.coverage.iter().any(|c| {
                same_criterion(&c.criterion, criterion)
                    && c.coverage() == Some(CoverageStatus::Covered)
                    && c.question_ids.iter().any(|id| usable.contains(id.as_str()))
            })
        })
        .unwrap_or(false)
}

/// Criteria a synthesize verdict leaves neither covered nor unfindable, as
/// feedback for the next attempt
fn coverage_gaps(doc: &ResearchDocument, output: &EvaluateOutput) -> Vec<String> {
    let usable = usable_ids(doc);
    let mut gaps = Vec::new();

    for criterion in &doc.success_criteria {
        let assessment = output
            .coverage
            .iter()
            .find(|c| same_criterion(&c.criterion, criterion));
        match assessment.and_then(|c| c.coverage().map(|status| (c, status))) {
            None => gaps.push(format!("criterion `{}` has no coverage assessment", criterion)),
            Some((_, CoverageStatus::Unfindable)) => {}
            Some((_, CoverageStatus::Missing)) => {
                gaps.push(format!("criterion `{}` is still missing", criterion))
            }
            Some((c, CoverageStatus::Covered)) => {
                if !c.question_ids.iter().any(|id| usable.contains(id.as_str())) {
                    gaps.push(format!(
                        "criterion `{}` is marked covered but cites no completed, non-dead-end question",
                        criterion
                    ));
                }
            }
        }
    }
    gaps
}

fn unfindable_criteria(doc: &ResearchDocument, output: &EvaluateOutput) -> Vec<String> {
    doc.success_criteria
        .iter()
        .filter_map(|criterion| {
            output
                .coverage
                .iter()
                .find(|c| {
                    same_criterion(&c.criterion, criterion)
                        && c.coverage() == Some(CoverageStatus::Unfindable)
                })
                .map(|c| match c.reason.as_deref().map(str::trim) {
                    Some(reason) if !reason.is_empty() => format!("{} ({})", criterion, reason),
                    _ => criterion.clone(),
                })
        })
        .collect()
}

/// Disqualifications that target active findings
fn disqualifications(doc: &ResearchDocument, output: &EvaluateOutput) -> Vec<(String, String)> {
    output
        .disqualify
        .iter()
        .filter(|d| match doc.finding(&d.finding_id) {
            Some(finding) => finding.is_active(),
            None => {
                tracing::debug!(finding_id = %d.finding_id, "Ignoring disqualification of unknown finding");
                false
            }
        })
        .map(|d| (d.finding_id.clone(), d.reason.trim().to_string()))
        .collect()
}
