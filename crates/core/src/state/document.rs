//! # Research Document
//!
//! The single record of one research run. Every field here is owned by the
//! orchestrator and changes only through [`super::edits`]; nothing else holds
//! a mutable reference to a live document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Overall status of a research run. Forward-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Running,
    Synthesizing,
    Complete,
}

impl DocumentStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Synthesizing => 1,
            Self::Complete => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic
    pub fn can_move_to(self, next: DocumentStatus) -> bool {
        next.rank() >= self.rank()
    }
}

/// Lifecycle of a single question: pending -> running -> done, never back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    #[default]
    Pending,
    Running,
    Done,
}

/// Confidence attached to a question result or the final answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown confidence level `{}`", other)),
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the executor recommends doing with a finished question
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Promising,
    DeadEnd,
    NeedsMore,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promising => "promising",
            Self::DeadEnd => "dead_end",
            Self::NeedsMore => "needs_more",
        }
    }
}

impl FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "promising" => Ok(Self::Promising),
            "dead_end" => Ok(Self::DeadEnd),
            "needs_more" => Ok(Self::NeedsMore),
            other => Err(format!("unknown recommendation `{}`", other)),
        }
    }
}

/// How much a cycle moved the investigation forward
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Delta {
    Progress,
    NoChange,
    DeadEnd,
}

impl FromStr for Delta {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "progress" => Ok(Self::Progress),
            "no_change" => Ok(Self::NoChange),
            "dead_end" => Ok(Self::DeadEnd),
            other => Err(format!("unknown delta `{}`", other)),
        }
    }
}

/// A cited source. Two sources are the same source when their URLs match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub title: String,
}

impl Source {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Merge sources, keeping the first occurrence of each URL
pub fn dedup_sources<I: IntoIterator<Item = Source>>(sources: I) -> Vec<Source> {
    let mut seen = BTreeSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.url.trim().to_string()))
        .collect()
}

/// Normalize a query for duplicate detection: trimmed, lowercased, and with
/// internal whitespace collapsed to single spaces.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One entry in a question's investigation log. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryEntry {
    Search {
        query: String,
    },
    Result {
        query: String,
        answer: String,
        #[serde(default)]
        sources: Vec<Source>,
    },
    Reflect {
        thought: String,
        delta: Delta,
    },
}

impl MemoryEntry {
    pub fn search(query: impl Into<String>) -> Self {
        Self::Search {
            query: query.into(),
        }
    }

    pub fn reflect(thought: impl Into<String>, delta: Delta) -> Self {
        Self::Reflect {
            thought: thought.into(),
            delta,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::Result { .. } => "result",
            Self::Reflect { .. } => "reflect",
        }
    }
}

/// Structured result of a finished question
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionSummary {
    pub answer: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    pub confidence: Confidence,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// One investigable angle of the objective
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchQuestion {
    pub id: String,
    pub title: String,
    pub question: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub status: QuestionStatus,
    #[serde(default)]
    pub cycles: u32,
    pub max_cycles: u32,
    #[serde(default)]
    pub memory: Vec<MemoryEntry>,
    /// Normalized queries already issued for this question. Survives compaction.
    #[serde(default)]
    pub queries_run: BTreeSet<String>,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub recommendation: Option<Recommendation>,
    #[serde(default)]
    pub summary: Option<QuestionSummary>,
}

impl ResearchQuestion {
    /// Create a pending question with a fresh id
    pub fn new(
        title: impl Into<String>,
        question: impl Into<String>,
        goal: impl Into<String>,
        max_cycles: u32,
    ) -> Self {
        Self {
            id: new_id("q"),
            title: title.into(),
            question: question.into(),
            goal: goal.into(),
            status: QuestionStatus::Pending,
            cycles: 0,
            max_cycles,
            memory: Vec::new(),
            queries_run: BTreeSet::new(),
            confidence: None,
            recommendation: None,
            summary: None,
        }
    }

    /// Whether another cycle may still be started
    pub fn has_budget(&self) -> bool {
        self.cycles < self.max_cycles
    }

    pub fn is_done(&self) -> bool {
        self.status == QuestionStatus::Done
    }

    pub fn is_dead_end(&self) -> bool {
        self.recommendation == Some(Recommendation::DeadEnd)
    }

    /// Done and not abandoned as a dead end
    pub fn is_usable(&self) -> bool {
        self.is_done() && !self.is_dead_end()
    }

    pub fn has_run_query(&self, query: &str) -> bool {
        self.queries_run.contains(&normalize_query(query))
    }

    /// Number of trailing reflect entries classified as dead ends
    pub fn trailing_dead_ends(&self) -> u32 {
        let mut streak = 0;
        for entry in self.memory.iter().rev() {
            match entry {
                MemoryEntry::Reflect {
                    delta: Delta::DeadEnd,
                    ..
                } => streak += 1,
                MemoryEntry::Reflect { .. } => break,
                _ => continue,
            }
        }
        streak
    }
}

/// Status of a finding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    #[default]
    Active,
    Disqualified,
}

/// A discrete fact extracted from a finished question
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub id: String,
    pub question_id: String,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub status: FindingStatus,
    #[serde(default)]
    pub disqualify_reason: Option<String>,
}

impl Finding {
    pub fn new(question_id: &str, content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            id: new_id("f"),
            question_id: question_id.to_string(),
            content: content.into(),
            sources,
            status: FindingStatus::Active,
            disqualify_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FindingStatus::Active
    }
}

/// What the planner chose to do
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Spawn,
    Synthesize,
}

/// One planner choice, kept forever in the decision log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: DecisionAction,
    /// Questions spawned by this decision (empty for synthesize)
    #[serde(default)]
    pub question_ids: Vec<String>,
    pub reasoning: String,
    /// Success criteria the planner declared unfindable
    #[serde(default)]
    pub unfindable_criteria: Vec<String>,
    /// Set when a budget, not the planner, made the call
    #[serde(default)]
    pub forced: bool,
}

impl Decision {
    pub fn new(action: DecisionAction, question_ids: Vec<String>, reasoning: String) -> Self {
        Self {
            id: new_id("d"),
            timestamp: Utc::now(),
            action,
            question_ids,
            reasoning,
            unfindable_criteria: Vec::new(),
            forced: false,
        }
    }

    pub fn with_unfindable(mut self, criteria: Vec<String>) -> Self {
        self.unfindable_criteria = criteria;
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }
}

/// How the final answer addresses one success criterion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CriterionCoverage {
    pub criterion: String,
    pub addressed: bool,
    #[serde(default)]
    pub question_ids: Vec<String>,
}

/// The synthesized result of a research run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalAnswer {
    pub answer: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub criteria: Vec<CriterionCoverage>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub budget_exhausted: bool,
}

/// Root aggregate of a research run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchDocument {
    pub id: String,
    pub objective: String,
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub questions: Vec<ResearchQuestion>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub decision_log: Vec<Decision>,
    #[serde(default)]
    pub status: DocumentStatus,
    #[serde(default)]
    pub final_answer: Option<FinalAnswer>,
    /// Every normalized query issued in this run, across all questions
    #[serde(default)]
    pub queries_run: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl ResearchDocument {
    /// Create an empty running document with a fresh session id
    pub fn new(objective: impl Into<String>, success_criteria: Vec<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), objective, success_criteria)
    }

    pub fn with_id(
        id: impl Into<String>,
        objective: impl Into<String>,
        success_criteria: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            objective: objective.into(),
            success_criteria,
            questions: Vec::new(),
            findings: Vec::new(),
            decision_log: Vec::new(),
            status: DocumentStatus::Running,
            final_answer: None,
            queries_run: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn question(&self, id: &str) -> Option<&ResearchQuestion> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn finding(&self, id: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.id == id)
    }

    /// Once complete the document accepts no further edits
    pub fn is_sealed(&self) -> bool {
        self.status == DocumentStatus::Complete
    }

    pub fn count_with_status(&self, status: QuestionStatus) -> usize {
        self.questions.iter().filter(|q| q.status == status).count()
    }

    pub fn completed_questions(&self) -> impl Iterator<Item = &ResearchQuestion> {
        self.questions.iter().filter(|q| q.is_done())
    }

    /// Questions that still need an executor
    pub fn open_questions(&self) -> impl Iterator<Item = &ResearchQuestion> {
        self.questions.iter().filter(|q| !q.is_done())
    }

    pub fn active_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_active())
    }

    pub fn latest_decision(&self) -> Option<&Decision> {
        self.decision_log.last()
    }
}

/// Short prefixed identifier, e.g. `q-1a2b3c4d`
pub fn new_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &raw[..8])
}
