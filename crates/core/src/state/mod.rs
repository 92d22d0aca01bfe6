pub mod db;
pub mod document;
pub mod edits;
pub mod replay;
pub mod schema;
pub mod store;

pub use db::ResearchDb;

pub use document::{
    dedup_sources, new_id, normalize_query, Confidence, CriterionCoverage, Decision,
    DecisionAction, Delta, DocumentStatus, FinalAnswer, Finding, FindingStatus, MemoryEntry,
    QuestionStatus, QuestionSummary, Recommendation, ResearchDocument, ResearchQuestion, Source,
};
pub use edits::{apply, apply_to_question, compact_memory, try_apply, Edit, EditError};
pub use replay::{narrate, replay};
pub use schema::{SchemaError, CURRENT_SCHEMA_VERSION};
pub use store::{persist, restore, DocumentStore, InMemoryDocumentStore, StoredSession};
