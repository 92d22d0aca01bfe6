//! Retrieval capability: answer a search query with cited sources.

use crate::error::RetrievalError;
use crate::state::Source;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What a retriever found for one query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Retrieval {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Retrieval, RetrievalError>;
}
