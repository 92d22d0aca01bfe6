//! # Document Store
//!
//! Persistence port for research documents. Stores see opaque blobs keyed by
//! session id; [`persist`] and [`restore`] put the versioned schema envelope
//! around them.

use super::document::ResearchDocument;
use super::schema;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Listing entry for a stored session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub session_id: String,
    pub revision: i64,
    pub saved_at: DateTime<Utc>,
}

/// Blob storage keyed by session id
pub trait DocumentStore: Send + Sync {
    fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite the blob for a session, bumping its revision
    fn save(&self, session_id: &str, blob: &[u8]) -> Result<()>;

    fn list(&self) -> Result<Vec<StoredSession>>;

    /// Verify the store is usable before a run starts
    fn check(&self) -> Result<()> {
        self.list().map(|_| ())
    }
}

/// Encode and save a document
pub fn persist(store: &dyn DocumentStore, doc: &ResearchDocument) -> Result<()> {
    let blob = schema::encode(doc).context("Failed to encode research document")?;
    store
        .save(&doc.id, &blob)
        .with_context(|| format!("Failed to persist session {}", doc.id))
}

/// Load and decode a document, migrating older schema versions
pub fn restore(store: &dyn DocumentStore, session_id: &str) -> Result<Option<ResearchDocument>> {
    let Some(blob) = store.load(session_id)? else {
        return Ok(None);
    };
    let doc = schema::decode(&blob, session_id)
        .with_context(|| format!("Failed to decode session {}", session_id))?;
    Ok(Some(doc))
}

/// Process-local store, used by tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryDocumentStore {
    entries: RwLock<HashMap<String, (Vec<u8>, StoredSession)>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(entries.get(session_id).map(|(blob, _)| blob.clone()))
    }

    fn save(&self, session_id: &str, blob: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let revision = entries
            .get(session_id)
            .map(|(_, meta)| meta.revision + 1)
            .unwrap_or(1);
        entries.insert(
            session_id.to_string(),
            (
                blob.to_vec(),
                StoredSession {
                    session_id: session_id.to_string(),
                    revision,
                    saved_at: Utc::now(),
                },
            ),
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoredSession>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut sessions: Vec<StoredSession> =
            entries.values().map(|(_, meta)| meta.clone()).collect();
        sessions.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_and_restore() {
        let store = InMemoryDocumentStore::new();
        let doc = ResearchDocument::new("objective", vec!["c".to_string()]);

        persist(&store, &doc).unwrap();
        persist(&store, &doc).unwrap();

        let restored = restore(&store, &doc.id).unwrap().unwrap();
        assert_eq!(restored, doc);

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].revision, 2);
    }

    #[test]
    fn test_restore_missing_session() {
        let store = InMemoryDocumentStore::new();
        assert!(restore(&store, "nope").unwrap().is_none());
    }
}
