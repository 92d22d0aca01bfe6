//! # Research Database
//!
//! SQLite persistence for research sessions at `.inquest/inquest.db`.
//! Each session is one row holding the versioned document envelope.

use super::store::{DocumentStore, StoredSession};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed [`DocumentStore`]
pub struct ResearchDb {
    conn: Arc<Mutex<Connection>>,
}

impl ResearchDb {
    /// Open or create the database at `.inquest/inquest.db`
    pub fn open() -> Result<Self> {
        Self::open_at(".inquest/inquest.db")
    }

    /// Open database at a specific path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open research database")?;
        Self::from_connection(conn)
    }

    /// Database that lives only as long as this handle
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                session_id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                revision INTEGER NOT NULL DEFAULT 1,
                saved_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_saved ON documents(saved_at)",
            [],
        )?;

        tracing::info!(
            "ResearchDb initialized with schema version {}",
            SCHEMA_VERSION
        );
        Ok(())
    }
}

impl DocumentStore for ResearchDb {
    fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.query_row(
            "SELECT data FROM documents WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("Failed to load session {}", session_id))
    }

    fn save(&self, session_id: &str, blob: &[u8]) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO documents (session_id, data, revision, saved_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(session_id) DO UPDATE SET
                data = ?2,
                revision = revision + 1,
                saved_at = ?3
            "#,
            params![session_id, blob, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("Failed to save session {}", session_id))?;

        tracing::debug!(session_id = %session_id, bytes = blob.len(), "Saved research document");
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoredSession>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT session_id, revision, saved_at FROM documents ORDER BY saved_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (session_id, revision, saved_at) = row?;
            let saved_at = DateTime::parse_from_rfc3339(&saved_at)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("Bad timestamp for session {}", session_id))?;
            sessions.push(StoredSession {
                session_id,
                revision,
                saved_at,
            });
        }
        Ok(sessions)
    }

    fn check(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        conn.query_row("SELECT COUNT(*) FROM documents", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("Research database is not usable")?;
        Ok(())
    }
}
