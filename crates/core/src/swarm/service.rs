//! # Research Service
//!
//! The entry point for callers: starts, resumes and stops research sessions
//! and hands out snapshots. Each live session is one orchestrator task.

use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::state::schema;
use crate::state::{persist, ResearchDocument, StoredSession};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

use super::events::ResearchEvent;
use super::orchestrator::{Orchestrator, ResearchDeps, RunOutcome};

/// A caller's view of a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    snapshots: watch::Receiver<ResearchDocument>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// The document as of the last merged edit
    pub fn snapshot(&self) -> ResearchDocument {
        self.snapshots.borrow().clone()
    }

    /// Receiver that wakes on every merged edit
    pub fn updates(&self) -> watch::Receiver<ResearchDocument> {
        self.snapshots.clone()
    }

    /// Request cancellation; in-flight cycles still finish
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

struct Session {
    snapshots: watch::Receiver<ResearchDocument>,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<RunOutcome>>,
}

impl Session {
    fn is_live(&self) -> bool {
        self.outcome.borrow().is_none()
    }
}

/// Forget finished runs; their documents stay in the store
fn prune_finished(sessions: &mut HashMap<String, Session>) {
    let before = sessions.len();
    sessions.retain(|_, session| session.is_live());
    if sessions.len() < before {
        tracing::debug!(pruned = before - sessions.len(), "Pruned finished sessions");
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<ResearchEvent>;

pub struct ResearchService {
    deps: ResearchDeps,
    config: Arc<ResearchConfig>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl ResearchService {
    pub fn new(deps: ResearchDeps, config: ResearchConfig) -> Self {
        Self {
            deps,
            config: Arc::new(config),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Create a document for `objective` and start researching it
    pub async fn start_research(
        &self,
        objective: &str,
        success_criteria: Vec<String>,
    ) -> Result<(SessionHandle, EventReceiver), ResearchError> {
        let objective = objective.trim();
        if objective.is_empty() {
            return Err(ResearchError::InvalidRequest(
                "objective must not be empty".to_string(),
            ));
        }
        let criteria: Vec<String> = success_criteria
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let doc = ResearchDocument::new(objective, criteria);
        // Nothing is registered until the document is safely stored.
        persist(self.deps.store.as_ref(), &doc).map_err(ResearchError::persistence)?;

        tracing::info!(session_id = %doc.id, objective = %doc.objective, "Starting research session");
        let mut sessions = self.sessions.write().await;
        prune_finished(&mut sessions);
        Ok(self.launch(&mut sessions, doc))
    }

    /// Continue a persisted session where it stopped
    pub async fn resume(
        &self,
        session_id: &str,
    ) -> Result<(SessionHandle, EventReceiver), ResearchError> {
        let mut sessions = self.sessions.write().await;
        prune_finished(&mut sessions);
        if sessions.get(session_id).is_some_and(Session::is_live) {
            return Err(ResearchError::AlreadyRunning(session_id.to_string()));
        }

        let doc = self.load(session_id)?;
        if doc.is_sealed() {
            return Err(ResearchError::AlreadyComplete(session_id.to_string()));
        }

        tracing::info!(
            session_id,
            questions = doc.questions.len(),
            decisions = doc.decision_log.len(),
            "Resuming research session"
        );
        Ok(self.launch(&mut sessions, doc))
    }

    fn load(&self, session_id: &str) -> Result<ResearchDocument, ResearchError> {
        let blob = self
            .deps
            .store
            .load(session_id)
            .map_err(ResearchError::persistence)?
            .ok_or_else(|| ResearchError::UnknownSession(session_id.to_string()))?;
        Ok(schema::decode(&blob, session_id)?)
    }

    fn launch(
        &self,
        sessions: &mut HashMap<String, Session>,
        doc: ResearchDocument,
    ) -> (SessionHandle, EventReceiver) {
        let session_id = doc.id.clone();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            doc,
            self.deps.clone(),
            self.config.clone(),
            Arc::new(event_tx),
            cancel.clone(),
        );
        let snapshots = orchestrator.subscribe();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        tokio::spawn(async move {
            let outcome = orchestrator.run().await;
            outcome_tx.send_replace(Some(outcome));
        });

        sessions.insert(
            session_id.clone(),
            Session {
                snapshots: snapshots.clone(),
                cancel: cancel.clone(),
                outcome: outcome_rx,
            },
        );

        (
            SessionHandle {
                session_id,
                snapshots,
                cancel,
            },
            event_rx,
        )
    }

    /// Cancel a live session. Running questions stay running in the stored
    /// document so a later resume picks them up.
    pub async fn stop(&self, session_id: &str) -> Result<(), ResearchError> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) if session.is_live() => {
                tracing::info!(session_id, "Stop requested");
                session.cancel.cancel();
                Ok(())
            }
            Some(_) => Err(ResearchError::AlreadyComplete(session_id.to_string())),
            None => Err(ResearchError::UnknownSession(session_id.to_string())),
        }
    }

    /// Latest document, from the live session or the store
    pub async fn snapshot(&self, session_id: &str) -> Result<ResearchDocument, ResearchError> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Ok(session.snapshots.borrow().clone());
        }
        self.load(session_id)
    }

    pub fn list_sessions(&self) -> Result<Vec<StoredSession>, ResearchError> {
        self.deps
            .store
            .list()
            .map_err(ResearchError::persistence)
    }

    /// Wait for a session to finish. A finished session stays waitable until
    /// the next start or resume prunes it.
    pub async fn wait(&self, session_id: &str) -> Result<RunOutcome, ResearchError> {
        let mut outcome = match self.sessions.read().await.get(session_id) {
            Some(session) => session.outcome.clone(),
            None => return Err(ResearchError::UnknownSession(session_id.to_string())),
        };
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ResearchError::Aborted(session_id.to_string()))?;
        finished
            .clone()
            .ok_or_else(|| ResearchError::Aborted(session_id.to_string()))
    }
}
