//! # Edit Bridge
//!
//! The channel between question executors and the orchestrator's merge point.
//!
//! ```text
//! Executor q-1 ──┐
//! Executor q-2 ──┼── EditEnvelope ──▶ merge loop ──▶ apply() ──▶ document
//! Executor q-3 ──┘
//! ```
//!
//! Each executor writes through a [`QuestionWriter`], which applies every
//! edit to a private replica of its question before sending it. The replica
//! lets the executor read its own state without touching the live document,
//! and guarantees it never sends an edit the applier would reject.

use crate::state::{apply_to_question, Edit, EditError, ResearchQuestion};
use thiserror::Error;
use tokio::sync::mpsc;

/// Bound on in-flight edits between executors and the merge loop
pub const EDIT_CHANNEL_CAPACITY: usize = 256;

/// An edit plus where it came from
#[derive(Debug, Clone)]
pub struct EditEnvelope {
    pub question_id: String,
    /// Per-question sequence number, starting at 0
    pub seq: u64,
    pub edit: Edit,
}

pub fn edit_channel() -> (mpsc::Sender<EditEnvelope>, mpsc::Receiver<EditEnvelope>) {
    mpsc::channel(EDIT_CHANNEL_CAPACITY)
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Rejected(#[from] EditError),
    #[error("merge loop is gone")]
    Closed,
}

/// An executor's handle for editing its own question
pub struct QuestionWriter {
    replica: ResearchQuestion,
    tx: mpsc::Sender<EditEnvelope>,
    seq: u64,
}

impl QuestionWriter {
    pub fn new(question: ResearchQuestion, tx: mpsc::Sender<EditEnvelope>) -> Self {
        Self {
            replica: question,
            tx,
            seq: 0,
        }
    }

    /// The question as of the last edit this writer sent
    pub fn question(&self) -> &ResearchQuestion {
        &self.replica
    }

    pub fn id(&self) -> &str {
        &self.replica.id
    }

    /// Apply locally, then forward to the merge point
    pub async fn send(&mut self, edit: Edit) -> Result<(), WriteError> {
        if let Some(target) = edit.question_id() {
            if target != self.replica.id {
                return Err(EditError::UnknownQuestion(target.to_string()).into());
            }
        }
        apply_to_question(&mut self.replica, &edit)?;

        let envelope = EditEnvelope {
            question_id: self.replica.id.clone(),
            seq: self.seq,
            edit,
        };
        self.seq += 1;
        self.tx
            .send(envelope)
            .await
            .map_err(|_| WriteError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryEntry, QuestionStatus};

    #[tokio::test]
    async fn test_writer_sequences_edits() {
        let (tx, mut rx) = edit_channel();
        let q = ResearchQuestion::new("t", "What?", "g", 2);
        let qid = q.id.clone();
        let mut writer = QuestionWriter::new(q, tx);

        writer
            .send(Edit::StartQuestion {
                question_id: qid.clone(),
            })
            .await
            .unwrap();
        writer
            .send(Edit::AppendMemory {
                question_id: qid.clone(),
                entry: MemoryEntry::search("rust"),
            })
            .await
            .unwrap();

        assert_eq!(writer.question().status, QuestionStatus::Running);
        assert_eq!(rx.recv().await.unwrap().seq, 0);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.seq, 1);
        assert_eq!(second.question_id, qid);
    }

    #[tokio::test]
    async fn test_writer_refuses_invalid_edits() {
        let (tx, mut rx) = edit_channel();
        let q = ResearchQuestion::new("t", "What?", "g", 2);
        let qid = q.id.clone();
        let mut writer = QuestionWriter::new(q, tx);

        // Not running yet.
        let err = writer
            .send(Edit::BeginCycle { question_id: qid })
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Rejected(EditError::NotRunning(_))));

        let err = writer
            .send(Edit::StartQuestion {
                question_id: "q-other".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::Rejected(_)));
        assert!(rx.try_recv().is_err());
    }
}
