//! HTTP API over the research service.
//!
//! Every live session's events are fanned into one broadcast channel; the
//! per-session SSE route filters it by session id.

pub mod research;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use inquest_core::swarm::{EventReceiver, ResearchEvent, ResearchService};
use inquest_core::ResearchError;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct AppState {
    pub service: Arc<ResearchService>,
    pub event_tx: broadcast::Sender<ResearchEvent>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(service: Arc<ResearchService>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self { service, event_tx }
    }

    /// Relay a session's events to SSE subscribers until the run ends
    pub fn forward(&self, events: EventReceiver) {
        tokio::spawn(relay(events, self.event_tx.clone()));
    }
}

async fn relay(mut events: EventReceiver, tx: broadcast::Sender<ResearchEvent>) {
    while let Some(event) = events.recv().await {
        // Sending with no SSE client connected fails; the event is simply dropped.
        let _ = tx.send(event);
    }
}

pub fn router(state: SharedState) -> Router {
    let research_routes = Router::new()
        .route("/", get(research::list_sessions).post(research::start_research))
        .route("/:id", get(research::get_snapshot))
        .route("/:id/narrative", get(research::get_narrative))
        .route("/:id/stop", post(research::stop_research))
        .route("/:id/resume", post(research::resume_research))
        .route("/:id/events", get(research::session_events));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/research", research_routes)
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// A service error with its HTTP status
pub struct ApiError(pub ResearchError);

impl From<ResearchError> for ApiError {
    fn from(err: ResearchError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ResearchError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ResearchError::AlreadyRunning(_) | ResearchError::AlreadyComplete(_) => {
                StatusCode::CONFLICT
            }
            ResearchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ResearchError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            ResearchError::Schema(_) | ResearchError::Aborted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Research request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use inquest_core::swarm::ResearchEventKind;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_relay_survives_missing_subscribers() {
        let (tx, _) = broadcast::channel(16);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        event_tx
            .send(ResearchEvent::new(ResearchEventKind::ResearchStarted, "s1"))
            .unwrap();
        drop(event_tx);
        // Every send fails for lack of receivers; the relay still drains to the end.
        relay(event_rx, tx.clone()).await;
        assert_eq!(tx.receiver_count(), 0);

        let mut subscriber = tx.subscribe();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        event_tx
            .send(ResearchEvent::new(ResearchEventKind::ResearchCompleted, "s1"))
            .unwrap();
        drop(event_tx);
        relay(event_rx, tx).await;
        assert_eq!(
            subscriber.recv().await.unwrap().kind,
            ResearchEventKind::ResearchCompleted
        );
    }

    #[test]
    fn test_error_statuses() {
        let cases = [
            (ResearchError::UnknownSession("s".into()), StatusCode::NOT_FOUND),
            (ResearchError::AlreadyRunning("s".into()), StatusCode::CONFLICT),
            (ResearchError::AlreadyComplete("s".into()), StatusCode::CONFLICT),
            (ResearchError::InvalidRequest("empty".into()), StatusCode::BAD_REQUEST),
            (ResearchError::Persistence("disk".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ResearchError::Aborted("s".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[test]
    fn test_error_body_carries_message() {
        let response = ApiError(ResearchError::UnknownSession("abc".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
