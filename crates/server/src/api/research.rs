//! Research session routes

use super::{ApiError, SharedState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use futures::stream::{self, Stream};
use inquest_core::state::{narrate, ResearchDocument, StoredSession};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Deserialize)]
pub struct StartResearchRequest {
    pub objective: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub session_id: String,
}

pub async fn start_research(
    State(state): State<SharedState>,
    Json(req): Json<StartResearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (handle, events) = state
        .service
        .start_research(&req.objective, req.success_criteria)
        .await?;
    state.forward(events);
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: handle.session_id,
        }),
    ))
}

pub async fn resume_research(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let (handle, events) = state.service.resume(&id).await?;
    state.forward(events);
    Ok(Json(SessionResponse {
        session_id: handle.session_id,
    }))
}

pub async fn stop_research(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.stop(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ResearchDocument>, ApiError> {
    Ok(Json(state.service.snapshot(&id).await?))
}

pub async fn get_narrative(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<String, ApiError> {
    let doc = state.service.snapshot(&id).await?;
    Ok(narrate(&doc))
}

pub async fn list_sessions(
    State(state): State<SharedState>,
) -> Result<Json<Vec<StoredSession>>, ApiError> {
    Ok(Json(state.service.list_sessions()?))
}

/// Server-sent events for one session, with a heartbeat every 15 seconds
pub async fn session_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();

    let stream = stream::unfold((rx, id), |(mut rx, id)| async move {
        loop {
            match tokio::time::timeout(Duration::from_secs(15), rx.recv()).await {
                Ok(Ok(event)) if event.session_id == id => {
                    let kind = serde_json::to_value(event.kind)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().event(kind).data(json)), (rx, id)));
                }
                Ok(Ok(_)) => continue,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(session_id = %id, skipped, "SSE subscriber lagged");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => return None,
                Err(_) => {
                    return Some((Ok(Event::default().comment("heartbeat")), (rx, id)));
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
