//! Run endpoints: submit, inspect, cancel, stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::broadcast;

use super::routes::AppState;
use super::types::{CancelRunResponse, SubmitRunResponse};
use crate::session::CancelOutcome;
use crate::workflow::{RunId, RunRequest, RunStatus, SubmitError};

/// Map a refused submission to an HTTP error.
pub(crate) fn submit_error(err: SubmitError) -> (StatusCode, String) {
    let status = match &err {
        SubmitError::Backpressure { .. } => StatusCode::TOO_MANY_REQUESTS,
        SubmitError::InvalidConfiguration(_) | SubmitError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string())
}

fn not_found(id: RunId) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("Run {} not found", id))
}

/// Submit a run; answers as soon as the run exists.
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<(StatusCode, Json<SubmitRunResponse>), (StatusCode, String)> {
    let handle = state.orchestrator.submit(req).await.map_err(submit_error)?;
    let status = handle.status();
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitRunResponse {
            id: status.id,
            phase: status.phase,
        }),
    ))
}

/// List known runs, newest first.
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<Vec<RunStatus>> {
    Json(state.orchestrator.registry().list().await)
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Json<RunStatus>, (StatusCode, String)> {
    state
        .orchestrator
        .status(id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(id))
}

pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Json<CancelRunResponse>, (StatusCode, String)> {
    let outcome = state.orchestrator.cancel(id).await;
    if outcome == CancelOutcome::NotFound {
        return Err(not_found(id));
    }
    Ok(Json(CancelRunResponse {
        id,
        outcome,
        accepted: outcome == CancelOutcome::Accepted,
    }))
}

fn sse_event<T: Serialize>(name: &str, data: &T) -> Option<Event> {
    match Event::default().event(name).json_data(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Failed to encode {} event: {}", name, e);
            None
        }
    }
}

/// Stream a run's events via SSE.
///
/// Sends a `status` snapshot first, then every event from the moment of
/// subscription, and ends after the terminal event.
pub async fn stream_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let mut rx = state
        .orchestrator
        .sink()
        .subscribe(id)
        .await
        .ok_or_else(|| not_found(id))?;
    let initial = state.orchestrator.status(id).await.ok_or_else(|| not_found(id))?;

    let stream = async_stream::stream! {
        if let Some(event) = sse_event("status", &initial) {
            yield Ok(event);
        }

        let mut done = initial.is_terminal();
        while !done {
            match rx.recv().await {
                Ok(ev) => {
                    done = ev.kind.is_terminal();
                    if let Some(event) = sse_event(ev.kind.event_name(), &ev) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let message = serde_json::json!({
                        "message": format!("event stream lagged; {} events were dropped", skipped),
                    });
                    if let Some(event) = sse_event("error", &message) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::tests::test_state;
    use crate::workflow::RunPhase;

    #[tokio::test]
    async fn test_submit_then_poll() {
        let state = test_state(4);
        let (code, Json(created)) = create_run(State(Arc::clone(&state)), Json(RunRequest::new("gout treatment")))
            .await
            .unwrap();
        assert_eq!(code, StatusCode::ACCEPTED);

        let handle = state.orchestrator.registry().get(created.id).await.unwrap();
        handle.wait().await;

        let Json(status) = get_run(State(Arc::clone(&state)), Path(created.id)).await.unwrap();
        assert_eq!(status.phase, RunPhase::Completed);
        assert!(status.result.is_some());

        let Json(runs) = list_runs(State(Arc::clone(&state))).await;
        assert_eq!(runs.len(), 1);

        let Json(cancel) = cancel_run(State(Arc::clone(&state)), Path(created.id)).await.unwrap();
        assert_eq!(cancel.outcome, CancelOutcome::AlreadyTerminal);
        assert!(!cancel.accepted);
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let state = test_state(4);
        let id = RunId::new();
        let err = get_run(State(Arc::clone(&state)), Path(id)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        let err = cancel_run(State(Arc::clone(&state)), Path(id)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert!(stream_run(State(state), Path(id)).await.is_err());
    }

    #[test]
    fn test_submit_error_codes() {
        assert_eq!(
            submit_error(SubmitError::Backpressure { limit: 1 }).0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            submit_error(SubmitError::InvalidRequest("empty".into())).0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let state = test_state(4);
        let err = create_run(State(state), Json(RunRequest::new("  "))).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
