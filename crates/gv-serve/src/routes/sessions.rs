use crate::AppState;
use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{invalid_input, map_error};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use gv_core::Reconciler;
use gv_core::error::GroveError;
use gv_core::types::{SessionId, SessionStatus};
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    status: Option<SessionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RunInput {
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeInput {
    prompt: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/events", get(list_events))
        .route("/sessions/{id}/run", post(run_session))
        .route("/sessions/{id}/resume", post(resume_session))
        .route("/sessions/{id}/stop", post(stop_session))
        .route("/sync", post(sync))
        .with_state(state)
}

pub(crate) async fn list_sessions(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<SessionsQuery>,
) -> Response {
    let sessions = state.grove().sessions();
    let result = match query.status {
        Some(status) => sessions.list_by_status(status),
        None => sessions.list(),
    };
    match result {
        Ok(sessions) => Json(sessions).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

pub(crate) async fn get_session(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    let id = match SessionId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    match state.grove().sessions().get(&id) {
        Ok(session) => Json(session).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

pub(crate) async fn list_events(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let id = match SessionId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    match state.grove().events().latest(&id, limit) {
        Ok(events) => Json(events).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

/// Launches the agent and answers once the session is running; the run
/// continues on the server and reports through the event stream.
pub(crate) async fn run_session(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    Json(input): Json<RunInput>,
) -> Response {
    let id = match SessionId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    let prompt = input.prompt.filter(|prompt| !prompt.trim().is_empty());
    match state.runner.spawn_run(id, prompt).await {
        Ok((session, _)) => (StatusCode::ACCEPTED, Json(session)).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

pub(crate) async fn resume_session(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    Json(input): Json<ResumeInput>,
) -> Response {
    let id = match SessionId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    if input.prompt.trim().is_empty() {
        return invalid_input("prompt must not be empty", Some(correlation.0)).into_response();
    }
    match state.runner.spawn_resume(id, &input.prompt).await {
        Ok((session, _)) => (StatusCode::ACCEPTED, Json(session)).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

pub(crate) async fn stop_session(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    let id = match SessionId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    match state.runner.stop(&id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

/// Reconciles worktrees off the async executor; the git CLI blocks.
pub(crate) async fn sync(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
) -> Response {
    let runner = Arc::clone(&state.runner);
    let worktrees = Arc::clone(&state.worktrees);
    let reconciled =
        tokio::task::spawn_blocking(move || Reconciler::new(runner.grove(), &*worktrees).sync())
            .await;
    match reconciled {
        Ok(created) => Json(created).into_response(),
        Err(err) => map_error(
            &GroveError::Internal {
                message: err.to_string(),
            },
            Some(correlation.0),
        )
        .into_response(),
    }
}
