use crate::AppState;
use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{invalid_input, map_error};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use gv_core::types::ApprovalId;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ResolveApprovalInput {
    approved: bool,
    approver: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/approvals", get(list_pending))
        .route("/approvals/{id}/resolve", post(resolve))
        .with_state(state)
}

pub(crate) async fn list_pending(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
) -> Response {
    match state.grove().approvals().list_pending() {
        Ok(approvals) => Json(approvals).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

pub(crate) async fn resolve(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    Json(input): Json<ResolveApprovalInput>,
) -> Response {
    let id = match ApprovalId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    if input.approver.trim().is_empty() {
        return invalid_input("approver must not be empty", Some(correlation.0)).into_response();
    }
    match state
        .grove()
        .approvals()
        .resolve(&id, input.approved, input.approver.trim())
    {
        Ok(approval) => Json(approval).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}
