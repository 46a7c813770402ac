use crate::AppState;
use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{invalid_input, map_error};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use gv_core::types::{ReviewId, ReviewStatus, SessionId};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ResolveReviewInput {
    status: ReviewStatus,
    comment: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions/{id}/reviews", get(list_for_session))
        .route("/reviews/{id}/resolve", post(resolve))
        .with_state(state)
}

pub(crate) async fn list_for_session(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    let id = match SessionId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    match state.grove().reviews().list_for_session(&id) {
        Ok(reviews) => Json(reviews).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

pub(crate) async fn resolve(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    Json(input): Json<ResolveReviewInput>,
) -> Response {
    let id = match ReviewId::new(id) {
        Ok(id) => id,
        Err(err) => return invalid_input(err.to_string(), Some(correlation.0)).into_response(),
    };
    match state
        .grove()
        .reviews()
        .resolve(&id, input.status, input.comment)
    {
        Ok(review) => Json(review).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}
