use axum::Json;
use axum::http::StatusCode;
use gv_agent::AgentError;
use gv_core::error::{ApprovalError, GroveError, ReviewError, SessionError, ValidationError};
use gv_vcs::WorkspaceError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: Option<String>,
}

pub type ErrorResponse = (StatusCode, Json<ErrorEnvelope>);

pub fn map_error(err: &GroveError, correlation_id: Option<String>) -> ErrorResponse {
    let (status, code) = match err {
        GroveError::Session(session) => session_status(session),
        GroveError::Approval(approval) => match approval {
            ApprovalError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ApprovalError::NotPending { .. } => (StatusCode::CONFLICT, "conflict"),
        },
        GroveError::Review(review) => match review {
            ReviewError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ReviewError::NotPending { .. } => (StatusCode::CONFLICT, "conflict"),
            ReviewError::PendingResolution => (StatusCode::BAD_REQUEST, "invalid_input"),
        },
        GroveError::Validation(ValidationError::NoGates) => {
            (StatusCode::PRECONDITION_FAILED, "precondition_failed")
        }
        GroveError::Agent(agent) => match agent {
            AgentError::ProcessNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            AgentError::StreamTaken { .. } => (StatusCode::CONFLICT, "conflict"),
            AgentError::SpawnFailed { .. } | AgentError::SignalFailed { .. } => {
                (StatusCode::BAD_GATEWAY, "agent_error")
            }
        },
        GroveError::Workspace(workspace) => workspace_status(workspace),
        GroveError::Config(_) | GroveError::Store(_) | GroveError::Internal { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    };
    envelope(status, code, err.to_string(), correlation_id)
}

pub fn invalid_input(message: impl Into<String>, correlation_id: Option<String>) -> ErrorResponse {
    envelope(
        StatusCode::BAD_REQUEST,
        "invalid_input",
        message.into(),
        correlation_id,
    )
}

fn envelope(
    status: StatusCode,
    code: &'static str,
    message: String,
    correlation_id: Option<String>,
) -> ErrorResponse {
    (
        status,
        Json(ErrorEnvelope {
            code,
            message,
            correlation_id,
        }),
    )
}

fn session_status(err: &SessionError) -> (StatusCode, &'static str) {
    match err {
        SessionError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        SessionError::InvalidTransition { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_state")
        }
        SessionError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "conflict"),
        SessionError::NoAgentSession { .. } => {
            (StatusCode::PRECONDITION_FAILED, "precondition_failed")
        }
        SessionError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "invalid_input"),
    }
}

fn workspace_status(err: &WorkspaceError) -> (StatusCode, &'static str) {
    match err {
        WorkspaceError::RepoNotFound | WorkspaceError::NotFound { .. } => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        WorkspaceError::AlreadyExists { .. } => (StatusCode::CONFLICT, "conflict"),
        WorkspaceError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "invalid_input"),
        WorkspaceError::BackendError { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}
