use crate::types::enums::{ApprovalStatus, ReviewStatus, SessionStatus};
use gv_agent::AgentError;
use gv_vcs::WorkspaceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {id}")]
    NotFound { id: String },
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("session {id} already has a running agent")]
    AlreadyRunning { id: String },
    #[error("session {id} has no agent session to resume")]
    NoAgentSession { id: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval not found: {id}")]
    NotFound { id: String },
    #[error("approval {id} already resolved as {status:?}")]
    NotPending { id: String, status: ApprovalStatus },
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review not found: {id}")]
    NotFound { id: String },
    #[error("review {id} already resolved as {status:?}")]
    NotPending { id: String, status: ReviewStatus },
    #[error("a review cannot be resolved as pending")]
    PendingResolution,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no validation gates configured")]
    NoGates,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid agent arguments: {message}")]
    InvalidArgs { message: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {message}")]
    Database { message: String },
    #[error("corrupt record: {message}")]
    Decode { message: String },
}

#[derive(Debug, Error)]
pub enum GroveError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GroveError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Session(SessionError::NotFound { .. })
                | Self::Approval(ApprovalError::NotFound { .. })
                | Self::Review(ReviewError::NotFound { .. })
                | Self::Agent(AgentError::ProcessNotFound { .. })
                | Self::Workspace(WorkspaceError::NotFound { .. })
        )
    }
}
