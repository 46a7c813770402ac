use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// An isolated checkout of the repository, as reported by the VCS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub is_primary: bool,
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("repo not found")]
    RepoNotFound,
    #[error("workspace not found: {path}")]
    NotFound { path: String },
    #[error("workspace already exists: {path}")]
    AlreadyExists { path: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("backend error: {reason}")]
    BackendError { reason: String },
}

pub trait WorkspaceRepository {
    fn list(&self) -> Result<Vec<Workspace>, WorkspaceError>;
    fn create(
        &self,
        path: &Path,
        branch: &str,
        issue: Option<u64>,
    ) -> Result<Workspace, WorkspaceError>;
    fn remove(&self, path: &Path, force: bool) -> Result<(), WorkspaceError>;
    fn prune(&self) -> Result<(), WorkspaceError>;
}
