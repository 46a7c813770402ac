pub mod backend;
pub mod git;

pub use crate::backend::{Workspace, WorkspaceError, WorkspaceRepository};
pub use crate::git::GitWorktrees;
