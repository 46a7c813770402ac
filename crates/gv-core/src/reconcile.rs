use crate::grove::Grove;
use crate::store::Store;
use crate::types::{NewSession, Session};
use gv_vcs::{Workspace, WorkspaceRepository};
use tracing::{info, warn};

/// Creates sessions for worktrees that appeared outside the orchestrator.
pub struct Reconciler<'a, S: Store, W: WorkspaceRepository + ?Sized> {
    grove: &'a Grove<S>,
    workspaces: &'a W,
}

impl<'a, S: Store, W: WorkspaceRepository + ?Sized> Reconciler<'a, S, W> {
    pub fn new(grove: &'a Grove<S>, workspaces: &'a W) -> Self {
        Self { grove, workspaces }
    }

    /// Returns exactly the sessions created by this pass.
    ///
    /// Listing failures on either side yield an empty reconciliation.
    pub fn sync(&self) -> Vec<Session> {
        let workspaces = match self.workspaces.list() {
            Ok(workspaces) => workspaces,
            Err(err) => {
                warn!(error = %err, "failed to list worktrees; skipping reconciliation");
                return Vec::new();
            }
        };
        let mut sessions = match self.grove.sessions().list() {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "failed to list sessions; skipping reconciliation");
                return Vec::new();
            }
        };

        let mut created = Vec::new();
        for workspace in workspaces.iter().filter(|workspace| !workspace.is_primary) {
            if has_session(workspace, &sessions) {
                continue;
            }
            let issue_number = workspace.branch.as_deref().and_then(issue_number_from_branch);
            let input = NewSession {
                worktree_path: workspace.path.clone(),
                issue_number,
                prompt: None,
            };
            match self.grove.sessions().create(input) {
                Ok(session) => {
                    sessions.push(session.clone());
                    created.push(session);
                }
                Err(err) => {
                    warn!(path = %workspace.path.display(), error = %err, "failed to track worktree");
                }
            }
        }
        if !created.is_empty() {
            info!(created = created.len(), "reconciled worktrees");
        }
        created
    }
}

fn has_session(workspace: &Workspace, sessions: &[Session]) -> bool {
    let issue = workspace.branch.as_deref().and_then(issue_number_from_branch);
    sessions.iter().any(|session| {
        session.worktree_path == workspace.path
            || (issue.is_some() && session.issue_number == issue)
    })
}

/// Parses the issue number from an `issue-<N>` branch, allowing a suffix such as `issue-42-login`.
pub fn issue_number_from_branch(branch: &str) -> Option<u64> {
    let rest = branch.strip_prefix("issue-")?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..digits_end].parse().ok()
}
