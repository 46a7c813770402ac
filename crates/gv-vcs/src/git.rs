use crate::backend::{Workspace, WorkspaceError, WorkspaceRepository};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Worktree operations for a git repository.
///
/// Discovery goes through gix; worktree mutation shells out to the git CLI,
/// which gix does not cover.
pub struct GitWorktrees {
    root: PathBuf,
}

impl GitWorktrees {
    pub fn open(path: &Path) -> Result<Self, WorkspaceError> {
        let repo = gix::discover(path).map_err(|_| WorkspaceError::RepoNotFound)?;
        let root = repo
            .workdir()
            .ok_or_else(|| WorkspaceError::BackendError {
                reason: "bare repository".to_string(),
            })?
            .to_path_buf();
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn git(&self, args: &[&str]) -> Result<String, WorkspaceError> {
        debug!(?args, root = %self.root.display(), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|err| WorkspaceError::BackendError {
                reason: format!("failed to run git {}: {err}", args.join(" ")),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkspaceError::BackendError {
                reason: format!("git {} failed: {}", args.join(" "), stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl WorkspaceRepository for GitWorktrees {
    fn list(&self) -> Result<Vec<Workspace>, WorkspaceError> {
        let output = self.git(&["worktree", "list", "--porcelain"])?;
        Ok(parse_porcelain(&output))
    }

    fn create(
        &self,
        path: &Path,
        branch: &str,
        issue: Option<u64>,
    ) -> Result<Workspace, WorkspaceError> {
        let branch = match (branch.trim(), issue) {
            ("", Some(issue)) => format!("issue-{issue}"),
            ("", None) => {
                return Err(WorkspaceError::InvalidInput {
                    message: "branch name or issue number required".to_string(),
                });
            }
            (name, _) => name.to_string(),
        };
        if path.exists() {
            return Err(WorkspaceError::AlreadyExists {
                path: path.display().to_string(),
            });
        }
        let path_arg = path.to_string_lossy().into_owned();
        let branch_exists = self
            .git(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .is_ok();
        if branch_exists {
            self.git(&["worktree", "add", &path_arg, &branch])?;
        } else {
            self.git(&["worktree", "add", "-b", &branch, &path_arg])?;
        }
        info!(path = %path.display(), branch = %branch, "worktree created");

        let wanted = normalize(path);
        self.list()?
            .into_iter()
            .find(|workspace| normalize(&workspace.path) == wanted)
            .ok_or_else(|| WorkspaceError::NotFound {
                path: path.display().to_string(),
            })
    }

    fn remove(&self, path: &Path, force: bool) -> Result<(), WorkspaceError> {
        let path_arg = path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_arg);
        self.git(&args).map_err(|err| match err {
            WorkspaceError::BackendError { reason } if reason.contains("is not a working tree") => {
                WorkspaceError::NotFound { path: path_arg.clone() }
            }
            other => other,
        })?;
        info!(path = %path.display(), force, "worktree removed");
        Ok(())
    }

    fn prune(&self) -> Result<(), WorkspaceError> {
        self.git(&["worktree", "prune"])?;
        Ok(())
    }
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Parses `git worktree list --porcelain`. The first entry is the primary checkout.
pub fn parse_porcelain(output: &str) -> Vec<Workspace> {
    let mut workspaces = Vec::new();
    let mut current: Option<Workspace> = None;
    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                workspaces.push(done);
            }
            current = Some(Workspace {
                path: PathBuf::from(path),
                branch: None,
                head: None,
                is_primary: workspaces.is_empty(),
            });
            continue;
        }
        let Some(workspace) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            workspace.head = Some(head.to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let name = branch.strip_prefix("refs/heads/").unwrap_or(branch);
            workspace.branch = Some(name.to_string());
        }
    }
    if let Some(done) = current {
        workspaces.push(done);
    }
    workspaces
}
