use gv_core::error::{ApprovalError, GroveError, ReviewError, SessionError};
use gv_core::types::{
    ApprovalId, ApprovalStatus, EventType, FileChange, FileChangeKind, NewSession, ReviewStatus,
    SessionId, SessionStatus,
};
use gv_core::{Grove, Reconciler};
use gv_db::DbStore;
use gv_events::{BroadcastHub, Subscription};
use gv_vcs::{Workspace, WorkspaceError, WorkspaceRepository};
use serde_json::{Map, json};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct FakeWorktrees {
    workspaces: Mutex<Vec<Workspace>>,
    fail_list: bool,
}

impl FakeWorktrees {
    fn new(workspaces: Vec<Workspace>) -> Self {
        Self {
            workspaces: Mutex::new(workspaces),
            fail_list: false,
        }
    }
}

impl WorkspaceRepository for FakeWorktrees {
    fn list(&self) -> Result<Vec<Workspace>, WorkspaceError> {
        if self.fail_list {
            return Err(WorkspaceError::RepoNotFound);
        }
        Ok(self.workspaces.lock().unwrap().clone())
    }

    fn create(
        &self,
        path: &Path,
        branch: &str,
        _issue: Option<u64>,
    ) -> Result<Workspace, WorkspaceError> {
        let workspace = worktree(path, Some(branch), false);
        self.workspaces.lock().unwrap().push(workspace.clone());
        Ok(workspace)
    }

    fn remove(&self, path: &Path, _force: bool) -> Result<(), WorkspaceError> {
        let mut workspaces = self.workspaces.lock().unwrap();
        let before = workspaces.len();
        workspaces.retain(|workspace| workspace.path != path);
        if workspaces.len() == before {
            return Err(WorkspaceError::NotFound {
                path: path.display().to_string(),
            });
        }
        Ok(())
    }

    fn prune(&self) -> Result<(), WorkspaceError> {
        Ok(())
    }
}

fn worktree(path: impl Into<PathBuf>, branch: Option<&str>, is_primary: bool) -> Workspace {
    Workspace {
        path: path.into(),
        branch: branch.map(str::to_string),
        head: None,
        is_primary,
    }
}

fn grove() -> Grove<DbStore> {
    Grove::new(DbStore::in_memory().unwrap(), BroadcastHub::new(64))
}

fn drain(subscription: &mut Subscription) -> Vec<String> {
    let mut kinds = Vec::new();
    while let Some(message) = subscription.try_recv() {
        kinds.push(message.kind);
    }
    kinds
}

#[test]
fn reconcile_tracks_new_issue_worktree_once() {
    let grove = grove();
    let mut observer = grove.hub().subscribe();
    let worktrees = FakeWorktrees::new(vec![
        worktree("/repo", Some("main"), true),
        worktree("/repo/.worktrees/issue-42", Some("issue-42"), false),
    ]);

    let created = Reconciler::new(&grove, &worktrees).sync();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].issue_number, Some(42));
    assert_eq!(created[0].status, SessionStatus::Pending);
    assert_eq!(
        created[0].worktree_path,
        PathBuf::from("/repo/.worktrees/issue-42")
    );
    assert_eq!(drain(&mut observer), vec!["session:created"]);

    let again = Reconciler::new(&grove, &worktrees).sync();
    assert!(again.is_empty());
    assert_eq!(grove.sessions().list().unwrap().len(), 1);
    assert!(drain(&mut observer).is_empty());
}

#[test]
fn reconcile_matches_existing_session_by_issue() {
    let grove = grove();
    grove
        .sessions()
        .create(NewSession {
            worktree_path: PathBuf::from("/elsewhere/issue-7"),
            issue_number: Some(7),
            prompt: None,
        })
        .unwrap();
    let worktrees = FakeWorktrees::new(vec![
        worktree("/repo/.worktrees/issue-7-login", Some("issue-7-login"), false),
        worktree("/repo/.worktrees/spike", Some("spike"), false),
        worktree("/repo/.worktrees/detached", None, false),
    ]);

    let created = Reconciler::new(&grove, &worktrees).sync();
    let paths: Vec<&Path> = created
        .iter()
        .map(|session| session.worktree_path.as_path())
        .collect();
    assert_eq!(
        paths,
        vec![
            Path::new("/repo/.worktrees/spike"),
            Path::new("/repo/.worktrees/detached")
        ]
    );
    assert!(created.iter().all(|session| session.issue_number.is_none()));
}

#[test]
fn reconcile_listing_failure_creates_nothing() {
    let grove = grove();
    let mut worktrees = FakeWorktrees::new(vec![worktree("/repo/wt", Some("issue-1"), false)]);
    worktrees.fail_list = true;

    assert!(Reconciler::new(&grove, &worktrees).sync().is_empty());
    assert!(grove.sessions().list().unwrap().is_empty());
}

#[test]
fn worktree_changes_are_broadcast() {
    let grove = grove();
    let mut observer = grove.hub().subscribe();
    let worktrees = FakeWorktrees::new(Vec::new());

    let created = grove
        .worktrees(&worktrees)
        .create(Path::new("/repo/.worktrees/issue-5"), "issue-5", Some(5))
        .unwrap();
    assert_eq!(created.branch.as_deref(), Some("issue-5"));
    grove
        .worktrees(&worktrees)
        .remove(Path::new("/repo/.worktrees/issue-5"), false)
        .unwrap();

    let missing = grove
        .worktrees(&worktrees)
        .remove(Path::new("/repo/.worktrees/issue-5"), false);
    assert!(matches!(missing, Err(GroveError::Workspace(_))));
    assert_eq!(
        drain(&mut observer),
        vec!["worktree:created", "worktree:removed"]
    );
}

#[test]
fn session_transitions_are_validated() {
    let grove = grove();
    let session = grove
        .sessions()
        .create(NewSession {
            worktree_path: PathBuf::from("/repo/wt"),
            issue_number: None,
            prompt: Some("do it".into()),
        })
        .unwrap();

    let paused = grove.sessions().set_status(&session.id, SessionStatus::Paused);
    assert!(matches!(
        paused,
        Err(GroveError::Session(SessionError::InvalidTransition {
            from: SessionStatus::Pending,
            to: SessionStatus::Paused
        }))
    ));

    let running = grove
        .sessions()
        .set_status(&session.id, SessionStatus::Running)
        .unwrap();
    assert!(running.updated_at >= session.updated_at);
    assert_eq!(
        grove.sessions().get(&session.id).unwrap().status,
        SessionStatus::Running
    );

    let missing = grove
        .sessions()
        .set_status(&SessionId::generate(), SessionStatus::Running);
    assert!(missing.unwrap_err().is_not_found());
}

#[test]
fn rejected_update_leaves_session_untouched() {
    let grove = grove();
    let session = grove
        .sessions()
        .create(NewSession {
            worktree_path: PathBuf::from("/repo/wt"),
            issue_number: Some(3),
            prompt: None,
        })
        .unwrap();

    let result = grove.sessions().update(&session.id, |session| {
        session.error_count = 9;
        session.status = SessionStatus::Completed;
        Ok(())
    });
    assert!(result.is_err());
    let stored = grove.sessions().get(&session.id).unwrap();
    assert_eq!(stored.error_count, 0);
    assert_eq!(stored.status, SessionStatus::Pending);
}

#[test]
fn approval_lifecycle_broadcasts_request_and_resolution() {
    let grove = grove();
    let session = grove
        .sessions()
        .create(NewSession {
            worktree_path: PathBuf::from("/repo/wt"),
            issue_number: None,
            prompt: None,
        })
        .unwrap();
    let mut observer = grove.hub().subscribe();

    let mut parameters = Map::new();
    parameters.insert("command".into(), json!("rm -rf target"));
    let approval = grove
        .approvals()
        .request(&session.id, "Bash", parameters.clone())
        .unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);
    assert_eq!(grove.approvals().list_pending().unwrap(), vec![approval.clone()]);

    let resolved = grove
        .approvals()
        .resolve(&approval.id, true, "alice")
        .unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert_eq!(resolved.approver.as_deref(), Some("alice"));
    assert!(resolved.resolved_at.is_some());
    assert_eq!(resolved.parameters, parameters);
    assert!(grove.approvals().list_pending().unwrap().is_empty());

    let twice = grove.approvals().resolve(&approval.id, false, "bob");
    assert!(matches!(
        twice,
        Err(GroveError::Approval(ApprovalError::NotPending {
            status: ApprovalStatus::Approved,
            ..
        }))
    ));
    let unknown = grove
        .approvals()
        .resolve(&ApprovalId::generate(), true, "alice");
    assert!(unknown.unwrap_err().is_not_found());

    assert_eq!(
        drain(&mut observer),
        vec!["approval:requested", "approval:resolved"]
    );
}

#[test]
fn approval_for_unknown_session_is_rejected() {
    let grove = grove();
    let result = grove
        .approvals()
        .request(&SessionId::generate(), "Bash", Map::new());
    assert!(result.unwrap_err().is_not_found());
    assert!(grove.approvals().list_pending().unwrap().is_empty());
}

#[test]
fn review_resolution_requires_final_status() {
    let grove = grove();
    let session = grove
        .sessions()
        .create(NewSession {
            worktree_path: PathBuf::from("/repo/wt"),
            issue_number: None,
            prompt: None,
        })
        .unwrap();
    let files = vec![FileChange {
        path: "src/lib.rs".into(),
        additions: 12,
        deletions: 3,
        change: FileChangeKind::Modified,
    }];
    let review = grove.reviews().request(&session.id, files.clone()).unwrap();
    assert_eq!(review.status, ReviewStatus::Pending);

    let pending = grove
        .reviews()
        .resolve(&review.id, ReviewStatus::Pending, None);
    assert!(matches!(
        pending,
        Err(GroveError::Review(ReviewError::PendingResolution))
    ));

    let resolved = grove
        .reviews()
        .resolve(
            &review.id,
            ReviewStatus::ChangesRequested,
            Some("split the migration".into()),
        )
        .unwrap();
    assert_eq!(resolved.comment.as_deref(), Some("split the migration"));
    assert_eq!(resolved.files, files);

    let again = grove
        .reviews()
        .resolve(&review.id, ReviewStatus::Approved, None);
    assert!(matches!(
        again,
        Err(GroveError::Review(ReviewError::NotPending { .. }))
    ));
    assert_eq!(
        grove.reviews().list_for_session(&session.id).unwrap(),
        vec![resolved]
    );
}

#[test]
fn events_are_capped_per_session() {
    let grove = Grove::new(
        DbStore::in_memory().unwrap().with_event_limit(5),
        BroadcastHub::new(64),
    );
    let session = SessionId::generate();
    for index in 0..12 {
        grove
            .events()
            .record(&session, EventType::Output, format!("line {index}"), None)
            .unwrap();
    }

    let events = grove.events().latest(&session, 100).unwrap();
    let contents: Vec<&str> = events.iter().map(|event| event.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["line 7", "line 8", "line 9", "line 10", "line 11"]
    );
    assert_eq!(grove.events().clear(&session).unwrap(), 5);
}

#[test]
fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("grove.db");
    let id = {
        let grove = Grove::new(DbStore::open(&path).unwrap(), BroadcastHub::default());
        grove
            .sessions()
            .create(NewSession {
                worktree_path: PathBuf::from("/repo/wt"),
                issue_number: Some(11),
                prompt: None,
            })
            .unwrap()
            .id
    };

    let grove = Grove::new(DbStore::open(&path).unwrap(), BroadcastHub::default());
    let session = grove.sessions().get(&id).unwrap();
    assert_eq!(session.issue_number, Some(11));
}
