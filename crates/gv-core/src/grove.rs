use crate::approvals::ApprovalRepository;
use crate::error::{ApprovalError, GroveError, ReviewError, SessionError};
use crate::events::EventRepository;
use crate::reviews::ReviewRepository;
use crate::sessions::SessionRepository;
use crate::store::Store;
use crate::types::{
    ApprovalId, ApprovalStatus, Broadcast, CodeReview, EventId, EventType, FileChange,
    NewSession, ReviewId, ReviewStatus, Session, SessionEvent, SessionId, SessionStatus,
    ToolApproval,
};
use crate::validation::validate_session_transition;
use chrono::Utc;
use gv_events::{BroadcastHub, HubMessage};
use gv_vcs::{Workspace, WorkspaceRepository};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Records session activity and publishes every change to the hub.
///
/// Holds no state of its own beyond the store and the hub handle.
pub struct Grove<S: Store> {
    store: S,
    hub: BroadcastHub,
}

impl<S: Store> Grove<S> {
    pub fn new(store: S, hub: BroadcastHub) -> Self {
        Self { store, hub }
    }

    pub fn sessions(&self) -> SessionsApi<'_, S> {
        SessionsApi { core: self }
    }

    pub fn events(&self) -> EventsApi<'_, S> {
        EventsApi { core: self }
    }

    pub fn approvals(&self) -> ApprovalsApi<'_, S> {
        ApprovalsApi { core: self }
    }

    pub fn reviews(&self) -> ReviewsApi<'_, S> {
        ReviewsApi { core: self }
    }

    pub fn worktrees<'a, W: WorkspaceRepository + ?Sized>(
        &'a self,
        backend: &'a W,
    ) -> WorktreesApi<'a, S, W> {
        WorktreesApi {
            core: self,
            backend,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn publish(&self, body: &Broadcast) {
        match build_hub_message(body) {
            Ok(message) => {
                let delivered = self.hub.broadcast(message);
                debug!(delivered, "broadcast published");
            }
            Err(err) => warn!(error = %err, "failed to encode broadcast"),
        }
    }

    fn with_broadcasts<T, F>(&self, f: F) -> Result<T, GroveError>
    where
        F: FnOnce(&S) -> Result<(T, Vec<Broadcast>), GroveError>,
    {
        let (value, bodies) = self.store.with_tx(f)?;
        for body in &bodies {
            self.publish(body);
        }
        Ok(value)
    }
}

pub struct SessionsApi<'a, S: Store> {
    core: &'a Grove<S>,
}

impl<S: Store> SessionsApi<'_, S> {
    pub fn find(&self, id: &SessionId) -> Result<Option<Session>, GroveError> {
        self.core.store.sessions().get(id)
    }

    pub fn get(&self, id: &SessionId) -> Result<Session, GroveError> {
        self.find(id)?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() }.into())
    }

    pub fn list(&self) -> Result<Vec<Session>, GroveError> {
        self.core.store.sessions().list()
    }

    pub fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, GroveError> {
        self.core.store.sessions().list_by_status(status)
    }

    pub fn create(&self, input: NewSession) -> Result<Session, GroveError> {
        let session = self.core.with_broadcasts(|store| {
            let session = Session::new(input.worktree_path, input.issue_number, input.prompt);
            store.sessions().save(&session)?;
            Ok((session.clone(), vec![Broadcast::SessionCreated(session)]))
        })?;
        info!(
            session_id = %session.id,
            worktree = %session.worktree_path.display(),
            issue = ?session.issue_number,
            "session created"
        );
        Ok(session)
    }

    /// Applies `f` to the stored session and saves it if the status change is allowed.
    pub fn update<F>(&self, id: &SessionId, f: F) -> Result<Session, GroveError>
    where
        F: FnOnce(&mut Session) -> Result<(), GroveError>,
    {
        let (session, from) = self.core.with_broadcasts(|store| {
            let mut session = store
                .sessions()
                .get(id)?
                .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
            let from = session.status;
            f(&mut session)?;
            validate_session_transition(from, session.status)?;
            session.updated_at = Utc::now();
            store.sessions().save(&session)?;
            Ok((
                (session.clone(), from),
                vec![Broadcast::SessionUpdated(session)],
            ))
        })?;
        if from != session.status {
            info!(session_id = %id, from = ?from, to = ?session.status, "session status changed");
        }
        Ok(session)
    }

    pub fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<Session, GroveError> {
        self.update(id, |session| {
            session.status = status;
            Ok(())
        })
    }

    /// Refreshes the liveness timestamp without notifying observers.
    pub fn heartbeat(&self, id: &SessionId) -> Result<(), GroveError> {
        self.core.store.with_tx(|store| {
            let mut session = store
                .sessions()
                .get(id)?
                .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
            session.last_heartbeat_at = Some(Utc::now());
            store.sessions().save(&session)
        })
    }
}

pub struct EventsApi<'a, S: Store> {
    core: &'a Grove<S>,
}

impl<S: Store> EventsApi<'_, S> {
    pub fn record(
        &self,
        session_id: &SessionId,
        kind: EventType,
        content: impl Into<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<SessionEvent, GroveError> {
        let content = content.into();
        self.core.with_broadcasts(|store| {
            let event = SessionEvent {
                id: EventId::generate(),
                session_id: session_id.clone(),
                kind,
                content,
                metadata,
                at: Utc::now(),
            };
            store.events().append(&event)?;
            Ok((event.clone(), vec![Broadcast::EventCreated(event)]))
        })
    }

    pub fn latest(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<SessionEvent>, GroveError> {
        self.core.store.events().latest(session_id, limit)
    }

    pub fn clear(&self, session_id: &SessionId) -> Result<usize, GroveError> {
        self.core.store.events().clear(session_id)
    }
}

pub struct ApprovalsApi<'a, S: Store> {
    core: &'a Grove<S>,
}

impl<S: Store> ApprovalsApi<'_, S> {
    pub fn get(&self, id: &ApprovalId) -> Result<Option<ToolApproval>, GroveError> {
        self.core.store.approvals().get(id)
    }

    pub fn list_pending(&self) -> Result<Vec<ToolApproval>, GroveError> {
        self.core.store.approvals().list_pending()
    }

    pub fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<ToolApproval>, GroveError> {
        self.core.store.approvals().list_for_session(session_id)
    }

    pub fn request(
        &self,
        session_id: &SessionId,
        tool_name: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<ToolApproval, GroveError> {
        let tool_name = tool_name.into();
        let approval = self.core.with_broadcasts(|store| {
            if store.sessions().get(session_id)?.is_none() {
                return Err(SessionError::NotFound {
                    id: session_id.to_string(),
                }
                .into());
            }
            let approval = ToolApproval {
                id: ApprovalId::generate(),
                session_id: session_id.clone(),
                tool_name,
                parameters,
                status: ApprovalStatus::Pending,
                approver: None,
                requested_at: Utc::now(),
                resolved_at: None,
            };
            store.approvals().save(&approval)?;
            Ok((approval.clone(), vec![Broadcast::ApprovalRequested(approval)]))
        })?;
        info!(approval_id = %approval.id, session_id = %session_id, tool = %approval.tool_name, "approval requested");
        Ok(approval)
    }

    pub fn resolve(
        &self,
        id: &ApprovalId,
        approved: bool,
        approver: &str,
    ) -> Result<ToolApproval, GroveError> {
        let approval = self.core.with_broadcasts(|store| {
            let mut approval = store
                .approvals()
                .get(id)?
                .ok_or_else(|| ApprovalError::NotFound { id: id.to_string() })?;
            if approval.status != ApprovalStatus::Pending {
                return Err(ApprovalError::NotPending {
                    id: id.to_string(),
                    status: approval.status,
                }
                .into());
            }
            approval.status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            approval.approver = Some(approver.to_string());
            approval.resolved_at = Some(Utc::now());
            store.approvals().save(&approval)?;
            Ok((approval.clone(), vec![Broadcast::ApprovalResolved(approval)]))
        })?;
        info!(approval_id = %id, status = ?approval.status, approver, "approval resolved");
        Ok(approval)
    }
}

pub struct ReviewsApi<'a, S: Store> {
    core: &'a Grove<S>,
}

impl<S: Store> ReviewsApi<'_, S> {
    pub fn get(&self, id: &ReviewId) -> Result<Option<CodeReview>, GroveError> {
        self.core.store.reviews().get(id)
    }

    pub fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<CodeReview>, GroveError> {
        self.core.store.reviews().list_for_session(session_id)
    }

    pub fn request(
        &self,
        session_id: &SessionId,
        files: Vec<FileChange>,
    ) -> Result<CodeReview, GroveError> {
        let review = self.core.with_broadcasts(|store| {
            if store.sessions().get(session_id)?.is_none() {
                return Err(SessionError::NotFound {
                    id: session_id.to_string(),
                }
                .into());
            }
            let review = CodeReview {
                id: ReviewId::generate(),
                session_id: session_id.clone(),
                status: ReviewStatus::Pending,
                comment: None,
                files,
                requested_at: Utc::now(),
                resolved_at: None,
            };
            store.reviews().save(&review)?;
            Ok((review.clone(), vec![Broadcast::ReviewRequested(review)]))
        })?;
        info!(review_id = %review.id, session_id = %session_id, files = review.files.len(), "review requested");
        Ok(review)
    }

    pub fn resolve(
        &self,
        id: &ReviewId,
        status: ReviewStatus,
        comment: Option<String>,
    ) -> Result<CodeReview, GroveError> {
        if status == ReviewStatus::Pending {
            return Err(ReviewError::PendingResolution.into());
        }
        let review = self.core.with_broadcasts(|store| {
            let mut review = store
                .reviews()
                .get(id)?
                .ok_or_else(|| ReviewError::NotFound { id: id.to_string() })?;
            if review.status != ReviewStatus::Pending {
                return Err(ReviewError::NotPending {
                    id: id.to_string(),
                    status: review.status,
                }
                .into());
            }
            review.status = status;
            review.comment = comment;
            review.resolved_at = Some(Utc::now());
            store.reviews().save(&review)?;
            Ok((review.clone(), vec![Broadcast::ReviewResolved(review)]))
        })?;
        info!(review_id = %id, status = ?review.status, "review resolved");
        Ok(review)
    }
}

pub struct WorktreesApi<'a, S: Store, W: WorkspaceRepository + ?Sized> {
    core: &'a Grove<S>,
    backend: &'a W,
}

impl<S: Store, W: WorkspaceRepository + ?Sized> WorktreesApi<'_, S, W> {
    pub fn list(&self) -> Result<Vec<Workspace>, GroveError> {
        Ok(self.backend.list()?)
    }

    pub fn create(
        &self,
        path: &Path,
        branch: &str,
        issue: Option<u64>,
    ) -> Result<Workspace, GroveError> {
        let workspace = self.backend.create(path, branch, issue)?;
        self.core
            .publish(&Broadcast::WorktreeCreated(workspace.clone()));
        Ok(workspace)
    }

    pub fn remove(&self, path: &Path, force: bool) -> Result<(), GroveError> {
        self.backend.remove(path, force)?;
        self.core.publish(&Broadcast::WorktreeRemoved {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    pub fn prune(&self) -> Result<(), GroveError> {
        Ok(self.backend.prune()?)
    }
}

fn build_hub_message(body: &Broadcast) -> Result<HubMessage, GroveError> {
    let value = serde_json::to_value(body).map_err(|err| GroveError::Internal {
        message: err.to_string(),
    })?;
    let Value::Object(mut fields) = value else {
        return Err(GroveError::Internal {
            message: "broadcast did not encode as an object".to_string(),
        });
    };
    let kind = match fields.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => {
            return Err(GroveError::Internal {
                message: "broadcast missing type tag".to_string(),
            });
        }
    };
    let payload = fields.remove("payload").unwrap_or(Value::Null);
    Ok(HubMessage::new(kind, payload))
}
