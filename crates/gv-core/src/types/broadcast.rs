use crate::types::approval::ToolApproval;
use crate::types::event::SessionEvent;
use crate::types::review::CodeReview;
use crate::types::session::Session;
use gv_vcs::Workspace;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// State changes pushed to observers, tagged with their hub message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Broadcast {
    #[serde(rename = "session:created")]
    SessionCreated(Session),
    #[serde(rename = "session:updated")]
    SessionUpdated(Session),
    #[serde(rename = "worktree:created")]
    WorktreeCreated(Workspace),
    #[serde(rename = "worktree:removed")]
    WorktreeRemoved { path: PathBuf },
    #[serde(rename = "event:created")]
    EventCreated(SessionEvent),
    #[serde(rename = "approval:requested")]
    ApprovalRequested(ToolApproval),
    #[serde(rename = "approval:resolved")]
    ApprovalResolved(ToolApproval),
    #[serde(rename = "review:requested")]
    ReviewRequested(CodeReview),
    #[serde(rename = "review:resolved")]
    ReviewResolved(CodeReview),
}
