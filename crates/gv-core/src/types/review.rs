use crate::types::enums::{FileChangeKind, ReviewStatus};
use crate::types::ids::{ReviewId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReview {
    pub id: ReviewId,
    pub session_id: SessionId,
    pub status: ReviewStatus,
    pub comment: Option<String>,
    pub files: Vec<FileChange>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub additions: u32,
    pub deletions: u32,
    pub change: FileChangeKind,
}
