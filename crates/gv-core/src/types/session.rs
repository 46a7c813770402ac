use crate::types::enums::SessionStatus;
use crate::types::ids::SessionId;
use crate::types::progress::Progress;
use chrono::{DateTime, Utc};
use gv_agent::{ProcessId, TokenUsage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub worktree_path: PathBuf,
    /// Conversation id reported by the agent; required for resume.
    pub agent_session_id: Option<String>,
    pub status: SessionStatus,
    pub issue_number: Option<u64>,
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub process_id: Option<ProcessId>,
    pub os_pid: Option<u32>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub usage: Option<TokenUsage>,
    pub progress: Option<Progress>,
}

impl Session {
    pub fn new(worktree_path: PathBuf, issue_number: Option<u64>, prompt: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            worktree_path,
            agent_session_id: None,
            status: SessionStatus::Pending,
            issue_number,
            prompt,
            created_at: now,
            updated_at: now,
            process_id: None,
            os_pid: None,
            last_heartbeat_at: None,
            error_count: 0,
            usage: None,
            progress: None,
        }
    }

    pub fn clear_process(&mut self) {
        self.process_id = None;
        self.os_pid = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewSession {
    pub worktree_path: PathBuf,
    pub issue_number: Option<u64>,
    pub prompt: Option<String>,
}
