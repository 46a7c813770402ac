use crate::types::enums::ApprovalStatus;
use crate::types::ids::{ApprovalId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolApproval {
    pub id: ApprovalId,
    pub session_id: SessionId,
    pub tool_name: String,
    pub parameters: Map<String, Value>,
    pub status: ApprovalStatus,
    pub approver: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
