use crate::error::GroveError;
use crate::types::{ApprovalId, SessionId, ToolApproval};

pub trait ApprovalRepository {
    fn get(&self, id: &ApprovalId) -> Result<Option<ToolApproval>, GroveError>;
    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<ToolApproval>, GroveError>;
    fn list_pending(&self) -> Result<Vec<ToolApproval>, GroveError>;
    fn save(&self, approval: &ToolApproval) -> Result<(), GroveError>;
}
