use crate::util::{
    db_err, decode_enum, decode_id, decode_json, encode_enum, encode_json,
    from_optional_rfc3339, from_rfc3339, to_rfc3339,
};
use gv_core::approvals::ApprovalRepository;
use gv_core::error::GroveError;
use gv_core::types::{ApprovalId, ApprovalStatus, SessionId, ToolApproval};
use parking_lot::ReentrantMutexGuard;
use rusqlite::{Connection, OptionalExtension, Row, params};

const APPROVAL_COLUMNS: &str =
    "id, session_id, tool_name, parameters_json, status, approver, requested_at, resolved_at";

pub struct ApprovalRepo<'a> {
    conn: ReentrantMutexGuard<'a, Connection>,
}

impl<'a> ApprovalRepo<'a> {
    pub fn new(conn: ReentrantMutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn query(&self, filter: &str, param: &str) -> Result<Vec<ToolApproval>, GroveError> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE {filter} = ?1 ORDER BY requested_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map([param], ApprovalRow::read).map_err(db_err)?;
        let mut approvals = Vec::new();
        for row in rows {
            approvals.push(row.map_err(db_err)?.decode()?);
        }
        Ok(approvals)
    }
}

impl ApprovalRepository for ApprovalRepo<'_> {
    fn get(&self, id: &ApprovalId) -> Result<Option<ToolApproval>, GroveError> {
        let sql = format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?1");
        self.conn
            .query_row(&sql, [id.as_str()], ApprovalRow::read)
            .optional()
            .map_err(db_err)?
            .map(ApprovalRow::decode)
            .transpose()
    }

    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<ToolApproval>, GroveError> {
        self.query("session_id", session_id.as_str())
    }

    fn list_pending(&self) -> Result<Vec<ToolApproval>, GroveError> {
        let pending = encode_enum(&ApprovalStatus::Pending)?;
        self.query("status", &pending)
    }

    fn save(&self, approval: &ToolApproval) -> Result<(), GroveError> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO approvals ({APPROVAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    approval.id.as_str(),
                    approval.session_id.as_str(),
                    approval.tool_name,
                    encode_json(&approval.parameters)?,
                    encode_enum(&approval.status)?,
                    approval.approver,
                    to_rfc3339(&approval.requested_at),
                    approval.resolved_at.as_ref().map(to_rfc3339),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

struct ApprovalRow {
    id: String,
    session_id: String,
    tool_name: String,
    parameters_json: String,
    status: String,
    approver: Option<String>,
    requested_at: String,
    resolved_at: Option<String>,
}

impl ApprovalRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            tool_name: row.get(2)?,
            parameters_json: row.get(3)?,
            status: row.get(4)?,
            approver: row.get(5)?,
            requested_at: row.get(6)?,
            resolved_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<ToolApproval, GroveError> {
        Ok(ToolApproval {
            id: decode_id(&self.id)?,
            session_id: decode_id(&self.session_id)?,
            tool_name: self.tool_name,
            parameters: decode_json(&self.parameters_json)?,
            status: decode_enum(&self.status)?,
            approver: self.approver,
            requested_at: from_rfc3339(&self.requested_at)?,
            resolved_at: from_optional_rfc3339(self.resolved_at.as_deref())?,
        })
    }
}
