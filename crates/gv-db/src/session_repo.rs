use crate::util::{
    DbError, db_err, decode_enum, decode_id, decode_json, encode_enum, encode_json,
    from_optional_rfc3339, from_rfc3339, to_rfc3339,
};
use gv_agent::ProcessId;
use gv_core::error::GroveError;
use gv_core::sessions::SessionRepository;
use gv_core::types::{Session, SessionId, SessionStatus};
use parking_lot::ReentrantMutexGuard;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;

const SESSION_COLUMNS: &str = "id, worktree_path, agent_session_id, status, issue_number, prompt, created_at, updated_at, process_id, os_pid, last_heartbeat_at, error_count, usage_json, progress_json";

pub struct SessionRepo<'a> {
    conn: ReentrantMutexGuard<'a, Connection>,
}

impl<'a> SessionRepo<'a> {
    pub fn new(conn: ReentrantMutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }

    fn query(&self, filter: &str, param: Option<&str>) -> Result<Vec<Session>, GroveError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions {filter} ORDER BY created_at ASC, id ASC");
        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let rows = match param {
            Some(value) => stmt.query_map([value], SessionRow::read),
            None => stmt.query_map([], SessionRow::read),
        }
        .map_err(db_err)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(db_err)?.decode()?);
        }
        Ok(sessions)
    }
}

impl SessionRepository for SessionRepo<'_> {
    fn get(&self, id: &SessionId) -> Result<Option<Session>, GroveError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let row = self
            .conn
            .query_row(&sql, [id.as_str()], SessionRow::read)
            .optional()
            .map_err(db_err)?;
        row.map(SessionRow::decode).transpose()
    }

    fn list(&self) -> Result<Vec<Session>, GroveError> {
        self.query("", None)
    }

    fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, GroveError> {
        let status = encode_enum(&status)?;
        self.query("WHERE status = ?1", Some(&status))
    }

    fn save(&self, session: &Session) -> Result<(), GroveError> {
        let issue_number = session
            .issue_number
            .map(i64::try_from)
            .transpose()
            .map_err(|_| DbError::OutOfRange {
                value: format!("issue number {:?}", session.issue_number),
            })?;
        let usage = session.usage.as_ref().map(encode_json).transpose()?;
        let progress = session.progress.as_ref().map(encode_json).transpose()?;
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    session.id.as_str(),
                    session.worktree_path.to_string_lossy(),
                    session.agent_session_id,
                    encode_enum(&session.status)?,
                    issue_number,
                    session.prompt,
                    to_rfc3339(&session.created_at),
                    to_rfc3339(&session.updated_at),
                    session.process_id.as_ref().map(ProcessId::as_str),
                    session.os_pid,
                    session.last_heartbeat_at.as_ref().map(to_rfc3339),
                    session.error_count,
                    usage,
                    progress,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn delete(&self, id: &SessionId) -> Result<bool, GroveError> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])
            .map_err(db_err)?;
        Ok(removed > 0)
    }
}

struct SessionRow {
    id: String,
    worktree_path: String,
    agent_session_id: Option<String>,
    status: String,
    issue_number: Option<i64>,
    prompt: Option<String>,
    created_at: String,
    updated_at: String,
    process_id: Option<String>,
    os_pid: Option<u32>,
    last_heartbeat_at: Option<String>,
    error_count: u32,
    usage_json: Option<String>,
    progress_json: Option<String>,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            worktree_path: row.get(1)?,
            agent_session_id: row.get(2)?,
            status: row.get(3)?,
            issue_number: row.get(4)?,
            prompt: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            process_id: row.get(8)?,
            os_pid: row.get(9)?,
            last_heartbeat_at: row.get(10)?,
            error_count: row.get(11)?,
            usage_json: row.get(12)?,
            progress_json: row.get(13)?,
        })
    }

    fn decode(self) -> Result<Session, GroveError> {
        let issue_number = self
            .issue_number
            .map(|value| {
                u64::try_from(value).map_err(|_| DbError::OutOfRange {
                    value: value.to_string(),
                })
            })
            .transpose()?;
        Ok(Session {
            id: decode_id(&self.id)?,
            worktree_path: PathBuf::from(self.worktree_path),
            agent_session_id: self.agent_session_id,
            status: decode_enum(&self.status)?,
            issue_number,
            prompt: self.prompt,
            created_at: from_rfc3339(&self.created_at)?,
            updated_at: from_rfc3339(&self.updated_at)?,
            process_id: self.process_id.map(ProcessId::new),
            os_pid: self.os_pid,
            last_heartbeat_at: from_optional_rfc3339(self.last_heartbeat_at.as_deref())?,
            error_count: self.error_count,
            usage: self.usage_json.as_deref().map(decode_json).transpose()?,
            progress: self.progress_json.as_deref().map(decode_json).transpose()?,
        })
    }
}
