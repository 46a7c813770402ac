use crate::util::{
    db_err, decode_enum, decode_id, decode_json, encode_enum, encode_json, from_rfc3339,
    to_rfc3339,
};
use gv_core::error::GroveError;
use gv_core::events::EventRepository;
use gv_core::types::{SessionEvent, SessionId};
use parking_lot::ReentrantMutexGuard;
use rusqlite::{Connection, Row, params};
use tracing::debug;

pub struct EventRepo<'a> {
    conn: ReentrantMutexGuard<'a, Connection>,
    max_per_session: usize,
}

impl<'a> EventRepo<'a> {
    pub fn new(conn: ReentrantMutexGuard<'a, Connection>, max_per_session: usize) -> Self {
        Self {
            conn,
            max_per_session,
        }
    }

    fn trim(&self, session_id: &SessionId) -> Result<usize, GroveError> {
        if self.max_per_session == 0 {
            return Ok(0);
        }
        let keep = i64::try_from(self.max_per_session).unwrap_or(i64::MAX);
        let removed = self
            .conn
            .execute(
                "DELETE FROM session_events WHERE session_id = ?1 AND seq NOT IN (SELECT seq FROM session_events WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2)",
                params![session_id.as_str(), keep],
            )
            .map_err(db_err)?;
        if removed > 0 {
            debug!(session_id = %session_id, removed, "trimmed session events");
        }
        Ok(removed)
    }
}

impl EventRepository for EventRepo<'_> {
    fn append(&self, event: &SessionEvent) -> Result<(), GroveError> {
        let metadata = event.metadata.as_ref().map(encode_json).transpose()?;
        self.conn
            .execute(
                "INSERT INTO session_events (id, session_id, type, content, metadata_json, at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id.as_str(),
                    event.session_id.as_str(),
                    encode_enum(&event.kind)?,
                    event.content,
                    metadata,
                    to_rfc3339(&event.at),
                ],
            )
            .map_err(db_err)?;
        self.trim(&event.session_id)?;
        Ok(())
    }

    fn latest(&self, session_id: &SessionId, limit: usize) -> Result<Vec<SessionEvent>, GroveError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, session_id, type, content, metadata_json, at FROM (SELECT * FROM session_events WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2) ORDER BY seq ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id.as_str(), limit], EventRow::read)
            .map_err(db_err)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(db_err)?.decode()?);
        }
        Ok(events)
    }

    fn count(&self, session_id: &SessionId) -> Result<usize, GroveError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM session_events WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn clear(&self, session_id: &SessionId) -> Result<usize, GroveError> {
        self.conn
            .execute(
                "DELETE FROM session_events WHERE session_id = ?1",
                [session_id.as_str()],
            )
            .map_err(db_err)
    }
}

struct EventRow {
    id: String,
    session_id: String,
    kind: String,
    content: String,
    metadata_json: Option<String>,
    at: String,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            kind: row.get(2)?,
            content: row.get(3)?,
            metadata_json: row.get(4)?,
            at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<SessionEvent, GroveError> {
        Ok(SessionEvent {
            id: decode_id(&self.id)?,
            session_id: decode_id(&self.session_id)?,
            kind: decode_enum(&self.kind)?,
            content: self.content,
            metadata: self.metadata_json.as_deref().map(decode_json).transpose()?,
            at: from_rfc3339(&self.at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Utc;
    use gv_core::types::{EventId, EventType};
    use parking_lot::ReentrantMutex;
    use serde_json::json;

    fn event(session_id: &SessionId, content: &str) -> SessionEvent {
        SessionEvent {
            id: EventId::generate(),
            session_id: session_id.clone(),
            kind: EventType::Output,
            content: content.to_string(),
            metadata: None,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_latest_returns_tail_in_order() {
        let conn = ReentrantMutex::new(with_test_db().unwrap());
        let repo = EventRepo::new(conn.lock(), 0);
        let session = SessionId::generate();
        for index in 0..5 {
            repo.append(&event(&session, &format!("line {index}"))).unwrap();
        }

        let tail = repo.latest(&session, 2).unwrap();
        let contents: Vec<&str> = tail.iter().map(|event| event.content.as_str()).collect();
        assert_eq!(contents, vec!["line 3", "line 4"]);
    }

    #[test]
    fn test_retention_discards_oldest_first() {
        let conn = ReentrantMutex::new(with_test_db().unwrap());
        let repo = EventRepo::new(conn.lock(), 3);
        let session = SessionId::generate();
        let other = SessionId::generate();
        repo.append(&event(&other, "keep me")).unwrap();
        for index in 0..10 {
            repo.append(&event(&session, &format!("line {index}"))).unwrap();
        }

        assert_eq!(repo.count(&session).unwrap(), 3);
        assert_eq!(repo.count(&other).unwrap(), 1);
        let remaining = repo.latest(&session, 10).unwrap();
        assert_eq!(remaining[0].content, "line 7");
    }

    #[test]
    fn test_metadata_and_clear() {
        let conn = ReentrantMutex::new(with_test_db().unwrap());
        let repo = EventRepo::new(conn.lock(), 0);
        let session = SessionId::generate();
        let mut tool_call = event(&session, "Bash: {}");
        tool_call.kind = EventType::TestRun;
        tool_call.metadata = json!({ "tool": "Bash" }).as_object().cloned();
        repo.append(&tool_call).unwrap();

        let stored = repo.latest(&session, 1).unwrap();
        assert_eq!(stored[0], tool_call);
        assert_eq!(repo.clear(&session).unwrap(), 1);
        assert!(repo.latest(&session, 1).unwrap().is_empty());
    }
}
