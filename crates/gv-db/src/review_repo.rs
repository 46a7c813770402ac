use crate::util::{
    db_err, decode_enum, decode_id, decode_json, encode_enum, encode_json,
    from_optional_rfc3339, from_rfc3339, to_rfc3339,
};
use gv_core::error::GroveError;
use gv_core::reviews::ReviewRepository;
use gv_core::types::{CodeReview, ReviewId, SessionId};
use parking_lot::ReentrantMutexGuard;
use rusqlite::{Connection, OptionalExtension, Row, params};

const REVIEW_COLUMNS: &str =
    "id, session_id, status, comment, files_json, requested_at, resolved_at";

pub struct ReviewRepo<'a> {
    conn: ReentrantMutexGuard<'a, Connection>,
}

impl<'a> ReviewRepo<'a> {
    pub fn new(conn: ReentrantMutexGuard<'a, Connection>) -> Self {
        Self { conn }
    }
}

impl ReviewRepository for ReviewRepo<'_> {
    fn get(&self, id: &ReviewId) -> Result<Option<CodeReview>, GroveError> {
        let sql = format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?1");
        self.conn
            .query_row(&sql, [id.as_str()], ReviewRow::read)
            .optional()
            .map_err(db_err)?
            .map(ReviewRow::decode)
            .transpose()
    }

    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<CodeReview>, GroveError> {
        let sql = format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE session_id = ?1 ORDER BY requested_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([session_id.as_str()], ReviewRow::read)
            .map_err(db_err)?;
        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row.map_err(db_err)?.decode()?);
        }
        Ok(reviews)
    }

    fn save(&self, review: &CodeReview) -> Result<(), GroveError> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO reviews ({REVIEW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    review.id.as_str(),
                    review.session_id.as_str(),
                    encode_enum(&review.status)?,
                    review.comment,
                    encode_json(&review.files)?,
                    to_rfc3339(&review.requested_at),
                    review.resolved_at.as_ref().map(to_rfc3339),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

struct ReviewRow {
    id: String,
    session_id: String,
    status: String,
    comment: Option<String>,
    files_json: String,
    requested_at: String,
    resolved_at: Option<String>,
}

impl ReviewRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            status: row.get(2)?,
            comment: row.get(3)?,
            files_json: row.get(4)?,
            requested_at: row.get(5)?,
            resolved_at: row.get(6)?,
        })
    }

    fn decode(self) -> Result<CodeReview, GroveError> {
        Ok(CodeReview {
            id: decode_id(&self.id)?,
            session_id: decode_id(&self.session_id)?,
            status: decode_enum(&self.status)?,
            comment: self.comment,
            files: decode_json(&self.files_json)?,
            requested_at: from_rfc3339(&self.requested_at)?,
            resolved_at: from_optional_rfc3339(self.resolved_at.as_deref())?,
        })
    }
}
