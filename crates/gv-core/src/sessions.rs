use crate::error::GroveError;
use crate::types::{Session, SessionId, SessionStatus};

pub trait SessionRepository {
    fn get(&self, id: &SessionId) -> Result<Option<Session>, GroveError>;
    fn list(&self) -> Result<Vec<Session>, GroveError>;
    fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>, GroveError>;
    /// Inserts or replaces the session keyed by its id.
    fn save(&self, session: &Session) -> Result<(), GroveError>;
    fn delete(&self, id: &SessionId) -> Result<bool, GroveError>;
}
