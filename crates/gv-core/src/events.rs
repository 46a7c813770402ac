use crate::error::GroveError;
use crate::types::{SessionEvent, SessionId};

pub trait EventRepository {
    fn append(&self, event: &SessionEvent) -> Result<(), GroveError>;
    /// The most recent `limit` events of a session, oldest first.
    fn latest(&self, session_id: &SessionId, limit: usize) -> Result<Vec<SessionEvent>, GroveError>;
    fn count(&self, session_id: &SessionId) -> Result<usize, GroveError>;
    fn clear(&self, session_id: &SessionId) -> Result<usize, GroveError>;
}
