use crate::error::GroveError;
use crate::types::{CodeReview, ReviewId, SessionId};

pub trait ReviewRepository {
    fn get(&self, id: &ReviewId) -> Result<Option<CodeReview>, GroveError>;
    fn list_for_session(&self, session_id: &SessionId) -> Result<Vec<CodeReview>, GroveError>;
    fn save(&self, review: &CodeReview) -> Result<(), GroveError>;
}
