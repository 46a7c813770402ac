use crate::error::SessionError;
use crate::types::SessionStatus;

pub fn validate_session_transition(
    from: SessionStatus,
    to: SessionStatus,
) -> Result<(), SessionError> {
    use SessionStatus::{Completed, Failed, Paused, Pending, Running};

    if from == to {
        return Ok(());
    }

    let valid = matches!(
        (from, to),
        (Pending, Running | Failed)
            | (Running, Paused | Completed | Failed)
            | (Paused, Running | Failed)
            | (Completed, Running | Failed)
            | (Failed, Running | Completed)
    );

    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidTransition { from, to })
    }
}
