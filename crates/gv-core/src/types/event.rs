use crate::types::enums::EventType;
use crate::types::ids::{EventId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry in a session's append-only activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: EventId,
    pub session_id: SessionId,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub content: String,
    pub metadata: Option<Map<String, Value>>,
    pub at: DateTime<Utc>,
}
