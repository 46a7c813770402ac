use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// A single state-change notification fanned out to observers.
///
/// `kind` uses the `<topic>:<action>` vocabulary (`session:updated`,
/// `approval:requested`, ...). The hub never inspects the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub at: DateTime<Utc>,
}

impl HubMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: format!("msg_{}", Ulid::new()),
            kind: kind.into(),
            payload,
            at: Utc::now(),
        }
    }

    pub fn topic(&self) -> &str {
        self.kind.split(':').next().unwrap_or("")
    }
}
