use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named shell check run against a session's worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationGate {
    pub name: String,
    pub command: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ValidationGate {
    pub fn new(name: impl Into<String>, command: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: String,
    pub passed: bool,
    pub attempts: u32,
    /// stdout then stderr, capped at 1000 characters.
    pub output: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRun {
    pub results: Vec<GateResult>,
    pub all_passed: bool,
    pub duration_ms: u64,
}

impl ValidationRun {
    pub fn first_failure(&self) -> Option<&GateResult> {
        self.results.iter().find(|result| !result.passed)
    }
}
