use crate::types::enums::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: Phase,
    pub completed: BTreeSet<Phase>,
    pub started_at: DateTime<Utc>,
}

impl Progress {
    pub fn new() -> Self {
        Self::starting_at(Phase::Analyzing)
    }

    pub fn starting_at(current: Phase) -> Self {
        Self {
            current,
            completed: BTreeSet::new(),
            started_at: Utc::now(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
