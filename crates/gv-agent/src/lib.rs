//! Agent subprocess management.
//!
//! [`AgentProcessManager`] launches the agent CLI in a session's worktree and
//! exposes its `stream-json` stdout as an ordered stream of [`AgentOutput`]s.

pub mod error;
pub mod output;
pub mod process;

pub use crate::error::AgentError;
pub use crate::output::{AgentOutput, OutputKind, TokenUsage, ToolInvocation, classify_line};
pub use crate::process::{AgentConfig, AgentProcessManager, ProcessId, StartedProcess};
