//! Session orchestration for coding agents working in git worktrees.
//!
//! [`Grove`] records session activity and publishes it; [`Reconciler`] turns
//! unknown worktrees into sessions; [`SessionRunner`] drives an agent run from
//! launch to a validated final status.

pub mod approvals;
pub mod config;
pub mod error;
pub mod events;
pub mod gates_exec;
pub mod grove;
pub mod poll;
pub mod progress;
pub mod reconcile;
pub mod reviews;
pub mod runner;
pub mod sessions;
pub mod store;
pub mod validation;

pub mod types;

pub use crate::config::GroveConfig;
pub use crate::error::GroveError;
pub use crate::gates_exec::GateRunner;
pub use crate::grove::Grove;
pub use crate::poll::{PollConfig, WaitOutcome, wait_until};
pub use crate::reconcile::Reconciler;
pub use crate::runner::SessionRunner;
pub use crate::store::Store;
