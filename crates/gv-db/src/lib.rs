//! SQLite storage for grove sessions, events, approvals and reviews.

pub mod approval_repo;
pub mod event_repo;
pub mod review_repo;
pub mod schema;
pub mod session_repo;
pub mod store;
pub mod util;

pub use crate::store::DbStore;
