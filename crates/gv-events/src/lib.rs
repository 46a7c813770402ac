pub mod bus;
pub mod types;

pub use crate::bus::{BroadcastHub, Subscription};
pub use crate::types::HubMessage;
