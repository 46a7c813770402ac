pub mod approval;
pub mod broadcast;
pub mod enums;
pub mod event;
pub mod gate;
pub mod ids;
pub mod progress;
pub mod review;
pub mod session;

pub use approval::ToolApproval;
pub use broadcast::Broadcast;
pub use enums::{ApprovalStatus, EventType, FileChangeKind, Phase, ReviewStatus, SessionStatus};
pub use event::SessionEvent;
pub use gate::{GateResult, ValidationGate, ValidationRun};
pub use ids::{ApprovalId, EventId, IdError, ReviewId, SessionId};
pub use progress::Progress;
pub use review::{CodeReview, FileChange};
pub use session::{NewSession, Session};
