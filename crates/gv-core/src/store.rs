use crate::GroveError;
use crate::approvals::ApprovalRepository;
use crate::events::EventRepository;
use crate::reviews::ReviewRepository;
use crate::sessions::SessionRepository;

/// Persistence seam for the coordinator.
///
/// Repositories are short-lived borrows of the store. Implementations must be
/// shareable across session tasks; repositories themselves need not be.
pub trait Store: Send + Sync {
    type Sessions<'a>: SessionRepository
    where
        Self: 'a;
    type Events<'a>: EventRepository
    where
        Self: 'a;
    type Approvals<'a>: ApprovalRepository
    where
        Self: 'a;
    type Reviews<'a>: ReviewRepository
    where
        Self: 'a;

    fn sessions(&self) -> Self::Sessions<'_>;
    fn events(&self) -> Self::Events<'_>;
    fn approvals(&self) -> Self::Approvals<'_>;
    fn reviews(&self) -> Self::Reviews<'_>;

    fn with_tx<F, T>(&self, f: F) -> Result<T, GroveError>
    where
        F: FnOnce(&Self) -> Result<T, GroveError>;
}
