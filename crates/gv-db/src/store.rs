use gv_core::error::GroveError;
use gv_core::store::Store;
use parking_lot::ReentrantMutex;
use rusqlite::Connection;
use std::path::Path;
use tracing::warn;

use crate::approval_repo::ApprovalRepo;
use crate::event_repo::EventRepo;
use crate::review_repo::ReviewRepo;
use crate::schema;
use crate::session_repo::SessionRepo;
use crate::util::db_err;

pub const DEFAULT_MAX_EVENTS_PER_SESSION: usize = 1000;

/// SQLite-backed [`Store`].
///
/// One connection behind a re-entrant lock: repositories opened inside
/// [`Store::with_tx`] on the same thread share the transaction.
pub struct DbStore {
    conn: ReentrantMutex<Connection>,
    max_events_per_session: usize,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: ReentrantMutex::new(conn),
            max_events_per_session: DEFAULT_MAX_EVENTS_PER_SESSION,
        }
    }

    pub fn open(path: &Path) -> Result<Self, GroveError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                GroveError::from(gv_core::error::StoreError::Database {
                    message: format!("failed to create {}: {err}", parent.display()),
                })
            })?;
        }
        schema::open_and_migrate(path).map(Self::new).map_err(db_err)
    }

    pub fn in_memory() -> Result<Self, GroveError> {
        schema::with_test_db().map(Self::new).map_err(db_err)
    }

    /// Caps retained events per session; zero keeps everything.
    #[must_use]
    pub fn with_event_limit(mut self, max_events_per_session: usize) -> Self {
        self.max_events_per_session = max_events_per_session;
        self
    }
}

impl Store for DbStore {
    type Sessions<'a>
        = SessionRepo<'a>
    where
        Self: 'a;
    type Events<'a>
        = EventRepo<'a>
    where
        Self: 'a;
    type Approvals<'a>
        = ApprovalRepo<'a>
    where
        Self: 'a;
    type Reviews<'a>
        = ReviewRepo<'a>
    where
        Self: 'a;

    fn sessions(&self) -> Self::Sessions<'_> {
        SessionRepo::new(self.conn.lock())
    }

    fn events(&self) -> Self::Events<'_> {
        EventRepo::new(self.conn.lock(), self.max_events_per_session)
    }

    fn approvals(&self) -> Self::Approvals<'_> {
        ApprovalRepo::new(self.conn.lock())
    }

    fn reviews(&self) -> Self::Reviews<'_> {
        ReviewRepo::new(self.conn.lock())
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, GroveError>
    where
        F: FnOnce(&Self) -> Result<T, GroveError>,
    {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE").map_err(db_err)?;
        match f(self) {
            Ok(value) => {
                conn.execute_batch("COMMIT").map_err(db_err)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}
