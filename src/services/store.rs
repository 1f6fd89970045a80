use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    NewQueueEntry, NewSession, QueueEntry, QueueEntryId, Session, SessionId, UserId, WaitingEntry,
};

/// Errors raised by a queue/session store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("SQLx error: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Injected fault: {0}")]
    Fault(String),
}

impl StoreError {
    /// True when the store could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(err),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Query(other),
        }
    }
}

/// Durable queue and session storage consumed by the pairing engine
///
/// Everything that changes queue state outside a match goes through here.
/// `conditional_cancel` must never observe a row that an open unit has
/// locked: it waits for that unit to finish, then re-checks the status.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Open an atomic unit of work
    async fn begin(&self) -> Result<Box<dyn MatchUnit>, StoreError>;

    async fn insert_waiting(&self, entry: NewQueueEntry) -> Result<QueueEntry, StoreError>;

    /// `waiting -> canceled`, guarded by the current status. Returns rows affected.
    async fn conditional_cancel(&self, id: QueueEntryId) -> Result<u64, StoreError>;

    async fn queue_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, StoreError>;

    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    async fn participants(&self, session_id: SessionId) -> Result<Vec<UserId>, StoreError>;

    /// Sessions the user takes part in, newest first
    async fn sessions_for_user(&self, user_id: UserId) -> Result<Vec<Session>, StoreError>;

    /// Distinct criteria that currently have at least one waiting entry
    async fn waiting_criteria(&self) -> Result<Vec<String>, StoreError>;

    async fn health_check(&self) -> Result<bool, StoreError>;
}

/// One open atomic unit. Dropping it without `commit` rolls everything back
/// and releases its row locks.
#[async_trait]
pub trait MatchUnit: Send {
    /// Lock up to `limit` waiting rows for `criterion`, oldest first,
    /// skipping rows another unit already holds.
    async fn select_waiting_for_update(
        &mut self,
        criterion: &str,
        limit: usize,
    ) -> Result<Vec<WaitingEntry>, StoreError>;

    async fn create_session(&mut self, session: &NewSession) -> Result<SessionId, StoreError>;

    /// Mark exactly `ids` as matched to `session_id`, touching only rows
    /// that are still waiting. Returns rows affected.
    async fn update_status_for_ids(
        &mut self,
        ids: &[QueueEntryId],
        session_id: SessionId,
    ) -> Result<u64, StoreError>;

    async fn add_participant(&mut self, session_id: SessionId, user_id: UserId) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> MatchStore for std::sync::Arc<S>
where
    S: MatchStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn MatchUnit>, StoreError> {
        (**self).begin().await
    }

    async fn insert_waiting(&self, entry: NewQueueEntry) -> Result<QueueEntry, StoreError> {
        (**self).insert_waiting(entry).await
    }

    async fn conditional_cancel(&self, id: QueueEntryId) -> Result<u64, StoreError> {
        (**self).conditional_cancel(id).await
    }

    async fn queue_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, StoreError> {
        (**self).queue_entry(id).await
    }

    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        (**self).session(id).await
    }

    async fn participants(&self, session_id: SessionId) -> Result<Vec<UserId>, StoreError> {
        (**self).participants(session_id).await
    }

    async fn sessions_for_user(&self, user_id: UserId) -> Result<Vec<Session>, StoreError> {
        (**self).sessions_for_user(user_id).await
    }

    async fn waiting_criteria(&self) -> Result<Vec<String>, StoreError> {
        (**self).waiting_criteria().await
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        (**self).health_check().await
    }
}
