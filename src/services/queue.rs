use thiserror::Error;
use validator::Validate;

use crate::core::{MatchError, PairingEngine};
use crate::models::{
    CancelOutcome, EnqueueRequest, EnqueueResponse, QueueEntry, QueueEntryId, QueueStatus, Session,
    SessionDetail, SessionId, UserId,
};
use crate::services::store::{MatchStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Already queued: {0}")]
    AlreadyQueued(String),

    #[error("Match failed: {0}")]
    Match(#[from] MatchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Queue operations the API layer builds on
///
/// Owns the enqueue-then-match flow: every enqueue is immediately followed by
/// a match attempt for the same criterion.
#[derive(Debug, Clone)]
pub struct QueueService<S> {
    engine: PairingEngine<S>,
}

impl<S: MatchStore> QueueService<S> {
    pub fn new(engine: PairingEngine<S>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PairingEngine<S> {
        &self.engine
    }

    /// Join the queue, then try to pair
    ///
    /// The reported status is the caller's own entry after the attempt: a
    /// session created for two older entries leaves this one waiting.
    pub async fn enqueue(&self, req: &EnqueueRequest) -> Result<EnqueueResponse, ServiceError> {
        req.validate()?;
        let Some(new_entry) = req.to_new_entry() else {
            let mut errors = validator::ValidationErrors::new();
            errors.add("duration_min", validator::ValidationError::new("range"));
            return Err(ServiceError::Validation(errors));
        };

        let store = self.engine.store();
        let entry = match store.insert_waiting(new_entry).await {
            Ok(entry) => entry,
            Err(StoreError::Conflict(message)) => return Err(ServiceError::AlreadyQueued(message)),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            "User {} queued for '{}' ({} min)",
            entry.user_id,
            entry.criterion,
            entry.duration_min.get()
        );

        // The entry is committed; a failed attempt leaves it to the sweep
        let status = match self.engine.try_match(&entry.criterion).await {
            Ok(None) => QueueStatus::Waiting,
            Err(e) => {
                tracing::warn!(
                    "Match attempt after enqueue of {} failed, left waiting: {}",
                    entry.id,
                    e
                );
                QueueStatus::Waiting
            }
            Ok(Some(session_id)) => {
                let reread = store.queue_entry(entry.id).await?;
                let status = reread.map(|e| e.status).unwrap_or(QueueStatus::Waiting);
                if status.session_id() != Some(session_id) {
                    tracing::debug!(
                        "Session {} paired other entries; {} stays {}",
                        session_id,
                        entry.id,
                        status
                    );
                }
                status
            }
        };

        Ok(EnqueueResponse {
            queue_id: entry.id,
            status,
        })
    }

    /// Withdraw a waiting entry; a concurrent match wins if it commits first
    pub async fn cancel(&self, id: QueueEntryId) -> Result<CancelOutcome, ServiceError> {
        let affected = self.engine.store().conditional_cancel(id).await?;
        if affected == 0 {
            tracing::debug!("Cancel of {} found nothing waiting", id);
            return Ok(CancelOutcome::NotFoundOrResolved);
        }

        tracing::info!("Canceled queue entry {}", id);
        Ok(CancelOutcome::Canceled)
    }

    pub async fn queue_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, ServiceError> {
        Ok(self.engine.store().queue_entry(id).await?)
    }

    pub async fn session(&self, id: SessionId) -> Result<Option<SessionDetail>, ServiceError> {
        let store = self.engine.store();
        let Some(session) = store.session(id).await? else {
            return Ok(None);
        };
        let participants = store.participants(id).await?;
        Ok(Some(SessionDetail {
            session,
            participants,
        }))
    }

    pub async fn sessions_for_user(&self, user_id: UserId) -> Result<Vec<Session>, ServiceError> {
        Ok(self.engine.store().sessions_for_user(user_id).await?)
    }
}
