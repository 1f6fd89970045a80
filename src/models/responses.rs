use serde::{Deserialize, Serialize};

use crate::models::domain::{QueueEntryId, QueueStatus, Session, UserId};

/// Outcome of an enqueue call
///
/// `status` reflects the caller's own entry after the match attempt; another
/// pair may have been promoted instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub queue_id: QueueEntryId,
    #[serde(flatten)]
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Canceled,
    /// No waiting entry with that id: unknown, already matched or already canceled
    NotFoundOrResolved,
}

/// Session together with its participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: Session,
    pub participants: Vec<UserId>,
}

/// Summary of one sweep over every waiting criterion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub criteria_scanned: usize,
    pub sessions_created: usize,
    pub failures: usize,
    /// Criteria that cannot be matched on and were passed over
    pub skipped: usize,
}
