// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    DurationMinutes, NewQueueEntry, NewSession, QueueEntry, QueueEntryId, QueueStatus, Session,
    SessionId, SessionParticipant, SessionStatus, UserId, WaitingEntry,
};
pub use requests::EnqueueRequest;
pub use responses::{CancelOutcome, EnqueueResponse, SessionDetail, SweepReport};
