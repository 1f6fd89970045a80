use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Identity of a queue entry
    QueueEntryId
);
uuid_id!(
    /// Identity of a session created by the pairing engine
    SessionId
);
uuid_id!(
    /// Identity of the user behind a request
    UserId
);

/// Desired session length in minutes, always at least one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DurationMinutes(u32);

impl DurationMinutes {
    /// Largest duration that still fits the `INTEGER` column
    pub const MAX: u32 = i32::MAX as u32;

    pub fn new(minutes: u32) -> Option<Self> {
        (1..=Self::MAX).contains(&minutes).then_some(Self(minutes))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_chrono(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.0))
    }
}

impl TryFrom<u32> for DurationMinutes {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("duration must be between 1 and {} minutes, got {}", Self::MAX, value))
    }
}

impl TryFrom<i32> for DurationMinutes {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| format!("duration must be positive, got {}", value))
    }
}

impl From<DurationMinutes> for u32 {
    fn from(value: DurationMinutes) -> Self {
        value.0
    }
}

impl From<DurationMinutes> for i32 {
    fn from(value: DurationMinutes) -> Self {
        // MAX keeps this lossless
        value.0 as i32
    }
}

/// Lifecycle state of a queue entry
///
/// The linked session lives inside `Matched`, so an entry can never carry a
/// session id while waiting or canceled. Serializes as
/// `{"status": "matched", "session_id": "..."}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "session_id", rename_all = "lowercase")]
pub enum QueueStatus {
    Waiting,
    Matched(SessionId),
    Canceled,
}

impl QueueStatus {
    pub const WAITING: &'static str = "waiting";
    pub const MATCHED: &'static str = "matched";
    pub const CANCELED: &'static str = "canceled";

    pub fn label(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => Self::WAITING,
            QueueStatus::Matched(_) => Self::MATCHED,
            QueueStatus::Canceled => Self::CANCELED,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            QueueStatus::Matched(session_id) => Some(*session_id),
            _ => None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, QueueStatus::Waiting)
    }

    /// Rebuild a status from its stored columns, rejecting rows that break
    /// "session id set iff matched".
    pub fn from_parts(label: &str, session_id: Option<SessionId>) -> Result<Self, String> {
        match (label, session_id) {
            (Self::WAITING, None) => Ok(QueueStatus::Waiting),
            (Self::CANCELED, None) => Ok(QueueStatus::Canceled),
            (Self::MATCHED, Some(session_id)) => Ok(QueueStatus::Matched(session_id)),
            (Self::MATCHED, None) => Err("matched entry without a session id".to_string()),
            (Self::WAITING | Self::CANCELED, Some(session_id)) => {
                Err(format!("{} entry linked to session {}", label, session_id))
            }
            (other, _) => Err(format!("unknown queue status '{}'", other)),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A request waiting to be paired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub user_id: UserId,
    pub criterion: String,
    pub duration_min: DurationMinutes,
    #[serde(flatten)]
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
}

/// Values the caller supplies when enqueueing; the store assigns the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueEntry {
    pub user_id: UserId,
    pub criterion: String,
    pub duration_min: DurationMinutes,
}

/// Projection of a waiting row as seen by a locking selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingEntry {
    pub id: QueueEntryId,
    pub user_id: UserId,
    pub duration_min: DurationMinutes,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(SessionStatus::Open),
            "closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }
}

/// A session created from exactly two matched entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub criterion: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn window(&self) -> chrono::Duration {
        self.end_at - self.start_at
    }
}

/// Session row as planned by the engine, before the store assigns an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub criterion: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Membership of one user in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionParticipant {
    pub session_id: SessionId,
    pub user_id: UserId,
}
