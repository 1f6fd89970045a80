use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

use crate::models::{
    DurationMinutes, NewQueueEntry, NewSession, QueueEntry, QueueEntryId, QueueStatus, Session,
    SessionId, SessionStatus, UserId, WaitingEntry,
};
use crate::services::store::{MatchStore, MatchUnit, StoreError};

/// PostgreSQL-backed queue and session store
///
/// The pairing selection relies on `FOR UPDATE SKIP LOCKED`: concurrent
/// attempts for the same criterion each lock a disjoint set of waiting rows
/// instead of blocking on one another.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store from a connection string and run migrations
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        // Run migrations on startup
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a new store from settings
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
        acquire_timeout_secs: Option<u64>,
        idle_timeout_secs: Option<u64>,
    ) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL");

        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
            Duration::from_secs(acquire_timeout_secs.unwrap_or(5)),
            Duration::from_secs(idle_timeout_secs.unwrap_or(600)),
        )
        .await
    }

    /// Wrap an existing pool; migrations are the caller's business
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn corrupt(context: &str, detail: impl std::fmt::Display) -> StoreError {
    let err = StoreError::CorruptRow(format!("{}: {}", context, detail));
    tracing::error!("{}", err);
    err
}

fn queue_entry_from_row(row: &PgRow) -> Result<QueueEntry, StoreError> {
    let id: QueueEntryId = row.try_get("id").map_err(|e| corrupt("queues.id", e))?;
    let label: String = row.try_get("status").map_err(|e| corrupt("queues.status", e))?;
    let session_id: Option<SessionId> = row
        .try_get("session_id")
        .map_err(|e| corrupt("queues.session_id", e))?;
    let minutes: i32 = row
        .try_get("duration_min")
        .map_err(|e| corrupt("queues.duration_min", e))?;

    Ok(QueueEntry {
        id,
        user_id: row.try_get("user_id").map_err(|e| corrupt("queues.user_id", e))?,
        criterion: row
            .try_get("criteria_key")
            .map_err(|e| corrupt("queues.criteria_key", e))?,
        duration_min: DurationMinutes::try_from(minutes)
            .map_err(|e| corrupt(&format!("queue {}", id), e))?,
        status: QueueStatus::from_parts(&label, session_id)
            .map_err(|e| corrupt(&format!("queue {}", id), e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| corrupt("queues.created_at", e))?,
    })
}

fn waiting_entry_from_row(row: &PgRow) -> Result<WaitingEntry, StoreError> {
    let id: QueueEntryId = row.try_get("id").map_err(|e| corrupt("queues.id", e))?;
    let minutes: i32 = row
        .try_get("duration_min")
        .map_err(|e| corrupt("queues.duration_min", e))?;

    Ok(WaitingEntry {
        id,
        user_id: row.try_get("user_id").map_err(|e| corrupt("queues.user_id", e))?,
        duration_min: DurationMinutes::try_from(minutes)
            .map_err(|e| corrupt(&format!("queue {}", id), e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| corrupt("queues.created_at", e))?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    let id: SessionId = row.try_get("id").map_err(|e| corrupt("sessions.id", e))?;
    let label: String = row.try_get("status").map_err(|e| corrupt("sessions.status", e))?;
    let status = SessionStatus::parse(&label)
        .ok_or_else(|| corrupt(&format!("session {}", id), format!("unknown status '{}'", label)))?;

    Ok(Session {
        id,
        criterion: row
            .try_get("criteria_key")
            .map_err(|e| corrupt("sessions.criteria_key", e))?,
        title: row.try_get("title").map_err(|e| corrupt("sessions.title", e))?,
        start_at: row.try_get("start_at").map_err(|e| corrupt("sessions.start_at", e))?,
        end_at: row.try_get("end_at").map_err(|e| corrupt("sessions.end_at", e))?,
        status,
        created_at: row
            .try_get("created_at")
            .map_err(|e| corrupt("sessions.created_at", e))?,
    })
}

#[async_trait]
impl MatchStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn MatchUnit>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresUnit { tx }))
    }

    async fn insert_waiting(&self, entry: NewQueueEntry) -> Result<QueueEntry, StoreError> {
        let query = r#"
            INSERT INTO queues (id, user_id, criteria_key, duration_min, status)
            VALUES ($1, $2, $3, $4, 'waiting')
            RETURNING id, user_id, criteria_key, duration_min, status, session_id, created_at
        "#;

        let row = sqlx::query(query)
            .bind(QueueEntryId::new())
            .bind(entry.user_id)
            .bind(&entry.criterion)
            .bind(i32::from(entry.duration_min))
            .fetch_one(&self.pool)
            .await?;

        let stored = queue_entry_from_row(&row)?;
        tracing::debug!("Enqueued {} for '{}'", stored.id, stored.criterion);
        Ok(stored)
    }

    /// Row locks held by an in-flight match make this UPDATE wait; once that
    /// unit commits the status guard no longer holds and zero rows change.
    async fn conditional_cancel(&self, id: QueueEntryId) -> Result<u64, StoreError> {
        let query = r#"
            UPDATE queues SET status = 'canceled'
            WHERE id = $1 AND status = 'waiting'
        "#;

        let result = sqlx::query(query).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn queue_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, StoreError> {
        let query = r#"
            SELECT id, user_id, criteria_key, duration_min, status, session_id, created_at
            FROM queues
            WHERE id = $1
        "#;

        let row = sqlx::query(query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(queue_entry_from_row).transpose()
    }

    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let query = r#"
            SELECT id, criteria_key, title, start_at, end_at, status, created_at
            FROM sessions
            WHERE id = $1
        "#;

        let row = sqlx::query(query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn participants(&self, session_id: SessionId) -> Result<Vec<UserId>, StoreError> {
        let query = r#"
            SELECT user_id
            FROM session_participants
            WHERE session_id = $1
            ORDER BY user_id
        "#;

        let rows = sqlx::query(query).bind(session_id).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                row.try_get("user_id")
                    .map_err(|e| corrupt("session_participants.user_id", e))
            })
            .collect()
    }

    async fn sessions_for_user(&self, user_id: UserId) -> Result<Vec<Session>, StoreError> {
        let query = r#"
            SELECT s.id, s.criteria_key, s.title, s.start_at, s.end_at, s.status, s.created_at
            FROM sessions s
            JOIN session_participants p ON p.session_id = s.id
            WHERE p.user_id = $1
            ORDER BY s.created_at DESC
        "#;

        let rows = sqlx::query(query).bind(user_id).fetch_all(&self.pool).await?;

        // One bad row fails the whole listing rather than vanishing from it
        let sessions = rows.iter().map(session_from_row).collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("User {} has {} sessions", user_id, sessions.len());

        Ok(sessions)
    }

    async fn waiting_criteria(&self) -> Result<Vec<String>, StoreError> {
        let query = r#"
            SELECT DISTINCT criteria_key
            FROM queues
            WHERE status = 'waiting'
            ORDER BY criteria_key
        "#;

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                row.try_get("criteria_key")
                    .map_err(|e| corrupt("queues.criteria_key", e))
            })
            .collect()
    }

    /// Health check for the database connection
    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

/// One transaction on the pool; dropping it rolls back
pub struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl MatchUnit for PostgresUnit {
    async fn select_waiting_for_update(
        &mut self,
        criterion: &str,
        limit: usize,
    ) -> Result<Vec<WaitingEntry>, StoreError> {
        // Fixed (created_at, id) order keeps lock acquisition deterministic
        let query = r#"
            SELECT id, user_id, duration_min, created_at
            FROM queues
            WHERE criteria_key = $1 AND status = 'waiting'
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
        "#;

        let rows = sqlx::query(query)
            .bind(criterion)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await?;

        let selected = rows.iter().map(waiting_entry_from_row).collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("Locked {} waiting entries for '{}'", selected.len(), criterion);

        Ok(selected)
    }

    async fn create_session(&mut self, session: &NewSession) -> Result<SessionId, StoreError> {
        let query = r#"
            INSERT INTO sessions (id, criteria_key, title, start_at, end_at, status)
            VALUES ($1, $2, $3, $4, $5, $6)
        "#;

        let id = SessionId::new();
        sqlx::query(query)
            .bind(id)
            .bind(&session.criterion)
            .bind(&session.title)
            .bind(session.start_at)
            .bind(session.end_at)
            .bind(session.status.as_str())
            .execute(&mut *self.tx)
            .await?;

        Ok(id)
    }

    async fn update_status_for_ids(
        &mut self,
        ids: &[QueueEntryId],
        session_id: SessionId,
    ) -> Result<u64, StoreError> {
        let query = r#"
            UPDATE queues SET status = 'matched', session_id = $1
            WHERE id = ANY($2) AND status = 'waiting'
        "#;

        let raw_ids: Vec<uuid::Uuid> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query(query)
            .bind(session_id)
            .bind(&raw_ids)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn add_participant(&mut self, session_id: SessionId, user_id: UserId) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO session_participants (session_id, user_id)
            VALUES ($1, $2)
        "#;

        sqlx::query(query)
            .bind(session_id)
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresUnit { tx } = *self;
        tx.commit().await.map_err(Into::into)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PostgresUnit { tx } = *self;
        tx.rollback().await.map_err(Into::into)
    }
}
