use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::models::{
    NewQueueEntry, NewSession, QueueEntry, QueueEntryId, QueueStatus, Session, SessionId,
    SessionParticipant, UserId, WaitingEntry,
};
use crate::services::store::{MatchStore, MatchUnit, StoreError};

/// Step at which the in-memory store can be told to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Select,
    CreateSession,
    UpdateStatus,
    AddParticipant,
    Commit,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Insertion order doubles as creation order
    entries: Vec<QueueEntry>,
    /// Rows held by open units
    locked: HashSet<QueueEntryId>,
    sessions: Vec<Session>,
    participants: Vec<SessionParticipant>,
    faults: HashSet<FailPoint>,
}

impl MemoryState {
    fn trip(&mut self, point: FailPoint) -> Result<(), StoreError> {
        if self.faults.remove(&point) {
            return Err(StoreError::Fault(format!("{:?}", point)));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MemoryState>,
    /// Signalled whenever a unit releases its row locks
    released: Notify,
    available: AtomicBool,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store is offline".to_string()))
        }
    }
}

/// Process-local store with the same locking contract as PostgreSQL
///
/// Selections lock rows for the lifetime of a unit and skip rows other units
/// hold; writes are staged and applied in one step on commit. Used by tests,
/// benches and single-process embedding.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MemoryState::default()),
                released: Notify::new(),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate losing (or regaining) the connection
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Make the next operation at `point` fail
    pub fn fail_once(&self, point: FailPoint) {
        self.shared.state().faults.insert(point);
    }

    pub fn session_count(&self) -> usize {
        self.shared.state().sessions.len()
    }

    /// Committed sessions in creation order
    pub fn sessions(&self) -> Vec<Session> {
        self.shared.state().sessions.clone()
    }

    /// Committed entries for a criterion in creation order
    pub fn entries(&self, criterion: &str) -> Vec<QueueEntry> {
        self.shared
            .state()
            .entries
            .iter()
            .filter(|e| e.criterion == criterion)
            .cloned()
            .collect()
    }

    pub fn locked_count(&self) -> usize {
        self.shared.state().locked.len()
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn MatchUnit>, StoreError> {
        self.shared.ensure_available()?;
        self.shared.state().trip(FailPoint::Begin)?;
        Ok(Box::new(MemoryUnit {
            shared: Arc::clone(&self.shared),
            claimed: Vec::new(),
            sessions: Vec::new(),
            promotions: Vec::new(),
            participants: Vec::new(),
            open: true,
        }))
    }

    async fn insert_waiting(&self, entry: NewQueueEntry) -> Result<QueueEntry, StoreError> {
        self.shared.ensure_available()?;
        let mut state = self.shared.state();

        let duplicate = state.entries.iter().any(|e| {
            e.user_id == entry.user_id && e.criterion == entry.criterion && e.status.is_waiting()
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "user {} is already waiting for '{}'",
                entry.user_id, entry.criterion
            )));
        }

        let stored = QueueEntry {
            id: QueueEntryId::new(),
            user_id: entry.user_id,
            criterion: entry.criterion,
            duration_min: entry.duration_min,
            status: QueueStatus::Waiting,
            created_at: Utc::now(),
        };
        state.entries.push(stored.clone());
        Ok(stored)
    }

    async fn conditional_cancel(&self, id: QueueEntryId) -> Result<u64, StoreError> {
        loop {
            self.shared.ensure_available()?;

            // Register before looking so a release between check and await
            // still wakes us.
            let notified = self.shared.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state();
                if !state.locked.contains(&id) {
                    let affected = match state.entries.iter_mut().find(|e| e.id == id) {
                        Some(entry) if entry.status.is_waiting() => {
                            entry.status = QueueStatus::Canceled;
                            1
                        }
                        _ => 0,
                    };
                    return Ok(affected);
                }
            }

            tracing::trace!("Cancel of {} waiting for an open unit", id);
            notified.await;
        }
    }

    async fn queue_entry(&self, id: QueueEntryId) -> Result<Option<QueueEntry>, StoreError> {
        self.shared.ensure_available()?;
        Ok(self.shared.state().entries.iter().find(|e| e.id == id).cloned())
    }

    async fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.shared.ensure_available()?;
        Ok(self.shared.state().sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn participants(&self, session_id: SessionId) -> Result<Vec<UserId>, StoreError> {
        self.shared.ensure_available()?;
        Ok(self
            .shared
            .state()
            .participants
            .iter()
            .filter(|p| p.session_id == session_id)
            .map(|p| p.user_id)
            .collect())
    }

    async fn sessions_for_user(&self, user_id: UserId) -> Result<Vec<Session>, StoreError> {
        self.shared.ensure_available()?;
        let state = self.shared.state();
        let joined: HashSet<SessionId> = state
            .participants
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.session_id)
            .collect();

        let mut sessions: Vec<Session> = state
            .sessions
            .iter()
            .rev()
            .filter(|s| joined.contains(&s.id))
            .cloned()
            .collect();
        // Stable: equal timestamps keep newest-inserted first
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn waiting_criteria(&self) -> Result<Vec<String>, StoreError> {
        self.shared.ensure_available()?;
        let criteria: BTreeSet<String> = self
            .shared
            .state()
            .entries
            .iter()
            .filter(|e| e.status.is_waiting())
            .map(|e| e.criterion.clone())
            .collect();
        Ok(criteria.into_iter().collect())
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        Ok(self.shared.available.load(Ordering::SeqCst))
    }
}

/// Open unit against an [`InMemoryStore`]
pub struct MemoryUnit {
    shared: Arc<Shared>,
    claimed: Vec<QueueEntryId>,
    sessions: Vec<Session>,
    promotions: Vec<(QueueEntryId, SessionId)>,
    participants: Vec<SessionParticipant>,
    open: bool,
}

impl MemoryUnit {
    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        {
            let mut state = self.shared.state();
            for id in self.claimed.drain(..) {
                state.locked.remove(&id);
            }
        }
        self.shared.released.notify_waiters();
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl MatchUnit for MemoryUnit {
    async fn select_waiting_for_update(
        &mut self,
        criterion: &str,
        limit: usize,
    ) -> Result<Vec<WaitingEntry>, StoreError> {
        self.shared.ensure_available()?;
        let mut state = self.shared.state();
        state.trip(FailPoint::Select)?;

        let picked: Vec<WaitingEntry> = state
            .entries
            .iter()
            .filter(|e| e.criterion == criterion && e.status.is_waiting())
            .filter(|e| !state.locked.contains(&e.id))
            .take(limit)
            .map(|e| WaitingEntry {
                id: e.id,
                user_id: e.user_id,
                duration_min: e.duration_min,
                created_at: e.created_at,
            })
            .collect();

        for entry in &picked {
            state.locked.insert(entry.id);
            self.claimed.push(entry.id);
        }
        Ok(picked)
    }

    async fn create_session(&mut self, session: &NewSession) -> Result<SessionId, StoreError> {
        self.shared.ensure_available()?;
        self.shared.state().trip(FailPoint::CreateSession)?;

        let id = SessionId::new();
        self.sessions.push(Session {
            id,
            criterion: session.criterion.clone(),
            title: session.title.clone(),
            start_at: session.start_at,
            end_at: session.end_at,
            status: session.status,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn update_status_for_ids(
        &mut self,
        ids: &[QueueEntryId],
        session_id: SessionId,
    ) -> Result<u64, StoreError> {
        self.shared.ensure_available()?;
        let mut state = self.shared.state();
        state.trip(FailPoint::UpdateStatus)?;

        let mut affected = 0;
        for id in ids {
            if !self.claimed.contains(id) {
                if state.locked.contains(id) {
                    return Err(StoreError::Conflict(format!("entry {} is held by another unit", id)));
                }
                state.locked.insert(*id);
                self.claimed.push(*id);
            }

            let waiting = state
                .entries
                .iter()
                .any(|e| e.id == *id && e.status.is_waiting());
            let staged = self.promotions.iter().any(|(promoted, _)| promoted == id);
            if waiting && !staged {
                self.promotions.push((*id, session_id));
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn add_participant(&mut self, session_id: SessionId, user_id: UserId) -> Result<(), StoreError> {
        self.shared.ensure_available()?;
        let mut state = self.shared.state();
        state.trip(FailPoint::AddParticipant)?;

        let participant = SessionParticipant { session_id, user_id };
        if self.participants.contains(&participant) || state.participants.contains(&participant) {
            return Err(StoreError::Conflict(format!(
                "user {} already participates in session {}",
                user_id, session_id
            )));
        }
        let known_session = self.sessions.iter().any(|s| s.id == session_id)
            || state.sessions.iter().any(|s| s.id == session_id);
        if !known_session {
            return Err(StoreError::Conflict(format!("unknown session {}", session_id)));
        }

        self.participants.push(participant);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut unit = self;
        unit.shared.ensure_available()?;
        {
            let mut state = unit.shared.state();
            state.trip(FailPoint::Commit)?;

            state.sessions.append(&mut unit.sessions);
            for (id, session_id) in unit.promotions.drain(..) {
                if let Some(entry) = state.entries.iter_mut().find(|e| e.id == id) {
                    entry.status = QueueStatus::Matched(session_id);
                }
            }
            state.participants.append(&mut unit.participants);
        }
        unit.release();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut unit = self;
        unit.release();
        Ok(())
    }
}
