use chrono::{DateTime, Utc};

use crate::core::titles::TitleCatalog;
use crate::models::{DurationMinutes, NewSession, QueueEntryId, SessionStatus, UserId, WaitingEntry};

/// Two waiting entries claimed by one atomic unit, earliest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePair {
    pub first: WaitingEntry,
    pub second: WaitingEntry,
}

impl CandidatePair {
    /// Build a pair from a locking selection. Anything short of two rows
    /// means "try again later".
    pub fn from_selection(selected: Vec<WaitingEntry>) -> Option<Self> {
        let mut rows = selected.into_iter();
        let first = rows.next()?;
        let second = rows.next()?;
        Some(Self { first, second })
    }

    pub fn entry_ids(&self) -> [QueueEntryId; 2] {
        [self.first.id, self.second.id]
    }

    pub fn user_ids(&self) -> [UserId; 2] {
        [self.first.user_id, self.second.user_id]
    }

    pub fn session_duration(&self) -> DurationMinutes {
        shorter_duration(self.first.duration_min, self.second.duration_min)
    }
}

/// The shorter request wins: a session never runs longer than either
/// participant asked for.
pub fn shorter_duration(a: DurationMinutes, b: DurationMinutes) -> DurationMinutes {
    a.min(b)
}

/// Plan the session row for a pair, starting at `now`
pub fn plan_session(
    pair: &CandidatePair,
    criterion: &str,
    titles: &TitleCatalog,
    now: DateTime<Utc>,
) -> NewSession {
    NewSession {
        criterion: criterion.to_string(),
        title: titles.resolve(criterion).to_string(),
        start_at: now,
        end_at: now + pair.session_duration().as_chrono(),
        status: SessionStatus::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting(minutes: u32) -> WaitingEntry {
        WaitingEntry {
            id: QueueEntryId::new(),
            user_id: UserId::new(),
            duration_min: DurationMinutes::new(minutes).unwrap(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pair_needs_two_rows() {
        assert!(CandidatePair::from_selection(vec![]).is_none());
        assert!(CandidatePair::from_selection(vec![waiting(30)]).is_none());

        let a = waiting(30);
        let b = waiting(45);
        let pair = CandidatePair::from_selection(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(pair.entry_ids(), [a.id, b.id]);
        assert_eq!(pair.user_ids(), [a.user_id, b.user_id]);
    }

    #[test]
    fn test_shorter_duration_wins_either_order() {
        let pair = CandidatePair::from_selection(vec![waiting(45), waiting(30)]).unwrap();
        assert_eq!(pair.session_duration().get(), 30);

        let pair = CandidatePair::from_selection(vec![waiting(30), waiting(45)]).unwrap();
        assert_eq!(pair.session_duration().get(), 30);
    }

    #[test]
    fn test_plan_session_window_and_title() {
        let titles: TitleCatalog = [("english".to_string(), "英会話".to_string())]
            .into_iter()
            .collect();
        let pair = CandidatePair::from_selection(vec![waiting(60), waiting(90)]).unwrap();
        let now = Utc::now();

        let planned = plan_session(&pair, "english", &titles, now);
        assert_eq!(planned.title, "英会話");
        assert_eq!(planned.start_at, now);
        assert_eq!(planned.end_at - planned.start_at, chrono::Duration::minutes(60));
        assert_eq!(planned.status, SessionStatus::Open);

        let planned = plan_session(&pair, "chess", &titles, now);
        assert_eq!(planned.title, "chess");
    }
}
