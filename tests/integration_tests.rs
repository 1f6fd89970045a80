// Integration tests for the pairing engine against the in-memory store

use chrono::Duration;
use session_matcher::core::{MatchError, PairingEngine, TitleCatalog};
use session_matcher::models::{DurationMinutes, NewQueueEntry, QueueEntry, QueueStatus, UserId};
use session_matcher::services::{FailPoint, InMemoryStore, MatchStore, MatchUnit};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn new_entry(criterion: &str, minutes: u32) -> NewQueueEntry {
    NewQueueEntry {
        user_id: UserId::new(),
        criterion: criterion.to_string(),
        duration_min: DurationMinutes::new(minutes).unwrap(),
    }
}

async fn seed(store: &InMemoryStore, criterion: &str, durations: &[u32]) -> Vec<QueueEntry> {
    let mut entries = Vec::new();
    for minutes in durations {
        entries.push(store.insert_waiting(new_entry(criterion, *minutes)).await.unwrap());
    }
    entries
}

fn engine(store: &InMemoryStore) -> PairingEngine<InMemoryStore> {
    PairingEngine::new(store.clone(), TitleCatalog::empty())
}

/// Every matched entry points at a session with exactly two participants,
/// and no entry appears in two sessions.
async fn assert_consistent(store: &InMemoryStore, criterion: &str) {
    let mut by_session: HashMap<_, Vec<UserId>> = HashMap::new();
    for entry in store.entries(criterion) {
        if let QueueStatus::Matched(session_id) = entry.status {
            by_session.entry(session_id).or_default().push(entry.user_id);
        }
    }

    for (session_id, users) in &by_session {
        assert_eq!(users.len(), 2, "session {} owns {} entries", session_id, users.len());
        let participants: HashSet<_> = store.participants(*session_id).await.unwrap().into_iter().collect();
        let owners: HashSet<_> = users.iter().copied().collect();
        assert_eq!(participants, owners);
    }
    let sessions_for_criterion = store
        .sessions()
        .into_iter()
        .filter(|s| s.criterion == criterion)
        .count();
    assert_eq!(by_session.len(), sessions_for_criterion);
}

#[tokio::test]
async fn test_pairs_two_earliest_and_leaves_third() {
    let store = InMemoryStore::new();
    let entries = seed(&store, "x", &[30, 45, 60]).await;
    let (a, b, c) = (&entries[0], &entries[1], &entries[2]);

    let session_id = engine(&store).try_match("x").await.unwrap().expect("pair expected");

    let session = store.session(session_id).await.unwrap().unwrap();
    assert_eq!(session.window(), Duration::minutes(30));
    assert!(session.end_at > session.start_at);
    assert_eq!(session.title, "x");

    let participants: HashSet<_> = store.participants(session_id).await.unwrap().into_iter().collect();
    assert_eq!(participants, HashSet::from([a.user_id, b.user_id]));

    let third = store.queue_entry(c.id).await.unwrap().unwrap();
    assert_eq!(third.status, QueueStatus::Waiting);
    for matched in [a, b] {
        let reread = store.queue_entry(matched.id).await.unwrap().unwrap();
        assert_eq!(reread.status, QueueStatus::Matched(session_id));
    }
}

#[tokio::test]
async fn test_window_is_shorter_duration_regardless_of_order() {
    let store = InMemoryStore::new();
    seed(&store, "late-short", &[90, 20]).await;

    let session_id = engine(&store).try_match("late-short").await.unwrap().unwrap();
    let session = store.session(session_id).await.unwrap().unwrap();
    assert_eq!(session.window(), Duration::minutes(20));
}

#[tokio::test]
async fn test_criteria_do_not_mix() {
    let store = InMemoryStore::new();
    seed(&store, "dinner", &[60]).await;
    seed(&store, "english", &[60]).await;

    let engine = engine(&store);
    assert_eq!(engine.try_match("dinner").await.unwrap(), None);
    assert_eq!(engine.try_match("english").await.unwrap(), None);
    assert_eq!(store.session_count(), 0);
}

#[tokio::test]
async fn test_canceled_entries_are_never_selected() {
    let store = InMemoryStore::new();
    let entries = seed(&store, "x", &[30, 30, 30]).await;
    assert_eq!(store.conditional_cancel(entries[0].id).await.unwrap(), 1);

    let session_id = engine(&store).try_match("x").await.unwrap().unwrap();
    let participants: HashSet<_> = store.participants(session_id).await.unwrap().into_iter().collect();
    assert_eq!(participants, HashSet::from([entries[1].user_id, entries[2].user_id]));
    assert_eq!(
        store.queue_entry(entries[0].id).await.unwrap().unwrap().status,
        QueueStatus::Canceled
    );
}

#[tokio::test]
async fn test_locked_rows_are_skipped_not_waited_on() {
    let store = InMemoryStore::new();
    seed(&store, "x", &[30, 30]).await;
    let engine = engine(&store);

    let mut holder = store.begin().await.unwrap();
    assert_eq!(holder.select_waiting_for_update("x", 2).await.unwrap().len(), 2);

    // Returns at once instead of blocking on the held rows
    assert_eq!(engine.try_match("x").await.unwrap(), None);

    holder.rollback().await.unwrap();
    assert!(engine.try_match("x").await.unwrap().is_some());
}

#[tokio::test]
async fn test_partial_visibility_resolves_to_none() {
    let store = InMemoryStore::new();
    let entries = seed(&store, "x", &[30, 30, 30]).await;
    let engine = engine(&store);

    let mut holder = store.begin().await.unwrap();
    let held = holder.select_waiting_for_update("x", 1).await.unwrap();
    assert_eq!(held[0].id, entries[0].id);

    // Only two unlocked rows remain: they pair up
    assert!(engine.try_match("x").await.unwrap().is_some());
    // Now only the held row is waiting
    assert_eq!(engine.try_match("x").await.unwrap(), None);

    drop(holder);
    assert_eq!(
        store.queue_entry(entries[0].id).await.unwrap().unwrap().status,
        QueueStatus::Waiting
    );
}

#[tokio::test]
async fn test_every_failure_point_rolls_back_completely() {
    for point in [
        FailPoint::Select,
        FailPoint::CreateSession,
        FailPoint::UpdateStatus,
        FailPoint::AddParticipant,
        FailPoint::Commit,
    ] {
        let store = InMemoryStore::new();
        let entries = seed(&store, "x", &[30, 45]).await;
        store.fail_once(point);
        let engine = engine(&store);

        let err = engine.try_match("x").await.unwrap_err();
        assert!(matches!(err, MatchError::TransactionAborted(_)), "{:?}: {:?}", point, err);
        assert_eq!(store.session_count(), 0, "{:?} left a session behind", point);
        assert_eq!(store.locked_count(), 0, "{:?} leaked row locks", point);
        for entry in &entries {
            let reread = store.queue_entry(entry.id).await.unwrap().unwrap();
            assert_eq!(reread.status, QueueStatus::Waiting, "{:?}", point);
        }

        // Replaying the aborted attempt promotes the same rows exactly once
        let session_id = engine.try_match("x").await.unwrap().unwrap();
        assert_eq!(engine.try_match("x").await.unwrap(), None);
        assert_eq!(store.session_count(), 1);
        for entry in &entries {
            let reread = store.queue_entry(entry.id).await.unwrap().unwrap();
            assert_eq!(reread.status, QueueStatus::Matched(session_id));
        }
    }
}

#[tokio::test]
async fn test_store_outage_is_surfaced() {
    let store = InMemoryStore::new();
    seed(&store, "x", &[30, 30]).await;
    store.set_available(false);

    let err = engine(&store).try_match("x").await.unwrap_err();
    assert!(matches!(err, MatchError::StoreUnavailable(_)));

    store.set_available(true);
    assert!(engine(&store).try_match("x").await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_concurrent_attempts_on_one_pair() {
    let store = InMemoryStore::new();
    seed(&store, "x", &[30, 30]).await;
    let engine = Arc::new(engine(&store));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.try_match("x").await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(store.session_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_attempts_make_floor_half_sessions() {
    for (waiting, callers) in [(10usize, 5usize), (11, 8), (7, 32), (1, 4)] {
        let store = InMemoryStore::new();
        seed(&store, "x", &vec![30; waiting]).await;
        let engine = Arc::new(engine(&store));

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.try_match("x").await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                created += 1;
            }
        }

        assert_eq!(created, waiting / 2, "{} entries, {} callers", waiting, callers);
        assert_eq!(store.session_count(), waiting / 2);
        let still_waiting = store.entries("x").iter().filter(|e| e.status.is_waiting()).count();
        assert_eq!(still_waiting, waiting % 2);
        assert_consistent(&store, "x").await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_waits_for_in_flight_match() {
    let store = InMemoryStore::new();
    let entries = seed(&store, "x", &[30, 30]).await;
    let target = entries[0].id;

    let mut unit = store.begin().await.unwrap();
    unit.select_waiting_for_update("x", 2).await.unwrap();

    let canceler = {
        let store = store.clone();
        tokio::spawn(async move { store.conditional_cancel(target).await })
    };
    tokio::task::yield_now().await;
    assert!(!canceler.is_finished());

    // Finish the promotion by hand, as the engine would
    let planned = session_matcher::models::NewSession {
        criterion: "x".to_string(),
        title: "x".to_string(),
        start_at: chrono::Utc::now(),
        end_at: chrono::Utc::now() + Duration::minutes(30),
        status: session_matcher::models::SessionStatus::Open,
    };
    let session_id = unit.create_session(&planned).await.unwrap();
    let ids = [entries[0].id, entries[1].id];
    assert_eq!(unit.update_status_for_ids(&ids, session_id).await.unwrap(), 2);
    for entry in &entries {
        unit.add_participant(session_id, entry.user_id).await.unwrap();
    }
    unit.commit().await.unwrap();

    assert_eq!(canceler.await.unwrap().unwrap(), 0);
    let reread = store.queue_entry(target).await.unwrap().unwrap();
    assert_eq!(reread.status, QueueStatus::Matched(session_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_wins_when_match_rolls_back() {
    let store = InMemoryStore::new();
    let entries = seed(&store, "x", &[30, 30]).await;
    let target = entries[0].id;

    let mut unit = store.begin().await.unwrap();
    unit.select_waiting_for_update("x", 2).await.unwrap();

    let canceler = {
        let store = store.clone();
        tokio::spawn(async move { store.conditional_cancel(target).await })
    };
    tokio::task::yield_now().await;

    unit.rollback().await.unwrap();

    assert_eq!(canceler.await.unwrap().unwrap(), 1);
    let reread = store.queue_entry(target).await.unwrap().unwrap();
    assert_eq!(reread.status, QueueStatus::Canceled);
    assert_eq!(reread.status.session_id(), None);

    // The partner is alone now
    assert_eq!(engine(&store).try_match("x").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cancel_and_match_race_ends_in_one_terminal_state() {
    for _ in 0..50 {
        let store = InMemoryStore::new();
        let entries = seed(&store, "x", &[30, 30]).await;
        let target = entries[0].id;
        let engine = Arc::new(engine(&store));

        let matcher = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.try_match("x").await })
        };
        let canceler = {
            let store = store.clone();
            tokio::spawn(async move { store.conditional_cancel(target).await })
        };

        let matched = matcher.await.unwrap().unwrap();
        let canceled = canceler.await.unwrap().unwrap();
        let status = store.queue_entry(target).await.unwrap().unwrap().status;

        match (matched, canceled) {
            (Some(session_id), 0) => assert_eq!(status, QueueStatus::Matched(session_id)),
            (None, 1) => assert_eq!(status, QueueStatus::Canceled),
            other => panic!("both or neither won: {:?}", other),
        }
    }
}
