//! Session Matcher - pairing engine for a matchmaking backend
//!
//! Requests wait in a durable queue keyed by a criterion. The pairing engine
//! atomically claims the two oldest waiting requests for a criterion and turns
//! them into a session, relying on skip-locked row selection so that
//! uncoordinated callers never claim the same request twice.

pub mod config;
pub mod core;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use crate::core::{MatchError, PairingEngine, Sweeper, TitleCatalog};
pub use models::{EnqueueRequest, EnqueueResponse, QueueEntry, QueueStatus, Session, SessionId};
pub use services::{InMemoryStore, MatchStore, PostgresStore, QueueService, StoreError};
