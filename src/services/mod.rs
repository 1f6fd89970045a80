// Service exports
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod store;

pub use memory::{FailPoint, InMemoryStore};
pub use postgres::PostgresStore;
pub use queue::{QueueService, ServiceError};
pub use store::{MatchStore, MatchUnit, StoreError};
