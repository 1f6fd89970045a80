// Core pairing exports
pub mod engine;
pub mod error;
pub mod policy;
pub mod sweep;
pub mod titles;

pub use engine::PairingEngine;
pub use error::MatchError;
pub use policy::{plan_session, shorter_duration, CandidatePair};
pub use sweep::Sweeper;
pub use titles::{validate_criterion, TitleCatalog};
