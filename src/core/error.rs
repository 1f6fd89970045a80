use thiserror::Error;

use crate::services::store::StoreError;

/// Errors surfaced by `PairingEngine::try_match`
///
/// "Nothing to match" is not an error: it is `Ok(None)`.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[source] StoreError),
}

impl MatchError {
    /// Classify a failure raised inside an atomic unit
    pub fn from_unit(err: StoreError) -> Self {
        if err.is_connectivity() {
            MatchError::StoreUnavailable(err)
        } else {
            MatchError::TransactionAborted(err)
        }
    }

    /// Both store failures leave no trace and may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MatchError::StoreUnavailable(_) | MatchError::TransactionAborted(_)
        )
    }
}
