use chrono::Utc;

use crate::core::error::MatchError;
use crate::core::policy::{plan_session, CandidatePair};
use crate::core::titles::{validate_criterion, TitleCatalog};
use crate::models::SessionId;
use crate::services::store::{MatchStore, MatchUnit, StoreError};

/// Rows a single match attempt claims
const PAIR_SIZE: usize = 2;

/// Pairs waiting queue entries into sessions
///
/// Holds no mutable state of its own: every call is one atomic unit against
/// the store, and concurrent callers (in this process or others) are kept
/// apart purely by the store's skip-locked selection.
///
/// # Steps
/// 1. Lock the two oldest waiting rows for the criterion, skipping locked rows
/// 2. Plan the session (shorter duration wins, title from the catalog)
/// 3. Insert the session, promote exactly those two rows, add both participants
/// 4. Commit, or roll back everything on any failure
#[derive(Debug, Clone)]
pub struct PairingEngine<S> {
    store: S,
    titles: TitleCatalog,
}

impl<S: MatchStore> PairingEngine<S> {
    pub fn new(store: S, titles: TitleCatalog) -> Self {
        Self { store, titles }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn titles(&self) -> &TitleCatalog {
        &self.titles
    }

    /// Try to pair two waiting entries for `criterion`
    ///
    /// Returns `Ok(None)` when fewer than two unlocked waiting entries exist;
    /// the store is untouched in that case. Errors are never retried here.
    pub async fn try_match(&self, criterion: &str) -> Result<Option<SessionId>, MatchError> {
        let criterion = validate_criterion(criterion)?;

        let mut unit = self.store.begin().await.map_err(MatchError::from_unit)?;

        let selected = match unit.select_waiting_for_update(criterion, PAIR_SIZE).await {
            Ok(rows) => rows,
            Err(e) => return Err(abort(unit, criterion, e).await),
        };

        let Some(pair) = CandidatePair::from_selection(selected) else {
            tracing::debug!("No pair available for criterion '{}'", criterion);
            if let Err(e) = unit.rollback().await {
                tracing::warn!("Rollback after empty selection failed for '{}': {}", criterion, e);
            }
            return Ok(None);
        };

        match self.promote(unit.as_mut(), criterion, &pair).await {
            Ok(session_id) => {
                unit.commit().await.map_err(MatchError::from_unit)?;
                tracing::info!(
                    session_id = %session_id,
                    criterion,
                    minutes = pair.session_duration().get(),
                    "Matched queue entries {} and {}",
                    pair.first.id,
                    pair.second.id
                );
                Ok(Some(session_id))
            }
            Err(e) => Err(abort(unit, criterion, e).await),
        }
    }

    /// Writes of a successful selection; all inside the caller's unit
    async fn promote(
        &self,
        unit: &mut dyn MatchUnit,
        criterion: &str,
        pair: &CandidatePair,
    ) -> Result<SessionId, StoreError> {
        let planned = plan_session(pair, criterion, &self.titles, Utc::now());
        let session_id = unit.create_session(&planned).await?;

        let ids = pair.entry_ids();
        let promoted = unit.update_status_for_ids(&ids, session_id).await?;
        if promoted != ids.len() as u64 {
            return Err(StoreError::Conflict(format!(
                "expected to promote {} entries, promoted {}",
                ids.len(),
                promoted
            )));
        }

        for user_id in pair.user_ids() {
            unit.add_participant(session_id, user_id).await?;
        }

        Ok(session_id)
    }
}

async fn abort(
    unit: Box<dyn MatchUnit>,
    criterion: &str,
    err: StoreError,
) -> MatchError {
    tracing::warn!("Aborting match attempt for '{}': {}", criterion, err);
    if let Err(rollback_err) = unit.rollback().await {
        tracing::warn!("Rollback failed for '{}': {}", criterion, rollback_err);
    }
    MatchError::from_unit(err)
}
