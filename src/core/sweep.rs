use std::future::Future;
use std::time::Duration;

use crate::core::engine::PairingEngine;
use crate::core::error::MatchError;
use crate::core::titles::validate_criterion;
use crate::models::SweepReport;
use crate::services::store::MatchStore;

/// Drives the engine over every criterion that has waiting entries
///
/// Complements the enqueue-then-match path: entries whose own attempt failed
/// or lost a race still get paired on the next pass.
#[derive(Debug, Clone)]
pub struct Sweeper<S> {
    engine: PairingEngine<S>,
}

impl<S: MatchStore> Sweeper<S> {
    pub fn new(engine: PairingEngine<S>) -> Self {
        Self { engine }
    }

    /// One pass: drain each criterion until no pair is left
    ///
    /// A failing criterion is logged and counted; the pass moves on. Only a
    /// failure to list criteria aborts the pass.
    pub async fn sweep_once(&self) -> Result<SweepReport, MatchError> {
        let criteria = self
            .engine
            .store()
            .waiting_criteria()
            .await
            .map_err(MatchError::from_unit)?;

        let mut report = SweepReport {
            criteria_scanned: criteria.len(),
            ..SweepReport::default()
        };

        for criterion in &criteria {
            if let Err(e) = validate_criterion(criterion) {
                tracing::warn!("Skipping unmatchable criterion {:?}: {}", criterion, e);
                report.skipped += 1;
                continue;
            }

            loop {
                match self.engine.try_match(criterion).await {
                    Ok(Some(_)) => report.sessions_created += 1,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Sweep failed for criterion '{}': {}", criterion, e);
                        report.failures += 1;
                        break;
                    }
                }
            }
        }

        if report.sessions_created > 0 || report.failures > 0 {
            tracing::info!(
                "Sweep scanned {} criteria: {} sessions, {} failures, {} skipped",
                report.criteria_scanned,
                report.sessions_created,
                report.failures,
                report.skipped
            );
        }

        Ok(report)
    }

    /// Sweep every `period` until `shutdown` resolves
    ///
    /// The shutdown future lives across passes, so a signal delivered while a
    /// pass runs stops the loop as soon as that pass returns. Returns the
    /// number of passes run.
    pub async fn run<F: Future>(&self, period: Duration, shutdown: F) -> usize {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut passes = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received after {} sweep passes", passes);
                    return passes;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!("Sweep pass failed: {}", e);
                    }
                    passes += 1;
                }
            }
        }
    }
}
