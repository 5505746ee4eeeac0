//! Event settlement: resolve every PENDING wager on one external event.
//!
//! Each wager resolves in its own unit of work. A failure on one wager
//! (most often `AlreadyResolved` after a concurrent scheduler pass) is
//! logged and the batch moves on, so a partially applied settlement can be
//! re-run safely.

use tracing::{info, warn};

use super::BettingEngine;
use crate::types::{normalize_side, LedgerError, Outcome};

/// Tally of one settlement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub event_id: String,
    pub winning_side: String,
    /// Wagers referencing the event that were PENDING in the snapshot.
    pub matched: usize,
    pub won: usize,
    pub lost: usize,
    pub failed: usize,
}

impl SettlementReport {
    pub fn resolved(&self) -> usize {
        self.won + self.lost
    }
}

impl BettingEngine {
    /// Settle `event_id` as won by `winning_side`; returns how many wagers
    /// were resolved by this call.
    pub async fn settle_event(
        &self,
        event_id: &str,
        winning_side: &str,
    ) -> Result<usize, LedgerError> {
        Ok(self.settle_event_report(event_id, winning_side).await?.resolved())
    }

    pub async fn settle_event_report(
        &self,
        event_id: &str,
        winning_side: &str,
    ) -> Result<SettlementReport, LedgerError> {
        let event_id = event_id.trim();
        if event_id.is_empty() {
            return Err(LedgerError::Validation("event id is required".into()));
        }
        let winning_side = normalize_side(winning_side);
        if winning_side.is_empty() {
            return Err(LedgerError::Validation("winning side is required".into()));
        }

        let mut report = SettlementReport {
            event_id: event_id.to_string(),
            winning_side: winning_side.clone(),
            ..Default::default()
        };

        for wager in self.store.list_pending().await? {
            let Some(selection) = wager.decoded_selection() else {
                continue;
            };
            if !selection.references(event_id) {
                continue;
            }
            report.matched += 1;

            let outcome = selection.outcome_for(&winning_side);
            match self.resolve_wager(wager.id, outcome).await {
                Ok(_) => match outcome {
                    Outcome::Won => report.won += 1,
                    Outcome::Lost => report.lost += 1,
                },
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        wager_id = %wager.id,
                        event_id,
                        error = %e,
                        "Settlement skipped wager"
                    );
                }
            }
        }

        info!(
            event_id,
            winning_side = %winning_side,
            matched = report.matched,
            won = report.won,
            lost = report.lost,
            failed = report.failed,
            "Event settled"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
