//! Wager resolution: the single path by which a wager leaves PENDING.
//!
//! Locks the wager, then (for a win) the owning account. The PENDING check
//! happens under the wager lock, so concurrent attempts on one wager apply
//! at most one transition and at most one payout; every later attempt gets
//! `AlreadyResolved` and writes nothing.

use chrono::Utc;
use tracing::{debug, info};

use super::BettingEngine;
use crate::types::{credit, LedgerEntry, LedgerError, Outcome, Wager, WagerId, WagerStatus};

impl BettingEngine {
    pub async fn resolve_wager(
        &self,
        wager_id: WagerId,
        outcome: Outcome,
    ) -> Result<Wager, LedgerError> {
        let mut uow = self.store.begin().await?;
        let mut wager = uow.lock_wager(wager_id).await?;

        if wager.status != WagerStatus::Pending {
            debug!(wager_id = %wager_id, status = %wager.status, "Resolution skipped");
            return Err(LedgerError::AlreadyResolved(wager_id));
        }

        wager.status = outcome.into();
        wager.resolved_at = Some(Utc::now());
        uow.save_wager(&wager).await?;

        match outcome {
            Outcome::Won => {
                let payout = wager.payout()?;
                let account = uow.lock_account(wager.account_id).await?;
                let balance = credit(account.balance, payout)?;
                uow.set_balance(wager.account_id, balance).await?;
                uow.append_entry(&LedgerEntry::payout(&wager, payout)).await?;
                uow.commit().await?;

                info!(
                    wager_id = %wager_id,
                    account_id = %wager.account_id,
                    payout = %payout,
                    balance = %balance,
                    "Wager won"
                );
            }
            // The stake was debited at placement.
            Outcome::Lost => {
                uow.commit().await?;
                info!(wager_id = %wager_id, account_id = %wager.account_id, "Wager lost");
            }
        }

        Ok(wager)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
