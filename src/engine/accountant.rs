//! Accountant: read-only history, performance summary and ledger audit.
//!
//! Nothing here takes a lock: results are reports for callers, never inputs
//! to a money decision.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info};

use super::BettingEngine;
use crate::types::{
    AccountId, AccountSummary, EntryKind, LedgerAudit, LedgerEntry, LedgerError, Page, Wager,
    WagerFilter, WagerStatus,
};

impl BettingEngine {
    /// Wager history, newest first. `page` is 1-based; `limit` 0 or above
    /// the configured maximum falls back to the default.
    pub async fn list_wagers(
        &self,
        account_id: AccountId,
        filter: &WagerFilter,
        page: u32,
        limit: u32,
    ) -> Result<Page<Wager>, LedgerError> {
        let req = self.page_request(page, limit, self.config.default_limit);
        self.store.list_wagers(account_id, filter, req).await
    }

    /// Bank statement: ledger entries, newest first.
    pub async fn list_entries(
        &self,
        account_id: AccountId,
        page: u32,
        limit: u32,
    ) -> Result<Page<LedgerEntry>, LedgerError> {
        let req = self.page_request(page, limit, self.config.entries_default_limit);
        self.store.list_entries(account_id, req).await
    }

    /// Balance plus performance aggregates over the account's wagers and
    /// ledger entries.
    pub async fn account_summary(&self, account_id: AccountId) -> Result<AccountSummary, LedgerError> {
        let account = self.store.account(account_id).await?;
        let wagers = self.store.account_wagers(account_id).await?;
        let entries = self.store.account_entries(account_id).await?;

        let count = |status: WagerStatus| wagers.iter().filter(|w| w.status == status).count() as u64;
        let wins = count(WagerStatus::Won);
        let losses = count(WagerStatus::Lost);
        let pending = count(WagerStatus::Pending);

        let sum_of = |kind: EntryKind| -> Decimal {
            entries.iter().filter(|e| e.kind == kind).map(|e| e.amount).sum()
        };
        let total_staked = -sum_of(EntryKind::BetPlaced);
        let total_returned = sum_of(EntryKind::BetPayout);
        let net_profit = total_returned - total_staked;

        let resolved = wins + losses;
        let win_rate = if resolved > 0 {
            (Decimal::from(wins) / Decimal::from(resolved) * dec!(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };
        let roi = if total_staked > Decimal::ZERO {
            (net_profit / total_staked * dec!(100)).round_dp(2)
        } else {
            Decimal::ZERO
        };

        Ok(AccountSummary {
            balance: account.balance,
            total_staked,
            total_returned,
            wins,
            losses,
            pending,
            win_rate,
            net_profit,
            roi,
        })
    }

    /// Check `balance == opening_balance + Σ entries` for one account.
    pub async fn audit_account(&self, account_id: AccountId) -> Result<LedgerAudit, LedgerError> {
        let account = self.store.account(account_id).await?;
        let entries = self.store.account_entries(account_id).await?;

        let audit = LedgerAudit {
            account_id,
            opening_balance: account.opening_balance,
            entries_total: entries.iter().map(|e| e.amount).sum(),
            entry_count: entries.len(),
            balance: account.balance,
        };

        if audit.is_consistent() {
            info!(account_id = %account_id, entries = audit.entry_count, balance = %audit.balance, "Ledger reconciled");
        } else {
            error!(
                account_id = %account_id,
                balance = %audit.balance,
                expected = %audit.expected_balance(),
                discrepancy = %audit.discrepancy(),
                "Ledger out of balance"
            );
        }
        Ok(audit)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
