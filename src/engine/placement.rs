//! Wager placement and account funding.
//!
//! Placement is one unit of work: lock the account, check funds, debit,
//! create the wager, append the stake entry. Two placements on the same
//! account serialise on the account lock, so the funds check never sees a
//! stale balance.

use rust_decimal::Decimal;
use tracing::{info, warn};

use super::BettingEngine;
use crate::types::{
    credit, is_money, Account, AccountId, LedgerEntry, LedgerError, Wager, WagerTicket,
};

impl BettingEngine {
    /// Provision an account with the configured opening balance.
    pub async fn open_default_account(&self) -> Result<Account, LedgerError> {
        self.open_account(self.config.opening_balance).await
    }

    /// Provision an account. The opening balance is the reference point of
    /// the ledger invariant, so no entry is written for it.
    pub async fn open_account(&self, opening_balance: Decimal) -> Result<Account, LedgerError> {
        if opening_balance < Decimal::ZERO || !is_money(opening_balance) {
            return Err(LedgerError::Validation(format!(
                "invalid opening balance: {opening_balance}"
            )));
        }
        let account = Account::open(opening_balance);
        let mut uow = self.store.begin().await?;
        uow.create_account(&account).await?;
        uow.commit().await?;

        info!(account_id = %account.id, balance = %account.balance, "Account opened");
        Ok(account)
    }

    /// Debit `ticket.stake` and record a PENDING wager, atomically.
    pub async fn place_wager(
        &self,
        account_id: AccountId,
        ticket: WagerTicket,
    ) -> Result<Wager, LedgerError> {
        let selection = ticket.validate()?;

        let mut uow = self.store.begin().await?;
        let account = uow.lock_account(account_id).await?;

        if !account.can_cover(ticket.stake) {
            warn!(
                account_id = %account_id,
                stake = %ticket.stake,
                balance = %account.balance,
                "Wager rejected: insufficient funds"
            );
            return Err(LedgerError::InsufficientFunds {
                needed: ticket.stake,
                available: account.balance,
            });
        }

        let balance = account.balance - ticket.stake;
        let wager = Wager::pending(account_id, &ticket);
        // A win must be creditable to the balance left after this stake.
        credit(balance, wager.payout()?)?;

        uow.set_balance(account_id, balance).await?;
        uow.create_wager(&wager).await?;
        uow.append_entry(&LedgerEntry::stake(&wager)).await?;
        uow.commit().await?;

        info!(
            wager_id = %wager.id,
            account_id = %account_id,
            event_id = %selection.event_id,
            side = %selection.side,
            stake = %wager.stake,
            odds = %wager.odds,
            balance = %balance,
            "Wager placed"
        );
        Ok(wager)
    }

    /// Credit an account and record a DEPOSIT entry.
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> Result<Account, LedgerError> {
        if amount <= Decimal::ZERO || !is_money(amount) {
            return Err(LedgerError::Validation(format!("invalid deposit amount: {amount}")));
        }

        let mut uow = self.store.begin().await?;
        let mut account = uow.lock_account(account_id).await?;
        account.balance = credit(account.balance, amount)?;
        uow.set_balance(account_id, account.balance).await?;
        uow.append_entry(&LedgerEntry::deposit(account_id, amount)).await?;
        uow.commit().await?;

        info!(account_id = %account_id, amount = %amount, balance = %account.balance, "Deposit recorded");
        Ok(account)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
