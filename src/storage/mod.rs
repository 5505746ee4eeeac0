//! Persistence layer.
//!
//! The ledger store (accounts + append-only entries) and the wager store
//! share one backend, so a single `UnitOfWork` can span both. Every money
//! movement happens inside a unit: it either commits every write or, when
//! dropped without `commit`, none of them.
//!
//! Lock order inside a unit is always **wager, then account**. Placement
//! only ever locks an account; resolution locks the wager first.
//!
//! Two backends are provided:
//! - [`memory::MemoryStore`]: in-process, per-record async mutexes.
//! - [`sqlite::SqliteStore`]: SQLite through `sqlx`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{
    Account, AccountId, LedgerEntry, LedgerError, Page, PageRequest, Wager, WagerFilter, WagerId,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Entry point to a ledger backend.
///
/// Reads outside a unit of work see committed data only and take no locks;
/// they must never inform a money decision.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an atomic unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError>;

    /// Snapshot of every PENDING wager, oldest first.
    async fn list_pending(&self) -> Result<Vec<Wager>, LedgerError>;

    /// Filtered wager history for one account, newest first.
    async fn list_wagers(
        &self,
        account_id: AccountId,
        filter: &WagerFilter,
        page: PageRequest,
    ) -> Result<Page<Wager>, LedgerError>;

    /// Ledger entries for one account, newest first.
    async fn list_entries(
        &self,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>, LedgerError>;

    async fn account(&self, account_id: AccountId) -> Result<Account, LedgerError>;

    async fn wager(&self, wager_id: WagerId) -> Result<Wager, LedgerError>;

    /// Every wager owned by the account, unpaged.
    async fn account_wagers(&self, account_id: AccountId) -> Result<Vec<Wager>, LedgerError>;

    /// Every ledger entry of the account, oldest first.
    async fn account_entries(&self, account_id: AccountId)
        -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// One atomic unit of work. Dropping it without calling [`UnitOfWork::commit`]
/// rolls back every staged write and releases every lock.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Exclusive lock on the account for the rest of the unit.
    async fn lock_account(&mut self, account_id: AccountId) -> Result<Account, LedgerError>;

    /// Unconditional write. The account must be locked by this unit.
    async fn set_balance(
        &mut self,
        account_id: AccountId,
        balance: rust_decimal::Decimal,
    ) -> Result<(), LedgerError>;

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    async fn create_account(&mut self, account: &Account) -> Result<(), LedgerError>;

    async fn create_wager(&mut self, wager: &Wager) -> Result<(), LedgerError>;

    /// Exclusive lock on the wager for the rest of the unit.
    async fn lock_wager(&mut self, wager_id: WagerId) -> Result<Wager, LedgerError>;

    /// Persist a wager locked (or created) by this unit.
    async fn save_wager(&mut self, wager: &Wager) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}

fn negative_balance(account_id: AccountId, balance: rust_decimal::Decimal) -> LedgerError {
    LedgerError::Storage(format!(
        "balance constraint violated for account {account_id}: {balance}"
    ))
}
