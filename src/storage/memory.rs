//! In-process ledger store.
//!
//! Committed rows live behind a `parking_lot::RwLock`. Record locks are
//! `tokio::sync::Mutex<()>` values keyed by record id; a unit of work keeps
//! the owned guards until it commits or is dropped. Writes are staged on the
//! unit and applied to the committed tables in one step at commit, before
//! the record locks are released.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::{negative_balance, LedgerStore, UnitOfWork};
use crate::types::{
    Account, AccountId, LedgerEntry, LedgerError, Page, PageRequest, Wager, WagerFilter, WagerId,
    WagerStatus,
};

/// Default upper bound on waiting for a record lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RecordKey {
    Account(AccountId),
    Wager(WagerId),
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<AccountId, Account>,
    wagers: HashMap<WagerId, Wager>,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug, Default)]
struct LockTable {
    records: Mutex<HashMap<RecordKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    fn handle(&self, key: RecordKey) -> Arc<tokio::sync::Mutex<()>> {
        self.records.lock().entry(key).or_default().clone()
    }

    /// Forget locks that no unit holds or waits on.
    fn prune(&self, keys: impl IntoIterator<Item = RecordKey>) {
        let mut records = self.records.lock();
        for key in keys {
            if records.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                records.remove(&key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Single-node store for tests, simulations and embedded use.
#[derive(Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            locks: Arc::new(LockTable::default()),
            lock_timeout,
        }
    }

    /// Number of committed ledger entries across all accounts.
    pub fn entry_count(&self) -> usize {
        self.tables.read().entries.len()
    }

    /// Number of committed wagers across all accounts.
    pub fn wager_count(&self) -> usize {
        self.tables.read().wagers.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        Ok(Box::new(MemoryUnitOfWork {
            tables: self.tables.clone(),
            locks: self.locks.clone(),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            staged: Staged::default(),
        }))
    }

    async fn list_pending(&self) -> Result<Vec<Wager>, LedgerError> {
        let tables = self.tables.read();
        let mut pending: Vec<Wager> = tables
            .wagers
            .values()
            .filter(|w| w.status == WagerStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|w| w.created_at);
        Ok(pending)
    }

    async fn list_wagers(
        &self,
        account_id: AccountId,
        filter: &WagerFilter,
        page: PageRequest,
    ) -> Result<Page<Wager>, LedgerError> {
        let mut wagers = self.account_wagers(account_id).await?;
        wagers.retain(|w| filter.matches(w));
        wagers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::slice(wagers, page))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>, LedgerError> {
        let mut entries = self.account_entries(account_id).await?;
        entries.reverse();
        Ok(Page::slice(entries, page))
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.tables
            .read()
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| LedgerError::account_not_found(account_id))
    }

    async fn wager(&self, wager_id: WagerId) -> Result<Wager, LedgerError> {
        self.tables
            .read()
            .wagers
            .get(&wager_id)
            .cloned()
            .ok_or_else(|| LedgerError::wager_not_found(wager_id))
    }

    async fn account_wagers(&self, account_id: AccountId) -> Result<Vec<Wager>, LedgerError> {
        Ok(self
            .tables
            .read()
            .wagers
            .values()
            .filter(|w| w.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn account_entries(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        // `entries` is append-only, so insertion order is chronological.
        Ok(self
            .tables
            .read()
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Staged {
    accounts: HashMap<AccountId, Account>,
    new_accounts: HashSet<AccountId>,
    wagers: HashMap<WagerId, Wager>,
    new_wagers: HashSet<WagerId>,
    entries: Vec<LedgerEntry>,
}

pub struct MemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
    held: HashMap<RecordKey, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl MemoryUnitOfWork {
    async fn acquire(&mut self, key: RecordKey) -> Result<(), LedgerError> {
        if self.held.contains_key(&key) {
            return Ok(());
        }
        let handle = self.locks.handle(key);
        let acquired = tokio::time::timeout(self.lock_timeout, handle.lock_owned()).await;
        let Ok(guard) = acquired else {
            self.locks.prune([key]);
            return Err(LedgerError::Storage(format!("lock timeout on {key:?}")));
        };
        debug!(?key, "Record lock acquired");
        self.held.insert(key, guard);
        Ok(())
    }

    fn current_account(&self, account_id: AccountId) -> Option<Account> {
        self.staged
            .accounts
            .get(&account_id)
            .cloned()
            .or_else(|| self.tables.read().accounts.get(&account_id).cloned())
    }

    fn current_wager(&self, wager_id: WagerId) -> Option<Wager> {
        self.staged
            .wagers
            .get(&wager_id)
            .cloned()
            .or_else(|| self.tables.read().wagers.get(&wager_id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_account(&mut self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.acquire(RecordKey::Account(account_id)).await?;
        self.current_account(account_id)
            .ok_or_else(|| LedgerError::account_not_found(account_id))
    }

    async fn set_balance(
        &mut self,
        account_id: AccountId,
        balance: Decimal,
    ) -> Result<(), LedgerError> {
        if !self.held.contains_key(&RecordKey::Account(account_id)) {
            return Err(LedgerError::Storage(format!(
                "account {account_id} written without holding its lock"
            )));
        }
        if balance < Decimal::ZERO {
            return Err(negative_balance(account_id, balance));
        }
        let mut account = self
            .current_account(account_id)
            .ok_or_else(|| LedgerError::account_not_found(account_id))?;
        account.balance = balance;
        self.staged.accounts.insert(account_id, account);
        Ok(())
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if self.current_account(entry.account_id).is_none() {
            return Err(LedgerError::account_not_found(entry.account_id));
        }
        self.staged.entries.push(entry.clone());
        Ok(())
    }

    async fn create_account(&mut self, account: &Account) -> Result<(), LedgerError> {
        if self.current_account(account.id).is_some() {
            return Err(LedgerError::Storage(format!("account {} already exists", account.id)));
        }
        if account.balance < Decimal::ZERO {
            return Err(negative_balance(account.id, account.balance));
        }
        self.acquire(RecordKey::Account(account.id)).await?;
        self.staged.accounts.insert(account.id, account.clone());
        self.staged.new_accounts.insert(account.id);
        Ok(())
    }

    async fn create_wager(&mut self, wager: &Wager) -> Result<(), LedgerError> {
        if self.current_wager(wager.id).is_some() {
            return Err(LedgerError::Storage(format!("wager {} already exists", wager.id)));
        }
        if self.current_account(wager.account_id).is_none() {
            return Err(LedgerError::account_not_found(wager.account_id));
        }
        self.staged.wagers.insert(wager.id, wager.clone());
        self.staged.new_wagers.insert(wager.id);
        Ok(())
    }

    async fn lock_wager(&mut self, wager_id: WagerId) -> Result<Wager, LedgerError> {
        self.acquire(RecordKey::Wager(wager_id)).await?;
        self.current_wager(wager_id)
            .ok_or_else(|| LedgerError::wager_not_found(wager_id))
    }

    async fn save_wager(&mut self, wager: &Wager) -> Result<(), LedgerError> {
        let owned = self.held.contains_key(&RecordKey::Wager(wager.id))
            || self.staged.new_wagers.contains(&wager.id);
        if !owned {
            return Err(LedgerError::Storage(format!(
                "wager {} written without holding its lock",
                wager.id
            )));
        }
        self.staged.wagers.insert(wager.id, wager.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.tables.write();
            let entry_count = staged.entries.len();
            tables.accounts.extend(staged.accounts);
            tables.wagers.extend(staged.wagers);
            tables.entries.extend(staged.entries);
            debug!(entries = entry_count, locks = self.held.len(), "Unit of work committed");
        }
        // Record locks are released on drop, once the writes are visible.
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        let keys: Vec<RecordKey> = self.held.keys().copied().collect();
        self.held.clear();
        self.locks.prune(keys);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
