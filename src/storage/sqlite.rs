//! SQLite ledger store.
//!
//! SQLite has a single writer per database, so row locks are subsumed by an
//! in-process writer gate: every unit of work takes the gate before `BEGIN`
//! and holds it until commit or rollback. Reads outside a unit use the pool
//! directly; the database runs in WAL mode so they never block the writer.
//!
//! Money and timestamps are stored as TEXT (`Decimal` strings and RFC 3339
//! in UTC with fixed precision), so lexical order on `created_at` is
//! chronological.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::{negative_balance, LedgerStore, UnitOfWork};
use crate::types::{
    Account, AccountId, EntryKind, LedgerEntry, LedgerError, Page, PageRequest, Wager,
    WagerFilter, WagerId, WagerStatus,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id              TEXT PRIMARY KEY,
        balance         TEXT NOT NULL,
        opening_balance TEXT NOT NULL,
        created_at      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wagers (
        id          TEXT PRIMARY KEY,
        account_id  TEXT NOT NULL REFERENCES accounts(id),
        title       TEXT NOT NULL,
        sport_key   TEXT NOT NULL,
        stake       TEXT NOT NULL,
        odds        TEXT NOT NULL,
        status      TEXT NOT NULL DEFAULT 'PENDING',
        selection   TEXT NOT NULL,
        notes       TEXT,
        created_at  TEXT NOT NULL,
        resolved_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_wagers_status ON wagers(status)",
    "CREATE INDEX IF NOT EXISTS idx_wagers_account ON wagers(account_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id           TEXT PRIMARY KEY,
        account_id   TEXT NOT NULL REFERENCES accounts(id),
        amount       TEXT NOT NULL,
        kind         TEXT NOT NULL,
        description  TEXT NOT NULL,
        reference_id TEXT,
        created_at   TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entries_account ON ledger_entries(account_id, created_at)",
];

const WAGER_COLUMNS: &str =
    "id, account_id, title, sport_key, stake, odds, status, selection, notes, created_at, resolved_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, kind, description, reference_id, created_at";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    writer: Arc<tokio::sync::Mutex<()>>,
    lock_timeout: Duration,
}

impl SqliteStore {
    /// Connect to `database_url` (e.g. `sqlite://bankroll.db`), creating the
    /// file if needed, and apply the schema.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(lock_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool, lock_timeout);
        store.migrate().await?;
        info!(database_url, "SQLite ledger store ready");
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool, lock_timeout: Duration) -> Self {
        Self {
            pool,
            writer: Arc::new(tokio::sync::Mutex::new(())),
            lock_timeout,
        }
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Ledger schema applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, LedgerError> {
        let gate = tokio::time::timeout(self.lock_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| LedgerError::Storage("timed out waiting for the ledger writer".into()))?;
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteUnitOfWork {
            tx,
            locked_accounts: Vec::new(),
            locked_wagers: Vec::new(),
            _gate: gate,
        }))
    }

    async fn list_pending(&self) -> Result<Vec<Wager>, LedgerError> {
        let sql = format!(
            "SELECT {WAGER_COLUMNS} FROM wagers WHERE status = ? ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(WagerStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(wager_from_row).collect()
    }

    async fn list_wagers(
        &self,
        account_id: AccountId,
        filter: &WagerFilter,
        page: PageRequest,
    ) -> Result<Page<Wager>, LedgerError> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM wagers WHERE account_id = ");
        count.push_bind(account_id.to_string());
        push_filter(&mut count, filter);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get(0)?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {WAGER_COLUMNS} FROM wagers WHERE account_id = "
        ));
        select.push_bind(account_id.to_string());
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
        let rows = select.build().fetch_all(&self.pool).await?;

        Ok(Page {
            data: rows.iter().map(wager_from_row).collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<LedgerEntry>, LedgerError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) FROM ledger_entries WHERE account_id = ?")
            .bind(account_id.to_string())
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.to_string())
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            data: rows.iter().map(entry_from_row).collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        let row = sqlx::query(
            "SELECT id, balance, opening_balance, created_at FROM accounts WHERE id = ?",
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(account_from_row)
            .transpose()?
            .ok_or_else(|| LedgerError::account_not_found(account_id))
    }

    async fn wager(&self, wager_id: WagerId) -> Result<Wager, LedgerError> {
        let sql = format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(wager_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(wager_from_row)
            .transpose()?
            .ok_or_else(|| LedgerError::wager_not_found(wager_id))
    }

    async fn account_wagers(&self, account_id: AccountId) -> Result<Vec<Wager>, LedgerError> {
        let sql = format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE account_id = ?");
        let rows = sqlx::query(&sql)
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(wager_from_row).collect()
    }

    async fn account_entries(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? \
             ORDER BY created_at ASC, rowid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &WagerFilter) {
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(sport_key) = &filter.sport_key {
        builder.push(" AND sport_key = ").push_bind(sport_key.clone());
    }
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
    locked_accounts: Vec<AccountId>,
    locked_wagers: Vec<WagerId>,
    _gate: OwnedMutexGuard<()>,
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn lock_account(&mut self, account_id: AccountId) -> Result<Account, LedgerError> {
        let row = sqlx::query(
            "SELECT id, balance, opening_balance, created_at FROM accounts WHERE id = ?",
        )
        .bind(account_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;
        let account = row
            .as_ref()
            .map(account_from_row)
            .transpose()?
            .ok_or_else(|| LedgerError::account_not_found(account_id))?;
        if !self.locked_accounts.contains(&account_id) {
            self.locked_accounts.push(account_id);
        }
        Ok(account)
    }

    async fn set_balance(
        &mut self,
        account_id: AccountId,
        balance: Decimal,
    ) -> Result<(), LedgerError> {
        if !self.locked_accounts.contains(&account_id) {
            return Err(LedgerError::Storage(format!(
                "account {account_id} written without holding its lock"
            )));
        }
        if balance < Decimal::ZERO {
            return Err(negative_balance(account_id, balance));
        }
        sqlx::query("UPDATE accounts SET balance = ? WHERE id = ?")
            .bind(balance.to_string())
            .bind(account_id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries
            (id, account_id, amount, kind, description, reference_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.account_id.to_string())
        .bind(entry.amount.to_string())
        .bind(entry.kind.as_str())
        .bind(&entry.description)
        .bind(entry.reference_id.map(|id| id.to_string()))
        .bind(format_time(entry.created_at))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn create_account(&mut self, account: &Account) -> Result<(), LedgerError> {
        if account.balance < Decimal::ZERO {
            return Err(negative_balance(account.id, account.balance));
        }
        sqlx::query(
            "INSERT INTO accounts (id, balance, opening_balance, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(account.id.to_string())
        .bind(account.balance.to_string())
        .bind(account.opening_balance.to_string())
        .bind(format_time(account.created_at))
        .execute(&mut *self.tx)
        .await?;
        self.locked_accounts.push(account.id);
        Ok(())
    }

    async fn create_wager(&mut self, wager: &Wager) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO wagers
            (id, account_id, title, sport_key, stake, odds, status, selection, notes, created_at, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(wager.id.to_string())
        .bind(wager.account_id.to_string())
        .bind(&wager.title)
        .bind(&wager.sport_key)
        .bind(wager.stake.to_string())
        .bind(wager.odds.to_string())
        .bind(wager.status.as_str())
        .bind(wager.selection.to_string())
        .bind(wager.notes.as_deref())
        .bind(format_time(wager.created_at))
        .bind(wager.resolved_at.map(format_time))
        .execute(&mut *self.tx)
        .await?;
        self.locked_wagers.push(wager.id);
        Ok(())
    }

    async fn lock_wager(&mut self, wager_id: WagerId) -> Result<Wager, LedgerError> {
        let sql = format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(wager_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;
        let wager = row
            .as_ref()
            .map(wager_from_row)
            .transpose()?
            .ok_or_else(|| LedgerError::wager_not_found(wager_id))?;
        if !self.locked_wagers.contains(&wager_id) {
            self.locked_wagers.push(wager_id);
        }
        Ok(wager)
    }

    async fn save_wager(&mut self, wager: &Wager) -> Result<(), LedgerError> {
        if !self.locked_wagers.contains(&wager.id) {
            return Err(LedgerError::Storage(format!(
                "wager {} written without holding its lock",
                wager.id
            )));
        }
        // Stake, odds and selection are immutable after creation.
        sqlx::query("UPDATE wagers SET status = ?, resolved_at = ?, notes = ? WHERE id = ?")
            .bind(wager.status.as_str())
            .bind(wager.resolved_at.map(format_time))
            .bind(wager.notes.as_deref())
            .bind(wager.id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let SqliteUnitOfWork { tx, _gate, .. } = *self;
        tx.commit().await?;
        drop(_gate);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::Storage(format!("corrupt timestamp {raw:?}: {e}")))
}

fn parse_decimal(raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw).map_err(|e| LedgerError::Storage(format!("corrupt amount {raw:?}: {e}")))
}

fn parse_id<T: FromStr<Err = LedgerError>>(raw: &str) -> Result<T, LedgerError> {
    raw.parse::<T>()
        .map_err(|e| LedgerError::Storage(format!("corrupt id: {e}")))
}

fn account_from_row(row: &SqliteRow) -> Result<Account, LedgerError> {
    Ok(Account {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        balance: parse_decimal(&row.try_get::<String, _>("balance")?)?,
        opening_balance: parse_decimal(&row.try_get::<String, _>("opening_balance")?)?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn wager_from_row(row: &SqliteRow) -> Result<Wager, LedgerError> {
    let selection: String = row.try_get("selection")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;
    Ok(Wager {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        account_id: parse_id(&row.try_get::<String, _>("account_id")?)?,
        title: row.try_get("title")?,
        sport_key: row.try_get("sport_key")?,
        stake: parse_decimal(&row.try_get::<String, _>("stake")?)?,
        odds: parse_decimal(&row.try_get::<String, _>("odds")?)?,
        status: row
            .try_get::<String, _>("status")?
            .parse::<WagerStatus>()
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        selection: serde_json::from_str(&selection)
            .map_err(|e| LedgerError::Storage(format!("corrupt selection: {e}")))?,
        notes: row.try_get("notes")?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        resolved_at: resolved_at.as_deref().map(parse_time).transpose()?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry, LedgerError> {
    let reference_id: Option<String> = row.try_get("reference_id")?;
    Ok(LedgerEntry {
        id: parse_id(&row.try_get::<String, _>("id")?)?,
        account_id: parse_id(&row.try_get::<String, _>("account_id")?)?,
        amount: parse_decimal(&row.try_get::<String, _>("amount")?)?,
        kind: row
            .try_get::<String, _>("kind")?
            .parse::<EntryKind>()
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        description: row.try_get("description")?,
        reference_id: reference_id.as_deref().map(parse_id).transpose()?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Selection, WagerTicket};
    use rust_decimal_macros::dec;

    fn temp_url() -> (String, std::path::PathBuf) {
        let mut p = std::env::temp_dir();
        p.push(format!("bankroll_test_{}.db", uuid::Uuid::new_v4()));
        (format!("sqlite://{}", p.to_string_lossy()), p)
    }

    async fn open() -> (SqliteStore, std::path::PathBuf) {
        let (url, path) = temp_url();
        let store = SqliteStore::connect(&url, 4, Duration::from_secs(5)).await.unwrap();
        (store, path)
    }

    #[tokio::test]
    async fn test_account_roundtrip_through_unit() {
        let (store, path) = open().await;
        let account = Account::open(dec!(1000));

        let mut uow = store.begin().await.unwrap();
        uow.create_account(&account).await.unwrap();
        uow.commit().await.unwrap();

        let loaded = store.account(account.id).await.unwrap();
        assert_eq!(loaded.balance, dec!(1000));
        assert_eq!(loaded.opening_balance, dec!(1000));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let (store, path) = open().await;
        let account = Account::open(dec!(50));
        let mut uow = store.begin().await.unwrap();
        uow.create_account(&account).await.unwrap();
        uow.commit().await.unwrap();

        {
            let mut uow = store.begin().await.unwrap();
            uow.lock_account(account.id).await.unwrap();
            uow.set_balance(account.id, dec!(10)).await.unwrap();
            uow.append_entry(&LedgerEntry::deposit(account.id, dec!(-40))).await.unwrap();
        }

        assert_eq!(store.account(account.id).await.unwrap().balance, dec!(50));
        assert!(store.account_entries(account.id).await.unwrap().is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_wager_persisted_and_listed() {
        let (store, path) = open().await;
        let account = Account::open(dec!(100));
        let ticket = WagerTicket::new(dec!(12.50), dec!(1.8), Selection::new("evt-9", "AWAY"))
            .with_sport("nba")
            .with_notes("late line move");
        let wager = Wager::pending(account.id, &ticket);

        let mut uow = store.begin().await.unwrap();
        uow.create_account(&account).await.unwrap();
        uow.create_wager(&wager).await.unwrap();
        uow.commit().await.unwrap();

        let loaded = store.wager(wager.id).await.unwrap();
        assert_eq!(loaded.stake, dec!(12.50));
        assert_eq!(loaded.odds, dec!(1.8));
        assert_eq!(loaded.status, WagerStatus::Pending);
        assert_eq!(loaded.decoded_selection().unwrap().side, "AWAY");
        assert_eq!(loaded.notes.as_deref(), Some("late line move"));

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);

        let by_sport = WagerFilter { sport_key: Some("nba".into()), ..Default::default() };
        let page = store
            .list_wagers(account.id, &by_sport, PageRequest { page: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        let other = WagerFilter::status(WagerStatus::Won);
        let page = store
            .list_wagers(account.id, &other, PageRequest { page: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.data.is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_save_wager_requires_lock() {
        let (store, path) = open().await;
        let account = Account::open(dec!(100));
        let wager = Wager::pending(
            account.id,
            &WagerTicket::new(dec!(1), dec!(2), Selection::new("e", "HOME")),
        );
        let mut uow = store.begin().await.unwrap();
        uow.create_account(&account).await.unwrap();
        uow.create_wager(&wager).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = uow.save_wager(&wager).await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_lock_missing_wager() {
        let (store, path) = open().await;
        let mut uow = store.begin().await.unwrap();
        let err = uow.lock_wager(WagerId::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        drop(uow);
        let _ = std::fs::remove_file(path);
    }
}
