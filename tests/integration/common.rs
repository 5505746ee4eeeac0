//! Shared fixtures: every scenario runs once per ledger backend.

use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bankroll::engine::BettingEngine;
use bankroll::storage::{LedgerStore, MemoryStore, SqliteStore};
use bankroll::types::{AccountId, Selection, WagerTicket};

pub struct Backend {
    pub name: &'static str,
    pub engine: Arc<BettingEngine>,
    db_path: Option<PathBuf>,
}

impl Backend {
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        self.engine.store()
    }

    pub async fn account(&self, opening: Decimal) -> AccountId {
        self.engine.open_account(opening).await.unwrap().id
    }

    pub async fn balance(&self, account: AccountId) -> Decimal {
        self.store().account(account).await.unwrap().balance
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Some(path) = &self.db_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub async fn backends() -> Vec<Backend> {
    let memory: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());

    let path = std::env::temp_dir().join(format!("bankroll_it_{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.to_string_lossy());
    let sqlite: Arc<dyn LedgerStore> =
        Arc::new(SqliteStore::connect(&url, 4, Duration::from_secs(10)).await.unwrap());

    vec![
        Backend {
            name: "memory",
            engine: Arc::new(BettingEngine::new(memory)),
            db_path: None,
        },
        Backend {
            name: "sqlite",
            engine: Arc::new(BettingEngine::new(sqlite)),
            db_path: Some(path),
        },
    ]
}

pub fn ticket(stake: Decimal, odds: Decimal, event: &str, side: &str) -> WagerTicket {
    WagerTicket::new(stake, odds, Selection::new(event, side))
}
