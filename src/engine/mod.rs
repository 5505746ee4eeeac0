//! Core engine: placement, resolution, settlement and the outcome loop.
//!
//! `BettingEngine` is constructed once with an injected [`LedgerStore`] and
//! shared (behind an `Arc`) by request handlers and the scheduler. Both
//! manual settlement and the scheduler resolve wagers through
//! [`BettingEngine::resolve_wager`]; there is no second resolution path.

pub mod placement;
pub mod resolution;
pub mod settlement;
pub mod accountant;
pub mod scheduler;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::storage::LedgerStore;
use crate::types::PageRequest;

/// Tunables for the engine's request-facing operations.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Balance given to newly provisioned accounts.
    pub opening_balance: Decimal,
    pub default_limit: u32,
    pub max_limit: u32,
    pub entries_default_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opening_balance: dec!(1000.00),
            default_limit: 10,
            max_limit: 100,
            entries_default_limit: 20,
        }
    }
}

pub struct BettingEngine {
    store: Arc<dyn LedgerStore>,
    config: EngineConfig,
}

impl BettingEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clamp caller paging: page < 1 becomes 1, a limit of 0 or above the
    /// maximum falls back to `default_limit`.
    fn page_request(&self, page: u32, limit: u32, default_limit: u32) -> PageRequest {
        let limit = if limit == 0 || limit > self.config.max_limit {
            default_limit
        } else {
            limit
        };
        PageRequest {
            page: page.max(1),
            limit,
        }
    }
}
