//! Outcome oracles.
//!
//! Defines the `OutcomeOracle` trait consumed by the scheduler and provides:
//! - `ResultBoard`: results declared by an operator or upstream system
//! - `SimulatedOracle`: deterministic HOME/AWAY results for demos
//! - `HttpOracle`: a JSON results feed over HTTP

pub mod simulated;
pub mod http;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{normalize_side, Selection};

pub use http::HttpOracle;
pub use simulated::SimulatedOracle;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    /// Transient: the source could not be reached. Retry next tick.
    #[error("Oracle unavailable ({source_name}): {message}")]
    Unavailable { source_name: String, message: String },

    /// The source answered with something that could not be interpreted.
    #[error("Malformed oracle response ({source_name}): {message}")]
    Malformed { source_name: String, message: String },
}

/// External source of truth for "who won" an event.
///
/// Lookups happen outside any ledger unit of work; implementations may
/// block on the network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeOracle: Send + Sync {
    /// The winning side for the selection's event, or `None` if the event
    /// has no result yet.
    async fn lookup(&self, selection: &Selection) -> Result<Option<String>, OracleError>;

    /// Oracle name for logging.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Result board
// ---------------------------------------------------------------------------

/// Results declared in-process, keyed by event id.
#[derive(Debug, Default)]
pub struct ResultBoard {
    results: RwLock<HashMap<String, String>>,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the winning side of an event. A later declaration replaces
    /// the earlier one, but wagers already resolved stay resolved.
    pub fn declare(&self, event_id: impl Into<String>, winning_side: &str) {
        self.results
            .write()
            .insert(event_id.into().trim().to_string(), normalize_side(winning_side));
    }

    pub fn withdraw(&self, event_id: &str) {
        self.results.write().remove(event_id.trim());
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}

#[async_trait]
impl OutcomeOracle for ResultBoard {
    async fn lookup(&self, selection: &Selection) -> Result<Option<String>, OracleError> {
        Ok(self.results.read().get(selection.event_id.trim()).cloned())
    }

    fn name(&self) -> &'static str {
        "board"
    }
}
