//! Scripted outcome oracle for integration testing.
//!
//! Results, outages and malformed answers are all controllable from test
//! code; every lookup is counted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bankroll::oracle::{OracleError, OutcomeOracle};
use bankroll::types::Selection;

#[derive(Clone, Default)]
pub struct ScriptedOracle {
    results: Arc<Mutex<HashMap<String, String>>>,
    /// If set, every lookup fails with `Unavailable`.
    outage: Arc<Mutex<Option<String>>>,
    malformed: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, event_id: &str, winner: &str) {
        self.results
            .lock()
            .unwrap()
            .insert(event_id.to_string(), winner.to_string());
    }

    pub fn set_outage(&self, msg: &str) {
        *self.outage.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_outage(&self) {
        *self.outage.lock().unwrap() = None;
    }

    pub fn set_malformed(&self, event_id: &str) {
        self.malformed.lock().unwrap().push(event_id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutcomeOracle for ScriptedOracle {
    async fn lookup(&self, selection: &Selection) -> Result<Option<String>, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(msg) = self.outage.lock().unwrap().clone() {
            return Err(OracleError::Unavailable {
                source_name: "scripted".into(),
                message: msg,
            });
        }
        if self.malformed.lock().unwrap().contains(&selection.event_id) {
            return Err(OracleError::Malformed {
                source_name: "scripted".into(),
                message: "unreadable result".into(),
            });
        }
        Ok(self.results.lock().unwrap().get(&selection.event_id).cloned())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
