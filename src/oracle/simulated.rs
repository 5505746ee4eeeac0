//! Deterministic simulated results.
//!
//! Every event has a result as soon as it is asked about. The winner is
//! derived from the event id, so all wagers on one event agree and repeat
//! runs are reproducible.

use async_trait::async_trait;

use super::{OracleError, OutcomeOracle};
use crate::types::Selection;

pub const HOME: &str = "HOME";
pub const AWAY: &str = "AWAY";

#[derive(Debug, Clone, Default)]
pub struct SimulatedOracle;

impl SimulatedOracle {
    pub fn new() -> Self {
        Self
    }

    /// Even byte sum ⇒ HOME, odd ⇒ AWAY.
    pub fn winner_for(event_id: &str) -> &'static str {
        let sum: u64 = event_id.trim().bytes().map(u64::from).sum();
        if sum % 2 == 0 {
            HOME
        } else {
            AWAY
        }
    }
}

#[async_trait]
impl OutcomeOracle for SimulatedOracle {
    async fn lookup(&self, selection: &Selection) -> Result<Option<String>, OracleError> {
        Ok(Some(Self::winner_for(&selection.event_id).to_string()))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_winner_is_deterministic() {
        // "a" = 97 (odd), "b" = 98 (even)
        assert_eq!(SimulatedOracle::winner_for("a"), AWAY);
        assert_eq!(SimulatedOracle::winner_for("b"), HOME);
        assert_eq!(
            SimulatedOracle::winner_for("evt-42"),
            SimulatedOracle::winner_for(" evt-42 ")
        );
    }

    #[tokio::test]
    async fn test_always_has_result() {
        let oracle = SimulatedOracle::new();
        let result = oracle.lookup(&Selection::new("b", "AWAY")).await.unwrap();
        assert_eq!(result.as_deref(), Some(HOME));
    }
}
