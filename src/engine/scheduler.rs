//! Outcome scheduler: periodically resolves PENDING wagers whose events
//! have a known result.
//!
//! Runs as one tokio task: an interval tick races a `watch` shutdown signal.
//! Each tick snapshots the pending wagers, asks the oracle about each
//! wager's event (outside any unit of work) and resolves through
//! [`BettingEngine::resolve_wager`]. The tick stops early, between wagers,
//! on shutdown, on its deadline, or when the oracle is unavailable; every
//! wager not reached stays PENDING for the next tick. Double resolution is
//! prevented by the PENDING guard, not by bookkeeping here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::BettingEngine;
use crate::oracle::{OracleError, OutcomeOracle};
use crate::types::LedgerError;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Budget for one tick; wagers not reached in time wait for the next.
    pub tick_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            tick_timeout: Duration::from_secs(30),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub resolved: usize,
    /// No result known yet.
    pub awaiting: usize,
    pub undecodable: usize,
    /// Resolved by another path between snapshot and resolution.
    pub already_resolved: usize,
    pub failed: usize,
    pub oracle_errors: usize,
    pub oracle_unavailable: bool,
    /// Stopped early by shutdown or the tick deadline.
    pub interrupted: bool,
}

pub struct OutcomeScheduler {
    engine: Arc<BettingEngine>,
    oracle: Arc<dyn OutcomeOracle>,
    config: SchedulerConfig,
}

impl OutcomeScheduler {
    pub fn new(
        engine: Arc<BettingEngine>,
        oracle: Arc<dyn OutcomeOracle>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            oracle,
            config,
        }
    }

    /// Spawn the loop. Call once at process start; stop it with
    /// [`SchedulerHandle::stop`].
    pub fn start(
        engine: Arc<BettingEngine>,
        oracle: Arc<dyn OutcomeOracle>,
        config: SchedulerConfig,
    ) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Self::new(engine, oracle, config);
        let task = tokio::spawn(scheduler.run(shutdown_rx));
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            oracle = self.oracle.name(),
            interval_secs = self.config.interval.as_secs_f64(),
            "Outcome scheduler started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    match result {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            info!("Shutdown channel closed");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    let report = self.run_tick(&shutdown).await;
                    log_tick_report(&report);
                }
            }
        }

        info!("Outcome scheduler stopped");
    }

    /// Run one tick to completion (no shutdown signal).
    pub async fn tick(&self) -> TickReport {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run_tick(&shutdown_rx).await
    }

    pub async fn run_tick(&self, shutdown: &watch::Receiver<bool>) -> TickReport {
        let mut report = TickReport::default();
        let deadline = Instant::now() + self.config.tick_timeout;

        let pending = match self.engine.store().list_pending().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Could not list pending wagers, retrying next tick");
                report.failed += 1;
                return report;
            }
        };
        if pending.is_empty() {
            return report;
        }
        debug!(count = pending.len(), "Checking pending wagers");

        // Results are cached per event for this tick only.
        let mut known: HashMap<String, Option<String>> = HashMap::new();

        for wager in pending {
            if *shutdown.borrow() || Instant::now() >= deadline {
                report.interrupted = true;
                break;
            }
            report.examined += 1;

            let Some(selection) = wager.decoded_selection() else {
                report.undecodable += 1;
                continue;
            };

            let event_key = selection.event_id.trim().to_string();
            let winner = match known.get(&event_key) {
                Some(cached) => cached.clone(),
                None => match tokio::time::timeout_at(deadline, self.oracle.lookup(&selection)).await {
                    Ok(Ok(result)) => {
                        known.insert(event_key, result.clone());
                        result
                    }
                    Ok(Err(e @ OracleError::Unavailable { .. })) => {
                        warn!(oracle = self.oracle.name(), error = %e, "Oracle unavailable, ending tick");
                        report.oracle_unavailable = true;
                        break;
                    }
                    Ok(Err(e)) => {
                        warn!(event_id = %event_key, error = %e, "Oracle lookup failed");
                        report.oracle_errors += 1;
                        known.insert(event_key, None);
                        continue;
                    }
                    Err(_) => {
                        warn!(event_id = %event_key, "Tick deadline reached during oracle lookup");
                        report.interrupted = true;
                        break;
                    }
                },
            };

            let Some(winning_side) = winner else {
                report.awaiting += 1;
                continue;
            };

            let outcome = selection.outcome_for(&winning_side);
            match self.engine.resolve_wager(wager.id, outcome).await {
                Ok(_) => report.resolved += 1,
                Err(LedgerError::AlreadyResolved(_)) => {
                    debug!(wager_id = %wager.id, "Already resolved elsewhere");
                    report.already_resolved += 1;
                }
                Err(e) => {
                    warn!(wager_id = %wager.id, error = %e, "Resolution failed, retrying next tick");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

fn log_tick_report(report: &TickReport) {
    if report.examined == 0 && !report.oracle_unavailable && report.failed == 0 {
        return;
    }
    info!(
        examined = report.examined,
        resolved = report.resolved,
        awaiting = report.awaiting,
        already_resolved = report.already_resolved,
        failed = report.failed,
        oracle_unavailable = report.oracle_unavailable,
        interrupted = report.interrupted,
        "Scheduler tick complete"
    );
}

/// Lifecycle handle for a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the loop to exit. A resolution already in
    /// flight completes first; untouched wagers wait for the next run.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Outcome scheduler task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
