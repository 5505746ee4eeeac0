//! Scheduler scenarios: flaky oracles, lifecycle, and agreement with manual
//! settlement.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use bankroll::engine::scheduler::{OutcomeScheduler, SchedulerConfig};
use bankroll::oracle::SimulatedOracle;
use bankroll::types::WagerStatus;

use crate::common::{backends, ticket};
use crate::mock_oracle::ScriptedOracle;

fn fast() -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_millis(20),
        tick_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_outage_then_recovery() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        for _ in 0..3 {
            b.engine
                .place_wager(account, ticket(dec!(100), dec!(2), "evt-7", "AWAY"))
                .await
                .unwrap();
        }

        let oracle = ScriptedOracle::new();
        oracle.declare("evt-7", "AWAY");
        oracle.set_outage("feed down");

        let scheduler = OutcomeScheduler::new(b.engine.clone(), Arc::new(oracle.clone()), fast());
        let report = scheduler.tick().await;
        assert!(report.oracle_unavailable, "{}", b.name);
        assert_eq!(report.resolved, 0);
        assert_eq!(oracle.calls(), 1);
        assert_eq!(b.store().list_pending().await.unwrap().len(), 3);
        assert_eq!(b.balance(account).await, dec!(700));

        oracle.clear_outage();
        let report = scheduler.tick().await;
        assert_eq!(report.resolved, 3, "{}", b.name);
        assert!(b.store().list_pending().await.unwrap().is_empty());
        assert_eq!(b.balance(account).await, dec!(1300));
    }
}

#[tokio::test]
async fn test_malformed_event_does_not_block_others() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        let broken = b
            .engine
            .place_wager(account, ticket(dec!(10), dec!(2), "evt-bad", "HOME"))
            .await
            .unwrap();
        let fine = b
            .engine
            .place_wager(account, ticket(dec!(10), dec!(2), "evt-ok", "HOME"))
            .await
            .unwrap();

        let oracle = ScriptedOracle::new();
        oracle.set_malformed("evt-bad");
        oracle.declare("evt-ok", "AWAY");

        let scheduler = OutcomeScheduler::new(b.engine.clone(), Arc::new(oracle), fast());
        let report = scheduler.tick().await;
        assert_eq!(report.oracle_errors, 1, "{}", b.name);
        assert_eq!(report.resolved, 1);

        assert_eq!(b.store().wager(broken.id).await.unwrap().status, WagerStatus::Pending);
        assert_eq!(b.store().wager(fine.id).await.unwrap().status, WagerStatus::Lost);
    }
}

#[tokio::test]
async fn test_scheduler_and_manual_settlement_pay_once() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        for _ in 0..5 {
            b.engine
                .place_wager(account, ticket(dec!(20), dec!(2.5), "evt-99", "HOME"))
                .await
                .unwrap();
        }

        let oracle = ScriptedOracle::new();
        oracle.declare("evt-99", "HOME");
        let handle = OutcomeScheduler::start(b.engine.clone(), Arc::new(oracle), fast());

        let manual = b.engine.settle_event_report("evt-99", "HOME").await.unwrap();

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while !b.store().list_pending().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        handle.stop().await;
        assert!(drained.is_ok(), "{}: wagers left pending", b.name);
        assert!(manual.resolved() <= 5);

        // 1000 - 100 + 5 × 50
        assert_eq!(b.balance(account).await, dec!(1150), "{}", b.name);
        assert!(b.engine.audit_account(account).await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_simulated_oracle_resolves_everything() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        for event in ["a", "b", "evt-42", "evt-43"] {
            b.engine
                .place_wager(account, ticket(dec!(10), dec!(2), event, "HOME"))
                .await
                .unwrap();
        }

        let scheduler = OutcomeScheduler::new(b.engine.clone(), Arc::new(SimulatedOracle::new()), fast());
        let report = scheduler.tick().await;
        assert_eq!(report.resolved, 4, "{}", b.name);

        let expected_wins = ["a", "b", "evt-42", "evt-43"]
            .iter()
            .filter(|e| SimulatedOracle::winner_for(e) == "HOME")
            .count() as u64;
        let summary = b.engine.account_summary(account).await.unwrap();
        assert_eq!(summary.wins, expected_wins, "{}", b.name);
        assert_eq!(summary.pending, 0);
    }
}

#[tokio::test]
async fn test_stop_leaves_unreached_wagers_pending() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        let wager = b
            .engine
            .place_wager(account, ticket(dec!(10), dec!(2), "evt-1", "HOME"))
            .await
            .unwrap();

        let config = SchedulerConfig {
            interval: Duration::from_secs(3600),
            tick_timeout: Duration::from_secs(5),
        };
        let oracle = ScriptedOracle::new();
        let handle = OutcomeScheduler::start(b.engine.clone(), Arc::new(oracle.clone()), config);

        // First tick fires immediately; no result is known yet.
        tokio::time::sleep(Duration::from_millis(100)).await;
        oracle.declare("evt-1", "HOME");
        handle.stop().await;

        assert_eq!(b.store().wager(wager.id).await.unwrap().status, WagerStatus::Pending, "{}", b.name);
    }
}
