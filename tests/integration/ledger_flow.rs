//! Ledger scenarios end to end: placement, resolution, settlement, audit.

use rust_decimal_macros::dec;

use bankroll::types::{EntryKind, LedgerError, Outcome, WagerFilter, WagerStatus};

use crate::common::{backends, ticket};

#[tokio::test]
async fn test_win_pays_stake_times_odds() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        let wager = b
            .engine
            .place_wager(account, ticket(dec!(100), dec!(2.0), "evt-1", "HOME"))
            .await
            .unwrap();
        assert_eq!(b.balance(account).await, dec!(900), "{}", b.name);

        let resolved = b.engine.resolve_wager(wager.id, Outcome::Won).await.unwrap();
        assert_eq!(resolved.status, WagerStatus::Won);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(b.balance(account).await, dec!(1100), "{}", b.name);

        let payouts: Vec<_> = b
            .store()
            .account_entries(account)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::BetPayout)
            .collect();
        assert_eq!(payouts.len(), 1, "{}", b.name);
        assert_eq!(payouts[0].amount, dec!(200));
        assert_eq!(payouts[0].reference_id, Some(wager.id));
    }
}

#[tokio::test]
async fn test_insufficient_funds_changes_nothing() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        let err = b
            .engine
            .place_wager(account, ticket(dec!(2000), dec!(1.5), "evt-1", "HOME"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }), "{}", b.name);

        assert_eq!(b.balance(account).await, dec!(1000));
        assert!(b.store().account_wagers(account).await.unwrap().is_empty());
        assert!(b.store().account_entries(account).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_loss_moves_no_money() {
    for b in backends().await {
        let account = b.account(dec!(500)).await;
        let wager = b
            .engine
            .place_wager(account, ticket(dec!(50), dec!(3), "evt-1", "AWAY"))
            .await
            .unwrap();
        b.engine.resolve_wager(wager.id, Outcome::Lost).await.unwrap();

        assert_eq!(b.balance(account).await, dec!(450), "{}", b.name);
        assert_eq!(b.store().account_entries(account).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_concurrent_double_resolution_pays_once() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        let wager = b
            .engine
            .place_wager(account, ticket(dec!(100), dec!(2.0), "evt-1", "HOME"))
            .await
            .unwrap();

        let first = {
            let engine = b.engine.clone();
            tokio::spawn(async move { engine.resolve_wager(wager.id, Outcome::Won).await })
        };
        let second = {
            let engine = b.engine.clone();
            tokio::spawn(async move { engine.resolve_wager(wager.id, Outcome::Won).await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::AlreadyResolved(_))))
            .count();
        assert_eq!((ok, already), (1, 1), "{}", b.name);
        assert_eq!(b.balance(account).await, dec!(1100), "{}", b.name);
    }
}

#[tokio::test]
async fn test_concurrent_placement_never_overdraws() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = b.engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .place_wager(account, ticket(dec!(150), dec!(2), "evt-1", "HOME"))
                    .await
            }));
        }

        let mut placed = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => placed += 1,
                Err(LedgerError::InsufficientFunds { .. }) => {}
                Err(e) => panic!("{}: unexpected error {e}", b.name),
            }
        }

        // 6 × 150 = 900; a seventh would need 1050.
        assert_eq!(placed, 6, "{}", b.name);
        assert_eq!(b.balance(account).await, dec!(100), "{}", b.name);
        assert!(b.engine.audit_account(account).await.unwrap().is_consistent());
    }
}

#[tokio::test]
async fn test_settle_event_scenario() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;
        let home = b
            .engine
            .place_wager(account, ticket(dec!(10), dec!(2), "evt-42", "HOME"))
            .await
            .unwrap();
        let away = b
            .engine
            .place_wager(account, ticket(dec!(10), dec!(2), "evt-42", "AWAY"))
            .await
            .unwrap();
        let home_again = b
            .engine
            .place_wager(account, ticket(dec!(10), dec!(2), "evt-42", "HOME"))
            .await
            .unwrap();
        let other = b
            .engine
            .place_wager(account, ticket(dec!(10), dec!(2), "evt-43", "HOME"))
            .await
            .unwrap();

        let resolved = b.engine.settle_event("evt-42", "HOME").await.unwrap();
        assert_eq!(resolved, 3, "{}", b.name);

        for (id, expected) in [
            (home.id, WagerStatus::Won),
            (away.id, WagerStatus::Lost),
            (home_again.id, WagerStatus::Won),
            (other.id, WagerStatus::Pending),
        ] {
            assert_eq!(b.store().wager(id).await.unwrap().status, expected, "{}", b.name);
        }

        // 1000 - 40 + 20 + 20
        assert_eq!(b.balance(account).await, dec!(1000), "{}", b.name);

        let again = b.engine.settle_event_report("evt-42", "HOME").await.unwrap();
        assert_eq!(again.matched, 0);
        assert_eq!(again.resolved(), 0);
    }
}

#[tokio::test]
async fn test_ledger_stays_consistent_through_mixed_activity() {
    for b in backends().await {
        let account = b.account(dec!(1000)).await;

        let mut wagers = Vec::new();
        for (i, stake) in [dec!(12.34), dec!(50), dec!(7.77), dec!(100)].into_iter().enumerate() {
            let event = format!("evt-{i}");
            wagers.push(
                b.engine
                    .place_wager(account, ticket(stake, dec!(1.91), &event, "HOME"))
                    .await
                    .unwrap(),
            );
        }
        b.engine.deposit(account, dec!(25.50)).await.unwrap();
        b.engine.resolve_wager(wagers[0].id, Outcome::Won).await.unwrap();
        b.engine.resolve_wager(wagers[1].id, Outcome::Lost).await.unwrap();
        b.engine.settle_event("evt-2", "home").await.unwrap();

        let audit = b.engine.audit_account(account).await.unwrap();
        assert!(audit.is_consistent(), "{}: {audit:?}", b.name);
        assert_eq!(audit.entry_count, 4 + 1 + 2);

        let summary = b.engine.account_summary(account).await.unwrap();
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.balance, audit.balance);

        let won = b
            .engine
            .list_wagers(account, &WagerFilter::status(WagerStatus::Won), 1, 10)
            .await
            .unwrap();
        assert_eq!(won.total, 2, "{}", b.name);
    }
}
