//! Durable state: performance ledger round-trips, plan persistence and
//! the idempotency key table.

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use helm_strategy_rs::ledger::PerformanceLedger;
use helm_strategy_rs::model::{
    Direction, PerformanceRecord, PlanCondition, PlanStatus, TradePlan, TradeResult,
};
use helm_strategy_rs::persistence::redb_store::RedbStore;
use helm_strategy_rs::persistence::store::PersistenceStore;

fn temp_store() -> (Arc<PersistenceStore>, String) {
    let db_path = format!("/tmp/helm_ledger_test_{}.redb", uuid::Uuid::new_v4());
    let redb = Arc::new(RedbStore::new(&db_path).unwrap());
    let store = Arc::new(PersistenceStore::new(redb));
    store.initialize().unwrap();
    (store, db_path)
}

fn record(strategy: &str, result: TradeResult, pnl: rust_decimal::Decimal) -> PerformanceRecord {
    PerformanceRecord {
        strategy_name: strategy.to_string(),
        symbol: "EURUSD".to_string(),
        result,
        pnl,
        reward_multiple: if pnl > rust_decimal::Decimal::ZERO {
            dec!(2)
        } else {
            dec!(-1)
        },
        closed_at: Utc::now(),
    }
}

fn plan(id: &str, created_at: chrono::DateTime<Utc>) -> TradePlan {
    TradePlan {
        plan_id: id.to_string(),
        symbol: "EURUSD".to_string(),
        direction: Direction::Long,
        entry_price: dec!(100),
        stop_loss: dec!(99),
        target_price: dec!(102),
        conditions: vec![PlanCondition::PriceNear {
            target: dec!(100),
            tolerance: None,
        }],
        status: PlanStatus::Pending,
        strategy_name: "ob_retest".to_string(),
        created_at,
        ttl_minutes: 240,
        notes: Vec::new(),
    }
}

#[test]
fn incremental_view_matches_recompute() {
    let (store, _path) = temp_store();
    let ledger = PerformanceLedger::open(store).unwrap();

    ledger.append(&record("ob_retest", TradeResult::Win, dec!(100))).unwrap();
    ledger.append(&record("ob_retest", TradeResult::Loss, dec!(-50))).unwrap();
    ledger.append(&record("ob_retest", TradeResult::Loss, dec!(-50))).unwrap();
    ledger.append(&record("fvg_fill", TradeResult::Win, dec!(80))).unwrap();

    let view = ledger.metrics("ob_retest").unwrap();
    let recomputed = ledger.recompute("ob_retest").unwrap();
    assert_eq!(view, recomputed);
    assert_eq!(view.total_trades, 3);
    assert_eq!(view.consecutive_losses, 2);

    // Records from other strategies never bleed in.
    assert_eq!(ledger.metrics("fvg_fill").unwrap().total_trades, 1);
}

#[test]
fn reopening_rebuilds_views_from_records() {
    let (store, _path) = temp_store();
    {
        let ledger = PerformanceLedger::open(store.clone()).unwrap();
        ledger.append(&record("ob_retest", TradeResult::Win, dec!(100))).unwrap();
        ledger.append(&record("ob_retest", TradeResult::Loss, dec!(-40))).unwrap();
    }

    let reopened = PerformanceLedger::open(store).unwrap();
    let metrics = reopened.metrics("ob_retest").unwrap();
    assert_eq!(metrics.total_trades, 2);
    assert_eq!(metrics.wins, 1);
    assert_eq!(metrics.equity, dec!(60));
}

#[test]
fn metrics_since_excludes_older_records() {
    let (store, _path) = temp_store();
    let ledger = PerformanceLedger::open(store).unwrap();

    let cutoff = Utc::now();
    let mut old = record("ob_retest", TradeResult::Loss, dec!(-50));
    old.closed_at = cutoff - Duration::hours(1);
    let mut new = record("ob_retest", TradeResult::Win, dec!(100));
    new.closed_at = cutoff + Duration::hours(1);
    ledger.append(&old).unwrap();
    ledger.append(&new).unwrap();

    let windowed = ledger.metrics_since("ob_retest", Some(cutoff)).unwrap();
    assert_eq!(windowed.total_trades, 1);
    assert_eq!(windowed.wins, 1);
    assert_eq!(windowed.losses, 0);

    let full = ledger.metrics_since("ob_retest", None).unwrap();
    assert_eq!(full.total_trades, 2);
}

#[test]
fn reset_removes_only_the_named_strategy() {
    let (store, _path) = temp_store();
    let ledger = PerformanceLedger::open(store).unwrap();
    ledger.append(&record("ob_retest", TradeResult::Loss, dec!(-50))).unwrap();
    ledger.append(&record("ob_retest", TradeResult::Loss, dec!(-50))).unwrap();
    ledger.append(&record("fvg_fill", TradeResult::Win, dec!(70))).unwrap();

    let removed = ledger.reset("ob_retest").unwrap();
    assert_eq!(removed, 2);
    assert_eq!(ledger.metrics("ob_retest").unwrap().total_trades, 0);
    assert_eq!(ledger.recompute("ob_retest").unwrap().total_trades, 0);
    assert_eq!(ledger.metrics("fvg_fill").unwrap().total_trades, 1);
}

#[test]
fn pending_plans_come_back_oldest_first() {
    let (store, _path) = temp_store();
    let base = Utc::now();
    store.save_plan(&plan("newest", base + Duration::minutes(20))).unwrap();
    store.save_plan(&plan("oldest", base)).unwrap();
    store.save_plan(&plan("middle", base + Duration::minutes(10))).unwrap();

    let mut executed = plan("done", base - Duration::minutes(5));
    executed.status = PlanStatus::Executed;
    store.save_plan(&executed).unwrap();

    let pending = store.load_pending_plans().unwrap();
    let ids: Vec<&str> = pending.iter().map(|p| p.plan_id.as_str()).collect();
    assert_eq!(ids, vec!["oldest", "middle", "newest"]);
}

#[test]
fn plan_roundtrip_preserves_conditions() {
    let (store, _path) = temp_store();
    let original = plan("p1", Utc::now());
    store.save_plan(&original).unwrap();

    let loaded = store.load_plan("p1").unwrap().unwrap();
    assert_eq!(loaded.conditions, original.conditions);
    assert_eq!(loaded.entry_price, original.entry_price);
    assert!(store.load_plan("no-such-plan").unwrap().is_none());
}

#[test]
fn status_update_on_missing_plan_is_an_error() {
    let (store, _path) = temp_store();
    let result = store.update_plan_status("ghost", PlanStatus::Cancelled, &[]);
    assert!(result.is_err());
}

#[test]
fn idempotency_keys_hold_until_cleared() {
    let (store, _path) = temp_store();

    assert!(store.check_idempotency("submit:p1").unwrap());
    store.set_idempotency("submit:p1", 1_000_000).unwrap();
    // No amount of elapsed time releases a live key.
    assert!(!store.check_idempotency("submit:p1").unwrap());

    store.clear_idempotency("submit:p1").unwrap();
    assert!(store.check_idempotency("submit:p1").unwrap());
}
