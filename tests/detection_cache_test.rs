//! Detection cache behaviour: per-bar memoization, session invalidation,
//! failure normalization, capacity eviction and single-flight.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use helm_strategy_rs::context::{EngineContext, SequentialIdProvider, SimulatedTimeProvider};
use helm_strategy_rs::detection_cache::DetectionCache;
use helm_strategy_rs::detectors::PatternDetector;
use helm_strategy_rs::error::EngineError;
use helm_strategy_rs::market_data::{InMemoryMarketData, MarketData};
use helm_strategy_rs::model::{PatternKind, PatternResult, PriceZone};
use helm_strategy_rs::timeframe::Timeframe;

// 2026-01-05 08:00:00 UTC, inside the London session.
const START_MS: i64 = 1_767_600_000_000;

/// Detector returning a scripted result, counting invocations.
struct ScriptedDetector {
    id: &'static str,
    kind: PatternKind,
    calls: AtomicUsize,
    fail: AtomicBool,
    results: RwLock<Vec<PatternResult>>,
}

impl ScriptedDetector {
    fn new(id: &'static str, kind: PatternKind) -> Self {
        Self {
            id,
            kind,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            results: RwLock::new(Vec::new()),
        }
    }

    fn with_zone(self, high: Decimal, low: Decimal, confidence: f64) -> Self {
        self.results.write().push(PatternResult {
            kind: self.kind,
            confidence,
            zone: Some(PriceZone { high, low }),
            confluence: vec![],
            detected_at: chrono::Utc::now(),
        });
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatternDetector for ScriptedDetector {
    fn id(&self) -> &'static str {
        self.id
    }

    fn kind(&self) -> PatternKind {
        self.kind
    }

    async fn detect(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _data: &dyn MarketData,
    ) -> Result<Vec<PatternResult>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::DetectionUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(self.results.read().clone())
    }
}

struct Harness {
    cache: DetectionCache,
    clock: Arc<SimulatedTimeProvider>,
    detector: Arc<ScriptedDetector>,
    data: Arc<InMemoryMarketData>,
}

fn harness(detector: ScriptedDetector, capacity: usize) -> Harness {
    let clock = Arc::new(SimulatedTimeProvider::new(START_MS));
    let ctx = EngineContext {
        time: clock.clone(),
        id: Arc::new(SequentialIdProvider::new()),
    };
    let data = Arc::new(InMemoryMarketData::new());
    data.set_price("EURUSD", dec!(100));

    let detector = Arc::new(detector);
    let mut cache = DetectionCache::new(
        data.clone(),
        ctx,
        capacity,
        Duration::from_millis(2000),
    );
    cache.register(detector.clone());

    Harness {
        cache,
        clock,
        detector,
        data,
    }
}

#[tokio::test]
async fn repeated_gets_within_one_bar_hit_the_cache() {
    let h = harness(
        ScriptedDetector::new("order_block", PatternKind::OrderBlock)
            .with_zone(dec!(101), dec!(100), 0.8),
        100,
    );

    let first = h.cache.get("EURUSD", Timeframe::M15, "order_block").await;
    // Ten more reads inside the same 15-minute bucket.
    for _ in 0..10 {
        h.clock.advance(60 * 1000);
        let again = h.cache.get("EURUSD", Timeframe::M15, "order_block").await;
        assert_eq!(again, first);
    }
    assert_eq!(h.detector.calls(), 1);
}

#[tokio::test]
async fn new_bar_bucket_reruns_the_detector() {
    let h = harness(
        ScriptedDetector::new("order_block", PatternKind::OrderBlock)
            .with_zone(dec!(101), dec!(100), 0.8),
        100,
    );

    h.cache.get("EURUSD", Timeframe::M15, "order_block").await;
    h.clock.advance(15 * 60 * 1000);
    h.cache.get("EURUSD", Timeframe::M15, "order_block").await;
    assert_eq!(h.detector.calls(), 2);
}

#[tokio::test]
async fn failed_detection_is_cached_as_none_for_the_bar() {
    let detector =
        ScriptedDetector::new("order_block", PatternKind::OrderBlock).with_zone(dec!(101), dec!(100), 0.8);
    detector.fail.store(true, Ordering::SeqCst);
    let h = harness(detector, 100);

    assert!(h.cache.get("EURUSD", Timeframe::M15, "order_block").await.is_none());

    // Clearing the fault does not help within the same bucket.
    h.detector.fail.store(false, Ordering::SeqCst);
    assert!(h.cache.get("EURUSD", Timeframe::M15, "order_block").await.is_none());
    assert_eq!(h.detector.calls(), 1);

    // Next bucket retries and succeeds.
    h.clock.advance(15 * 60 * 1000);
    assert!(h.cache.get("EURUSD", Timeframe::M15, "order_block").await.is_some());
}

#[tokio::test]
async fn session_change_purges_symbol_entries() {
    let h = harness(
        ScriptedDetector::new("order_block", PatternKind::OrderBlock)
            .with_zone(dec!(101), dec!(100), 0.8),
        100,
    );

    // Cached at 08:00 under London on the daily timeframe, whose bucket
    // spans the whole day: any re-detection below is session-driven.
    h.cache.get("EURUSD", Timeframe::D1, "order_block").await;
    assert_eq!(h.detector.calls(), 1);

    // 08:30: same bucket, same session, still cached.
    h.clock.advance(30 * 60 * 1000);
    h.cache.get("EURUSD", Timeframe::D1, "order_block").await;
    assert_eq!(h.detector.calls(), 1);

    // 13:30: London has rolled to New York; the daily bucket is unchanged
    // but the entry must be purged and re-detected.
    h.clock.advance(5 * 60 * 60 * 1000);
    h.cache.get("EURUSD", Timeframe::D1, "order_block").await;
    assert_eq!(h.detector.calls(), 2);
}

#[tokio::test]
async fn get_by_kind_resolves_the_registered_detector() {
    let h = harness(
        ScriptedDetector::new("fair_value_gap", PatternKind::FairValueGap)
            .with_zone(dec!(102), dec!(101), 0.6),
        100,
    );

    let hit = h
        .cache
        .get_by_kind("EURUSD", Timeframe::M15, PatternKind::FairValueGap)
        .await
        .unwrap();
    assert_eq!(hit.kind, PatternKind::FairValueGap);

    // No detector registered for this kind.
    assert!(h
        .cache
        .get_by_kind("EURUSD", Timeframe::M15, PatternKind::LiquiditySweep)
        .await
        .is_none());
}

#[tokio::test]
async fn multiple_instances_normalize_to_the_ranked_one() {
    let detector = ScriptedDetector::new("order_block", PatternKind::OrderBlock)
        .with_zone(dec!(101), dec!(100), 0.7)
        .with_zone(dec!(105), dec!(104), 0.9);
    let h = harness(detector, 100);

    let hit = h.cache.get("EURUSD", Timeframe::M15, "order_block").await.unwrap();
    assert_eq!(hit.confidence, 0.9);

    // The normalized choice is what stays cached.
    let again = h.cache.get("EURUSD", Timeframe::M15, "order_block").await.unwrap();
    assert_eq!(again, hit);
}

#[tokio::test]
async fn capacity_evicts_the_oldest_entry() {
    let h = harness(
        ScriptedDetector::new("order_block", PatternKind::OrderBlock)
            .with_zone(dec!(101), dec!(100), 0.8),
        2,
    );
    h.data.set_price("GBPUSD", dec!(100));
    h.data.set_price("USDJPY", dec!(100));

    h.cache.get("EURUSD", Timeframe::M15, "order_block").await;
    h.clock.advance(1000);
    h.cache.get("GBPUSD", Timeframe::M15, "order_block").await;
    h.clock.advance(1000);
    h.cache.get("USDJPY", Timeframe::M15, "order_block").await;
    assert_eq!(h.cache.len(), 2);

    // EURUSD was oldest and evicted; reading it again re-runs the detector.
    let calls_before = h.detector.calls();
    h.cache.get("EURUSD", Timeframe::M15, "order_block").await;
    assert_eq!(h.detector.calls(), calls_before + 1);
}

#[tokio::test]
async fn invalidate_symbol_drops_only_that_symbol() {
    let h = harness(
        ScriptedDetector::new("order_block", PatternKind::OrderBlock)
            .with_zone(dec!(101), dec!(100), 0.8),
        100,
    );
    h.data.set_price("GBPUSD", dec!(100));

    h.cache.get("EURUSD", Timeframe::M15, "order_block").await;
    h.cache.get("GBPUSD", Timeframe::M15, "order_block").await;
    assert_eq!(h.cache.len(), 2);

    h.cache.invalidate_symbol("EURUSD");
    assert_eq!(h.cache.len(), 1);

    let calls_before = h.detector.calls();
    h.cache.get("GBPUSD", Timeframe::M15, "order_block").await;
    assert_eq!(h.detector.calls(), calls_before, "other symbol stays cached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_purge_survives_concurrent_sweeps() {
    // 06:00 UTC, inside the Asian session.
    let clock = Arc::new(SimulatedTimeProvider::new(START_MS - 2 * 60 * 60 * 1000));
    let ctx = EngineContext {
        time: clock.clone(),
        id: Arc::new(SequentialIdProvider::new()),
    };
    let data = Arc::new(InMemoryMarketData::new());

    let detector = Arc::new(
        ScriptedDetector::new("order_block", PatternKind::OrderBlock)
            .with_zone(dec!(101), dec!(100), 0.8),
    );
    let mut cache = DetectionCache::new(data, ctx, 10_000, Duration::from_millis(2000));
    cache.register(detector);
    let cache = Arc::new(cache);

    // Seed a large population of Asian-session entries.
    for i in 0..500 {
        cache
            .get(&format!("SYM{i:03}"), Timeframe::M15, "order_block")
            .await;
    }
    assert_eq!(cache.len(), 500);

    // Cross into London: every read now purges its symbol's stale entry
    // while the other tasks are inserting fresh ones.
    clock.advance(2 * 60 * 60 * 1000);
    let mut handles = Vec::new();
    for chunk in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for i in (chunk..500).step_by(8) {
                cache
                    .get(&format!("SYM{i:03}"), Timeframe::M15, "order_block")
                    .await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(cache.len(), 500);
}

#[tokio::test]
async fn concurrent_misses_run_the_detector_once() {
    /// Detector that parks long enough for every waiter to queue up.
    struct SlowDetector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PatternDetector for SlowDetector {
        fn id(&self) -> &'static str {
            "slow"
        }

        fn kind(&self) -> PatternKind {
            PatternKind::OrderBlock
        }

        async fn detect(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _data: &dyn MarketData,
        ) -> Result<Vec<PatternResult>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![PatternResult {
                kind: PatternKind::OrderBlock,
                confidence: 0.8,
                zone: Some(PriceZone {
                    high: dec!(101),
                    low: dec!(100),
                }),
                confluence: vec![],
                detected_at: chrono::Utc::now(),
            }])
        }
    }

    let clock = Arc::new(SimulatedTimeProvider::new(START_MS));
    let ctx = EngineContext {
        time: clock.clone(),
        id: Arc::new(SequentialIdProvider::new()),
    };
    let data = Arc::new(InMemoryMarketData::new());
    data.set_price("EURUSD", dec!(100));

    let detector = Arc::new(SlowDetector {
        calls: AtomicUsize::new(0),
    });
    let mut cache = DetectionCache::new(data, ctx, 100, Duration::from_millis(2000));
    cache.register(detector.clone());
    let cache = Arc::new(cache);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.get("EURUSD", Timeframe::M15, "slow").await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
}
