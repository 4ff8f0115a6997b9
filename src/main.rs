use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use helm_strategy_rs::auto_executor::AutoExecutor;
use helm_strategy_rs::broker::PaperBroker;
use helm_strategy_rs::circuit_breaker::CircuitBreaker;
use helm_strategy_rs::config::{Settings, SettingsHandle};
use helm_strategy_rs::context::EngineContext;
use helm_strategy_rs::detection_cache::DetectionCache;
use helm_strategy_rs::detectors::{FairValueGapDetector, OrderBlockDetector};
use helm_strategy_rs::ledger::PerformanceLedger;
use helm_strategy_rs::market_data::{InMemoryMarketData, MarketDataSnapshots};
use helm_strategy_rs::notifier::TracingNotifier;
use helm_strategy_rs::persistence::redb_store::RedbStore;
use helm_strategy_rs::persistence::store::PersistenceStore;
use helm_strategy_rs::selection::SelectionEngine;
use helm_strategy_rs::strategy::StrategyRegistry;
use helm_strategy_rs::sweep::SweepScheduler;
use helm_strategy_rs::timeframe::Timeframe;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║          HELM STRATEGY RS - Selection & Gating Engine         ║");
    info!("╚═══════════════════════════════════════════════════════════════╝");

    dotenv::dotenv().ok();

    let settings = Arc::new(SettingsHandle::new(Settings::load_or_default()));
    let ctx = EngineContext::new_system();

    // Durable store
    let store_path = settings.current().store.path;
    let redb = match RedbStore::new(&store_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(path = %store_path, error = %e, "❌ Could not open durable store");
            std::process::exit(1);
        }
    };
    let store = Arc::new(PersistenceStore::new(redb));
    store.initialize()?;

    let ledger = Arc::new(PerformanceLedger::open(store.clone())?);
    let breaker = Arc::new(CircuitBreaker::new(
        settings.clone(),
        ledger.clone(),
        store.clone(),
        ctx.clone(),
    ));

    // Market data: the live feed adapter plugs in behind `MarketData`.
    // The in-memory source keeps the engine runnable standalone.
    let data = Arc::new(InMemoryMarketData::new());

    let engine_config = settings.current().engine;
    let mut cache = DetectionCache::new(
        data.clone(),
        ctx.clone(),
        engine_config.detection_cache_capacity,
        Duration::from_millis(engine_config.detector_timeout_ms),
    );
    cache.register(Arc::new(OrderBlockDetector::new()));
    cache.register(Arc::new(FairValueGapDetector::new()));
    let cache = Arc::new(cache);

    let registry = Arc::new(StrategyRegistry::builtin(Timeframe::M15));
    let selection = Arc::new(SelectionEngine::new(
        registry,
        cache.clone(),
        breaker.clone(),
        settings.clone(),
        ctx.clone(),
    ));

    let executor = Arc::new(AutoExecutor::new(
        store.clone(),
        breaker,
        cache,
        data.clone(),
        Arc::new(PaperBroker),
        Arc::new(TracingNotifier),
        settings.clone(),
        ctx.clone(),
    ));

    let snapshots = Arc::new(MarketDataSnapshots::new(data, ctx));
    let scheduler = SweepScheduler::new(selection, executor, snapshots, store, settings);

    info!("✅ Core components initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}
