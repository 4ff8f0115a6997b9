use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::EngineContext;
use crate::model::FeatureSnapshot;
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// Injected data-access capability. All methods are fallible: `None` means
/// the upstream feed failed, and callers degrade instead of crashing.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Option<Vec<Bar>>;

    async fn get_atr(&self, symbol: &str, timeframe: Timeframe, period: usize) -> Option<Decimal>;

    async fn get_current_price(&self, symbol: &str) -> Option<Decimal>;
}

/// Produces the per-cycle feature snapshot for a symbol. Snapshot assembly
/// is external to the engine core; this boundary lets tests feed fixed
/// snapshots and production wire a full feature pipeline.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Option<FeatureSnapshot>;
}

/// Minimal snapshot provider backed by a `MarketData` capability: symbol,
/// reference timestamp and current price only.
pub struct MarketDataSnapshots {
    data: Arc<dyn MarketData>,
    ctx: EngineContext,
}

impl MarketDataSnapshots {
    pub fn new(data: Arc<dyn MarketData>, ctx: EngineContext) -> Self {
        Self { data, ctx }
    }
}

#[async_trait]
impl SnapshotProvider for MarketDataSnapshots {
    async fn snapshot(&self, symbol: &str) -> Option<FeatureSnapshot> {
        let price = self.data.get_current_price(symbol).await?;
        Some(FeatureSnapshot::new(symbol, self.ctx.time.now(), price))
    }
}

/// In-memory market data used by paper runs and tests. Thread-safe;
/// writers replace whole series.
#[derive(Default)]
pub struct InMemoryMarketData {
    bars: RwLock<HashMap<(String, Timeframe), Vec<Bar>>>,
    atr: RwLock<HashMap<(String, Timeframe), Decimal>>,
    prices: RwLock<HashMap<String, Decimal>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        self.bars
            .write()
            .insert((symbol.to_string(), timeframe), bars);
    }

    pub fn set_atr(&self, symbol: &str, timeframe: Timeframe, atr: Decimal) {
        self.atr.write().insert((symbol.to_string(), timeframe), atr);
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().insert(symbol.to_string(), price);
    }

    pub fn clear_price(&self, symbol: &str) {
        self.prices.write().remove(symbol);
    }
}

#[async_trait]
impl MarketData for InMemoryMarketData {
    async fn get_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Option<Vec<Bar>> {
        let store = self.bars.read();
        let series = store.get(&(symbol.to_string(), timeframe))?;
        let start = series.len().saturating_sub(count);
        Some(series[start..].to_vec())
    }

    async fn get_atr(&self, symbol: &str, timeframe: Timeframe, _period: usize) -> Option<Decimal> {
        self.atr.read().get(&(symbol.to_string(), timeframe)).copied()
    }

    async fn get_current_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }
}
