use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::EngineError;
use crate::model::{PerformanceRecord, StrategyMetrics};
use crate::persistence::store::PersistenceStore;

/// Append-only record of closed-trade outcomes, with an incrementally
/// maintained `StrategyMetrics` view per strategy. The view is a pure
/// materialization: it can always be rebuilt from the records alone, and
/// the two must agree.
pub struct PerformanceLedger {
    store: Arc<PersistenceStore>,
    metrics: DashMap<String, StrategyMetrics>,
}

impl PerformanceLedger {
    /// Open the ledger, rebuilding the in-memory views from the durable
    /// records.
    pub fn open(store: Arc<PersistenceStore>) -> Result<Self, EngineError> {
        let ledger = Self {
            store,
            metrics: DashMap::new(),
        };
        let records = ledger
            .store
            .load_all_performance_records()
            .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))?;
        for record in &records {
            ledger
                .metrics
                .entry(record.strategy_name.clone())
                .or_default()
                .apply(record);
        }
        info!(records = records.len(), "📒 Performance ledger opened");
        Ok(ledger)
    }

    /// Append one closed trade. Durable write first, then the view update;
    /// a failed write leaves the view untouched.
    pub fn append(&self, record: &PerformanceRecord) -> Result<(), EngineError> {
        self.store
            .append_performance_record(record)
            .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))?;
        self.metrics
            .entry(record.strategy_name.clone())
            .or_default()
            .apply(record);
        Ok(())
    }

    /// Current metrics for a strategy (incremental view).
    pub fn metrics(&self, strategy_name: &str) -> Result<StrategyMetrics, EngineError> {
        Ok(self
            .metrics
            .get(strategy_name)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    /// Metrics over records closed strictly after `since`. Used by the
    /// circuit breaker to exclude history from before a probation pass.
    pub fn metrics_since(
        &self,
        strategy_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<StrategyMetrics, EngineError> {
        let Some(watermark) = since else {
            return self.metrics(strategy_name);
        };
        let records = self
            .store
            .load_performance_records(strategy_name)
            .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))?;
        Ok(StrategyMetrics::from_records(
            records.iter().filter(|r| r.closed_at > watermark),
        ))
    }

    /// Full recompute from the durable records, bypassing the incremental
    /// view. Used by tests and operator audits.
    pub fn recompute(&self, strategy_name: &str) -> Result<StrategyMetrics, EngineError> {
        let records = self
            .store
            .load_performance_records(strategy_name)
            .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))?;
        Ok(StrategyMetrics::from_records(records.iter()))
    }

    /// Explicit operator reset: drops records and the view for a strategy.
    pub fn reset(&self, strategy_name: &str) -> Result<usize, EngineError> {
        let removed = self
            .store
            .delete_performance_records(strategy_name)
            .map_err(|e| EngineError::LedgerUnavailable(e.to_string()))?;
        self.metrics.remove(strategy_name);
        info!(strategy = strategy_name, removed, "📒 Ledger reset by operator");
        Ok(removed)
    }
}
