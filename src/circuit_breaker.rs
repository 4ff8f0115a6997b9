use chrono::Duration;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SettingsHandle;
use crate::context::EngineContext;
use crate::ledger::PerformanceLedger;
use crate::metrics;
use crate::model::{BreakerState, PerformanceRecord, StrategyMetrics, TradeResult};
use crate::persistence::store::PersistenceStore;

/// Performance-driven circuit breaker. Decides per strategy whether it may
/// produce new trade proposals; disables and re-enables deterministically.
///
/// Fail-open on infrastructure failure: if the ledger is unreachable the
/// breaker never disables a strategy on that basis. Fail-closed only on
/// confirmed poor performance.
pub struct CircuitBreaker {
    settings: Arc<SettingsHandle>,
    ledger: Arc<PerformanceLedger>,
    store: Arc<PersistenceStore>,
    states: DashMap<String, BreakerState>,
    ctx: EngineContext,
}

impl CircuitBreaker {
    pub fn new(
        settings: Arc<SettingsHandle>,
        ledger: Arc<PerformanceLedger>,
        store: Arc<PersistenceStore>,
        ctx: EngineContext,
    ) -> Self {
        Self {
            settings,
            ledger,
            store,
            states: DashMap::new(),
            ctx,
        }
    }

    fn state(&self, strategy_name: &str) -> BreakerState {
        if let Some(state) = self.states.get(strategy_name) {
            return state.clone();
        }
        let loaded = self
            .store
            .load_breaker_state(strategy_name)
            .unwrap_or_else(|e| {
                warn!(strategy = strategy_name, error = %e, "Breaker state load failed, starting clean");
                None
            })
            .unwrap_or_default();
        self.states
            .insert(strategy_name.to_string(), loaded.clone());
        loaded
    }

    fn persist(&self, strategy_name: &str, state: &BreakerState) {
        self.states
            .insert(strategy_name.to_string(), state.clone());
        if let Err(e) = self.store.save_breaker_state(strategy_name, state) {
            warn!(strategy = strategy_name, error = %e, "Failed to persist breaker state");
        }
    }

    /// Whether the strategy is currently barred from producing proposals.
    ///
    /// Honors an unexpired stored disable; on expiry applies the probation
    /// protocol; otherwise re-evaluates thresholds against current metrics.
    pub fn is_disabled(&self, strategy_name: &str) -> bool {
        let now = self.ctx.time.now();
        let mut state = self.state(strategy_name);
        let config = self.settings.current().breaker;

        if state.disabled {
            match state.disabled_until {
                Some(until) if now < until => return true,
                Some(_) => {
                    // Disable window elapsed: probation gate.
                    if state.valid_detections_since_reset >= config.reenable_valid_detections
                        && state.losses_since_reset == 0
                    {
                        info!(
                            strategy = strategy_name,
                            detections = state.valid_detections_since_reset,
                            "✅ Breaker re-enabled after probation"
                        );
                        metrics::BREAKER_REENABLES.inc();
                        state.disabled = false;
                        state.disabled_until = None;
                        state.disable_reason = None;
                        state.valid_detections_since_reset = 0;
                        state.losses_since_reset = 0;
                        // Exclude pre-probation records from future
                        // threshold evaluation.
                        state.metrics_watermark = Some(now);
                        self.persist(strategy_name, &state);
                        return false;
                    }
                    // Probation failed: extend and restart the attempt.
                    let until = now + Duration::minutes(config.disable_duration_minutes);
                    warn!(
                        strategy = strategy_name,
                        detections = state.valid_detections_since_reset,
                        losses = state.losses_since_reset,
                        until = %until,
                        "Breaker probation not met, disable extended"
                    );
                    state.disabled_until = Some(until);
                    state.valid_detections_since_reset = 0;
                    state.losses_since_reset = 0;
                    self.persist(strategy_name, &state);
                    return true;
                }
                // No expiry: manual hold pending operator reset.
                None => return true,
            }
        }

        // Not disabled: check thresholds against current metrics.
        let strategy_metrics =
            match self.ledger.metrics_since(strategy_name, state.metrics_watermark) {
                Ok(m) => m,
                Err(e) => {
                    warn!(
                        strategy = strategy_name,
                        error = %e,
                        "📒 Ledger unreachable, breaker running degraded (fail-open)"
                    );
                    return false;
                }
            };

        if let Some(reason) = self.breach_reason(&strategy_metrics, &config) {
            let until = now + Duration::minutes(config.disable_duration_minutes);
            warn!(
                strategy = strategy_name,
                reason = %reason,
                until = %until,
                "🚨 Circuit breaker tripped"
            );
            metrics::BREAKER_TRIPS.inc();
            state.disabled = true;
            state.disabled_until = Some(until);
            state.disable_reason = Some(reason);
            state.valid_detections_since_reset = 0;
            state.losses_since_reset = 0;
            self.persist(strategy_name, &state);
            return true;
        }

        false
    }

    fn breach_reason(
        &self,
        m: &StrategyMetrics,
        config: &crate::config::BreakerConfig,
    ) -> Option<String> {
        if m.consecutive_losses >= config.max_consecutive_losses {
            return Some(format!(
                "{} consecutive losses (max {})",
                m.consecutive_losses, config.max_consecutive_losses
            ));
        }
        if m.total_trades >= config.min_trades_for_evaluation
            && m.win_rate() < config.min_win_rate
        {
            return Some(format!(
                "win rate {:.2} below {:.2} over {} trades",
                m.win_rate(),
                config.min_win_rate,
                m.total_trades
            ));
        }
        if m.current_drawdown_pct() >= config.max_drawdown_pct {
            return Some(format!(
                "drawdown {:.2}% at limit {}%",
                m.current_drawdown_pct(),
                config.max_drawdown_pct
            ));
        }
        None
    }

    /// Called by the selection engine each time a strategy's pattern passes
    /// its confidence gate. Feeds the probation counter while disabled.
    pub fn record_valid_detection(&self, strategy_name: &str) {
        let mut state = self.state(strategy_name);
        state.valid_detections_since_reset = state.valid_detections_since_reset.saturating_add(1);
        self.persist(strategy_name, &state);
    }

    /// Called after a closed trade lands in the ledger. A loss voids the
    /// probation streak.
    pub fn note_trade_closed(&self, record: &PerformanceRecord) {
        if record.result != TradeResult::Loss {
            return;
        }
        let mut state = self.state(&record.strategy_name);
        state.losses_since_reset = state.losses_since_reset.saturating_add(1);
        state.valid_detections_since_reset = 0;
        self.persist(&record.strategy_name, &state);
    }

    /// Manual operator reset: clears disable and probation state.
    pub fn reset(&self, strategy_name: &str) {
        self.states.remove(strategy_name);
        if let Err(e) = self.store.delete_breaker_state(strategy_name) {
            warn!(strategy = strategy_name, error = %e, "Failed to clear persisted breaker state");
        }
        info!(strategy = strategy_name, "Breaker manually reset");
    }

    /// Permanent hold (no expiry): stays disabled until manual reset.
    pub fn hold(&self, strategy_name: &str, reason: &str) {
        let mut state = self.state(strategy_name);
        state.disabled = true;
        state.disabled_until = None;
        state.disable_reason = Some(reason.to_string());
        self.persist(strategy_name, &state);
        warn!(strategy = strategy_name, reason, "Breaker manual hold engaged");
    }
}
