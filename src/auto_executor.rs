use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::broker::BrokerExecutor;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::SettingsHandle;
use crate::context::EngineContext;
use crate::detection_cache::DetectionCache;
use crate::market_data::MarketData;
use crate::metrics;
use crate::model::{PlanCondition, PlanStatus, TradePlan};
use crate::notifier::Notifier;
use crate::persistence::store::PersistenceStore;
use crate::tolerance::calculate_tolerance;

/// Re-checks every pending trade plan's stored entry conditions against
/// fresh market state, deciding to execute, keep waiting, or expire.
///
/// Only `status` and `notes` are ever written back; all other plan fields
/// belong to the planning interface.
pub struct AutoExecutor {
    store: Arc<PersistenceStore>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<DetectionCache>,
    data: Arc<dyn MarketData>,
    broker: Arc<dyn BrokerExecutor>,
    notifier: Arc<dyn Notifier>,
    settings: Arc<SettingsHandle>,
    ctx: EngineContext,
}

struct ConditionReport {
    all_hold: bool,
    notes: Vec<String>,
}

impl AutoExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PersistenceStore>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<DetectionCache>,
        data: Arc<dyn MarketData>,
        broker: Arc<dyn BrokerExecutor>,
        notifier: Arc<dyn Notifier>,
        settings: Arc<SettingsHandle>,
        ctx: EngineContext,
    ) -> Self {
        Self {
            store,
            breaker,
            cache,
            data,
            broker,
            notifier,
            settings,
            ctx,
        }
    }

    /// One polling tick over all pending plans. Every per-plan failure
    /// degrades to "defer this plan"; the sweep itself never aborts.
    pub async fn sweep(&self) {
        let plans = match self.store.load_pending_plans() {
            Ok(plans) => plans,
            Err(e) => {
                warn!(error = %e, "Could not load pending plans, deferring sweep");
                return;
            }
        };
        metrics::PENDING_PLANS.set(plans.len() as i64);

        let budget = StdDuration::from_millis(self.settings.current().engine.plan_eval_budget_ms);
        for plan in &plans {
            if tokio::time::timeout(budget, self.evaluate_plan(plan))
                .await
                .is_err()
            {
                warn!(plan_id = %plan.plan_id, symbol = %plan.symbol,
                      "Plan evaluation exceeded budget, retried next cycle");
            }
        }
    }

    async fn evaluate_plan(&self, plan: &TradePlan) {
        // A breaker-disabled strategy neither executes nor expires its
        // plans; they wait out the disable window.
        if self.breaker.is_disabled(&plan.strategy_name) {
            debug!(plan_id = %plan.plan_id, strategy = %plan.strategy_name,
                   "Plan held: strategy disabled by circuit breaker");
            return;
        }

        let report = self.evaluate_conditions(plan).await;

        if report.all_hold {
            self.execute(plan, report.notes).await;
            return;
        }

        let now = self.ctx.time.now();
        if now - plan.created_at > Duration::minutes(plan.ttl_minutes) {
            let note = format!("expired after {} minutes unfilled", plan.ttl_minutes);
            if let Err(e) = self
                .store
                .update_plan_status(&plan.plan_id, PlanStatus::Expired, &[note])
            {
                warn!(plan_id = %plan.plan_id, error = %e, "Failed to persist expiry");
                return;
            }
            metrics::PLANS_EXPIRED.inc();
            info!(plan_id = %plan.plan_id, symbol = %plan.symbol, "⌛ Plan expired");
            return;
        }

        // Still pending; persist any warnings gathered during evaluation.
        if !report.notes.is_empty() {
            if let Err(e) =
                self.store
                    .update_plan_status(&plan.plan_id, PlanStatus::Pending, &report.notes)
            {
                warn!(plan_id = %plan.plan_id, error = %e, "Failed to persist plan notes");
            }
        }
    }

    /// All required conditions must simultaneously hold. An unknown or
    /// unevaluable condition is unsatisfied, never an approval.
    async fn evaluate_conditions(&self, plan: &TradePlan) -> ConditionReport {
        let settings = self.settings.current();
        let mut notes = Vec::new();

        for condition in &plan.conditions {
            let satisfied = match condition {
                PlanCondition::PriceNear { target, tolerance } => {
                    self.price_near_holds(plan, *target, *tolerance, &settings, &mut notes)
                        .await
                }
                PlanCondition::PriceAbove { level } => {
                    match self.data.get_current_price(&plan.symbol).await {
                        Some(price) => price > *level,
                        None => self.price_unavailable(plan),
                    }
                }
                PlanCondition::PriceBelow { level } => {
                    match self.data.get_current_price(&plan.symbol).await {
                        Some(price) => price < *level,
                        None => self.price_unavailable(plan),
                    }
                }
                PlanCondition::PatternPresent { pattern, timeframe } => {
                    self.cache
                        .get_by_kind(&plan.symbol, *timeframe, *pattern)
                        .await
                        .is_some()
                }
                PlanCondition::Unknown => {
                    warn!(plan_id = %plan.plan_id, symbol = %plan.symbol,
                          "Unknown condition kind on plan, treated as unsatisfied");
                    false
                }
            };

            if !satisfied {
                return ConditionReport {
                    all_hold: false,
                    notes,
                };
            }
        }

        ConditionReport {
            all_hold: true,
            notes,
        }
    }

    fn price_unavailable(&self, plan: &TradePlan) -> bool {
        warn!(plan_id = %plan.plan_id, symbol = %plan.symbol,
              "Current price unavailable, condition unsatisfied this cycle");
        false
    }

    async fn price_near_holds(
        &self,
        plan: &TradePlan,
        target: Decimal,
        explicit_tolerance: Option<Decimal>,
        settings: &crate::config::Settings,
        notes: &mut Vec<String>,
    ) -> bool {
        let Some(price) = self.data.get_current_price(&plan.symbol).await else {
            return self.price_unavailable(plan);
        };

        let atr = self
            .data
            .get_atr(
                &plan.symbol,
                settings.tolerance.atr_timeframe,
                settings.tolerance.atr_period,
            )
            .await;
        let dynamic = calculate_tolerance(&settings.tolerance, &plan.symbol, atr);

        // An explicit tolerance is honored only within twice the dynamic
        // bound; anything wider is a planning mistake we refuse to inherit.
        let effective = match explicit_tolerance {
            Some(explicit) if explicit <= dynamic * Decimal::TWO => explicit,
            Some(explicit) => {
                warn!(plan_id = %plan.plan_id, symbol = %plan.symbol,
                      explicit = %explicit, dynamic = %dynamic,
                      "Explicit tolerance exceeds 2x dynamic bound, overridden");
                let note = format!(
                    "tolerance {} exceeded 2x dynamic bound, overridden to {}",
                    explicit, dynamic
                );
                // Notes are append-only on the plan; the same override is
                // recorded once, not once per sweep.
                if !plan.notes.iter().any(|n| n == &note) {
                    notes.push(note);
                }
                dynamic
            }
            None => dynamic,
        };

        (price - target).abs() <= effective
    }

    async fn execute(&self, plan: &TradePlan, mut notes: Vec<String>) {
        let now_ms = self.ctx.time.now_millis();
        let idem_key = format!("submit:{}", plan.plan_id);

        // At-most-once: never resubmit while a prior submission's outcome
        // is unknown. A live key holds indefinitely; only a confirmed
        // rejection or an operator's broker reconciliation releases it.
        match self.store.check_idempotency(&idem_key) {
            Ok(true) => {}
            Ok(false) => {
                warn!(plan_id = %plan.plan_id,
                      "Prior submission outcome unknown, holding plan");
                return;
            }
            Err(e) => {
                warn!(plan_id = %plan.plan_id, error = %e,
                      "Idempotency check failed, refusing to submit");
                return;
            }
        }
        if let Err(e) = self.store.set_idempotency(&idem_key, now_ms) {
            warn!(plan_id = %plan.plan_id, error = %e,
                  "Could not record submission key, refusing to submit");
            return;
        }

        let broker_timeout =
            StdDuration::from_millis(self.settings.current().engine.broker_timeout_ms);
        match tokio::time::timeout(broker_timeout, self.broker.submit_order(plan)).await {
            Ok(Ok(ticket)) => {
                notes.push(format!("executed, broker ticket {}", ticket));
                if let Err(e) =
                    self.store
                        .update_plan_status(&plan.plan_id, PlanStatus::Executed, &notes)
                {
                    warn!(plan_id = %plan.plan_id, error = %e,
                          "Executed at broker but status persist failed");
                    return;
                }
                // Outcome confirmed and persisted; the key has done its job.
                if let Err(clear_err) = self.store.clear_idempotency(&idem_key) {
                    warn!(plan_id = %plan.plan_id, error = %clear_err,
                          "Failed to clear submission key after fill");
                }
                metrics::PLANS_EXECUTED.inc();
                info!(plan_id = %plan.plan_id, symbol = %plan.symbol,
                      strategy = %plan.strategy_name, ticket = %ticket, "✅ Plan executed");
            }
            Ok(Err(e)) => {
                // Confirmed failure: safe to retry next cycle.
                if let Err(clear_err) = self.store.clear_idempotency(&idem_key) {
                    warn!(plan_id = %plan.plan_id, error = %clear_err,
                          "Failed to clear submission key after broker rejection");
                }
                notes.push(format!("broker submission failed: {}", e));
                if let Err(persist_err) =
                    self.store
                        .update_plan_status(&plan.plan_id, PlanStatus::Pending, &notes)
                {
                    warn!(plan_id = %plan.plan_id, error = %persist_err,
                          "Failed to persist broker failure note");
                }
                metrics::BROKER_FAILURES.inc();
                self.notifier.warn(
                    &plan.plan_id,
                    &format!("broker submission failed for {}: {}", plan.symbol, e),
                );
            }
            Err(_) => {
                // Unknown outcome: the key stays live so the plan is never
                // blind-retried. Resolving it requires checking the broker
                // for the order and clearing the key by hand.
                notes.push("broker submission timed out, outcome unknown".to_string());
                if let Err(persist_err) =
                    self.store
                        .update_plan_status(&plan.plan_id, PlanStatus::Pending, &notes)
                {
                    warn!(plan_id = %plan.plan_id, error = %persist_err,
                          "Failed to persist broker timeout note");
                }
                metrics::BROKER_FAILURES.inc();
                self.notifier.warn(
                    &plan.plan_id,
                    &format!(
                        "broker submission timed out for {}; reconcile with the broker and clear the submission key to release the plan",
                        plan.symbol
                    ),
                );
            }
        }
    }
}
