use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::SettingsHandle;
use crate::context::EngineContext;
use crate::detection_cache::DetectionCache;
use crate::metrics;
use crate::model::{FeatureSnapshot, PatternResult, PlanStatus, TradePlan};
use crate::strategy::{PatternSet, StrategyRegistry};

/// Deterministic resolution among multiple pattern instances found by one
/// detector: (a) highest confidence, (b) most confluence tags, (c) zone
/// nearest the current price, (d) most recent detection. Reproducible from
/// the same inputs; recency was chosen as the final key because a
/// volatility-regime weight would depend on state outside the snapshot.
pub fn rank_instances(
    instances: Vec<PatternResult>,
    current_price: Option<Decimal>,
) -> Option<PatternResult> {
    instances.into_iter().max_by(|a, b| {
        a.confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.confluence.len().cmp(&b.confluence.len()))
            .then_with(|| match current_price {
                Some(price) => {
                    let da = a.zone.map(|z| z.distance_to(price));
                    let db = b.zone.map(|z| z.distance_to(price));
                    match (da, db) {
                        // Nearer wins, so compare reversed.
                        (Some(da), Some(db)) => db.cmp(&da),
                        (Some(_), None) => Ordering::Greater,
                        (None, Some(_)) => Ordering::Less,
                        (None, None) => Ordering::Equal,
                    }
                }
                None => Ordering::Equal,
            })
            .then_with(|| a.detected_at.cmp(&b.detected_at))
    })
}

/// Evaluates the strategy registry against one feature snapshot.
///
/// Strategies are scanned in ascending priority tier; the first one that
/// produces a non-null draft wins and the scan terminates, so at most one
/// plan is proposed per sweep per symbol.
pub struct SelectionEngine {
    registry: Arc<StrategyRegistry>,
    cache: Arc<DetectionCache>,
    breaker: Arc<CircuitBreaker>,
    settings: Arc<SettingsHandle>,
    ctx: EngineContext,
}

impl SelectionEngine {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        cache: Arc<DetectionCache>,
        breaker: Arc<CircuitBreaker>,
        settings: Arc<SettingsHandle>,
        ctx: EngineContext,
    ) -> Self {
        Self {
            registry,
            cache,
            breaker,
            settings,
            ctx,
        }
    }

    /// One selection pass for one symbol. Returns at most one plan.
    pub async fn select(&self, snapshot: &FeatureSnapshot) -> Option<TradePlan> {
        let settings = self.settings.current();

        for descriptor in self.registry.iter() {
            let strategy_config = settings.strategy(&descriptor.name);
            if !strategy_config.enabled {
                continue;
            }
            let disabled = self.breaker.is_disabled(&descriptor.name);

            // All required patterns must be present; absence is not an error.
            let mut patterns = PatternSet::default();
            let mut missing = false;
            for kind in &descriptor.required_patterns {
                match self
                    .cache
                    .get_by_kind(&snapshot.symbol, descriptor.timeframe, *kind)
                    .await
                {
                    Some(result) => patterns.insert(result),
                    None => {
                        missing = true;
                        break;
                    }
                }
            }
            if missing {
                continue;
            }

            let confidence = patterns
                .get(descriptor.confidence_pattern)
                .map(|p| p.confidence)
                .unwrap_or(0.0);
            if confidence < strategy_config.min_confidence {
                debug!(symbol = %snapshot.symbol, strategy = %descriptor.name,
                       confidence, threshold = strategy_config.min_confidence,
                       "Skipped: below confidence threshold");
                continue;
            }
            // Counts toward re-enable probation even while disabled.
            self.breaker.record_valid_detection(&descriptor.name);

            if disabled {
                debug!(symbol = %snapshot.symbol, strategy = %descriptor.name,
                       "Circuit breaker disabled; detection recorded, no plan drafted");
                continue;
            }

            let draft = match descriptor.evaluator.evaluate(snapshot, &patterns).await {
                Ok(draft) => draft,
                Err(e) => {
                    // An evaluator failure must not abort the scan of
                    // lower-priority strategies.
                    warn!(symbol = %snapshot.symbol, strategy = %descriptor.name, error = %e,
                          "Evaluator failed, treating as no plan");
                    continue;
                }
            };

            if let Some(draft) = draft {
                let plan = TradePlan {
                    plan_id: self.ctx.id.new_id(),
                    symbol: draft.symbol,
                    direction: draft.direction,
                    entry_price: draft.entry_price,
                    stop_loss: draft.stop_loss,
                    target_price: draft.target_price,
                    conditions: draft.conditions,
                    status: PlanStatus::Pending,
                    strategy_name: descriptor.name.clone(),
                    created_at: self.ctx.time.now(),
                    ttl_minutes: settings.engine.plan_ttl_minutes,
                    notes: Vec::new(),
                };
                metrics::DRAFTS_PRODUCED.inc();
                info!(symbol = %plan.symbol, strategy = %plan.strategy_name,
                      plan_id = %plan.plan_id, tier = descriptor.priority_tier,
                      confidence, "🎯 Strategy selected, plan drafted");
                return Some(plan);
            }
        }

        None
    }
}
