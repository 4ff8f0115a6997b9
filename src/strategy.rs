use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::model::{
    Direction, FeatureSnapshot, PatternKind, PatternResult, PlanCondition, TradePlanDraft,
};
use crate::timeframe::Timeframe;

/// Resolved patterns handed to an evaluator: one ranked instance per
/// required kind, all confirmed present before the evaluator runs.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: HashMap<PatternKind, PatternResult>,
}

impl PatternSet {
    pub fn insert(&mut self, result: PatternResult) {
        self.patterns.insert(result.kind, result);
    }

    pub fn get(&self, kind: PatternKind) -> Option<&PatternResult> {
        self.patterns.get(&kind)
    }
}

/// A strategy's decision function: one implementing type per strategy.
/// Returning `Ok(None)` means "setup not present"; errors are logged by the
/// selection engine and treated the same way.
#[async_trait]
pub trait StrategyEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        snapshot: &FeatureSnapshot,
        patterns: &PatternSet,
    ) -> Result<Option<TradePlanDraft>, EngineError>;
}

/// Static registration record: created once at startup, immutable after.
#[derive(Clone)]
pub struct StrategyDescriptor {
    pub name: String,
    /// Lower tier evaluated first.
    pub priority_tier: u8,
    pub required_patterns: Vec<PatternKind>,
    /// Which pattern's confidence gates this strategy.
    pub confidence_pattern: PatternKind,
    pub timeframe: Timeframe,
    pub evaluator: Arc<dyn StrategyEvaluator>,
}

/// Ordered strategy registry. Ordering is fixed at construction:
/// ascending tier, then name, so scans are reproducible.
pub struct StrategyRegistry {
    entries: Vec<StrategyDescriptor>,
}

impl StrategyRegistry {
    pub fn new(mut entries: Vec<StrategyDescriptor>) -> Self {
        entries.sort_by(|a, b| {
            a.priority_tier
                .cmp(&b.priority_tier)
                .then_with(|| a.name.cmp(&b.name))
        });
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The built-in strategy set: order-block retest at tier 0, FVG fill
    /// at tier 1.
    pub fn builtin(timeframe: Timeframe) -> Self {
        Self::new(vec![
            StrategyDescriptor {
                name: "ob_retest".to_string(),
                priority_tier: 0,
                required_patterns: vec![PatternKind::OrderBlock],
                confidence_pattern: PatternKind::OrderBlock,
                timeframe,
                evaluator: Arc::new(OrderBlockRetest::default()),
            },
            StrategyDescriptor {
                name: "fvg_fill".to_string(),
                priority_tier: 1,
                required_patterns: vec![PatternKind::FairValueGap],
                confidence_pattern: PatternKind::FairValueGap,
                timeframe,
                evaluator: Arc::new(FvgFill::default()),
            },
        ])
    }
}

/// Shared zone-entry construction: trade back into the zone with the stop
/// beyond it and a fixed 2R target.
fn zone_entry_draft(
    snapshot: &FeatureSnapshot,
    pattern: &PatternResult,
    timeframe: Timeframe,
    max_distance_zones: Decimal,
) -> Option<TradePlanDraft> {
    let zone = pattern.zone?;
    let height = zone.high - zone.low;
    if height <= Decimal::ZERO {
        return None;
    }
    // Too far from the zone: the setup is no longer actionable.
    if zone.distance_to(snapshot.current_price) > height * max_distance_zones {
        return None;
    }

    let price = snapshot.current_price;
    let buffer = height * dec!(0.25);
    let (direction, entry, stop) = if price >= zone.midpoint() {
        // Demand below price: buy the retest of the zone top.
        (Direction::Long, zone.high, zone.low - buffer)
    } else {
        // Supply above price: sell the retest of the zone bottom.
        (Direction::Short, zone.low, zone.high + buffer)
    };
    let risk = (entry - stop).abs();
    let target = match direction {
        Direction::Long => entry + risk * Decimal::TWO,
        Direction::Short => entry - risk * Decimal::TWO,
    };

    Some(TradePlanDraft {
        symbol: snapshot.symbol.clone(),
        direction,
        entry_price: entry,
        stop_loss: stop,
        target_price: target,
        conditions: vec![
            PlanCondition::PriceNear {
                target: entry,
                tolerance: None,
            },
            PlanCondition::PatternPresent {
                pattern: pattern.kind,
                timeframe,
            },
        ],
    })
}

/// Tier-0 strategy: enter on a retest of a confirmed order block.
pub struct OrderBlockRetest {
    timeframe: Timeframe,
    max_distance_zones: Decimal,
}

impl Default for OrderBlockRetest {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M15,
            max_distance_zones: dec!(3),
        }
    }
}

#[async_trait]
impl StrategyEvaluator for OrderBlockRetest {
    async fn evaluate(
        &self,
        snapshot: &FeatureSnapshot,
        patterns: &PatternSet,
    ) -> Result<Option<TradePlanDraft>, EngineError> {
        let Some(pattern) = patterns.get(PatternKind::OrderBlock) else {
            return Ok(None);
        };
        Ok(zone_entry_draft(
            snapshot,
            pattern,
            self.timeframe,
            self.max_distance_zones,
        ))
    }
}

/// Tier-1 strategy: enter as price trades back to fill a fair value gap.
pub struct FvgFill {
    timeframe: Timeframe,
    max_distance_zones: Decimal,
}

impl Default for FvgFill {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M15,
            max_distance_zones: dec!(2),
        }
    }
}

#[async_trait]
impl StrategyEvaluator for FvgFill {
    async fn evaluate(
        &self,
        snapshot: &FeatureSnapshot,
        patterns: &PatternSet,
    ) -> Result<Option<TradePlanDraft>, EngineError> {
        let Some(pattern) = patterns.get(PatternKind::FairValueGap) else {
            return Ok(None);
        };
        Ok(zone_entry_draft(
            snapshot,
            pattern,
            self.timeframe,
            self.max_distance_zones,
        ))
    }
}
