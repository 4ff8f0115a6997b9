use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::timeframe::Timeframe;

/// Scalar/struct value carried in a feature snapshot.
/// Closed variant set: unknown shapes are rejected at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(Decimal),
    Flag(bool),
    Text(String),
    PerTimeframe(HashMap<Timeframe, HashMap<String, Decimal>>),
}

/// Immutable per-cycle market feature snapshot. Produced externally,
/// read-only inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub current_price: Decimal,
    #[serde(default)]
    pub fields: HashMap<String, FeatureValue>,
}

impl FeatureSnapshot {
    pub fn new(symbol: impl Into<String>, timestamp: DateTime<Utc>, current_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            current_price,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: FeatureValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&FeatureValue> {
        self.fields.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    OrderBlock,
    FairValueGap,
    StructureShift,
    LiquiditySweep,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Price zone a pattern occupies (high >= low).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceZone {
    pub high: Decimal,
    pub low: Decimal,
}

impl PriceZone {
    pub fn midpoint(&self) -> Decimal {
        (self.high + self.low) / Decimal::TWO
    }

    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.low && price <= self.high
    }

    /// Absolute distance from `price` to the zone midpoint.
    pub fn distance_to(&self, price: Decimal) -> Decimal {
        (self.midpoint() - price).abs()
    }
}

/// Normalized output of one detector invocation for one (symbol, timeframe).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternResult {
    pub kind: PatternKind,
    /// Confidence score in [0, 1].
    pub confidence: f64,
    pub zone: Option<PriceZone>,
    /// Corroborating signals, e.g. "volume_spike".
    #[serde(default)]
    pub confluence: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResult {
    #[serde(rename = "WIN")]
    Win,
    #[serde(rename = "LOSS")]
    Loss,
    #[serde(rename = "BREAKEVEN")]
    Breakeven,
}

/// One closed trade. Append-only; never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub strategy_name: String,
    pub symbol: String,
    pub result: TradeResult,
    pub pnl: Decimal,
    pub reward_multiple: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Materialized view over a strategy's performance records.
/// Incrementally updated on append; always reconstructible from records.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StrategyMetrics {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub breakevens: u64,
    pub sum_reward_multiple: Decimal,
    pub consecutive_losses: u32,
    pub equity: Decimal,
    pub peak_equity: Decimal,
}

impl StrategyMetrics {
    /// Fold one closed trade into the view.
    pub fn apply(&mut self, record: &PerformanceRecord) {
        self.total_trades += 1;
        self.sum_reward_multiple += record.reward_multiple;
        match record.result {
            TradeResult::Win => {
                self.wins += 1;
                self.consecutive_losses = 0;
            }
            TradeResult::Loss => {
                self.losses += 1;
                self.consecutive_losses += 1;
            }
            TradeResult::Breakeven => {
                self.breakevens += 1;
            }
        }
        self.equity += record.pnl;
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a PerformanceRecord>) -> Self {
        let mut metrics = Self::default();
        for record in records {
            metrics.apply(record);
        }
        metrics
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.wins as f64 / self.total_trades as f64
    }

    pub fn avg_reward_multiple(&self) -> Decimal {
        if self.total_trades == 0 {
            return Decimal::ZERO;
        }
        self.sum_reward_multiple / Decimal::from(self.total_trades)
    }

    /// Drawdown from peak equity, in percent. Zero when at or above peak,
    /// or when no profitable peak has been established yet.
    pub fn current_drawdown_pct(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let dd = (self.peak_equity - self.equity) / self.peak_equity * Decimal::ONE_HUNDRED;
        dd.max(Decimal::ZERO)
    }
}

/// Per-strategy circuit breaker state. Mutated only by the breaker;
/// persisted so a disable survives restart.
/// Invariant: `disabled == true` implies `disabled_until` is set, or the
/// strategy is held pending manual reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BreakerState {
    pub disabled: bool,
    pub disabled_until: Option<DateTime<Utc>>,
    pub disable_reason: Option<String>,
    /// Valid detections observed since re-enablement was last attempted.
    #[serde(default)]
    pub valid_detections_since_reset: u32,
    /// Losses recorded since re-enablement was last attempted.
    #[serde(default)]
    pub losses_since_reset: u32,
    /// Records closed at or before this instant are excluded from threshold
    /// evaluation; set when a strategy passes probation so stale losses do
    /// not immediately re-trip the breaker.
    #[serde(default)]
    pub metrics_watermark: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Pending,
    Executed,
    Expired,
    Cancelled,
}

impl PlanStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, PlanStatus::Pending)
    }
}

/// Entry condition on a trade plan. Closed tagged union: payloads with an
/// unrecognized `kind` deserialize to `Unknown` instead of failing, and are
/// treated as unsatisfied by the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanCondition {
    PriceNear {
        target: Decimal,
        #[serde(default)]
        tolerance: Option<Decimal>,
    },
    PriceAbove {
        level: Decimal,
    },
    PriceBelow {
        level: Decimal,
    },
    PatternPresent {
        pattern: PatternKind,
        timeframe: Timeframe,
    },
    #[serde(other)]
    Unknown,
}

/// Persisted trade plan. The auto-execution evaluator may only mutate
/// `status` and append to `notes`; all other fields belong to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePlan {
    pub plan_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub target_price: Decimal,
    #[serde(default)]
    pub conditions: Vec<PlanCondition>,
    pub status: PlanStatus,
    pub strategy_name: String,
    pub created_at: DateTime<Utc>,
    /// Time-to-live before the plan expires unexecuted.
    pub ttl_minutes: i64,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Draft produced by a strategy evaluator. The selection engine assigns
/// identity and timestamps when promoting it to a persisted plan.
#[derive(Debug, Clone)]
pub struct TradePlanDraft {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub target_price: Decimal,
    pub conditions: Vec<PlanCondition>,
}
