use config::{Config, ConfigError, Environment, File};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::sync::Once;
use tracing::{info, warn};

use crate::timeframe::Timeframe;

static MISSING_CONFIG_LOGGED: Once = Once::new();

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Per-strategy overrides, keyed by strategy name. A strategy absent
    /// from this map stays disabled: missing configuration fails toward
    /// "no trading", never "silently always-on".
    #[serde(default)]
    pub strategies: HashMap<String, StrategyConfig>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Per-plan evaluation budget; exceeding it defers the plan.
    #[serde(default = "default_plan_budget")]
    pub plan_eval_budget_ms: u64,
    #[serde(default = "default_detector_timeout")]
    pub detector_timeout_ms: u64,
    #[serde(default = "default_broker_timeout")]
    pub broker_timeout_ms: u64,
    #[serde(default = "default_plan_ttl")]
    pub plan_ttl_minutes: i64,
    #[serde(default = "default_cache_capacity")]
    pub detection_cache_capacity: usize,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_plan_budget() -> u64 {
    150
}
fn default_detector_timeout() -> u64 {
    2000
}
fn default_broker_timeout() -> u64 {
    5000
}
fn default_plan_ttl() -> i64 {
    240
}
fn default_cache_capacity() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            symbols: Vec::new(),
            plan_eval_budget_ms: default_plan_budget(),
            detector_timeout_ms: default_detector_timeout(),
            broker_timeout_ms: default_broker_timeout(),
            plan_ttl_minutes: default_plan_ttl(),
            detection_cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    0.7
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: default_min_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_min_win_rate")]
    pub min_win_rate: f64,
    /// Win-rate is not judged before this many closed trades.
    #[serde(default = "default_min_trades")]
    pub min_trades_for_evaluation: u64,
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown_pct: Decimal,
    #[serde(default = "default_disable_duration")]
    pub disable_duration_minutes: i64,
    /// Consecutive valid detections required to pass re-enable probation.
    #[serde(default = "default_reenable_detections")]
    pub reenable_valid_detections: u32,
}

fn default_max_consecutive_losses() -> u32 {
    3
}
fn default_min_win_rate() -> f64 {
    0.35
}
fn default_min_trades() -> u64 {
    10
}
fn default_max_drawdown() -> Decimal {
    dec!(15)
}
fn default_disable_duration() -> i64 {
    60
}
fn default_reenable_detections() -> u32 {
    3
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: default_max_consecutive_losses(),
            min_win_rate: default_min_win_rate(),
            min_trades_for_evaluation: default_min_trades(),
            max_drawdown_pct: default_max_drawdown(),
            disable_duration_minutes: default_disable_duration(),
            reenable_valid_detections: default_reenable_detections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToleranceConfig {
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: Decimal,
    #[serde(default = "default_min_tolerance")]
    pub min_tolerance: Decimal,
    #[serde(default = "default_max_tolerance")]
    pub max_tolerance: Decimal,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_atr_timeframe")]
    pub atr_timeframe: Timeframe,
    /// Per-symbol multiplier overrides, e.g. wider for high-volatility pairs.
    #[serde(default)]
    pub symbol_multipliers: HashMap<String, Decimal>,
}

fn default_atr_multiplier() -> Decimal {
    dec!(0.5)
}
fn default_min_tolerance() -> Decimal {
    dec!(0.05)
}
fn default_max_tolerance() -> Decimal {
    dec!(50)
}
fn default_atr_period() -> usize {
    14
}
fn default_atr_timeframe() -> Timeframe {
    Timeframe::M15
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            atr_multiplier: default_atr_multiplier(),
            min_tolerance: default_min_tolerance(),
            max_tolerance: default_max_tolerance(),
            atr_period: default_atr_period(),
            atr_timeframe: default_atr_timeframe(),
            symbol_multipliers: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "helm_state.redb".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Settings {
    /// Layered load: global config from ~/.helm/config, project config,
    /// local overrides, then HELM-prefixed environment variables,
    /// e.g. HELM_BREAKER__MAX_CONSECUTIVE_LOSSES=5.
    pub fn load() -> Result<Self, ConfigError> {
        let home = env::var("HOME").unwrap_or_else(|_| ".".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/.helm/config", home)).required(false))
            .add_source(File::with_name("config/config").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("HELM").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Load with fallback to documented defaults. The fallback is logged
    /// once; defaults keep every strategy disabled.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(settings) => settings,
            Err(e) => {
                MISSING_CONFIG_LOGGED.call_once(|| {
                    warn!("⚙️ Configuration unavailable ({}), using defaults: all strategies disabled", e);
                });
                Self::default()
            }
        }
    }

    pub fn strategy(&self, name: &str) -> StrategyConfig {
        self.strategies.get(name).cloned().unwrap_or_default()
    }
}

/// Shared, hot-reloadable settings handle.
pub struct SettingsHandle {
    inner: RwLock<Settings>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn current(&self) -> Settings {
        self.inner.read().clone()
    }

    /// Re-run the layered loader and swap the live settings in place.
    /// No restart required; sweeps pick up the new values next cycle.
    pub fn reload(&self) {
        let fresh = Settings::load_or_default();
        *self.inner.write() = fresh;
        info!("⚙️ Settings reloaded");
    }

    /// Replace settings directly (operator override, tests).
    pub fn replace(&self, settings: Settings) {
        *self.inner.write() = settings;
    }
}
