pub mod auto_executor;
pub mod broker;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod detection_cache;
pub mod detectors;
pub mod error;
pub mod ledger;
pub mod market_data;
pub mod metrics;
pub mod model;
pub mod notifier;
pub mod persistence;
pub mod selection;
pub mod session;
pub mod strategy;
pub mod sweep;
pub mod timeframe;
pub mod tolerance;
