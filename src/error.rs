use thiserror::Error;

use crate::persistence::redb_store::StoreError;

/// Engine-level failures. Every variant degrades to "skip/defer this item";
/// none of them terminate the polling process.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detection unavailable for {symbol} {timeframe}: {reason}")]
    DetectionUnavailable {
        symbol: String,
        timeframe: String,
        reason: String,
    },

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("performance ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("broker submission failed for plan {plan_id}: {reason}")]
    BrokerSubmissionFailed { plan_id: String, reason: String },

    #[error("invalid condition on plan {plan_id}: {detail}")]
    InvalidPlanCondition { plan_id: String, detail: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
