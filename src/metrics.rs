use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

// --- Detection Cache ---

pub static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_detection_cache_hits_total",
        "Detection cache hits within the current bar bucket"
    )
    .expect("cache_hits counter")
});

pub static CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_detection_cache_misses_total",
        "Detection cache misses requiring a detector invocation"
    )
    .expect("cache_misses counter")
});

pub static SESSION_PURGES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_detection_session_purges_total",
        "Cache purges triggered by a trading-session change"
    )
    .expect("session_purges counter")
});

pub static DETECTOR_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_detector_failures_total",
        "Detector invocations that failed or timed out"
    )
    .expect("detector_failures counter")
});

// --- Circuit Breaker ---

pub static BREAKER_TRIPS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_breaker_trips_total",
        "Strategies disabled by the circuit breaker"
    )
    .expect("breaker_trips counter")
});

pub static BREAKER_REENABLES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_breaker_reenables_total",
        "Strategies re-enabled after passing probation"
    )
    .expect("breaker_reenables counter")
});

// --- Selection & Plans ---

pub static DRAFTS_PRODUCED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_selection_drafts_total",
        "Trade plan drafts produced by the selection engine"
    )
    .expect("drafts_produced counter")
});

pub static PLANS_EXECUTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_plans_executed_total",
        "Plans whose conditions held and were handed to the broker"
    )
    .expect("plans_executed counter")
});

pub static PLANS_EXPIRED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("helm_plans_expired_total", "Plans expired past their TTL")
        .expect("plans_expired counter")
});

pub static BROKER_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helm_broker_failures_total",
        "Broker submissions that failed; plan left pending for retry"
    )
    .expect("broker_failures counter")
});

pub static PENDING_PLANS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "helm_pending_plans",
        "Plans currently pending auto-execution"
    )
    .expect("pending_plans gauge")
});
