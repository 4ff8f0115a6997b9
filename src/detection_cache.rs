use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::context::EngineContext;
use crate::detectors::PatternDetector;
use crate::market_data::MarketData;
use crate::metrics;
use crate::model::{PatternKind, PatternResult};
use crate::selection::rank_instances;
use crate::session::{SessionLabel, session_at};
use crate::timeframe::Timeframe;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    symbol: String,
    timeframe: Timeframe,
    detector_id: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    bar_bucket: i64,
    session: SessionLabel,
    inserted_at_ms: i64,
    /// `None` is a cached "no pattern" outcome: a failed or empty detection
    /// stays negative only for the remainder of this bar bucket.
    result: Option<PatternResult>,
}

/// Detection-result cache keyed by (symbol, timeframe, detector, bar bucket).
///
/// Repeated `get` calls within one unclosed bar return the identical cached
/// value. Entries for a symbol are purged whenever its trading session
/// changes. Bounded capacity; oldest entry evicted first. Detector failures
/// are swallowed into `None`, never propagated to callers.
pub struct DetectionCache {
    entries: DashMap<CacheKey, CacheEntry>,
    /// Per-key guards giving the at-most-one-concurrent-detection-per-key
    /// (single-flight) guarantee across concurrent sweeps.
    flights: DashMap<CacheKey, Arc<Mutex<()>>>,
    detectors: HashMap<String, Arc<dyn PatternDetector>>,
    by_kind: HashMap<PatternKind, String>,
    data: Arc<dyn MarketData>,
    ctx: EngineContext,
    capacity: usize,
    detector_timeout: Duration,
}

impl DetectionCache {
    pub fn new(
        data: Arc<dyn MarketData>,
        ctx: EngineContext,
        capacity: usize,
        detector_timeout: Duration,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            detectors: HashMap::new(),
            by_kind: HashMap::new(),
            data,
            ctx,
            capacity,
            detector_timeout,
        }
    }

    pub fn register(&mut self, detector: Arc<dyn PatternDetector>) {
        self.by_kind
            .insert(detector.kind(), detector.id().to_string());
        self.detectors.insert(detector.id().to_string(), detector);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached entry for a symbol.
    pub fn invalidate_symbol(&self, symbol: &str) {
        self.entries.retain(|key, _| key.symbol != symbol);
    }

    /// Cached detection lookup by pattern kind.
    pub async fn get_by_kind(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        kind: PatternKind,
    ) -> Option<PatternResult> {
        let detector_id = self.by_kind.get(&kind)?.clone();
        self.get(symbol, timeframe, &detector_id).await
    }

    /// Cached detection lookup. On a miss the registered detector runs under
    /// a timeout and its output is normalized to a single ranked instance.
    pub async fn get(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        detector_id: &str,
    ) -> Option<PatternResult> {
        let now = self.ctx.time.now();
        let now_ms = self.ctx.time.now_millis();
        let session = session_at(now);
        let bucket = timeframe.bar_bucket(now_ms);

        self.purge_stale_session(symbol, session);

        let key = CacheKey {
            symbol: symbol.to_string(),
            timeframe,
            detector_id: detector_id.to_string(),
        };

        if let Some(hit) = self.fresh_entry(&key, bucket) {
            metrics::CACHE_HITS.inc();
            return hit;
        }

        // Single-flight: only one sweep runs the detector for this key.
        let flight = self
            .flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Another sweep may have filled the entry while we waited.
        if let Some(hit) = self.fresh_entry(&key, bucket) {
            metrics::CACHE_HITS.inc();
            return hit;
        }
        metrics::CACHE_MISSES.inc();

        let result = self.invoke_detector(symbol, timeframe, detector_id).await;

        self.entries.insert(
            key,
            CacheEntry {
                bar_bucket: bucket,
                session,
                inserted_at_ms: now_ms,
                result: result.clone(),
            },
        );
        self.enforce_capacity();

        result
    }

    fn fresh_entry(&self, key: &CacheKey, bucket: i64) -> Option<Option<PatternResult>> {
        let entry = self.entries.get(key)?;
        if entry.bar_bucket == bucket {
            Some(entry.result.clone())
        } else {
            None
        }
    }

    async fn invoke_detector(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        detector_id: &str,
    ) -> Option<PatternResult> {
        let Some(detector) = self.detectors.get(detector_id) else {
            warn!(detector = detector_id, "No detector registered under this id");
            return None;
        };

        let outcome = tokio::time::timeout(
            self.detector_timeout,
            detector.detect(symbol, timeframe, self.data.as_ref()),
        )
        .await;

        let instances = match outcome {
            Ok(Ok(instances)) => instances,
            Ok(Err(e)) => {
                metrics::DETECTOR_FAILURES.inc();
                warn!(symbol, timeframe = %timeframe, detector = detector_id, error = %e,
                      "Detector failed, treating as no pattern this bar");
                return None;
            }
            Err(_) => {
                metrics::DETECTOR_FAILURES.inc();
                warn!(symbol, timeframe = %timeframe, detector = detector_id,
                      "Detector timed out, treating as no pattern this bar");
                return None;
            }
        };

        let current_price = self.data.get_current_price(symbol).await;
        rank_instances(instances, current_price)
    }

    /// Drop all entries for `symbol` written under a different session than
    /// the one now in effect. Runs before every read. The count is taken
    /// inside the retain closure: concurrent sweeps insert entries while
    /// this runs, so a before/after length diff would be wrong.
    fn purge_stale_session(&self, symbol: &str, session: SessionLabel) {
        let mut purged = 0usize;
        self.entries.retain(|key, entry| {
            let keep = key.symbol != symbol || entry.session == session;
            if !keep {
                purged += 1;
            }
            keep
        });
        if purged > 0 {
            metrics::SESSION_PURGES.inc();
            debug!(symbol, session = %session, purged, "Session change purged cached detections");
        }
    }

    fn enforce_capacity(&self) {
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at_ms)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
