use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

use crate::error::EngineError;
use crate::market_data::{Bar, MarketData};
use crate::model::{PatternKind, PatternResult, PriceZone};
use crate::timeframe::Timeframe;

/// Contract a pattern detector must satisfy to plug into the cache.
/// A detector returns every instance it finds on the current window; the
/// cache normalizes them to a single ranked result. Bars, ATR and price
/// come only through the injected `MarketData` capability.
#[async_trait]
pub trait PatternDetector: Send + Sync {
    fn id(&self) -> &'static str;

    fn kind(&self) -> PatternKind;

    async fn detect(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        data: &dyn MarketData,
    ) -> Result<Vec<PatternResult>, EngineError>;
}

fn unavailable(symbol: &str, timeframe: Timeframe, reason: &str) -> EngineError {
    EngineError::DetectionUnavailable {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        reason: reason.to_string(),
    }
}

fn avg_volume(bars: &[Bar]) -> Decimal {
    if bars.is_empty() {
        return Decimal::ZERO;
    }
    bars.iter().map(|b| b.volume).sum::<Decimal>() / Decimal::from(bars.len())
}

/// Scale a displacement against ATR into a bounded confidence bonus.
fn displacement_bonus(displacement: Decimal, atr: Decimal) -> f64 {
    if atr <= Decimal::ZERO {
        return 0.0;
    }
    let ratio = (displacement / atr).to_f64().unwrap_or(0.0);
    (ratio * 0.15).min(0.3)
}

/// Reference order-block detector: the last opposing candle before a
/// displacement move. Deliberately simple; the full numeric detection
/// suite lives outside this engine.
pub struct OrderBlockDetector {
    lookback: usize,
}

impl OrderBlockDetector {
    pub fn new() -> Self {
        Self { lookback: 50 }
    }
}

impl Default for OrderBlockDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PatternDetector for OrderBlockDetector {
    fn id(&self) -> &'static str {
        "order_block"
    }

    fn kind(&self) -> PatternKind {
        PatternKind::OrderBlock
    }

    async fn detect(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        data: &dyn MarketData,
    ) -> Result<Vec<PatternResult>, EngineError> {
        let bars = data
            .get_bars(symbol, timeframe, self.lookback)
            .await
            .ok_or_else(|| unavailable(symbol, timeframe, "no bars"))?;
        if bars.len() < 3 {
            return Ok(Vec::new());
        }
        let atr = data
            .get_atr(symbol, timeframe, 14)
            .await
            .unwrap_or(Decimal::ZERO);
        let avg_vol = avg_volume(&bars);

        let mut found = Vec::new();
        for i in 0..bars.len() - 1 {
            let block = &bars[i];
            let displacing = &bars[i + 1];

            // Bullish: bearish block candle, next candle closes above its high.
            let bullish = block.is_bearish() && displacing.is_bullish() && displacing.close > block.high;
            // Bearish: bullish block candle, next candle closes below its low.
            let bearish = block.is_bullish() && displacing.is_bearish() && displacing.close < block.low;
            if !bullish && !bearish {
                continue;
            }

            let displacement = if bullish {
                displacing.close - block.high
            } else {
                block.low - displacing.close
            };

            let mut confluence = Vec::new();
            if avg_vol > Decimal::ZERO && displacing.volume > avg_vol * dec!(1.5) {
                confluence.push("volume_spike".to_string());
            }
            let prior_high = bars[..i].iter().map(|b| b.high).max();
            let prior_low = bars[..i].iter().map(|b| b.low).min();
            if bullish && prior_high.is_some_and(|h| displacing.close > h) {
                confluence.push("structure_break".to_string());
            }
            if bearish && prior_low.is_some_and(|l| displacing.close < l) {
                confluence.push("structure_break".to_string());
            }

            let confidence = (0.6 + displacement_bonus(displacement, atr)
                + if confluence.is_empty() { 0.0 } else { 0.05 })
            .min(1.0);

            found.push(PatternResult {
                kind: PatternKind::OrderBlock,
                confidence,
                zone: Some(PriceZone {
                    high: block.high,
                    low: block.low,
                }),
                confluence,
                detected_at: displacing.open_time,
            });
        }
        Ok(found)
    }
}

/// Reference fair-value-gap detector: a three-candle imbalance where the
/// outer candles do not overlap.
pub struct FairValueGapDetector {
    lookback: usize,
}

impl FairValueGapDetector {
    pub fn new() -> Self {
        Self { lookback: 50 }
    }
}

impl Default for FairValueGapDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PatternDetector for FairValueGapDetector {
    fn id(&self) -> &'static str {
        "fair_value_gap"
    }

    fn kind(&self) -> PatternKind {
        PatternKind::FairValueGap
    }

    async fn detect(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        data: &dyn MarketData,
    ) -> Result<Vec<PatternResult>, EngineError> {
        let bars = data
            .get_bars(symbol, timeframe, self.lookback)
            .await
            .ok_or_else(|| unavailable(symbol, timeframe, "no bars"))?;
        if bars.len() < 3 {
            return Ok(Vec::new());
        }
        let atr = data
            .get_atr(symbol, timeframe, 14)
            .await
            .unwrap_or(Decimal::ZERO);

        let mut found = Vec::new();
        for i in 2..bars.len() {
            let first = &bars[i - 2];
            let middle = &bars[i - 1];
            let last = &bars[i];

            let (zone, gap) = if last.low > first.high {
                // Bullish gap below current price
                (
                    PriceZone {
                        high: last.low,
                        low: first.high,
                    },
                    last.low - first.high,
                )
            } else if last.high < first.low {
                // Bearish gap above current price
                (
                    PriceZone {
                        high: first.low,
                        low: last.high,
                    },
                    first.low - last.high,
                )
            } else {
                continue;
            };

            let mut confluence = Vec::new();
            if atr > Decimal::ZERO && middle.range() > atr * dec!(1.5) {
                confluence.push("displacement_candle".to_string());
            }

            let confidence = (0.55 + displacement_bonus(gap, atr)
                + if confluence.is_empty() { 0.0 } else { 0.05 })
            .min(1.0);

            found.push(PatternResult {
                kind: PatternKind::FairValueGap,
                confidence,
                zone: Some(zone),
                confluence,
                detected_at: last.open_time,
            });
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::InMemoryMarketData;
    use chrono::{TimeZone, Utc};

    fn bar(i: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal, vol: Decimal) -> Bar {
        Bar {
            open_time: Utc.timestamp_millis_opt(1_700_000_000_000 + i * 900_000).unwrap(),
            open,
            high,
            low,
            close,
            volume: vol,
        }
    }

    #[tokio::test]
    async fn finds_bullish_order_block() {
        let data = InMemoryMarketData::new();
        data.set_bars(
            "EURUSD",
            Timeframe::M15,
            vec![
                bar(0, dec!(100), dec!(101), dec!(99), dec!(100.5), dec!(100)),
                bar(1, dec!(100.5), dec!(100.8), dec!(99.5), dec!(99.8), dec!(100)), // bearish block
                bar(2, dec!(99.8), dec!(102.5), dec!(99.7), dec!(102.2), dec!(300)), // displacement up
            ],
        );
        data.set_atr("EURUSD", Timeframe::M15, dec!(1.0));

        let detector = OrderBlockDetector::new();
        let results = detector
            .detect("EURUSD", Timeframe::M15, &data)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let ob = &results[0];
        assert_eq!(ob.kind, PatternKind::OrderBlock);
        assert!(ob.confidence > 0.6 && ob.confidence <= 1.0);
        let zone = ob.zone.unwrap();
        assert_eq!(zone.high, dec!(100.8));
        assert_eq!(zone.low, dec!(99.5));
        assert!(ob.confluence.contains(&"volume_spike".to_string()));
    }

    #[tokio::test]
    async fn finds_bullish_fvg() {
        let data = InMemoryMarketData::new();
        data.set_bars(
            "EURUSD",
            Timeframe::M15,
            vec![
                bar(0, dec!(100), dec!(100.5), dec!(99.5), dec!(100.2), dec!(100)),
                bar(1, dec!(100.2), dec!(103), dec!(100.1), dec!(102.9), dec!(100)),
                bar(2, dec!(102.9), dec!(103.5), dec!(101.5), dec!(103.1), dec!(100)),
            ],
        );
        data.set_atr("EURUSD", Timeframe::M15, dec!(1.0));

        let detector = FairValueGapDetector::new();
        let results = detector
            .detect("EURUSD", Timeframe::M15, &data)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let zone = results[0].zone.unwrap();
        assert_eq!(zone.low, dec!(100.5));
        assert_eq!(zone.high, dec!(101.5));
        assert!(results[0].confluence.contains(&"displacement_candle".to_string()));
    }

    #[tokio::test]
    async fn missing_bars_is_detection_unavailable() {
        let data = InMemoryMarketData::new();
        let detector = OrderBlockDetector::new();
        let err = detector
            .detect("GBPUSD", Timeframe::H1, &data)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DetectionUnavailable { .. }));
    }
}
