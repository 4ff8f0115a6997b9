use rust_decimal::Decimal;

use crate::config::ToleranceConfig;

/// Dynamic price tolerance for `price_near` conditions:
/// `clamp(multiplier × ATR, min, max)`, with per-symbol multiplier
/// overrides. Monotonically non-decreasing in ATR and always within
/// `[min_tolerance, max_tolerance]`. A missing ATR degrades to the
/// minimum tolerance rather than failing the condition outright.
pub fn calculate_tolerance(
    config: &ToleranceConfig,
    symbol: &str,
    atr: Option<Decimal>,
) -> Decimal {
    let multiplier = config
        .symbol_multipliers
        .get(symbol)
        .copied()
        .unwrap_or(config.atr_multiplier);

    match atr {
        Some(atr) if atr > Decimal::ZERO => (multiplier * atr)
            .max(config.min_tolerance)
            .min(config.max_tolerance),
        _ => config.min_tolerance,
    }
}
