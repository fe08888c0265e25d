//! Size/price precision normalization against venue metadata.
//!
//! Normalization is never fatal: a failed metadata lookup falls back to a
//! conservative default precision with a warning, and the order proceeds.

use api_client::ExchangeConnector;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::warn;

/// Size precision assumed when the instrument's metadata is unavailable.
const FALLBACK_SIZE_DECIMALS: u32 = 2;
/// Price precision assumed when the instrument's metadata is unavailable.
const FALLBACK_PRICE_DECIMALS: u32 = 6;
/// Prices above this magnitude skip significant-figure rounding and round to
/// the nearest integer instead.
const INTEGER_PRICE_THRESHOLD: Decimal = dec!(100_000);
/// Significant figures kept for prices below the integer threshold.
const PRICE_SIG_FIGURES: i32 = 5;
/// Decimal cap for spot instruments.
const SPOT_PRICE_DECIMALS: u32 = 8;
/// Decimal cap for derivative instruments.
const PERP_PRICE_DECIMALS: u32 = 6;

/// Maps raw sizes and prices onto an instrument's precision rules.
#[derive(Clone)]
pub struct Normalizer {
    connector: Arc<dyn ExchangeConnector>,
}

impl Normalizer {
    pub fn new(connector: Arc<dyn ExchangeConnector>) -> Self {
        Self { connector }
    }

    /// Rounds a size to the instrument's size-decimal count.
    pub async fn normalize_size(&self, symbol: &str, size: Decimal) -> Decimal {
        match self.connector.get_instrument_precision(symbol).await {
            Ok(precision) => size.round_dp(precision.size_decimals),
            Err(e) => {
                warn!(symbol, %e, "size precision lookup failed, falling back to {FALLBACK_SIZE_DECIMALS} decimals");
                size.round_dp(FALLBACK_SIZE_DECIMALS)
            }
        }
    }

    /// Rounds a price to the instrument's price rule: integers above the
    /// magnitude threshold, otherwise five significant figures capped at the
    /// namespace's decimal limit.
    pub async fn normalize_price(&self, symbol: &str, price: Decimal) -> Decimal {
        if price > INTEGER_PRICE_THRESHOLD {
            return price.round_dp(0);
        }

        let rounded = round_significant(price, PRICE_SIG_FIGURES);
        match self.connector.get_instrument_precision(symbol).await {
            Ok(precision) => {
                let cap = if precision.is_derivative {
                    PERP_PRICE_DECIMALS
                } else {
                    SPOT_PRICE_DECIMALS
                };
                rounded.round_dp(precision.price_decimals.min(cap))
            }
            Err(e) => {
                warn!(symbol, %e, "price precision lookup failed, falling back to {FALLBACK_PRICE_DECIMALS} decimals");
                rounded.round_dp(FALLBACK_PRICE_DECIMALS)
            }
        }
    }
}

/// Rounds `value` to the given number of significant figures.
fn round_significant(value: Decimal, figures: i32) -> Decimal {
    let Some(f) = value.to_f64() else {
        return value;
    };
    if f == 0.0 {
        return value;
    }

    let magnitude = f.abs().log10().floor() as i32;
    let decimals = figures - 1 - magnitude;
    if decimals <= 0 {
        // Rounding happens left of the decimal point.
        let scale = Decimal::from(10u64.pow(decimals.unsigned_abs()));
        (value / scale).round() * scale
    } else {
        value.round_dp(decimals as u32)
    }
}
