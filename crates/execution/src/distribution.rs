//! Pure size/price distribution math for order ladders.
//!
//! Both functions are total and side-effect-free; they never consult the
//! network. Input validation (positive sizes, non-negative skew, band
//! ordering) is the calling driver's responsibility.

use rust_decimal::Decimal;

/// Splits `total` across `num_orders` slots according to the skew exponent.
///
/// A skew of zero produces an equal split. A positive skew weights the slots
/// by `(i + 1)^skew` and assigns the heaviest weight to the *first* slot, so
/// size concentrates at the start of the ladder and decays toward the end.
/// `num_orders == 0` degenerates to a single order of the full size.
pub fn distribute_size(total: Decimal, num_orders: usize, skew: f64) -> Vec<Decimal> {
    if num_orders == 0 {
        return vec![total];
    }

    if skew == 0.0 {
        let share = total / Decimal::from(num_orders as u64);
        return vec![share; num_orders];
    }

    let weights: Vec<f64> = (0..num_orders)
        .map(|i| ((i + 1) as f64).powf(skew))
        .collect();
    let total_weight: f64 = weights.iter().sum();

    // Largest weight first: the rung nearest the start price carries the
    // most size.
    weights
        .iter()
        .rev()
        .map(|w| total * Decimal::from_f64_retain(w / total_weight).unwrap_or_default())
        .collect()
}

/// Linearly interpolates `num_orders` price levels from `start` to `end`,
/// inclusive of both endpoints.
///
/// The caller is responsible for ensuring the start/end ordering matches the
/// order side (buys descend, sells ascend); the driver swaps an inverted pair
/// before calling. `num_orders <= 1` returns `[start]`.
pub fn price_levels(_is_buy: bool, num_orders: usize, start: Decimal, end: Decimal) -> Vec<Decimal> {
    if num_orders <= 1 {
        return vec![start];
    }

    let step = (end - start) / Decimal::from((num_orders - 1) as u64);
    let mut prices: Vec<Decimal> = (0..num_orders)
        .map(|i| start + step * Decimal::from(i as u64))
        .collect();
    // Pin the final level so division rounding never drifts the endpoint.
    prices[num_orders - 1] = end;
    prices
}
