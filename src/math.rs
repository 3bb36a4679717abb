//! Rate and quantity arithmetic
//!
//! All quantities and rates are truncated toward zero (floor) after every
//! arithmetic step so we never request more than the available balance.
//! Exchange-reported quantities carry floating-point noise, so equality
//! between successive readings goes through an epsilon comparison.

/// Default tolerance for comparing exchange-reported quantities.
pub const EPSILON: f64 = 1e-10;

/// Truncate `value` down to `precision` decimal places.
///
/// Floor, never round: rounding up a quantity can exceed the balance the
/// exchange will accept. Idempotent for any already-truncated value.
pub fn floor_to(value: f64, precision: u32) -> f64 {
    let shifted = shift_decimal(value, precision as i32);
    shift_decimal(shifted.floor(), -(precision as i32))
}

/// Shift the decimal point by `exp` places through the shortest decimal
/// representation. Multiplying by a power of ten instead would let binary
/// representation error cross an integer boundary (1.15 * 100 is
/// 114.999...; "1.15e2" parses to exactly 115), which makes flooring
/// non-idempotent.
fn shift_decimal(value: f64, exp: i32) -> f64 {
    let repr = format!("{:e}", value);
    match repr.split_once('e') {
        Some((mantissa, e)) => {
            let e: i32 = e.parse().unwrap_or(0);
            format!("{}e{}", mantissa, e + exp).parse().unwrap_or(value)
        }
        None => value,
    }
}

/// Compare two quantities with the given tolerance.
pub fn approx_eq_eps(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

/// Compare two quantities with the default tolerance.
pub fn approx_eq(a: f64, b: f64) -> bool {
    approx_eq_eps(a, b, EPSILON)
}

/// True if a remaining quantity is effectively zero.
pub fn is_zero(quantity: f64) -> bool {
    approx_eq(quantity, 0.0)
}
