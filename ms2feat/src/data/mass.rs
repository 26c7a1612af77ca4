//! Mass values at a fixed decimal precision.
//!
//! Rounding is how near-duplicate masses are merged: two raw masses that round to the
//! same value at a given number of decimals collapse into one bucket. Buckets are kept as
//! `i64` keys (`round(mass * 10^decimals)`) so they can be hashed, ordered and compared
//! exactly, and are only turned back into `f64` at the edges.

use std::cmp::Ordering;

fn factor(decimals: u32) -> f64 {
    10f64.powi(decimals as i32)
}

/// Returns the bucket key of `value` at the given number of decimal places.
///
/// Halfway cases round to even.
///
/// # Example
///
/// ```rust
/// # use ms2feat::data::mass::quantize;
/// assert_eq!(quantize(280.004, 2), 28000);
/// assert_eq!(quantize(105.07, 1), 1051);
/// ```
pub fn quantize(value: f64, decimals: u32) -> i64 {
    (value * factor(decimals)).round_ties_even() as i64
}

/// Converts a bucket key back into a mass value.
pub fn dequantize(key: i64, decimals: u32) -> f64 {
    key as f64 / factor(decimals)
}

/// Rounds `value` to `decimals` decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    dequantize(quantize(value, decimals), decimals)
}

/// Moves a bucket key from one precision to another using integer arithmetic only.
///
/// Going to a coarser precision rounds half to even, going to a finer one is exact.
///
/// # Example
///
/// ```rust
/// # use ms2feat::data::mass::requantize;
/// assert_eq!(requantize(10507, 2, 1), 1051);
/// assert_eq!(requantize(10505, 2, 1), 1050);
/// assert_eq!(requantize(1051, 1, 2), 10510);
/// ```
pub fn requantize(key: i64, from: u32, to: u32) -> i64 {
    if to >= from {
        return key * 10i64.pow(to - from);
    }

    let divisor = 10i64.pow(from - to);
    let quotient = key.div_euclid(divisor);
    let remainder = key.rem_euclid(divisor);

    match (2 * remainder).cmp(&divisor) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient + 1,
        Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    }
}
