//! Fixed-point prices and exchange-rate math.
//!
//! ## Representation
//!
//! A [`Price`] is a `u64` with [`PRICE_RADIX`] fractional bits. Only the low
//! [`PRICE_BIT_LEN`] bits may be set, so a price fits in [`PRICE_BYTES`]
//! big-endian bytes at the front of an [`OrderKey`](crate::types::OrderKey).
//!
//! ## Execution Bounds
//!
//! Clearing at prices `(sell, buy)` uses the exchange rate `sell / buy` as an
//! upper bound and `rate - (rate >> smooth_mult)` as a lower bound. Offers
//! with a minimum price under the lower bound execute in full, offers inside
//! the band may execute partially.
//!
//! ## Examples
//!
//! ```
//! use sharded_clearing::types::price::{to_fixed, from_fixed, PRICE_ONE};
//!
//! let p = to_fixed("1.5").unwrap();
//! assert_eq!(p, PRICE_ONE + PRICE_ONE / 2);
//! assert_eq!(from_fixed(p), "1.5");
//! ```

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Fixed-point price with [`PRICE_RADIX`] fractional bits.
pub type Price = u64;

/// Number of fractional bits in a [`Price`].
pub const PRICE_RADIX: u32 = 24;

/// Number of significant bits in a valid [`Price`].
pub const PRICE_BIT_LEN: u32 = 48;

/// Width of a price inside an order key.
pub const PRICE_BYTES: usize = 6;

/// The price `1.0`.
pub const PRICE_ONE: Price = 1 << PRICE_RADIX;

/// Largest representable price.
pub const MAX_PRICE: Price = (1 << PRICE_BIT_LEN) - 1;

/// Check that a price is nonzero and fits in [`PRICE_BIT_LEN`] bits.
#[inline]
pub fn is_valid_price(price: Price) -> bool {
    price != 0 && price <= MAX_PRICE
}

/// Write the low [`PRICE_BYTES`] bytes of `price` big-endian.
#[inline]
pub fn write_price_big_endian(buf: &mut [u8], price: Price) {
    let bytes = price.to_be_bytes();
    buf[..PRICE_BYTES].copy_from_slice(&bytes[8 - PRICE_BYTES..]);
}

/// Read a big-endian price from the first [`PRICE_BYTES`] bytes of `buf`.
#[inline]
pub fn read_price_big_endian(buf: &[u8]) -> Price {
    let mut bytes = [0u8; 8];
    bytes[8 - PRICE_BYTES..].copy_from_slice(&buf[..PRICE_BYTES]);
    u64::from_be_bytes(bytes)
}

// ============================================================================
// Decimal Conversion
// ============================================================================

/// Parse a decimal string into a fixed-point price.
///
/// # Returns
///
/// * `Some(Price)` - rounded to the nearest representable value
/// * `None` - negative, unparseable, or larger than [`MAX_PRICE`]
///
/// # Example
///
/// ```
/// use sharded_clearing::types::price::{to_fixed, PRICE_ONE};
///
/// assert_eq!(to_fixed("1"), Some(PRICE_ONE));
/// assert_eq!(to_fixed("0.25"), Some(PRICE_ONE / 4));
/// assert_eq!(to_fixed("-1"), None);
/// ```
pub fn to_fixed(s: &str) -> Option<Price> {
    let decimal = Decimal::from_str(s).ok()?;
    decimal_to_fixed(decimal)
}

/// Convert a Decimal to a fixed-point price.
pub fn decimal_to_fixed(d: Decimal) -> Option<Price> {
    if d.is_sign_negative() {
        return None;
    }
    let scaled = d.checked_mul(Decimal::from(PRICE_ONE))?;
    let price = scaled.round_dp(0).to_u64()?;
    (price <= MAX_PRICE).then_some(price)
}

/// Convert a fixed-point price to a Decimal.
pub fn fixed_to_decimal(price: Price) -> Decimal {
    Decimal::from(price) / Decimal::from(PRICE_ONE)
}

/// Render a price without trailing zeros.
pub fn from_fixed(price: Price) -> String {
    format!("{}", fixed_to_decimal(price).normalize())
}

// ============================================================================
// Exchange-Rate Math
// ============================================================================

/// Exchange rate `sell / buy` with [`PRICE_RADIX`] fractional bits.
///
/// Returns `None` when `buy` is zero or the rate does not fit in a `u64`.
pub fn divide_prices(sell_price: Price, buy_price: Price) -> Option<Price> {
    if buy_price == 0 {
        return None;
    }
    let ratio = ((sell_price as u128) << 64) / buy_price as u128;
    u64::try_from(ratio >> (64 - PRICE_RADIX)).ok()
}

/// Lower and upper execution-price bounds for one market.
///
/// `upper` is the exact exchange rate, `lower = upper - (upper >> smooth_mult)`.
/// A `smooth_mult` of zero collapses the band to a single price.
pub fn execution_price_bounds(
    sell_price: Price,
    buy_price: Price,
    smooth_mult: u8,
) -> Option<(Price, Price)> {
    let upper = divide_prices(sell_price, buy_price)?;
    let lower = if smooth_mult == 0 {
        upper
    } else {
        upper - upper.checked_shr(smooth_mult as u32).unwrap_or(0)
    };
    Some((lower, upper))
}

/// Compute `value * a / b` without overflowing the intermediate product.
///
/// Rounds down. Returns `None` when `b` is zero or the result overflows.
///
/// # Example
///
/// ```
/// use sharded_clearing::types::price::wide_multiply_val_by_a_over_b;
///
/// assert_eq!(wide_multiply_val_by_a_over_b(10, 3, 2), Some(15));
/// assert_eq!(wide_multiply_val_by_a_over_b(u128::MAX, 1, 1), Some(u128::MAX));
/// ```
pub fn wide_multiply_val_by_a_over_b(value: u128, a: u64, b: u64) -> Option<u128> {
    if b == 0 {
        return None;
    }
    let (a, b) = (a as u128, b as u128);
    let high = (value / b).checked_mul(a)?;
    let low = (value % b).checked_mul(a)? / b;
    high.checked_add(low)
}

/// True when `a / b < c`, with `c` a fixed-point price.
#[inline]
pub fn a_over_b_lt_c(a: Price, b: Price, c: Price) -> bool {
    ((a as u128) << PRICE_RADIX) < (b as u128) * (c as u128)
}

// ============================================================================
// Unit Tests
// ============================================================================
