//! 128-bit fixed-point asset amounts.
//!
//! Partial executions are tracked with [`FRACTIONAL_RADIX`] fractional bits
//! so that a chain of partial fills never loses precision. Rounding is always
//! explicit: [`FractionalAsset::floor`] for amounts paid out,
//! [`FractionalAsset::ceil`] for amounts that must be covered.

use std::fmt;

/// Number of fractional bits in a [`FractionalAsset`].
pub const FRACTIONAL_RADIX: u32 = 10;

const FRACTION_MASK: u128 = (1 << FRACTIONAL_RADIX) - 1;

/// Unsigned fixed-point amount with [`FRACTIONAL_RADIX`] fractional bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FractionalAsset {
    value: u128,
}

impl FractionalAsset {
    pub const ZERO: FractionalAsset = FractionalAsset { value: 0 };

    /// Wrap a raw fixed-point value.
    #[inline]
    pub const fn from_raw(value: u128) -> Self {
        Self { value }
    }

    /// Whole-unit amount. Always exact: a `u64` shifted by the radix fits.
    #[inline]
    pub const fn from_integral(amount: u64) -> Self {
        Self {
            value: (amount as u128) << FRACTIONAL_RADIX,
        }
    }

    /// Whole-unit amount from a wide sum. `None` if the shift overflows.
    pub fn try_from_integral(amount: u128) -> Option<Self> {
        if amount.leading_zeros() < FRACTIONAL_RADIX {
            return None;
        }
        Some(Self {
            value: amount << FRACTIONAL_RADIX,
        })
    }

    #[inline]
    pub const fn raw(self) -> u128 {
        self.value
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.value == 0
    }

    /// Integer part, rounded down.
    #[inline]
    pub const fn floor(self) -> u128 {
        self.value >> FRACTIONAL_RADIX
    }

    /// Integer part, rounded up.
    #[inline]
    pub const fn ceil(self) -> u128 {
        let whole = self.value >> FRACTIONAL_RADIX;
        if self.value & FRACTION_MASK != 0 {
            whole + 1
        } else {
            whole
        }
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.value.checked_add(other.value).map(Self::from_raw)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.value.checked_sub(other.value).map(Self::from_raw)
    }

    /// Withhold a fee of `2^-tax_rate`, rounding the fee up.
    pub fn tax(self, tax_rate: u8) -> Self {
        let shift = tax_rate as u32;
        let mut fee = self.value.checked_shr(shift).unwrap_or(0);
        let low_mask = if shift >= 128 {
            u128::MAX
        } else {
            (1u128 << shift) - 1
        };
        if self.value & low_mask != 0 {
            fee += 1;
        }
        Self::from_raw(self.value.saturating_sub(fee))
    }

    /// Withhold the fee and round down to whole units.
    #[inline]
    pub fn tax_and_round(self, tax_rate: u8) -> u128 {
        self.tax(tax_rate).floor()
    }
}

impl fmt::Debug for FractionalAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FractionalAsset({} + {}/{})",
            self.floor(),
            self.value & FRACTION_MASK,
            1u32 << FRACTIONAL_RADIX
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
