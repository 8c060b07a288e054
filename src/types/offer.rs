//! Offers and market categories.
//!
//! ## SSZ Serialization
//!
//! [`Offer`] derives `SimpleSerialize` from ssz_rs. The persisted value for
//! an order key is the SSZ encoding of its offer, a fixed-size container of
//! 8+8+4+4+1+8+8 = 41 bytes.
//!
//! ## Market Indexing
//!
//! With `n` assets there is one market per ordered pair `(sell, buy)` with
//! `sell != buy`, per [`OfferKind`]:
//!
//! ```text
//! idx = sell * (n - 1) + (buy - (buy > sell)) + n * (n - 1) * kind
//! ```

use ssz_rs::prelude::*;

use crate::types::key::OrderKey;
use crate::types::price::Price;

/// Asset identifier. Indexes the price vector.
pub type AssetId = u32;

/// Account identifier.
pub type AccountId = u64;

// ============================================================================
// OfferKind enum
// ============================================================================

/// Offer kind. Only resting sell offers exist.
///
/// Represented as u8 for SSZ compatibility:
/// - Sell = 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum OfferKind {
    #[default]
    Sell,
}

/// Number of [`OfferKind`] variants.
pub const NUM_OFFER_KINDS: usize = 1;

impl OfferKind {
    pub fn to_u8(self) -> u8 {
        match self {
            OfferKind::Sell => 0,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OfferKind::Sell),
            _ => None,
        }
    }
}

// ============================================================================
// OfferCategory
// ============================================================================

/// The market an offer belongs to: sell one asset for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OfferCategory {
    pub sell_asset: AssetId,
    pub buy_asset: AssetId,
    pub kind: OfferKind,
}

impl OfferCategory {
    pub fn new(sell_asset: AssetId, buy_asset: AssetId) -> Self {
        Self {
            sell_asset,
            buy_asset,
            kind: OfferKind::Sell,
        }
    }

    /// Both assets exist and differ.
    pub fn is_valid(&self, num_assets: u32) -> bool {
        self.sell_asset < num_assets
            && self.buy_asset < num_assets
            && self.sell_asset != self.buy_asset
    }

    /// Number of markets for `num_assets` assets.
    pub fn num_units(num_assets: u32) -> usize {
        let n = num_assets as usize;
        NUM_OFFER_KINDS * n * n.saturating_sub(1)
    }

    /// Position of this market in a manager with `num_assets` assets.
    ///
    /// The category must be valid for `num_assets`.
    pub fn unit_index(&self, num_assets: u32) -> usize {
        let n = num_assets as usize;
        let units_per_kind = n * (n - 1);
        let sell = self.sell_asset as usize;
        let buy = self.buy_asset as usize;
        let buy_offset = if buy > sell { buy - 1 } else { buy };
        sell * (n - 1) + buy_offset + units_per_kind * self.kind.to_u8() as usize
    }

    /// Inverse of [`OfferCategory::unit_index`].
    pub fn from_unit_index(idx: usize, num_assets: u32) -> Option<Self> {
        let n = num_assets as usize;
        if n < 2 || idx >= Self::num_units(num_assets) {
            return None;
        }
        let units_per_kind = n * (n - 1);
        let kind = OfferKind::from_u8((idx / units_per_kind) as u8)?;
        let within = idx % units_per_kind;
        let sell = within / (n - 1);
        let mut buy = within % (n - 1);
        if buy >= sell {
            buy += 1;
        }
        Some(Self {
            sell_asset: sell as AssetId,
            buy_asset: buy as AssetId,
            kind,
        })
    }
}

// ============================================================================
// Offer struct
// ============================================================================

/// A resting offer to sell `amount` of one asset for another at no less
/// than `min_price`.
///
/// Everything except `amount` is fixed at creation. `amount` only ever
/// decreases, through execution or cancellation.
///
/// ## Example
///
/// ```
/// use sharded_clearing::types::{Offer, OfferCategory};
/// use sharded_clearing::types::price::PRICE_ONE;
///
/// let offer = Offer::new(OfferCategory::new(0, 1), 7, 100, 60, 2 * PRICE_ONE);
/// assert_eq!(offer.key().owner(), 100);
/// assert_eq!(offer.category().buy_asset, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, SimpleSerialize)]
pub struct Offer {
    /// Unique per owner, allocated upstream by sequence number
    pub offer_id: u64,

    pub owner: u64,

    pub sell_asset: u32,

    pub buy_asset: u32,

    /// Offer kind as u8 (0=Sell)
    pub kind_raw: u8,

    /// Remaining amount of the sell asset, in whole units
    pub amount: u64,

    /// Minimum acceptable `sell / buy` exchange rate
    pub min_price: u64,
}

impl Offer {
    pub fn new(
        category: OfferCategory,
        offer_id: u64,
        owner: AccountId,
        amount: u64,
        min_price: Price,
    ) -> Self {
        Self {
            offer_id,
            owner,
            sell_asset: category.sell_asset,
            buy_asset: category.buy_asset,
            kind_raw: category.kind.to_u8(),
            amount,
            min_price,
        }
    }

    /// Get the offer kind. Unknown raw values read as `Sell`.
    pub fn kind(&self) -> OfferKind {
        OfferKind::from_u8(self.kind_raw).unwrap_or_default()
    }

    pub fn category(&self) -> OfferCategory {
        OfferCategory {
            sell_asset: self.sell_asset,
            buy_asset: self.buy_asset,
            kind: self.kind(),
        }
    }

    /// The index key of this offer.
    #[inline]
    pub fn key(&self) -> OrderKey {
        OrderKey::new(self.min_price, self.owner, self.offer_id)
    }

    /// Feed every field into a hasher, big-endian, in declaration order.
    pub fn hash_into<D: sha2::Digest>(&self, hasher: &mut D) {
        hasher.update(self.offer_id.to_be_bytes());
        hasher.update(self.owner.to_be_bytes());
        hasher.update(self.sell_asset.to_be_bytes());
        hasher.update(self.buy_asset.to_be_bytes());
        hasher.update([self.kind_raw]);
        hasher.update(self.amount.to_be_bytes());
        hasher.update(self.min_price.to_be_bytes());
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_index_roundtrip() {
        for n in 2..6u32 {
            let mut seen = vec![false; OfferCategory::num_units(n)];
            for sell in 0..n {
                for buy in 0..n {
                    if sell == buy {
                        continue;
                    }
                    let category = OfferCategory::new(sell, buy);
                    let idx = category.unit_index(n);
                    assert!(!seen[idx], "index {} assigned twice", idx);
                    seen[idx] = true;
                    assert_eq!(OfferCategory::from_unit_index(idx, n), Some(category));
                }
            }
            assert!(seen.iter().all(|s| *s));
        }
    }

    #[test]
    fn test_from_unit_index_out_of_range() {
        assert_eq!(OfferCategory::from_unit_index(6, 3), None);
        assert_eq!(OfferCategory::from_unit_index(0, 1), None);
    }

    #[test]
    fn test_category_validity() {
        assert!(OfferCategory::new(0, 1).is_valid(2));
        assert!(!OfferCategory::new(1, 1).is_valid(2));
        assert!(!OfferCategory::new(0, 2).is_valid(2));
    }

    #[test]
    fn test_offer_ssz_roundtrip() {
        let offer = Offer::new(OfferCategory::new(2, 0), 11, 42, 500, 12345);
        let bytes = ssz_rs::serialize(&offer).expect("Failed to serialize");
        assert_eq!(bytes.len(), 41);
        let decoded: Offer = ssz_rs::deserialize(&bytes).expect("Failed to deserialize");
        assert_eq!(decoded, offer);
    }

    #[test]
    fn test_key_derivation() {
        let offer = Offer::new(OfferCategory::new(0, 1), 3, 8, 1, 999);
        let key = offer.key();
        assert_eq!(key.price(), 999);
        assert_eq!(key.owner(), 8);
        assert_eq!(key.offer_id(), 3);
    }
}
