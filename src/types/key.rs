//! Order keys.
//!
//! ## Layout
//!
//! ```text
//! [ price: 6 bytes BE | owner: 8 bytes BE | offer_id: 8 bytes BE ]
//! ```
//!
//! Byte-lexicographic order of a key equals `(price, owner, offer_id)`
//! order, so the order index iterates offers cheapest first.

use std::fmt;

use crate::types::price::{read_price_big_endian, write_price_big_endian, Price, PRICE_BYTES};
use crate::types::AccountId;

/// Length of an [`OrderKey`] in bytes.
pub const ORDER_KEY_LEN: usize = PRICE_BYTES + 8 + 8;

/// Length of an [`OrderKey`] in bits.
pub const ORDER_KEY_BITS: usize = ORDER_KEY_LEN * 8;

const OWNER_OFFSET: usize = PRICE_BYTES;
const OFFER_ID_OFFSET: usize = PRICE_BYTES + 8;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OrderKey([u8; ORDER_KEY_LEN]);

impl OrderKey {
    /// The null key. Used in commitments when no offer executed partially.
    pub const ZERO: OrderKey = OrderKey([0u8; ORDER_KEY_LEN]);

    /// Greater than or equal to every other key.
    pub const MAX: OrderKey = OrderKey([0xFF; ORDER_KEY_LEN]);

    pub fn new(min_price: Price, owner: AccountId, offer_id: u64) -> Self {
        let mut bytes = [0u8; ORDER_KEY_LEN];
        write_price_big_endian(&mut bytes[..PRICE_BYTES], min_price);
        bytes[OWNER_OFFSET..OFFER_ID_OFFSET].copy_from_slice(&owner.to_be_bytes());
        bytes[OFFER_ID_OFFSET..].copy_from_slice(&offer_id.to_be_bytes());
        Self(bytes)
    }

    #[inline]
    pub const fn from_bytes(bytes: [u8; ORDER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; ORDER_KEY_LEN] {
        &self.0
    }

    pub fn price(&self) -> Price {
        read_price_big_endian(&self.0[..PRICE_BYTES])
    }

    pub fn owner(&self) -> AccountId {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[OWNER_OFFSET..OFFER_ID_OFFSET]);
        u64::from_be_bytes(buf)
    }

    pub fn offer_id(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[OFFER_ID_OFFSET..]);
        u64::from_be_bytes(buf)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Bit `index`, counting from the most significant bit of byte 0.
    #[inline]
    pub fn bit(&self, index: usize) -> usize {
        ((self.0[index / 8] >> (7 - (index % 8))) & 1) as usize
    }

    /// Number of leading bits shared with `other`.
    pub fn common_prefix_len(&self, other: &OrderKey) -> usize {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let diff = a ^ b;
            if diff != 0 {
                return i * 8 + diff.leading_zeros() as usize;
            }
        }
        ORDER_KEY_BITS
    }

    /// Copy of the key with every bit from `len` onward cleared.
    pub fn truncated(&self, len: usize) -> OrderKey {
        let mut bytes = self.0;
        let full = len / 8;
        if full < ORDER_KEY_LEN {
            let rem = len % 8;
            bytes[full] &= if rem == 0 { 0 } else { 0xFFu8 << (8 - rem) };
            for b in bytes.iter_mut().skip(full + 1) {
                *b = 0;
            }
        }
        OrderKey(bytes)
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OrderKey(price={}, owner={}, offer_id={})",
            self.price(),
            self.owner(),
            self.offer_id()
        )
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
