//! Durable offer storage, one namespace per market.
//!
//! ## Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | [`OrderKey`] (22 bytes) | SSZ-encoded [`Offer`] (41 bytes) |
//!
//! plus a per-market watermark: the last round whose changes are reflected.
//! Changes are staged in a [`WriteBatch`] and applied atomically together
//! with the new watermark.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::StoreError;
use crate::types::{Offer, OrderKey};

/// Opaque durable map from order keys to offers.
pub trait OfferStore: Send {
    fn get(&self, key: &OrderKey) -> Result<Option<Offer>, StoreError>;

    /// Every stored key strictly below `key`, ascending.
    fn keys_below(&self, key: &OrderKey) -> Vec<OrderKey>;

    /// Every stored key, ascending.
    fn keys(&self) -> Vec<OrderKey>;

    /// Every stored offer, ascending by key.
    fn scan(&self) -> Result<Vec<Offer>, StoreError>;

    /// Last round reflected in the store, 0 if none.
    fn persisted_round(&self) -> u64;

    /// Apply `batch` and move the watermark to `round`, all or nothing.
    fn commit(&mut self, batch: WriteBatch, round: u64) -> Result<(), StoreError>;
}

/// Staged puts and deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: BTreeMap<OrderKey, Option<Offer>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, offer: Offer) {
        self.ops.insert(offer.key(), Some(offer));
    }

    pub fn delete(&mut self, key: OrderKey) {
        self.ops.insert(key, None);
    }

    /// Read through the batch: staged value first, then the store.
    pub fn read(&self, store: &dyn OfferStore, key: &OrderKey) -> Result<Option<Offer>, StoreError> {
        match self.ops.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => store.get(key),
        }
    }

    /// True when `key` is staged for deletion.
    pub fn is_deleted(&self, key: &OrderKey) -> bool {
        matches!(self.ops.get(key), Some(None))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> impl Iterator<Item = (OrderKey, Option<Offer>)> {
        self.ops.into_iter()
    }
}

/// In-memory [`OfferStore`] holding SSZ bytes, like an on-disk table would.
#[derive(Debug, Clone, Default)]
pub struct MemoryOfferStore {
    entries: BTreeMap<OrderKey, Vec<u8>>,
    persisted_round: u64,
}

impl MemoryOfferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn decode(key: &OrderKey, bytes: &[u8]) -> Result<Offer, StoreError> {
        ssz_rs::deserialize::<Offer>(bytes).map_err(|e| StoreError::Decode {
            key: *key,
            reason: format!("{:?}", e),
        })
    }
}

impl OfferStore for MemoryOfferStore {
    fn get(&self, key: &OrderKey) -> Result<Option<Offer>, StoreError> {
        self.entries
            .get(key)
            .map(|bytes| Self::decode(key, bytes))
            .transpose()
    }

    fn keys_below(&self, key: &OrderKey) -> Vec<OrderKey> {
        self.entries
            .range((Bound::Unbounded, Bound::Excluded(*key)))
            .map(|(k, _)| *k)
            .collect()
    }

    fn keys(&self) -> Vec<OrderKey> {
        self.entries.keys().copied().collect()
    }

    fn scan(&self) -> Result<Vec<Offer>, StoreError> {
        self.entries
            .iter()
            .map(|(key, bytes)| Self::decode(key, bytes))
            .collect()
    }

    fn persisted_round(&self) -> u64 {
        self.persisted_round
    }

    fn commit(&mut self, batch: WriteBatch, round: u64) -> Result<(), StoreError> {
        if round < self.persisted_round {
            return Err(StoreError::WatermarkRegression {
                current: self.persisted_round,
                requested: round,
            });
        }

        // encode everything before touching the map
        let mut encoded = Vec::with_capacity(batch.len());
        for (key, op) in batch.into_ops() {
            let bytes = match op {
                Some(offer) => Some(ssz_rs::serialize(&offer).map_err(|e| StoreError::Encode {
                    key,
                    reason: format!("{:?}", e),
                })?),
                None => None,
            };
            encoded.push((key, bytes));
        }

        for (key, bytes) in encoded {
            match bytes {
                Some(bytes) => {
                    self.entries.insert(key, bytes);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
        self.persisted_round = round;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
