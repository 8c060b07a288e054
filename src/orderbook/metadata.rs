//! Price-sorted prefix sums over a committed order index.
//!
//! Entry `i` holds the cumulative endowment (and endowment times price) of
//! every offer priced at or below `entries[i].0`. A zero sentinel at price 0
//! keeps lookups below the cheapest offer well defined.
//!
//! The index is a snapshot: it is regenerated after every production commit
//! and after loading from the store, never updated incrementally.

use crate::error::IndexError;
use crate::orderbook::OrderIndex;
use crate::types::Price;

/// Running totals up to some price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndowAccumulator {
    /// Sum of offer amounts
    pub endow: u128,
    /// Sum of `amount * min_price` (price in fixed point)
    pub endow_times_price: u128,
}

/// Sorted `(price, cumulative totals)` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataIndex {
    entries: Vec<(Price, EndowAccumulator)>,
}

impl Default for MetadataIndex {
    fn default() -> Self {
        Self {
            entries: vec![(0, EndowAccumulator::default())],
        }
    }
}

impl MetadataIndex {
    /// Build prefix sums from the price levels of `index`.
    ///
    /// # Errors
    ///
    /// `EndowmentOverflow` if a running total leaves `u128`.
    pub fn generate(index: &OrderIndex) -> Result<Self, IndexError> {
        let levels = index.price_levels();
        let mut entries = Vec::with_capacity(levels.len() + 1);
        let mut acc = EndowAccumulator::default();
        entries.push((0, acc));

        for (price, endow) in levels {
            let weighted = endow
                .checked_mul(price as u128)
                .ok_or(IndexError::EndowmentOverflow)?;
            acc.endow = acc
                .endow
                .checked_add(endow)
                .ok_or(IndexError::EndowmentOverflow)?;
            acc.endow_times_price = acc
                .endow_times_price
                .checked_add(weighted)
                .ok_or(IndexError::EndowmentOverflow)?;
            entries.push((price, acc));
        }
        Ok(Self { entries })
    }

    /// Totals over every offer with `min_price <= price`.
    pub fn get_metadata(&self, price: Price) -> EndowAccumulator {
        let idx = self.entries.partition_point(|(p, _)| *p <= price);
        // idx >= 1: the sentinel at price 0 always satisfies the predicate
        self.entries[idx.saturating_sub(1)].1
    }

    /// Totals over every offer.
    pub fn total(&self) -> EndowAccumulator {
        self.entries.last().map(|(_, acc)| *acc).unwrap_or_default()
    }

    /// Lowest price at which cumulative endowment exceeds `amount`.
    pub fn first_price_exceeding(&self, amount: u128) -> Option<Price> {
        let idx = self.entries.partition_point(|(_, acc)| acc.endow <= amount);
        self.entries.get(idx).map(|(price, _)| *price)
    }

    /// Number of distinct prices.
    pub fn num_levels(&self) -> usize {
        self.entries.len() - 1
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
