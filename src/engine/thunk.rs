//! Per-round change log of a work unit.
//!
//! A [`Thunk`] records everything one round did to a market's committed
//! index, in forward form:
//!
//! - offers added this round
//! - offers cancelled this round (with their contents)
//! - the offers fully cleared this round (moved out of the index)
//! - the single partial execution, with the offer as it was before
//!
//! [`Thunk::apply`] performs the round's offer changes and returns the log;
//! [`Thunk::undo`] replays it backwards. The same log is later folded into
//! the durable store by [`write_thunks`](crate::persistence::write_thunks).

use crate::error::{EngineError, IndexError};
use crate::orderbook::OrderIndex;
use crate::types::{BlockStateUpdateStats, Offer, OrderKey};

/// The one offer executed partially in a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialExecution {
    pub key: OrderKey,
    /// Whole units of the sell asset taken from the offer
    pub sell_amount: u64,
    /// The offer before execution
    pub pre_execution_offer: Offer,
}

/// What clearing did to a market in one round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClearingRecord {
    /// Clearing has not run (or was undone)
    #[default]
    NotCleared,
    /// Every offer executed, nothing executed partially
    ClearedAll,
    /// Every offer below `key` executed in full, `key` executed partially
    Partial(PartialExecution),
}

/// Everything strictly below the threshold left the market in that round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClearingThreshold {
    Key(OrderKey),
    Everything,
}

/// One round of changes to a market.
#[derive(Debug, Clone, Default)]
pub struct Thunk {
    pub round: u64,
    /// Offers added this round, ascending key order. Undo walks it in
    /// reverse; store reconciliation relies on the key order.
    pub new_offers: Vec<Offer>,
    /// Committed offers cancelled this round
    pub deleted: Vec<(OrderKey, Offer)>,
    pub clearing: ClearingRecord,
    /// Offers fully executed this round
    pub cleared: OrderIndex,
}

impl Thunk {
    pub fn new(round: u64) -> Self {
        Self {
            round,
            ..Default::default()
        }
    }

    /// Apply a round's additions and cancellations to `committed`.
    ///
    /// Offers cancelled before they were committed are dropped from
    /// `uncommitted` without leaving a trace in the log. Afterwards
    /// `uncommitted` is empty.
    pub fn apply(
        round: u64,
        uncommitted: &mut OrderIndex,
        committed: &mut OrderIndex,
    ) -> Result<(Thunk, BlockStateUpdateStats), EngineError> {
        let withdrawn = uncommitted.perform_marked_deletions();
        let new_offers: Vec<Offer> = uncommitted.iter().cloned().collect();
        let deleted = committed.perform_marked_deletions();
        committed.merge_in(uncommitted.take())?;

        let stats = BlockStateUpdateStats {
            new_offer_count: new_offers.len() as u64,
            cancel_offer_count: (withdrawn.len() + deleted.len()) as u64,
            ..Default::default()
        };
        let thunk = Thunk {
            round,
            new_offers,
            deleted,
            ..Default::default()
        };
        Ok((thunk, stats))
    }

    /// Keys strictly below this threshold were removed by clearing.
    pub fn clearing_threshold(&self) -> ClearingThreshold {
        match &self.clearing {
            ClearingRecord::NotCleared => ClearingThreshold::Key(OrderKey::ZERO),
            ClearingRecord::Partial(partial) => ClearingThreshold::Key(partial.key),
            ClearingRecord::ClearedAll => ClearingThreshold::Everything,
        }
    }

    /// Restore `committed` to its state before this round.
    ///
    /// Safe to call whether clearing finished, failed partway, or never ran.
    pub fn undo(&mut self, committed: &mut OrderIndex) -> Result<(), EngineError> {
        if let ClearingRecord::Partial(partial) = std::mem::take(&mut self.clearing) {
            committed.remove(&partial.key);
            committed.insert(partial.pre_execution_offer)?;
        }

        committed.merge_in(self.cleared.take())?;

        for offer in self.new_offers.iter().rev() {
            let key = offer.key();
            committed
                .remove(&key)
                .ok_or(IndexError::MissingKey(key))?;
        }
        self.new_offers.clear();

        for (_, offer) in self.deleted.drain(..) {
            committed.insert(offer)?;
        }
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OfferCategory;

    fn offer(id: u64, amount: u64, price: u64) -> Offer {
        Offer::new(OfferCategory::new(0, 1), id, 1, amount, price)
    }

    fn committed() -> OrderIndex {
        let mut index = OrderIndex::new();
        index.insert(offer(1, 60, 90)).unwrap();
        index.insert(offer(2, 50, 100)).unwrap();
        index
    }

    #[test]
    fn test_apply_records_changes() {
        let mut committed = committed();
        let mut uncommitted = OrderIndex::new();
        uncommitted.insert(offer(3, 5, 95)).unwrap();
        uncommitted.insert(offer(4, 7, 95)).unwrap();
        uncommitted.mark_for_deletion(&offer(4, 7, 95).key());
        committed.mark_for_deletion(&offer(1, 60, 90).key());

        let (thunk, stats) = Thunk::apply(3, &mut uncommitted, &mut committed).unwrap();
        assert_eq!(thunk.round, 3);
        assert_eq!(thunk.new_offers, vec![offer(3, 5, 95)]);
        assert_eq!(thunk.deleted.len(), 1);
        assert_eq!(stats.new_offer_count, 1);
        assert_eq!(stats.cancel_offer_count, 2);
        assert!(uncommitted.is_empty());
        assert_eq!(committed.size(), 2);
    }

    #[test]
    fn test_undo_restores_exactly() {
        let mut committed = committed();
        let before = committed.root_hash();

        let mut uncommitted = OrderIndex::new();
        uncommitted.insert(offer(3, 5, 80)).unwrap();
        committed.mark_for_deletion(&offer(2, 50, 100).key());
        let (mut thunk, _) = Thunk::apply(1, &mut uncommitted, &mut committed).unwrap();

        // clear the new offer fully and the old one partially
        thunk.cleared = committed.endow_split(5).unwrap();
        let partial = committed.remove(&offer(1, 60, 90).key()).unwrap();
        committed.insert(offer(1, 40, 90)).unwrap();
        thunk.clearing = ClearingRecord::Partial(PartialExecution {
            key: partial.key(),
            sell_amount: 20,
            pre_execution_offer: partial,
        });

        thunk.undo(&mut committed).unwrap();
        assert_eq!(committed.root_hash(), before);
        assert_eq!(thunk.clearing, ClearingRecord::NotCleared);
    }

    #[test]
    fn test_undo_after_partial_removal() {
        // clearing removed the threshold offer and then failed
        let mut committed = committed();
        let before = committed.root_hash();
        let mut thunk = Thunk::new(1);
        let removed = committed.remove(&offer(2, 50, 100).key()).unwrap();
        thunk.clearing = ClearingRecord::Partial(PartialExecution {
            key: removed.key(),
            sell_amount: 0,
            pre_execution_offer: removed,
        });
        thunk.undo(&mut committed).unwrap();
        assert_eq!(committed.root_hash(), before);
    }

    #[test]
    fn test_undo_missing_new_offer_is_structural() {
        let mut committed = committed();
        let mut thunk = Thunk::new(1);
        thunk.new_offers.push(offer(9, 1, 1));
        assert!(matches!(
            thunk.undo(&mut committed),
            Err(EngineError::Index(IndexError::MissingKey(_)))
        ));
    }

    #[test]
    fn test_threshold_ordering() {
        let low = ClearingThreshold::Key(OrderKey::new(1, 0, 0));
        let high = ClearingThreshold::Key(OrderKey::new(2, 0, 0));
        assert!(low < high);
        assert!(high < ClearingThreshold::Everything);

        let mut thunk = Thunk::new(1);
        assert_eq!(thunk.clearing_threshold(), ClearingThreshold::Key(OrderKey::ZERO));
        thunk.clearing = ClearingRecord::ClearedAll;
        assert_eq!(thunk.clearing_threshold(), ClearingThreshold::Everything);
    }
}
