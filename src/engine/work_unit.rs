//! One market: the order book for a directed asset pair.
//!
//! ## State
//!
//! - `committed`: the authoritative index, equal to the store plus every
//!   pending thunk
//! - `uncommitted`: offers added this round, not yet visible to clearing
//! - `metadata`: prefix sums over `committed`, regenerated after commits
//!
//! ## Round Lifecycle
//!
//! ```text
//! add_offer / mark_for_deletion       (uncommitted, marks)
//!        |
//! commit_for_production  or  tentative_commit_for_validation   -> Thunk pushed
//!        |
//! process_clear_offers   or  tentative_clear_offers_for_validation
//!        |
//! finalize_validation    or  rollback_validation               -> Thunk undone
//! ```
//!
//! Clearing and rollback hold the market's thunk-queue lock; nothing else
//! in this struct is shared.

use std::sync::Arc;

use tracing::{debug, error};

use crate::engine::accounts::{AccountView, ModificationLog};
use crate::engine::clearing::{ClearingPrices, Settler};
use crate::engine::thunk::{ClearingRecord, PartialExecution, Thunk};
use crate::error::{ClearingError, EngineError, IndexError};
use crate::orderbook::{MetadataIndex, OrderIndex};
use crate::persistence::{OfferStore, UnitPersistence};
use crate::types::price::{execution_price_bounds, wide_multiply_val_by_a_over_b, Price, PRICE_RADIX};
use crate::types::{
    BlockStateUpdateStats, FractionalAsset, Offer, OfferCategory, OrderKey,
    SingleWorkUnitStateCommitment, UnitValidationStats,
};

/// Demand rounding toward whole units. Left off: enabling it breaks the
/// supply/demand balance the price search relies on.
const AGGRESSIVE_ROUNDING: bool = false;

/// Order book and round state of one market.
pub struct WorkUnit {
    category: OfferCategory,
    committed: OrderIndex,
    uncommitted: OrderIndex,
    metadata: MetadataIndex,
    persistence: Arc<UnitPersistence>,
}

impl WorkUnit {
    pub fn new(category: OfferCategory, store: Box<dyn OfferStore>) -> Self {
        Self::with_persistence(category, Arc::new(UnitPersistence::new(store)))
    }

    pub fn with_persistence(category: OfferCategory, persistence: Arc<UnitPersistence>) -> Self {
        Self {
            category,
            committed: OrderIndex::new(),
            uncommitted: OrderIndex::new(),
            metadata: MetadataIndex::default(),
            persistence,
        }
    }

    #[inline]
    pub fn category(&self) -> OfferCategory {
        self.category
    }

    pub fn persistence(&self) -> &Arc<UnitPersistence> {
        &self.persistence
    }

    pub fn committed(&self) -> &OrderIndex {
        &self.committed
    }

    pub fn num_open_offers(&self) -> u64 {
        self.committed.size()
    }

    // ========================================================================
    // Offer Lifecycle
    // ========================================================================

    /// Stage a new offer for the current round.
    pub fn add_offer(&mut self, offer: Offer) -> Result<(), EngineError> {
        if offer.category() != self.category {
            return Err(EngineError::Invariant(format!(
                "offer {} routed to market {:?}",
                offer.key(),
                self.category
            )));
        }
        let key = offer.key();
        if self.committed.contains_key(&key) {
            return Err(IndexError::DuplicateKey(key).into());
        }
        self.uncommitted.insert(offer)?;
        Ok(())
    }

    pub fn contains_offer(&self, key: &OrderKey) -> bool {
        self.committed.contains_key(key) || self.uncommitted.contains_key(key)
    }

    pub fn get_offer(&self, key: &OrderKey) -> Option<&Offer> {
        self.committed.get(key).or_else(|| self.uncommitted.get(key))
    }

    /// Stage a cancellation. Returns the offer, or `None` if it is absent or
    /// already cancelled this round.
    pub fn mark_for_deletion(&mut self, key: &OrderKey) -> Option<Offer> {
        if self.uncommitted.contains_key(key) {
            return self.uncommitted.mark_for_deletion(key);
        }
        self.committed.mark_for_deletion(key)
    }

    /// Undo [`WorkUnit::mark_for_deletion`].
    pub fn unmark_for_deletion(&mut self, key: &OrderKey) -> Option<Offer> {
        if self.uncommitted.contains_key(key) {
            return self.uncommitted.unmark_for_deletion(key);
        }
        self.committed.unmark_for_deletion(key)
    }

    /// Apply the round's additions and cancellations and push its thunk.
    ///
    /// Leaves `metadata` stale; production regenerates it.
    pub fn tentative_commit_for_validation(
        &mut self,
        round: u64,
    ) -> Result<BlockStateUpdateStats, EngineError> {
        let mut queue = self.persistence.queue();
        let expected_after = queue.last_round();
        if round != expected_after + 1 {
            return Err(EngineError::ThunkOrder {
                expected_after,
                found: round,
            });
        }
        let (thunk, stats) = Thunk::apply(round, &mut self.uncommitted, &mut self.committed)?;
        queue.push(thunk)?;
        Ok(stats)
    }

    pub fn commit_for_production(&mut self, round: u64) -> Result<BlockStateUpdateStats, EngineError> {
        let stats = self.tentative_commit_for_validation(round)?;
        self.generate_metadata_index()?;
        Ok(stats)
    }

    pub fn generate_metadata_index(&mut self) -> Result<(), EngineError> {
        self.metadata = MetadataIndex::generate(&self.committed)?;
        Ok(())
    }

    // ========================================================================
    // Clearing
    // ========================================================================

    /// Execute `supply` of the cheapest offers and report the outcome.
    ///
    /// Offers are taken whole, cheapest first, while they fit in `supply`;
    /// the next offer absorbs the remainder partially. Every failure here is
    /// structural: the caller computed `supply` from this market's own state.
    pub fn process_clear_offers(
        &mut self,
        prices: ClearingPrices,
        supply: FractionalAsset,
        round: u64,
        accounts: &dyn AccountView,
        log: &dyn ModificationLog,
        stats: &mut BlockStateUpdateStats,
    ) -> Result<SingleWorkUnitStateCommitment, EngineError> {
        let settler = Settler::new(accounts, log, prices);
        let mut queue = self.persistence.queue();
        let thunk = queue
            .top_mut(round)
            .ok_or_else(|| EngineError::Invariant(format!("no thunk for round {}", round)))?;

        thunk.cleared = self.committed.endow_split(supply.floor())?;
        stats.fully_clear_offer_count += settler.clear_all(&thunk.cleared)?;

        let cleared_endow = FractionalAsset::try_from_integral(thunk.cleared.get_root_metadata().endow)
            .ok_or(IndexError::EndowmentOverflow)?;
        let remaining = supply.checked_sub(cleared_endow).ok_or_else(|| {
            EngineError::Invariant("cleared more than the activated supply".to_string())
        })?;

        let mut commitment = SingleWorkUnitStateCommitment {
            fractional_supply_activated: supply,
            ..Default::default()
        };

        match self.committed.get_lowest_key() {
            None => {
                if !remaining.is_zero() {
                    return Err(EngineError::Invariant(format!(
                        "market {:?} cannot supply {:?}",
                        self.category, supply
                    )));
                }
                thunk.clearing = ClearingRecord::ClearedAll;
            }
            Some(key) => {
                let offer = self.committed.remove(&key).ok_or(IndexError::MissingKey(key))?;
                thunk.clearing = ClearingRecord::Partial(PartialExecution {
                    key,
                    sell_amount: 0,
                    pre_execution_offer: offer.clone(),
                });

                let sold = settler.clear_offer_partial(&offer, remaining)?;
                if let ClearingRecord::Partial(partial) = &mut thunk.clearing {
                    partial.sell_amount = sold;
                }
                if !remaining.is_zero() {
                    stats.partial_clear_offer_count += 1;
                }
                reinsert_remainder(&mut self.committed, offer, sold)?;

                commitment.partial_exec_threshold_key = key;
                commitment.partial_exec_offer_activation_amount = remaining;
                commitment.threshold_key_is_null = false;
            }
        }
        drop(queue);

        commitment.root_hash = self.committed.root_hash();
        debug!(
            market = ?self.category,
            supply = ?supply,
            open = self.committed.size(),
            "cleared market for production"
        );
        Ok(commitment)
    }

    /// Replay a claimed clearing outcome against this market.
    ///
    /// Every offer below the claimed threshold key executes in full; the
    /// offer at the key executes the claimed activation. A null key claims
    /// the market cleared to empty. Claims that do not fit the market come
    /// back as [`EngineError::Clearing`]; the caller must then roll back.
    pub fn tentative_clear_offers_for_validation(
        &mut self,
        prices: ClearingPrices,
        claim: &SingleWorkUnitStateCommitment,
        round: u64,
        accounts: &dyn AccountView,
        log: &dyn ModificationLog,
        validation: &mut UnitValidationStats,
        stats: &mut BlockStateUpdateStats,
    ) -> Result<(), EngineError> {
        let settler = Settler::new(accounts, log, prices);
        let mut queue = self.persistence.queue();
        let thunk = queue
            .top_mut(round)
            .ok_or_else(|| EngineError::Invariant(format!("no thunk for round {}", round)))?;

        let key = claim.partial_exec_threshold_key;
        let endow_below = self.committed.endow_lt_key(&key);

        let Some(offer) = self.committed.remove(&key) else {
            if !key.is_zero() {
                return Err(ClearingError::ThresholdKeyMissing(key).into());
            }
            let total = self.committed.get_root_metadata().endow;
            let total_fraction =
                FractionalAsset::try_from_integral(total).ok_or(IndexError::EndowmentOverflow)?;
            if !claim.partial_exec_offer_activation_amount.is_zero()
                || total_fraction != claim.fractional_supply_activated
            {
                return Err(ClearingError::NullThresholdWithSupply.into());
            }
            validation.activated_supply = add_supply(validation.activated_supply, total_fraction)?;

            thunk.cleared = self.committed.take();
            thunk.clearing = ClearingRecord::ClearedAll;
            stats.fully_clear_offer_count += settler.clear_all(&thunk.cleared)?;
            return Ok(());
        };

        thunk.clearing = ClearingRecord::Partial(PartialExecution {
            key,
            sell_amount: 0,
            pre_execution_offer: offer.clone(),
        });

        let below_fraction =
            FractionalAsset::try_from_integral(endow_below).ok_or(IndexError::EndowmentOverflow)?;
        validation.activated_supply = add_supply(validation.activated_supply, below_fraction)?;

        thunk.cleared = self.committed.endow_split(endow_below)?;
        stats.fully_clear_offer_count += settler.clear_all(&thunk.cleared)?;

        let activation = claim.partial_exec_offer_activation_amount;
        let sold = settler.clear_offer_partial(&offer, activation)?;
        if let ClearingRecord::Partial(partial) = &mut thunk.clearing {
            partial.sell_amount = sold;
        }
        if !activation.is_zero() {
            stats.partial_clear_offer_count += 1;
        }
        reinsert_remainder(&mut self.committed, offer, sold)?;
        Ok(())
    }

    /// Root hash of the committed index.
    pub fn root_hash(&mut self) -> [u8; 32] {
        self.committed.root_hash()
    }

    // ========================================================================
    // Finalize and Rollback
    // ========================================================================

    /// Accept the round. Its thunk stays queued for persistence.
    pub fn finalize_validation(&mut self, round: u64) -> Result<(), EngineError> {
        let top_round = self.persistence.queue().top().map(|t| t.round);
        if top_round != Some(round) {
            return Err(EngineError::Invariant(format!(
                "finalizing round {} but newest thunk is {:?}",
                round, top_round
            )));
        }
        self.generate_metadata_index()
    }

    /// Discard the round: staged offers, staged cancellations, and (if a
    /// tentative commit happened) everything the round's thunk recorded.
    pub fn rollback_validation(&mut self, round: u64) -> Result<(), EngineError> {
        self.uncommitted.clear();
        self.committed.unmark_all();
        {
            let mut queue = self.persistence.queue();
            if let Some(thunk) = queue.top_mut(round) {
                if let Err(e) = thunk.undo(&mut self.committed) {
                    error!(market = ?self.category, round, error = %e, "thunk undo failed");
                    return Err(e);
                }
                queue.pop();
            }
        }
        self.generate_metadata_index()
    }

    /// Undo every pending round after `round`.
    pub fn rollback_thunks(&mut self, round: u64) -> Result<(), EngineError> {
        {
            let mut queue = self.persistence.queue();
            let persisted = queue.base_round();
            // Rounds up to `round` are kept, so `round == persisted` undoes
            // only rounds the store has not seen.
            if round < persisted {
                return Err(EngineError::RollbackBelowPersisted {
                    requested: round,
                    persisted,
                });
            }
            while queue.last_round() > round {
                let Some(top_round) = queue.top().map(|t| t.round) else {
                    break;
                };
                if let Some(thunk) = queue.top_mut(top_round) {
                    thunk.undo(&mut self.committed)?;
                }
                queue.pop();
            }
        }
        self.generate_metadata_index()
    }

    /// Rebuild `committed` from the store. Pending thunks are dropped.
    pub fn load_from_store(&mut self) -> Result<(), EngineError> {
        let offers = self.persistence.scan()?;
        let persisted = self.persistence.persisted_round();

        self.committed.clear();
        self.uncommitted.clear();
        for offer in offers {
            if offer.category() != self.category {
                return Err(EngineError::Invariant(format!(
                    "stored offer {} belongs to {:?}",
                    offer.key(),
                    offer.category()
                )));
            }
            self.committed.insert(offer)?;
        }
        self.persistence.queue().reset(persisted);
        self.generate_metadata_index()
    }

    /// Offers as stored durably, ascending by key.
    pub fn persisted_offers(&self) -> Result<Vec<Offer>, EngineError> {
        self.persistence.scan()
    }

    // ========================================================================
    // Price-Search Support
    // ========================================================================

    fn clearing_prices(&self, prices: &[Price]) -> Result<(Price, Price), EngineError> {
        match (
            prices.get(self.category.sell_asset as usize),
            prices.get(self.category.buy_asset as usize),
        ) {
            (Some(sell), Some(buy)) if *buy != 0 => Ok((*sell, *buy)),
            _ => Err(EngineError::Invariant(format!(
                "no usable prices for market {:?}",
                self.category
            ))),
        }
    }

    fn execution_bounds(&self, prices: &[Price], smooth_mult: u8) -> Result<(Price, Price), EngineError> {
        let (sell, buy) = self.clearing_prices(prices)?;
        execution_price_bounds(sell, buy, smooth_mult).ok_or_else(|| {
            EngineError::Invariant(format!("exchange rate overflow in {:?}", self.category))
        })
    }

    /// Endowment that must execute (priced at or below the lower bound) and
    /// that may execute (at or below the exact rate).
    pub fn get_supply_bounds(&self, prices: &[Price], smooth_mult: u8) -> Result<(u128, u128), EngineError> {
        let (lower, upper) = self.execution_bounds(prices, smooth_mult)?;
        Ok((
            self.metadata.get_metadata(lower).endow,
            self.metadata.get_metadata(upper).endow,
        ))
    }

    /// Add this market's supply and demand at `prices` into the per-asset
    /// workspaces. Amounts carry [`PRICE_RADIX`] fractional bits.
    ///
    /// Offers priced inside the smoothing band execute linearly in their
    /// distance from the exact rate.
    pub fn calculate_demands_and_supplies(
        &self,
        prices: &[Price],
        demands: &mut [u128],
        supplies: &mut [u128],
        smooth_mult: u8,
    ) -> Result<(), EngineError> {
        let (sell, buy) = self.clearing_prices(prices)?;
        let (lower, upper) = self.execution_bounds(prices, smooth_mult)?;

        let partial_meta = self.metadata.get_metadata(upper);
        let full_meta = if smooth_mult != 0 {
            self.metadata.get_metadata(lower)
        } else {
            partial_meta
        };

        let overflow = || EngineError::Invariant(format!("demand overflow in {:?}", self.category));

        let partial_endow = partial_meta
            .endow
            .checked_sub(full_meta.endow)
            .ok_or_else(overflow)?;
        let partial_etp = partial_meta
            .endow_times_price
            .checked_sub(full_meta.endow_times_price)
            .ok_or_else(overflow)?;

        let (mut partial_sell, mut partial_buy) = (0u128, 0u128);
        if smooth_mult != 0 {
            let scale = 1u128 << smooth_mult;
            let endow_over_eps = partial_endow.checked_mul(scale).ok_or_else(overflow)?;
            let etp_over_eps = partial_etp.checked_mul(scale).ok_or_else(overflow)?;
            let endow_over_eps_fixed = endow_over_eps
                .checked_mul(1u128 << PRICE_RADIX)
                .ok_or_else(overflow)?;

            partial_sell = endow_over_eps_fixed
                .checked_sub(wide_multiply_val_by_a_over_b(etp_over_eps, buy, sell).ok_or_else(overflow)?)
                .ok_or_else(overflow)?;
            partial_buy = wide_multiply_val_by_a_over_b(endow_over_eps_fixed, sell, buy)
                .ok_or_else(overflow)?
                .checked_sub(etp_over_eps)
                .ok_or_else(overflow)?;
        }

        let full_fixed = full_meta
            .endow
            .checked_mul(1u128 << PRICE_RADIX)
            .ok_or_else(overflow)?;
        let mut full_sell = partial_sell.checked_add(full_fixed).ok_or_else(overflow)?;
        let mut full_buy = partial_buy
            .checked_add(wide_multiply_val_by_a_over_b(full_fixed, sell, buy).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;

        if AGGRESSIVE_ROUNDING {
            let low_bits = (1u128 << PRICE_RADIX) - 1;
            full_buy &= !low_bits;
            let round_up = full_sell & low_bits != 0;
            full_sell &= !low_bits;
            if round_up {
                full_sell += 1u128 << PRICE_RADIX;
            }
        }

        let buy_slot = demands
            .get_mut(self.category.buy_asset as usize)
            .ok_or_else(overflow)?;
        *buy_slot = buy_slot.checked_add(full_buy).ok_or_else(overflow)?;
        let sell_slot = supplies
            .get_mut(self.category.sell_asset as usize)
            .ok_or_else(overflow)?;
        *sell_slot = sell_slot.checked_add(full_sell).ok_or_else(overflow)?;
        Ok(())
    }

    /// Largest smoothing exponent under which activating `amount` keeps every
    /// fully executed offer outside the band. `u8::MAX` when any exponent
    /// works.
    pub fn max_feasible_smooth_mult(&self, amount: u128, prices: &[Price]) -> Result<u8, EngineError> {
        let (sell, buy) = self.clearing_prices(prices)?;
        let exact = crate::types::price::divide_prices(sell, buy).ok_or_else(|| {
            EngineError::Invariant(format!("exchange rate overflow in {:?}", self.category))
        })?;

        let Some(max_activated_price) = self.metadata.first_price_exceeding(amount) else {
            return Ok(u8::MAX);
        };
        if exact <= max_activated_price {
            return Ok(u8::MAX);
        }
        let difference = exact - max_activated_price;

        let mut out: u32 = 0;
        while difference <= exact.checked_shr(out).unwrap_or(0) {
            out += 1;
        }
        Ok(out.saturating_sub(1) as u8)
    }
}

/// Put back what is left of a partially executed offer.
fn reinsert_remainder(committed: &mut OrderIndex, mut offer: Offer, sold: u64) -> Result<(), EngineError> {
    let key = offer.key();
    offer.amount = offer
        .amount
        .checked_sub(sold)
        .ok_or(EngineError::AmountUnderflow {
            key,
            amount: offer.amount,
            consumed: sold,
        })?;
    if offer.amount > 0 {
        committed.insert(offer)?;
    }
    Ok(())
}

fn add_supply(total: FractionalAsset, more: FractionalAsset) -> Result<FractionalAsset, EngineError> {
    total
        .checked_add(more)
        .ok_or_else(|| EngineError::Invariant("activated supply overflow".to_string()))
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clearing::tests::RecordingAccounts;
    use crate::persistence::MemoryOfferStore;
    use crate::types::price::PRICE_ONE;

    const ROUND: u64 = 1;

    fn market() -> OfferCategory {
        OfferCategory::new(0, 1)
    }

    fn offer(id: u64, owner: u64, amount: u64, price: u64) -> Offer {
        Offer::new(market(), id, owner, amount, price * PRICE_ONE)
    }

    fn accounts() -> RecordingAccounts {
        RecordingAccounts {
            known: vec![1, 2, 3],
            ..Default::default()
        }
    }

    fn prices() -> ClearingPrices {
        ClearingPrices {
            sell: 100 * PRICE_ONE,
            buy: PRICE_ONE,
            tax_rate: 10,
        }
    }

    /// Market with A (price 90, 60 units) and B (price 100, 50 units)
    /// committed in round 1, open for round 2.
    fn two_offer_unit() -> WorkUnit {
        let mut unit = WorkUnit::new(market(), Box::new(MemoryOfferStore::new()));
        unit.add_offer(offer(1, 1, 60, 90)).unwrap();
        unit.add_offer(offer(2, 2, 50, 100)).unwrap();
        unit.commit_for_production(ROUND).unwrap();
        unit.finalize_validation(ROUND).unwrap();
        unit
    }

    #[test]
    fn test_add_offer_wrong_market() {
        let mut unit = WorkUnit::new(market(), Box::new(MemoryOfferStore::new()));
        let stray = Offer::new(OfferCategory::new(1, 0), 1, 1, 5, PRICE_ONE);
        assert!(matches!(unit.add_offer(stray), Err(EngineError::Invariant(_))));
    }

    #[test]
    fn test_cancel_uncommitted_leaves_no_trace() {
        let mut unit = two_offer_unit();
        let before = unit.root_hash();
        let extra = offer(3, 3, 10, 95);
        unit.add_offer(extra.clone()).unwrap();
        assert!(unit.mark_for_deletion(&extra.key()).is_some());

        let stats = unit.tentative_commit_for_validation(2).unwrap();
        assert_eq!(stats.new_offer_count, 0);
        assert_eq!(stats.cancel_offer_count, 1);
        assert_eq!(unit.root_hash(), before);
    }

    #[test]
    fn test_production_partial_clear() {
        let mut unit = two_offer_unit();
        let accounts = accounts();
        let mut stats = BlockStateUpdateStats::default();
        unit.commit_for_production(2).unwrap();

        let supply = FractionalAsset::from_integral(80);
        let commitment = unit
            .process_clear_offers(prices(), supply, 2, &accounts, &accounts, &mut stats)
            .unwrap();

        let b_key = offer(2, 2, 50, 100).key();
        assert_eq!(commitment.partial_exec_threshold_key, b_key);
        assert_eq!(commitment.partial_exec_offer_activation_amount, FractionalAsset::from_integral(20));
        assert!(!commitment.threshold_key_is_null);
        assert_eq!(stats.fully_clear_offer_count, 1);
        assert_eq!(stats.partial_clear_offer_count, 1);
        assert_eq!(unit.committed().get(&b_key).map(|o| o.amount), Some(30));
        assert_eq!(unit.committed().get_root_metadata().endow, 30);
        assert_eq!(commitment.root_hash, unit.root_hash());
    }

    #[test]
    fn test_production_clears_everything() {
        let mut unit = two_offer_unit();
        let accounts = accounts();
        let mut stats = BlockStateUpdateStats::default();
        unit.commit_for_production(2).unwrap();
        let commitment = unit
            .process_clear_offers(
                prices(),
                FractionalAsset::from_integral(110),
                2,
                &accounts,
                &accounts,
                &mut stats,
            )
            .unwrap();
        assert!(commitment.threshold_key_is_null);
        assert!(commitment.check_sanity());
        assert_eq!(unit.num_open_offers(), 0);
    }

    #[test]
    fn test_validation_matches_production() {
        let accounts = accounts();

        let mut producer = two_offer_unit();
        producer.commit_for_production(2).unwrap();
        let mut stats = BlockStateUpdateStats::default();
        let claim = producer
            .process_clear_offers(
                prices(),
                FractionalAsset::from_integral(80),
                2,
                &accounts,
                &accounts,
                &mut stats,
            )
            .unwrap();

        let mut validator = two_offer_unit();
        validator.tentative_commit_for_validation(2).unwrap();
        let mut validation = UnitValidationStats::default();
        let mut vstats = BlockStateUpdateStats::default();
        validator
            .tentative_clear_offers_for_validation(
                prices(),
                &claim,
                2,
                &accounts,
                &accounts,
                &mut validation,
                &mut vstats,
            )
            .unwrap();
        validator.finalize_validation(2).unwrap();

        assert_eq!(validator.root_hash(), claim.root_hash);
        assert_eq!(validation.activated_supply, FractionalAsset::from_integral(60));
        assert_eq!(vstats, stats);
    }

    #[test]
    fn test_validation_rejects_null_claim_with_open_offers() {
        let accounts = accounts();
        let mut unit = two_offer_unit();
        let before = unit.root_hash();
        unit.tentative_commit_for_validation(2).unwrap();

        let claim = SingleWorkUnitStateCommitment::default();
        let result = unit.tentative_clear_offers_for_validation(
            prices(),
            &claim,
            2,
            &accounts,
            &accounts,
            &mut UnitValidationStats::default(),
            &mut BlockStateUpdateStats::default(),
        );
        assert_eq!(result, Err(EngineError::Clearing(ClearingError::NullThresholdWithSupply)));

        unit.rollback_validation(2).unwrap();
        assert_eq!(unit.root_hash(), before);
    }

    #[test]
    fn test_validation_rejects_oversized_activation() {
        let accounts = accounts();
        let mut unit = two_offer_unit();
        let before = unit.root_hash();
        unit.tentative_commit_for_validation(2).unwrap();

        let b_key = offer(2, 2, 50, 100).key();
        let claim = SingleWorkUnitStateCommitment {
            fractional_supply_activated: FractionalAsset::from_integral(111),
            partial_exec_threshold_key: b_key,
            partial_exec_offer_activation_amount: FractionalAsset::from_integral(51),
            threshold_key_is_null: false,
            ..Default::default()
        };
        let result = unit.tentative_clear_offers_for_validation(
            prices(),
            &claim,
            2,
            &accounts,
            &accounts,
            &mut UnitValidationStats::default(),
            &mut BlockStateUpdateStats::default(),
        );
        assert!(matches!(
            result,
            Err(EngineError::Clearing(ClearingError::ActivationExceedsOffer { .. }))
        ));
        unit.rollback_validation(2).unwrap();
        assert_eq!(unit.root_hash(), before);
        assert_eq!(unit.num_open_offers(), 2);
    }

    #[test]
    fn test_rollback_thunks_and_persisted_floor() {
        let mut unit = two_offer_unit();
        let after_round_one = unit.root_hash();
        unit.add_offer(offer(3, 3, 5, 50)).unwrap();
        unit.commit_for_production(2).unwrap();
        unit.finalize_validation(2).unwrap();

        unit.rollback_thunks(1).unwrap();
        assert_eq!(unit.root_hash(), after_round_one);

        unit.persistence().flush(1).unwrap();
        assert_eq!(
            unit.rollback_thunks(0),
            Err(EngineError::RollbackBelowPersisted { requested: 0, persisted: 1 })
        );
    }

    #[test]
    fn test_load_from_store_rebuilds_index() {
        let mut unit = two_offer_unit();
        let hash = unit.root_hash();
        unit.persistence().flush(ROUND).unwrap();

        let mut reloaded = WorkUnit::with_persistence(market(), Arc::clone(unit.persistence()));
        reloaded.load_from_store().unwrap();
        assert_eq!(reloaded.root_hash(), hash);
        assert_eq!(reloaded.persisted_offers().unwrap().len(), 2);
        // next round follows the loaded watermark
        assert!(reloaded.tentative_commit_for_validation(2).is_ok());
    }

    #[test]
    fn test_supply_bounds_and_demand() {
        let unit = two_offer_unit();
        let vector = vec![100 * PRICE_ONE, PRICE_ONE];

        // band [50, 100]: A and B may execute, neither must
        let (lower, upper) = unit.get_supply_bounds(&vector, 1).unwrap();
        assert_eq!((lower, upper), (0, 110));

        // no band: everything at or below 100 executes
        let mut demands = vec![0u128; 2];
        let mut supplies = vec![0u128; 2];
        unit.calculate_demands_and_supplies(&vector, &mut demands, &mut supplies, 0)
            .unwrap();
        assert_eq!(supplies[0], 110u128 << PRICE_RADIX);
        assert_eq!(demands[1], 11_000u128 << PRICE_RADIX);
    }

    #[test]
    fn test_smoothing_band_interpolates() {
        let unit = two_offer_unit();
        let vector = vec![100 * PRICE_ONE, PRICE_ONE];
        let mut demands = vec![0u128; 2];
        let mut supplies = vec![0u128; 2];
        // band [50, 100]: A at 90 sells (100-90)/50 of 60, B at 100 sells nothing
        unit.calculate_demands_and_supplies(&vector, &mut demands, &mut supplies, 1)
            .unwrap();
        assert_eq!(supplies[0], 12u128 << PRICE_RADIX);
        assert_eq!(demands[1], 1_200u128 << PRICE_RADIX);
    }

    #[test]
    fn test_max_feasible_smooth_mult() {
        let unit = two_offer_unit();
        let vector = vec![100 * PRICE_ONE, PRICE_ONE];
        // activating more than A reaches B at the exact rate
        assert_eq!(unit.max_feasible_smooth_mult(70, &vector).unwrap(), u8::MAX);
        // activating part of A: A sits 10% under the rate
        assert_eq!(unit.max_feasible_smooth_mult(30, &vector).unwrap(), 3);
        assert_eq!(unit.max_feasible_smooth_mult(110, &vector).unwrap(), u8::MAX);
    }
}
