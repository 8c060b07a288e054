//! All markets, and the parallel fan-out over them.
//!
//! ## Unit Layout
//!
//! With `n` assets there is one [`WorkUnit`] per ordered pair of distinct
//! assets, `n * (n - 1)` in all, stored at
//! [`OfferCategory::unit_index`]. Units share no state, so every per-round
//! operation runs on a dedicated rayon pool, a batch of units per task.
//!
//! ## Failure Aggregation
//!
//! | Path | On first failure |
//! |------|------------------|
//! | production clearing | abort, the error is structural |
//! | validation clearing | remaining units skip their work; units already running finish |
//! | rollback | every unit still rolls back; the first error is reported |
//!
//! Changing the number of assets needs `&mut self` and nothing else runs
//! concurrently with it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::engine::accounts::{AccountView, ModificationLog};
use crate::engine::clearing::ClearingPrices;
use crate::engine::work_unit::WorkUnit;
use crate::error::{ClearingError, EngineError};
use crate::persistence::{MemoryOfferStore, OfferStore, UnitPersistence, UnitRegistry};
use crate::types::{
    check_clearing_params, BlockStateUpdateStats, ClearingParams, Offer, OfferCategory, OrderKey,
    Price, SingleWorkUnitStateCommitment, UnitValidationStats, ValidationStatistics,
    WorkUnitStateCommitment, WorkUnitStateCommitmentChecker,
};

/// Opens the durable store for a market.
pub type StoreFactory = Box<dyn Fn(OfferCategory) -> Box<dyn OfferStore> + Send + Sync>;

/// Owns every [`WorkUnit`] and fans round operations out across them.
pub struct WorkUnitManager {
    config: EngineConfig,
    units: Vec<WorkUnit>,
    registry: UnitRegistry,
    pool: ThreadPool,
    store_factory: StoreFactory,
}

impl WorkUnitManager {
    /// Build a manager with one unit per market of `config.num_assets`.
    pub fn new(config: EngineConfig, store_factory: StoreFactory) -> Result<Self, EngineError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("clearing-{}", i))
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;

        let mut manager = Self {
            config: EngineConfig {
                num_assets: 0,
                ..config.clone()
            },
            units: Vec::new(),
            registry: UnitRegistry::default(),
            pool,
            store_factory,
        };
        manager.increase_num_traded_assets(config.num_assets)?;
        info!(
            assets = manager.config.num_assets,
            units = manager.units.len(),
            threads = manager.pool.current_num_threads(),
            "work unit manager ready"
        );
        Ok(manager)
    }

    /// Manager whose markets persist to [`MemoryOfferStore`]s.
    pub fn in_memory(config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(
            config,
            Box::new(|_| Box::new(MemoryOfferStore::new()) as Box<dyn OfferStore>),
        )
    }

    #[inline]
    pub fn num_assets(&self) -> u32 {
        self.config.num_assets
    }

    #[inline]
    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    pub fn unit(&self, category: OfferCategory) -> Option<&WorkUnit> {
        if !category.is_valid(self.config.num_assets) {
            return None;
        }
        self.units.get(category.unit_index(self.config.num_assets))
    }

    fn unit_mut(&mut self, category: OfferCategory) -> Result<&mut WorkUnit, ClearingError> {
        let num_assets = self.config.num_assets;
        if !category.is_valid(num_assets) {
            return Err(ClearingError::InvalidTransaction(format!(
                "no market for {:?}",
                category
            )));
        }
        self.units
            .get_mut(category.unit_index(num_assets))
            .ok_or_else(|| ClearingError::InvalidTransaction(format!("no market for {:?}", category)))
    }

    /// Shared handle on every unit's persistence state, for the
    /// [`PersistenceWorker`](crate::persistence::PersistenceWorker).
    pub fn registry(&self) -> UnitRegistry {
        self.registry.clone()
    }

    /// Newest round any unit has a thunk (or watermark) for.
    fn last_round(&self) -> u64 {
        self.units
            .iter()
            .map(|u| u.persistence().queue().last_round())
            .max()
            .unwrap_or(0)
    }

    /// Grow to `new_asset_count` assets. Existing markets keep their state;
    /// new ones start empty at the current round.
    pub fn increase_num_traded_assets(&mut self, new_asset_count: u32) -> Result<(), EngineError> {
        let old_count = self.config.num_assets;
        if new_asset_count < old_count {
            return Err(EngineError::Invariant(format!(
                "cannot shrink from {} to {} assets",
                old_count, new_asset_count
            )));
        }
        let round = self.last_round();
        let num_units = OfferCategory::num_units(new_asset_count);

        // open every new market before touching the existing ones
        let mut categories = Vec::with_capacity(num_units);
        let mut fresh = Vec::new();
        for idx in 0..num_units {
            let category = OfferCategory::from_unit_index(idx, new_asset_count)
                .ok_or_else(|| EngineError::Invariant(format!("unit {} has no market", idx)))?;
            if !category.is_valid(old_count) {
                let store = (self.store_factory)(category);
                let persistence = UnitPersistence::starting_at(store, round)?;
                fresh.push(WorkUnit::with_persistence(category, Arc::new(persistence)));
            }
            categories.push(category);
        }

        let mut old_units: Vec<Option<WorkUnit>> =
            std::mem::take(&mut self.units).into_iter().map(Some).collect();
        let mut fresh = fresh.into_iter();
        let mut units = Vec::with_capacity(num_units);
        for category in categories {
            let unit = if category.is_valid(old_count) {
                old_units
                    .get_mut(category.unit_index(old_count))
                    .and_then(Option::take)
            } else {
                fresh.next()
            };
            units.push(unit.ok_or_else(|| {
                EngineError::Invariant(format!("market {:?} lost while growing", category))
            })?);
        }

        self.units = units;
        self.config.num_assets = new_asset_count;
        self.registry
            .replace(self.units.iter().map(|u| Arc::clone(u.persistence())).collect());
        Ok(())
    }

    // ========================================================================
    // Parallel Helpers
    // ========================================================================

    /// Run `f` on every unit, `batch` units per task. Results come back in
    /// unit order; every unit runs regardless of the others' results.
    fn map_units<T, F>(&mut self, batch: usize, f: F) -> Vec<Result<T, EngineError>>
    where
        T: Send,
        F: Fn(&mut WorkUnit) -> Result<T, EngineError> + Sync,
    {
        let units = &mut self.units;
        let per_chunk: Vec<Vec<Result<T, EngineError>>> = self.pool.install(|| {
            units
                .par_chunks_mut(batch.max(1))
                .map(|chunk| chunk.iter_mut().map(&f).collect())
                .collect()
        });
        per_chunk.into_iter().flatten().collect()
    }

    fn try_map_units<T, F>(&mut self, batch: usize, f: F) -> Result<Vec<T>, EngineError>
    where
        T: Send,
        F: Fn(&mut WorkUnit) -> Result<T, EngineError> + Sync,
    {
        self.map_units(batch, f).into_iter().collect()
    }

    // ========================================================================
    // Offer Lifecycle
    // ========================================================================

    /// Stage `offer` in its market.
    ///
    /// # Errors
    ///
    /// * `Clearing(InvalidTransaction)` - no market for the offer's category
    /// * `Index(DuplicateKey)` / `Index(ZeroAmount)` - from the market
    pub fn add_offer(&mut self, offer: Offer) -> Result<(), EngineError> {
        let unit = self.unit_mut(offer.category())?;
        unit.add_offer(offer)
    }

    /// Stage a cancellation. `None` if no such offer is open.
    pub fn cancel_offer(&mut self, category: OfferCategory, key: &OrderKey) -> Option<Offer> {
        self.unit_mut(category).ok()?.mark_for_deletion(key)
    }

    /// Undo [`WorkUnitManager::cancel_offer`].
    pub fn unmark_cancellation(&mut self, category: OfferCategory, key: &OrderKey) -> Option<Offer> {
        self.unit_mut(category).ok()?.unmark_for_deletion(key)
    }

    pub fn contains_offer(&self, category: OfferCategory, key: &OrderKey) -> bool {
        self.unit(category)
            .map(|u| u.contains_offer(key))
            .unwrap_or(false)
    }

    pub fn num_open_offers(&self) -> u64 {
        self.units.iter().map(WorkUnit::num_open_offers).sum()
    }

    // ========================================================================
    // Commit
    // ========================================================================

    pub fn commit_for_production(&mut self, round: u64) -> Result<BlockStateUpdateStats, EngineError> {
        let batch = self.config.production_batch_size;
        let stats = sum_stats(self.try_map_units(batch, |unit| unit.commit_for_production(round))?);
        debug!(round, new = stats.new_offer_count, cancelled = stats.cancel_offer_count, "committed for production");
        Ok(stats)
    }

    pub fn tentative_commit_for_validation(
        &mut self,
        round: u64,
    ) -> Result<BlockStateUpdateStats, EngineError> {
        let batch = self.config.validation_batch_size;
        let stats = sum_stats(self.try_map_units(batch, |unit| unit.tentative_commit_for_validation(round))?);
        debug!(round, new = stats.new_offer_count, cancelled = stats.cancel_offer_count, "tentatively committed");
        Ok(stats)
    }

    // ========================================================================
    // Clearing
    // ========================================================================

    /// Clear every market at `prices`, activating `params.supply_activated`.
    ///
    /// Every failure is structural: the parameters come from this node's own
    /// price computation.
    pub fn clear_offers_for_production(
        &mut self,
        params: &ClearingParams,
        prices: &[Price],
        round: u64,
        accounts: &dyn AccountView,
        log: &dyn ModificationLog,
    ) -> Result<(WorkUnitStateCommitment, BlockStateUpdateStats), EngineError> {
        if params.supply_activated.len() != self.units.len() {
            return Err(EngineError::Invariant(format!(
                "{} supply entries for {} markets",
                params.supply_activated.len(),
                self.units.len()
            )));
        }
        let num_assets = self.config.num_assets;
        let batch = self.config.production_batch_size;
        let tax_rate = params.tax_rate;

        let results = self.try_map_units(batch, |unit| {
            let category = unit.category();
            let prices = ClearingPrices::for_category(prices, category, tax_rate).ok_or_else(|| {
                EngineError::Invariant(format!("no usable prices for {:?}", category))
            })?;
            let supply = params
                .supply_activated
                .get(category.unit_index(num_assets))
                .copied()
                .unwrap_or_default();
            let mut stats = BlockStateUpdateStats::default();
            let commitment = unit.process_clear_offers(prices, supply, round, accounts, log, &mut stats)?;
            Ok((commitment, stats))
        })?;

        let mut stats = BlockStateUpdateStats::default();
        let mut commitment = WorkUnitStateCommitment::default();
        for (unit_commitment, unit_stats) in results {
            commitment.units.push(unit_commitment);
            stats += unit_stats;
        }

        if let Err(e) = check_clearing_params(&commitment, prices, tax_rate, num_assets) {
            error!(round, error = %e, "produced clearing violates its own parameters");
            return Err(EngineError::Invariant(e.to_string()));
        }
        info!(
            round,
            cleared = stats.fully_clear_offer_count,
            partial = stats.partial_clear_offer_count,
            "cleared offers for production"
        );
        Ok((commitment, stats))
    }

    /// Replay a claimed clearing against every market.
    ///
    /// A claim that does not hold comes back as `Err(EngineError::Clearing)`;
    /// the caller must then call [`WorkUnitManager::rollback_validation`].
    /// Once one market fails, markets that have not started yet skip their
    /// work.
    pub fn tentative_clear_offers_for_validation(
        &mut self,
        claim: &WorkUnitStateCommitment,
        prices: &[Price],
        tax_rate: u8,
        round: u64,
        accounts: &dyn AccountView,
        log: &dyn ModificationLog,
    ) -> Result<(ValidationStatistics, BlockStateUpdateStats), EngineError> {
        if claim.units.len() != self.units.len() {
            return Err(ClearingError::InvalidHeader(format!(
                "{} commitment entries for {} markets",
                claim.units.len(),
                self.units.len()
            ))
            .into());
        }
        let num_assets = self.config.num_assets;
        let batch = self.config.validation_batch_size;
        let failed = AtomicBool::new(false);

        let results = self.map_units(batch, |unit| {
            if failed.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let category = unit.category();
            let outcome = replay_claim(
                unit,
                &claim.units[category.unit_index(num_assets)],
                prices,
                tax_rate,
                round,
                accounts,
                log,
            );
            if outcome.is_err() {
                failed.store(true, Ordering::Relaxed);
            }
            outcome.map(Some)
        });

        let mut validation = ValidationStatistics::with_units(self.units.len());
        let mut stats = BlockStateUpdateStats::default();
        let mut mismatch = None;
        for (idx, result) in results.into_iter().enumerate() {
            match result {
                Ok(Some((unit_validation, unit_stats))) => {
                    validation.units[idx] = unit_validation;
                    stats += unit_stats;
                }
                Ok(None) => {}
                Err(e) if e.is_claim_mismatch() => {
                    mismatch.get_or_insert(e);
                }
                Err(e) => {
                    error!(round, unit = idx, error = %e, "structural failure during validation");
                    return Err(e);
                }
            }
        }
        if let Some(e) = mismatch {
            warn!(round, error = %e, "clearing claim rejected");
            return Err(e);
        }

        WorkUnitStateCommitmentChecker::new(claim).check(&validation)?;
        check_clearing_params(claim, prices, tax_rate, num_assets)?;
        debug!(round, cleared = stats.fully_clear_offer_count, "clearing claim replayed");
        Ok((validation, stats))
    }

    /// Fill each entry's root hash with its market's current root.
    pub fn freeze_and_hash(&mut self, commitment: &mut WorkUnitStateCommitment) -> Result<(), EngineError> {
        if commitment.units.len() != self.units.len() {
            commitment
                .units
                .resize(self.units.len(), SingleWorkUnitStateCommitment::default());
        }
        let batch = self.config.validation_batch_size;
        let hashes = self.try_map_units(batch, |unit| Ok(unit.root_hash()))?;
        for (entry, hash) in commitment.units.iter_mut().zip(hashes) {
            entry.root_hash = hash;
        }
        Ok(())
    }

    // ========================================================================
    // Finalize and Rollback
    // ========================================================================

    pub fn finalize_validation(&mut self, round: u64) -> Result<(), EngineError> {
        let batch = self.config.validation_batch_size;
        self.try_map_units(batch, |unit| unit.finalize_validation(round))?;
        debug!(round, "finalized work units");
        Ok(())
    }

    /// Roll every market back to its state before `round`. Every market is
    /// rolled back even if one fails.
    pub fn rollback_validation(&mut self, round: u64) -> Result<(), EngineError> {
        let batch = self.config.validation_batch_size;
        let results = self.map_units(batch, |unit| unit.rollback_validation(round));
        first_error(results)?;
        info!(round, "rolled back work units");
        Ok(())
    }

    /// Undo every pending round above `round` in every market.
    pub fn rollback_thunks(&mut self, round: u64) -> Result<(), EngineError> {
        let batch = self.config.validation_batch_size;
        let results = self.map_units(batch, |unit| unit.rollback_thunks(round));
        first_error(results)?;
        info!(round, "rolled back pending rounds");
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Flush every market's thunks through `round`.
    pub fn persist(&self, round: u64) -> Result<(), EngineError> {
        self.pool.install(|| self.registry.flush_all(round))
    }

    pub fn load_from_store(&mut self) -> Result<(), EngineError> {
        let batch = self.config.production_batch_size;
        self.try_map_units(batch, WorkUnit::load_from_store)?;
        info!(
            offers = self.num_open_offers(),
            round = self.min_persisted_round(),
            "loaded work units from store"
        );
        Ok(())
    }

    pub fn min_persisted_round(&self) -> u64 {
        self.registry.min_persisted_round()
    }

    pub fn max_persisted_round(&self) -> u64 {
        self.registry.max_persisted_round()
    }

    // ========================================================================
    // Price-Search Support
    // ========================================================================

    /// Smallest per-market feasible smoothing exponent for `params`.
    pub fn get_max_feasible_smooth_mult(
        &self,
        params: &ClearingParams,
        prices: &[Price],
    ) -> Result<u8, EngineError> {
        let mut max = u8::MAX;
        for (idx, unit) in self.units.iter().enumerate() {
            let amount = params
                .supply_activated
                .get(idx)
                .map(|s| s.ceil())
                .unwrap_or(0);
            let candidate = unit.max_feasible_smooth_mult(amount, prices)?;
            if candidate < 7 {
                debug!(market = ?unit.category(), candidate, "narrow feasible smoothing band");
            }
            max = max.min(candidate);
        }
        Ok(max)
    }

    /// Per-market `(must execute, may execute)` endowments.
    pub fn get_supply_bounds(
        &self,
        prices: &[Price],
        smooth_mult: u8,
    ) -> Result<Vec<(u128, u128)>, EngineError> {
        self.units
            .iter()
            .map(|u| u.get_supply_bounds(prices, smooth_mult))
            .collect()
    }

    /// Sum every market's supply and demand at `prices` into `demands` and
    /// `supplies` (one slot per asset).
    pub fn calculate_demands_and_supplies(
        &self,
        prices: &[Price],
        demands: &mut [u128],
        supplies: &mut [u128],
        smooth_mult: u8,
    ) -> Result<(), EngineError> {
        let n = self.config.num_assets as usize;
        let batch = self.config.production_batch_size.max(1);
        let units = &self.units;
        let (d, s) = self.pool.install(|| {
            units
                .par_chunks(batch)
                .map(|chunk| -> Result<(Vec<u128>, Vec<u128>), EngineError> {
                    let mut d = vec![0u128; n];
                    let mut s = vec![0u128; n];
                    for unit in chunk {
                        unit.calculate_demands_and_supplies(prices, &mut d, &mut s, smooth_mult)?;
                    }
                    Ok((d, s))
                })
                .try_reduce(
                    || (vec![0u128; n], vec![0u128; n]),
                    |(d1, s1), (d2, s2)| -> Result<(Vec<u128>, Vec<u128>), EngineError> {
                        Ok((add_slots(d1, &d2)?, add_slots(s1, &s2)?))
                    },
                )
        })?;

        for (out, add) in demands.iter_mut().zip(d.iter()) {
            *out = out.checked_add(*add).ok_or_else(demand_overflow)?;
        }
        for (out, add) in supplies.iter_mut().zip(s.iter()) {
            *out = out.checked_add(*add).ok_or_else(demand_overflow)?;
        }
        Ok(())
    }
}

fn replay_claim(
    unit: &mut WorkUnit,
    claim: &SingleWorkUnitStateCommitment,
    prices: &[Price],
    tax_rate: u8,
    round: u64,
    accounts: &dyn AccountView,
    log: &dyn ModificationLog,
) -> Result<(UnitValidationStats, BlockStateUpdateStats), EngineError> {
    let category = unit.category();
    let prices = ClearingPrices::for_category(prices, category, tax_rate).ok_or_else(|| {
        ClearingError::InvalidHeader(format!("no usable prices for {:?}", category))
    })?;
    let mut validation = UnitValidationStats::default();
    let mut stats = BlockStateUpdateStats::default();
    unit.tentative_clear_offers_for_validation(
        prices,
        claim,
        round,
        accounts,
        log,
        &mut validation,
        &mut stats,
    )?;
    Ok((validation, stats))
}

fn sum_stats(all: Vec<BlockStateUpdateStats>) -> BlockStateUpdateStats {
    let mut total = BlockStateUpdateStats::default();
    for stats in all {
        total += stats;
    }
    total
}

fn first_error(results: Vec<Result<(), EngineError>>) -> Result<(), EngineError> {
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            error!(error = %e, "work unit operation failed");
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn demand_overflow() -> EngineError {
    EngineError::Invariant("aggregate demand overflow".to_string())
}

fn add_slots(mut into: Vec<u128>, from: &[u128]) -> Result<Vec<u128>, EngineError> {
    for (a, b) in into.iter_mut().zip(from) {
        *a = a.checked_add(*b).ok_or_else(demand_overflow)?;
    }
    Ok(into)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clearing::tests::RecordingAccounts;
    use crate::types::price::PRICE_ONE;
    use crate::types::FractionalAsset;

    fn config(num_assets: u32) -> EngineConfig {
        EngineConfig {
            num_assets,
            worker_threads: 2,
            ..Default::default()
        }
    }

    fn accounts() -> RecordingAccounts {
        RecordingAccounts {
            known: (0..10).collect(),
            ..Default::default()
        }
    }

    fn offer(sell: u32, buy: u32, id: u64, amount: u64, price: u64) -> Offer {
        Offer::new(OfferCategory::new(sell, buy), id, 1, amount, price * PRICE_ONE)
    }

    /// Two assets priced equally; one offer each way, both fully cleared.
    fn balanced_manager() -> WorkUnitManager {
        let mut manager = WorkUnitManager::in_memory(config(2)).unwrap();
        manager.add_offer(offer(0, 1, 1, 40, 1)).unwrap();
        manager.add_offer(offer(1, 0, 2, 40, 1)).unwrap();
        manager
    }

    fn balanced_params(supply: u64) -> ClearingParams {
        ClearingParams {
            supply_activated: vec![FractionalAsset::from_integral(supply); 2],
            tax_rate: 10,
        }
    }

    #[test]
    fn test_unit_layout() {
        let manager = WorkUnitManager::in_memory(config(3)).unwrap();
        assert_eq!(manager.num_units(), 6);
        for (idx, unit) in manager.units().iter().enumerate() {
            assert_eq!(unit.category().unit_index(3), idx);
        }
    }

    #[test]
    fn test_add_offer_rejects_unknown_market() {
        let mut manager = WorkUnitManager::in_memory(config(2)).unwrap();
        let result = manager.add_offer(offer(0, 5, 1, 10, 1));
        assert!(matches!(
            result,
            Err(EngineError::Clearing(ClearingError::InvalidTransaction(_)))
        ));
        let result = manager.add_offer(offer(1, 1, 1, 10, 1));
        assert!(result.is_err());
    }

    #[test]
    fn test_production_then_validation_converge() {
        let accounts = accounts();
        let prices = vec![PRICE_ONE, PRICE_ONE];

        let mut producer = balanced_manager();
        producer.commit_for_production(1).unwrap();
        let (claim, produced) = producer
            .clear_offers_for_production(&balanced_params(25), &prices, 1, &accounts, &accounts)
            .unwrap();
        assert_eq!(produced.partial_clear_offer_count, 2);

        let mut validator = balanced_manager();
        validator.tentative_commit_for_validation(1).unwrap();
        let (validation, replayed) = validator
            .tentative_clear_offers_for_validation(&claim, &prices, 10, 1, &accounts, &accounts)
            .unwrap();
        validator.finalize_validation(1).unwrap();

        assert_eq!(replayed, produced);
        assert_eq!(validation.units.len(), 2);
        let mut recomputed = claim.clone();
        validator.freeze_and_hash(&mut recomputed).unwrap();
        assert_eq!(recomputed, claim);
    }

    #[test]
    fn test_validation_failure_rolls_back_everything() {
        let accounts = accounts();
        let prices = vec![PRICE_ONE, PRICE_ONE];
        let mut manager = balanced_manager();
        manager.commit_for_production(1).unwrap();
        manager.finalize_validation(1).unwrap();

        let mut before = WorkUnitStateCommitment::default();
        manager.freeze_and_hash(&mut before).unwrap();

        manager.add_offer(offer(0, 1, 3, 5, 1)).unwrap();
        manager.tentative_commit_for_validation(2).unwrap();
        // null claims for markets that still hold offers
        let claim = WorkUnitStateCommitment {
            units: vec![SingleWorkUnitStateCommitment::default(); 2],
        };
        let result = manager.tentative_clear_offers_for_validation(&claim, &prices, 10, 2, &accounts, &accounts);
        assert_eq!(result, Err(EngineError::Clearing(ClearingError::NullThresholdWithSupply)));

        manager.rollback_validation(2).unwrap();
        let mut after = WorkUnitStateCommitment::default();
        manager.freeze_and_hash(&mut after).unwrap();
        assert_eq!(after, before);
        assert_eq!(manager.num_open_offers(), 2);
    }

    #[test]
    fn test_claim_with_wrong_unit_count() {
        let accounts = accounts();
        let mut manager = balanced_manager();
        manager.tentative_commit_for_validation(1).unwrap();
        let claim = WorkUnitStateCommitment::default();
        let result = manager.tentative_clear_offers_for_validation(
            &claim,
            &[PRICE_ONE, PRICE_ONE],
            10,
            1,
            &accounts,
            &accounts,
        );
        assert!(matches!(
            result,
            Err(EngineError::Clearing(ClearingError::InvalidHeader(_)))
        ));
    }

    #[test]
    fn test_persist_and_reload() {
        let accounts = accounts();
        let mut manager = balanced_manager();
        manager.commit_for_production(1).unwrap();
        manager
            .clear_offers_for_production(&balanced_params(10), &[PRICE_ONE, PRICE_ONE], 1, &accounts, &accounts)
            .unwrap();
        manager.finalize_validation(1).unwrap();
        manager.persist(1).unwrap();
        assert_eq!(manager.min_persisted_round(), 1);

        let mut before = WorkUnitStateCommitment::default();
        manager.freeze_and_hash(&mut before).unwrap();
        manager.load_from_store().unwrap();
        let mut after = WorkUnitStateCommitment::default();
        manager.freeze_and_hash(&mut after).unwrap();
        assert_eq!(after, before);
        assert_eq!(manager.num_open_offers(), 2);
    }

    #[test]
    fn test_increase_num_traded_assets_keeps_markets() {
        let mut manager = balanced_manager();
        manager.commit_for_production(1).unwrap();
        manager.increase_num_traded_assets(3).unwrap();

        assert_eq!(manager.num_units(), 6);
        assert_eq!(manager.num_open_offers(), 2);
        let key = offer(0, 1, 1, 40, 1).key();
        assert!(manager.contains_offer(OfferCategory::new(0, 1), &key));
        // new markets follow the current round
        manager.commit_for_production(2).unwrap();
        manager.persist(2).unwrap();
        assert_eq!(manager.min_persisted_round(), 2);

        assert!(manager.increase_num_traded_assets(2).is_err());
    }

    #[test]
    fn test_demands_and_supplies_sum_over_markets() {
        let mut manager = balanced_manager();
        manager.commit_for_production(1).unwrap();
        let prices = vec![PRICE_ONE, PRICE_ONE];
        let mut demands = vec![0u128; 2];
        let mut supplies = vec![0u128; 2];
        manager
            .calculate_demands_and_supplies(&prices, &mut demands, &mut supplies, 0)
            .unwrap();
        assert_eq!(supplies, vec![40u128 << 24, 40u128 << 24]);
        assert_eq!(demands, supplies);

        let bounds = manager.get_supply_bounds(&prices, 0).unwrap();
        assert_eq!(bounds, vec![(40, 40), (40, 40)]);
        assert_eq!(
            manager
                .get_max_feasible_smooth_mult(&balanced_params(40), &prices)
                .unwrap(),
            u8::MAX
        );
    }
}
