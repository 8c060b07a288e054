//! Clearing commitments: the contract between price computation and the
//! clearing engine.
//!
//! A producer fills one [`SingleWorkUnitStateCommitment`] per market while
//! clearing. A validator receives the same structure as a claim, replays the
//! clearing against it, and checks the result with
//! [`WorkUnitStateCommitmentChecker`] and [`check_clearing_params`].

use sha2::Digest;

use crate::error::ClearingError;
use crate::types::price::{wide_multiply_val_by_a_over_b, Price};
use crate::types::{FractionalAsset, OfferCategory, OrderKey, ValidationStatistics};

/// Clearing outcome of one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleWorkUnitStateCommitment {
    /// Root hash of the market's order index after clearing
    pub root_hash: [u8; 32],

    /// Total supply executed, full and partial
    pub fractional_supply_activated: FractionalAsset,

    /// Key of the single partially executed offer, or zero
    pub partial_exec_threshold_key: OrderKey,

    /// Amount executed from the partially executed offer
    pub partial_exec_offer_activation_amount: FractionalAsset,

    /// Set when the market cleared to empty and no offer executed partially
    pub threshold_key_is_null: bool,
}

impl Default for SingleWorkUnitStateCommitment {
    fn default() -> Self {
        Self {
            root_hash: [0u8; 32],
            fractional_supply_activated: FractionalAsset::ZERO,
            partial_exec_threshold_key: OrderKey::ZERO,
            partial_exec_offer_activation_amount: FractionalAsset::ZERO,
            threshold_key_is_null: true,
        }
    }
}

impl SingleWorkUnitStateCommitment {
    /// The null flag is set exactly when the key is all zeros.
    #[inline]
    pub fn check_sanity(&self) -> bool {
        self.partial_exec_threshold_key.is_zero() == self.threshold_key_is_null
    }

    pub fn hash_into<D: Digest>(&self, hasher: &mut D) {
        hasher.update(self.root_hash);
        hasher.update(self.fractional_supply_activated.raw().to_be_bytes());
        hasher.update(self.partial_exec_threshold_key.as_bytes());
        hasher.update(self.partial_exec_offer_activation_amount.raw().to_be_bytes());
        hasher.update([self.threshold_key_is_null as u8]);
    }
}

/// Clearing outcomes of every market, indexed like the manager's units.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkUnitStateCommitment {
    pub units: Vec<SingleWorkUnitStateCommitment>,
}

impl WorkUnitStateCommitment {
    pub fn hash_into<D: Digest>(&self, hasher: &mut D) {
        hasher.update((self.units.len() as u64).to_be_bytes());
        for unit in &self.units {
            unit.hash_into(hasher);
        }
    }
}

/// Inputs a producer receives from price computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearingParams {
    /// Supply to activate in each market, indexed like the manager's units
    pub supply_activated: Vec<FractionalAsset>,

    /// Fee rate exponent applied on settlement
    pub tax_rate: u8,
}

/// Re-checks a claimed commitment against what a validator recomputed.
pub struct WorkUnitStateCommitmentChecker<'a> {
    commitment: &'a WorkUnitStateCommitment,
}

impl<'a> WorkUnitStateCommitmentChecker<'a> {
    pub fn new(commitment: &'a WorkUnitStateCommitment) -> Self {
        Self { commitment }
    }

    /// Check every market's threshold flag and additive identity:
    /// `activated_supply + partial activation == claimed supply`.
    pub fn check(&self, stats: &ValidationStatistics) -> Result<(), ClearingError> {
        if stats.units.len() != self.commitment.units.len() {
            return Err(ClearingError::SupplyMismatch {
                unit: stats.units.len().min(self.commitment.units.len()),
            });
        }
        for (unit, (claim, seen)) in self
            .commitment
            .units
            .iter()
            .zip(stats.units.iter())
            .enumerate()
        {
            if !claim.check_sanity() {
                return Err(ClearingError::ThresholdFlagMismatch { unit });
            }
            let total = seen
                .activated_supply
                .checked_add(claim.partial_exec_offer_activation_amount)
                .ok_or(ClearingError::SupplyMismatch { unit })?;
            if total != claim.fractional_supply_activated {
                return Err(ClearingError::SupplyMismatch { unit });
            }
        }
        Ok(())
    }
}

/// Check that, per asset, activated supply covers taxed demand.
///
/// Demand for the buy asset of a market is `activated * sell / buy`.
pub fn check_clearing_params(
    commitment: &WorkUnitStateCommitment,
    prices: &[Price],
    tax_rate: u8,
    num_assets: u32,
) -> Result<(), ClearingError> {
    let n = num_assets as usize;
    let mut supplies = vec![0u128; n];
    let mut demands = vec![0u128; n];

    for (idx, unit) in commitment.units.iter().enumerate() {
        let category = OfferCategory::from_unit_index(idx, num_assets).ok_or_else(|| {
            ClearingError::InvalidHeader(format!("commitment entry {} has no market", idx))
        })?;
        let sell = category.sell_asset as usize;
        let buy = category.buy_asset as usize;
        let (sell_price, buy_price) = match (prices.get(sell), prices.get(buy)) {
            (Some(s), Some(b)) => (*s, *b),
            _ => {
                return Err(ClearingError::InvalidHeader(
                    "price vector shorter than asset count".to_string(),
                ))
            }
        };

        let supplied = unit.fractional_supply_activated.raw();
        let demanded = wide_multiply_val_by_a_over_b(supplied, sell_price, buy_price)
            .ok_or_else(|| ClearingError::InvalidHeader(format!("demand overflow in market {}", idx)))?;

        supplies[sell] = supplies[sell]
            .checked_add(supplied)
            .ok_or_else(|| ClearingError::InvalidHeader("supply overflow".to_string()))?;
        demands[buy] = demands[buy]
            .checked_add(demanded)
            .ok_or_else(|| ClearingError::InvalidHeader("demand overflow".to_string()))?;
    }

    for asset in 0..n {
        let supplied = FractionalAsset::from_raw(supplies[asset]);
        let taxed_demand = FractionalAsset::from_raw(demands[asset]).tax(tax_rate);
        if supplied < taxed_demand {
            return Err(ClearingError::DemandExceedsSupply {
                asset: asset as u32,
            });
        }
    }
    Ok(())
}

// ============================================================================
// Unit Tests
// ============================================================================
