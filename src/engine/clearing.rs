//! Settlement of executed offers.
//!
//! ## Rounding
//!
//! | Quantity | Direction |
//! |----------|-----------|
//! | Sell amount taken from a partial offer | ceil |
//! | Buy amount credited (after fee) | floor |
//!
//! A fully cleared offer gives up its whole remaining amount. The owner is
//! credited `tax(amount * sell / buy)` of the buy asset, rounded down.
//!
//! ## Price Check
//!
//! Any offer executed with a positive amount must accept the exchange rate:
//! `min_price <= sell / buy`.

use crate::engine::accounts::{AccountView, ModificationLog};
use crate::error::{ClearingError, EngineError};
use crate::orderbook::OrderIndex;
use crate::types::price::{a_over_b_lt_c, wide_multiply_val_by_a_over_b, Price};
use crate::types::{FractionalAsset, Offer, OfferCategory};

/// Prices of one market's two assets plus the fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearingPrices {
    pub sell: Price,
    pub buy: Price,
    pub tax_rate: u8,
}

impl ClearingPrices {
    /// Pick out the prices of `category`'s assets. `None` if the vector is
    /// too short or the buy price is zero.
    pub fn for_category(prices: &[Price], category: OfferCategory, tax_rate: u8) -> Option<Self> {
        let sell = *prices.get(category.sell_asset as usize)?;
        let buy = *prices.get(category.buy_asset as usize)?;
        if buy == 0 {
            return None;
        }
        Some(Self {
            sell,
            buy,
            tax_rate,
        })
    }

    /// True when `sell / buy < min_price`.
    #[inline]
    pub fn exchange_rate_below(&self, min_price: Price) -> bool {
        a_over_b_lt_c(self.sell, self.buy, min_price)
    }

    /// Taxed buy-asset payout for `sold`, rounded down.
    fn payout(&self, sold: FractionalAsset) -> Option<u128> {
        let gross = wide_multiply_val_by_a_over_b(sold.raw(), self.sell, self.buy)?;
        Some(FractionalAsset::from_raw(gross).tax_and_round(self.tax_rate))
    }
}

/// Moves funds for executed offers through the account collaborators.
pub struct Settler<'a> {
    accounts: &'a dyn AccountView,
    log: &'a dyn ModificationLog,
    prices: ClearingPrices,
}

impl<'a> Settler<'a> {
    pub fn new(
        accounts: &'a dyn AccountView,
        log: &'a dyn ModificationLog,
        prices: ClearingPrices,
    ) -> Self {
        Self {
            accounts,
            log,
            prices,
        }
    }

    #[inline]
    pub fn prices(&self) -> ClearingPrices {
        self.prices
    }

    /// Execute the whole remaining amount of `offer`.
    ///
    /// # Errors
    ///
    /// * `PriceBelowMinimum` - the offer does not accept the rate
    /// * `UnknownAccount` - the owner has no account
    /// * `SettlementOverflow` - payout does not fit
    pub fn clear_offer_full(&self, offer: &Offer) -> Result<(), EngineError> {
        let key = offer.key();
        if self.prices.exchange_rate_below(offer.min_price) {
            return Err(ClearingError::PriceBelowMinimum(key).into());
        }
        let account = self
            .accounts
            .lookup_user_id(offer.owner)
            .ok_or(ClearingError::UnknownAccount(offer.owner))?;

        let bought = self
            .prices
            .payout(FractionalAsset::from_integral(offer.amount))
            .and_then(|v| i128::try_from(v).ok())
            .ok_or(ClearingError::SettlementOverflow(key))?;

        self.accounts
            .transfer_escrow(account, offer.sell_asset, -(offer.amount as i128))?;
        self.accounts
            .transfer_available(account, offer.buy_asset, bought)?;
        self.log.log_self_modification(offer.owner, offer.offer_id);
        Ok(())
    }

    /// Execute `activation` of `offer`. Returns the whole units of the sell
    /// asset taken, `ceil(activation)`.
    ///
    /// # Errors
    ///
    /// Same as [`Settler::clear_offer_full`], plus `ActivationExceedsOffer`
    /// when `ceil(activation)` is more than the offer holds.
    pub fn clear_offer_partial(
        &self,
        offer: &Offer,
        activation: FractionalAsset,
    ) -> Result<u64, EngineError> {
        let key = offer.key();
        if !activation.is_zero() && self.prices.exchange_rate_below(offer.min_price) {
            return Err(ClearingError::PriceBelowMinimum(key).into());
        }

        let sold = activation.ceil();
        if sold > offer.amount as u128 {
            return Err(ClearingError::ActivationExceedsOffer {
                key,
                requested: sold,
                available: offer.amount,
            }
            .into());
        }
        let account = self
            .accounts
            .lookup_user_id(offer.owner)
            .ok_or(ClearingError::UnknownAccount(offer.owner))?;

        let bought = self
            .prices
            .payout(activation)
            .and_then(|v| i128::try_from(v).ok())
            .ok_or(ClearingError::SettlementOverflow(key))?;

        // sold <= offer.amount, so it fits in u64
        let sold = sold as u64;
        self.accounts
            .transfer_escrow(account, offer.sell_asset, -(sold as i128))?;
        self.accounts
            .transfer_available(account, offer.buy_asset, bought)?;
        self.log.log_self_modification(offer.owner, offer.offer_id);
        Ok(sold)
    }

    /// Fully execute every offer in `index`. Returns the number executed.
    pub fn clear_all(&self, index: &OrderIndex) -> Result<u64, EngineError> {
        let mut count = 0u64;
        index.apply(|offer| {
            self.clear_offer_full(offer)?;
            count += 1;
            Ok::<(), EngineError>(())
        })?;
        Ok(count)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::accounts::AccountIdx;
    use crate::types::price::PRICE_ONE;
    use crate::types::{AccountId, AssetId};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Accounts 0..n with unlimited escrow; records net movements.
    #[derive(Default)]
    pub(crate) struct RecordingAccounts {
        pub known: Vec<AccountId>,
        pub escrow: Mutex<HashMap<(AccountIdx, AssetId), i128>>,
        pub available: Mutex<HashMap<(AccountIdx, AssetId), i128>>,
        pub modified: Mutex<Vec<(AccountId, u64)>>,
    }

    impl AccountView for RecordingAccounts {
        fn lookup_user_id(&self, owner: AccountId) -> Option<AccountIdx> {
            self.known.iter().position(|id| *id == owner)
        }

        fn transfer_escrow(
            &self,
            account: AccountIdx,
            asset: AssetId,
            delta: i128,
        ) -> Result<(), EngineError> {
            *self.escrow.lock().entry((account, asset)).or_default() += delta;
            Ok(())
        }

        fn transfer_available(
            &self,
            account: AccountIdx,
            asset: AssetId,
            delta: i128,
        ) -> Result<(), EngineError> {
            *self.available.lock().entry((account, asset)).or_default() += delta;
            Ok(())
        }
    }

    impl ModificationLog for RecordingAccounts {
        fn log_self_modification(&self, owner: AccountId, offer_id: u64) {
            self.modified.lock().push((owner, offer_id));
        }
    }

    fn prices(sell: u64, buy: u64) -> ClearingPrices {
        ClearingPrices {
            sell: sell * PRICE_ONE,
            buy: buy * PRICE_ONE,
            tax_rate: 10,
        }
    }

    #[test]
    fn test_for_category_picks_assets() {
        let vector = vec![PRICE_ONE, 2 * PRICE_ONE, 3 * PRICE_ONE];
        let p = ClearingPrices::for_category(&vector, OfferCategory::new(2, 0), 5).unwrap();
        assert_eq!((p.sell, p.buy, p.tax_rate), (3 * PRICE_ONE, PRICE_ONE, 5));
        assert!(ClearingPrices::for_category(&vector, OfferCategory::new(0, 3), 5).is_none());
    }

    #[test]
    fn test_full_clear_moves_funds() {
        let accounts = RecordingAccounts {
            known: vec![7],
            ..Default::default()
        };
        let settler = Settler::new(&accounts, &accounts, prices(2, 1));
        let offer = Offer::new(OfferCategory::new(0, 1), 1, 7, 1024, PRICE_ONE);
        settler.clear_offer_full(&offer).unwrap();

        assert_eq!(accounts.escrow.lock()[&(0, 0)], -1024);
        // 2048 gross, fee 2
        assert_eq!(accounts.available.lock()[&(0, 1)], 2046);
        assert_eq!(*accounts.modified.lock(), vec![(7, 1)]);
    }

    #[test]
    fn test_full_clear_rejects_price_and_owner() {
        let accounts = RecordingAccounts {
            known: vec![7],
            ..Default::default()
        };
        let settler = Settler::new(&accounts, &accounts, prices(1, 1));

        let greedy = Offer::new(OfferCategory::new(0, 1), 1, 7, 10, 2 * PRICE_ONE);
        assert_eq!(
            settler.clear_offer_full(&greedy),
            Err(EngineError::Clearing(ClearingError::PriceBelowMinimum(greedy.key())))
        );

        let stranger = Offer::new(OfferCategory::new(0, 1), 1, 8, 10, PRICE_ONE);
        assert_eq!(
            settler.clear_offer_full(&stranger),
            Err(EngineError::Clearing(ClearingError::UnknownAccount(8)))
        );
        assert!(accounts.escrow.lock().is_empty());
    }

    #[test]
    fn test_partial_clear_rounds_sell_up() {
        let accounts = RecordingAccounts {
            known: vec![7],
            ..Default::default()
        };
        let settler = Settler::new(&accounts, &accounts, prices(1, 1));
        let offer = Offer::new(OfferCategory::new(0, 1), 1, 7, 50, PRICE_ONE);

        // 20.5 units activated: 21 taken, 20 paid (fee rounds the half away)
        let activation = FractionalAsset::from_raw((20 << 10) + 512);
        let sold = settler.clear_offer_partial(&offer, activation).unwrap();
        assert_eq!(sold, 21);
        assert_eq!(accounts.escrow.lock()[&(0, 0)], -21);
        assert_eq!(accounts.available.lock()[&(0, 1)], 20);
    }

    #[test]
    fn test_partial_clear_over_activation() {
        let accounts = RecordingAccounts {
            known: vec![7],
            ..Default::default()
        };
        let settler = Settler::new(&accounts, &accounts, prices(1, 1));
        let offer = Offer::new(OfferCategory::new(0, 1), 1, 7, 50, PRICE_ONE);
        let result = settler.clear_offer_partial(&offer, FractionalAsset::from_raw((50 << 10) + 1));
        assert_eq!(
            result,
            Err(EngineError::Clearing(ClearingError::ActivationExceedsOffer {
                key: offer.key(),
                requested: 51,
                available: 50
            }))
        );
    }

    #[test]
    fn test_zero_activation_skips_price_check() {
        let accounts = RecordingAccounts {
            known: vec![7],
            ..Default::default()
        };
        let settler = Settler::new(&accounts, &accounts, prices(1, 1));
        let offer = Offer::new(OfferCategory::new(0, 1), 1, 7, 50, 5 * PRICE_ONE);
        assert_eq!(settler.clear_offer_partial(&offer, FractionalAsset::ZERO), Ok(0));
    }
}
