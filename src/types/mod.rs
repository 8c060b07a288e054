//! Core data types for the clearing engine
//!
//! ## Types
//!
//! - [`Offer`]: a resting sell offer
//! - [`OfferCategory`]: the market (sell asset, buy asset, kind) an offer lives in
//! - [`OrderKey`]: 22-byte index key ordered by price, owner, offer id
//! - [`FractionalAsset`]: 128-bit fixed-point amount for partial executions
//! - [`SingleWorkUnitStateCommitment`] / [`WorkUnitStateCommitment`]: clearing outcomes
//! - [`BlockStateUpdateStats`] / [`ValidationStatistics`]: per-round counters
//!
//! ## Fixed-Point Arithmetic
//!
//! Prices are `u64` with 24 fractional bits (see [`price`]). Amounts on
//! offers are whole units; partially executed amounts carry 10 fractional
//! bits in a `u128`.

mod commitment;
mod fractional;
mod key;
mod offer;
mod stats;
pub mod price;

pub use commitment::{
    check_clearing_params, ClearingParams, SingleWorkUnitStateCommitment,
    WorkUnitStateCommitment, WorkUnitStateCommitmentChecker,
};
pub use fractional::{FractionalAsset, FRACTIONAL_RADIX};
pub use key::{OrderKey, ORDER_KEY_BITS, ORDER_KEY_LEN};
pub use offer::{AccountId, AssetId, Offer, OfferCategory, OfferKind, NUM_OFFER_KINDS};
pub use price::Price;
pub use stats::{BlockStateUpdateStats, UnitValidationStats, ValidationStatistics};
