//! Clearing engine: markets, their round lifecycle, and settlement.
//!
//! ## Design Principles
//!
//! 1. **Determinism**: a validator replaying a claimed clearing reaches the
//!    producer's root hashes bit for bit
//! 2. **Fixed-Point Math**: prices carry 24 fractional bits, partial amounts 10
//! 3. **Forward Logs**: every round leaves a [`Thunk`] that can undo it or be
//!    folded into the store
//! 4. **Disjoint Markets**: units share nothing, so rounds fan out on rayon
//!
//! ## Clearing Rules
//!
//! - Offers execute cheapest first (by minimum price, then owner, then id)
//! - Offers below the activated supply execute in full
//! - Exactly one offer (the next cheapest) absorbs the remainder partially
//! - Sell amounts taken round up, buy amounts credited round down after fee
//!
//! ## Example
//!
//! ```
//! use sharded_clearing::config::EngineConfig;
//! use sharded_clearing::engine::WorkUnitManager;
//! use sharded_clearing::types::{Offer, OfferCategory};
//! use sharded_clearing::types::price::PRICE_ONE;
//!
//! let mut manager = WorkUnitManager::in_memory(EngineConfig {
//!     num_assets: 2,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! manager
//!     .add_offer(Offer::new(OfferCategory::new(0, 1), 1, 7, 60, PRICE_ONE))
//!     .unwrap();
//! let stats = manager.commit_for_production(1).unwrap();
//!
//! assert_eq!(stats.new_offer_count, 1);
//! assert_eq!(manager.num_open_offers(), 1);
//! ```

pub mod accounts;
pub mod clearing;
pub mod manager;
pub mod thunk;
pub mod work_unit;

pub use accounts::{AccountIdx, AccountView, ModificationLog};
pub use clearing::{ClearingPrices, Settler};
pub use manager::{StoreFactory, WorkUnitManager};
pub use thunk::{ClearingRecord, ClearingThreshold, PartialExecution, Thunk};
pub use work_unit::WorkUnit;
