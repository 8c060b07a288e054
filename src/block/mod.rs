//! Block production and validation.
//!
//! A block touches four subsystems: the account database, the work unit
//! manager, the account modification log and the block header hash map.
//! [`LedgerState`] applies a block to all four under [`Tentative`] guards, so
//! a rejected block rolls every one of them back.
//!
//! ## Example
//!
//! ```
//! use sharded_clearing::block::{LedgerState, OfferBatch};
//! use sharded_clearing::config::EngineConfig;
//! use sharded_clearing::types::{ClearingParams, FractionalAsset};
//! use sharded_clearing::types::price::PRICE_ONE;
//!
//! let config = EngineConfig { num_assets: 2, worker_threads: 1, ..Default::default() };
//! let mut producer = LedgerState::in_memory(config.clone()).unwrap();
//! let mut validator = LedgerState::in_memory(config).unwrap();
//!
//! let params = ClearingParams {
//!     supply_activated: vec![FractionalAsset::ZERO; 2],
//!     tax_rate: 10,
//! };
//! let block = producer
//!     .produce_block(&OfferBatch::default(), vec![PRICE_ONE; 2], &params)
//!     .unwrap();
//! assert!(validator.validate_block(&block).unwrap().is_accepted());
//! ```

pub mod account_log;
pub mod batch;
pub mod database;
pub mod guard;
pub mod header;
pub mod header_map;
pub mod orchestrator;

pub use account_log::AccountModificationLog;
pub use batch::{apply_offer_batch, BatchMode, Cancellation, OfferBatch};
pub use database::{AccountBalances, AccountDatabase};
pub use guard::{Tentative, TentativeState};
pub use header::{Block, BlockHeader, HashedBlock};
pub use header_map::BlockHeaderHashMap;
pub use orchestrator::{BlockOutcome, LedgerState};
