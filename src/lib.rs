//! # Sharded Clearing
//!
//! Batch clearing engine for a limit-order-book exchange, split into one
//! independent market ("work unit") per ordered asset pair.
//!
//! ## Architecture
//!
//! - **Types**: fixed-point prices, fractional amounts, offers and keys
//! - **OrderBook**: merkle trie of resting offers plus price metadata
//! - **Engine**: per-market thunks, clearing, and the parallel work unit manager
//! - **Persistence**: thunk queues flushed to an offer store in the background
//! - **Block**: production and validation across every subsystem, with rollback
//!
//! ## Design Principles
//!
//! 1. **Determinism**: producer and validator derive identical root hashes
//! 2. **No Floating Point**: prices are 24-bit-radix fixed point, amounts 10-bit
//! 3. **Rollback First**: every mutation of a round can be undone until finalized
//! 4. **Independent Markets**: units share no state and run on a rayon pool

// ============================================================================
// Module declarations
// ============================================================================

/// Core data types: Offer, OrderKey, FractionalAsset, commitments
pub mod types;

/// Order index: merkle trie with slab-based storage
pub mod orderbook;

/// Clearing engine: work units and their manager
pub mod engine;

/// Thunk queues and offer stores
pub mod persistence;

/// Block production and validation
pub mod block;

pub mod config;
pub mod error;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use block::{BlockOutcome, HashedBlock, LedgerState, OfferBatch};
pub use config::EngineConfig;
pub use engine::{WorkUnit, WorkUnitManager};
pub use error::{ClearingError, EngineError};
pub use orderbook::{MetadataIndex, OrderIndex};
pub use types::{FractionalAsset, Offer, OfferCategory, OrderKey, Price};
