//! Error taxonomy for the clearing engine.
//!
//! Two families matter to callers:
//!
//! - [`ClearingError`]: a claim made by a block proposer (or a transaction in
//!   its batch) does not hold. Validation turns these into "block rejected"
//!   and rolls every subsystem back. They never indicate local corruption.
//! - Everything else in [`EngineError`]: structural faults (duplicate keys,
//!   missing keys during undo, negative amounts, broken thunk ordering).
//!   These abort the operation and are propagated to the driver.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::{AccountId, AssetId, OrderKey};

/// Structural faults inside an [`OrderIndex`](crate::orderbook::OrderIndex).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("key {0} is already present")]
    DuplicateKey(OrderKey),

    #[error("key {0} is not present")]
    MissingKey(OrderKey),

    #[error("offer {0} has zero amount")]
    ZeroAmount(OrderKey),

    #[error("split threshold {threshold} exceeds endowment {available}")]
    SplitExceedsEndowment { threshold: u128, available: u128 },

    #[error("cumulative endowment overflowed")]
    EndowmentOverflow,

    #[error("trie node {0} is missing a child")]
    CorruptNode(usize),
}

/// Persistence-layer failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to encode offer {key}: {reason}")]
    Encode { key: OrderKey, reason: String },

    #[error("failed to decode offer {key}: {reason}")]
    Decode { key: OrderKey, reason: String },

    #[error("persisted round cannot move from {current} to {requested}")]
    WatermarkRegression { current: u64, requested: u64 },
}

/// A claim that does not hold. Recoverable at block level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClearingError {
    #[error("claimed threshold key {0} has no offer")]
    ThresholdKeyMissing(OrderKey),

    #[error("null threshold claimed with nonzero activation or remaining supply")]
    NullThresholdWithSupply,

    #[error("activation of {requested} exceeds remaining amount {available} of offer {key}")]
    ActivationExceedsOffer {
        key: OrderKey,
        requested: u128,
        available: u64,
    },

    #[error("no account for owner {0}")]
    UnknownAccount(AccountId),

    #[error("exchange rate is below the minimum price of offer {0}")]
    PriceBelowMinimum(OrderKey),

    #[error("settlement arithmetic overflowed for offer {0}")]
    SettlementOverflow(OrderKey),

    #[error("unit {unit}: full clears plus partial activation do not sum to the claimed supply")]
    SupplyMismatch { unit: usize },

    #[error("unit {unit}: threshold key and null flag disagree")]
    ThresholdFlagMismatch { unit: usize },

    #[error("asset {asset}: taxed demand exceeds supply")]
    DemandExceedsSupply { asset: AssetId },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid block header: {0}")]
    InvalidHeader(String),

    #[error("block hash {claimed} does not match recomputed {computed}")]
    HashMismatch { claimed: String, computed: String },
}

/// Top-level error returned by engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("clearing invalid: {0}")]
    Clearing(#[from] ClearingError),

    #[error("thunk for round {found} does not follow round {expected_after}")]
    ThunkOrder { expected_after: u64, found: u64 },

    #[error("no pending thunks to persist round {round} (persisted through {persisted})")]
    MissingThunks { round: u64, persisted: u64 },

    #[error("cannot roll back to round {requested}: already persisted through {persisted}")]
    RollbackBelowPersisted { requested: u64, persisted: u64 },

    #[error("offer {key} would go negative: amount {amount}, consumed {consumed}")]
    AmountUnderflow {
        key: OrderKey,
        amount: u64,
        consumed: u64,
    },

    #[error("thread pool: {0}")]
    ThreadPool(String),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// True when the error reports a rejected claim rather than a local fault.
    pub fn is_claim_mismatch(&self) -> bool {
        matches!(self, EngineError::Clearing(_))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_mismatch_classification() {
        let mismatch = EngineError::from(ClearingError::NullThresholdWithSupply);
        assert!(mismatch.is_claim_mismatch());

        let structural = EngineError::from(IndexError::DuplicateKey(OrderKey::ZERO));
        assert!(!structural.is_claim_mismatch());
    }

    #[test]
    fn test_messages_name_the_key() {
        let key = OrderKey::new(1, 2, 3);
        let msg = IndexError::MissingKey(key).to_string();
        assert!(msg.contains(&key.to_string()));
    }
}
