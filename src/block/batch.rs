//! Offer transactions carried by a block.
//!
//! A batch opens accounts, places offers (escrowing their sell amount) and
//! cancels open offers (releasing what is left of theirs). Everything lands
//! in the markets' uncommitted areas; nothing is visible to clearing until
//! the round's commit.
//!
//! | Mode | Invalid entry |
//! |------|---------------|
//! | `Production` | skipped, left out of the returned batch |
//! | `Validation` | rejects the block |

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::block::database::AccountDatabase;
use crate::engine::{AccountView, WorkUnitManager};
use crate::error::{ClearingError, EngineError};
use crate::types::price::is_valid_price;
use crate::types::{AccountId, Offer, OfferCategory, OrderKey};

/// Request to cancel an open offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancellation {
    pub owner: AccountId,
    pub category: OfferCategory,
    pub key: OrderKey,
}

impl Cancellation {
    pub fn of(offer: &Offer) -> Self {
        Self {
            owner: offer.owner,
            category: offer.category(),
            key: offer.key(),
        }
    }
}

/// The offer transactions of one block, applied in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferBatch {
    pub new_accounts: Vec<AccountId>,
    pub new_offers: Vec<Offer>,
    pub cancellations: Vec<Cancellation>,
}

impl OfferBatch {
    pub fn len(&self) -> usize {
        self.new_accounts.len() + self.new_offers.len() + self.cancellations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.new_accounts.len() as u64).to_be_bytes());
        for owner in &self.new_accounts {
            hasher.update(owner.to_be_bytes());
        }
        hasher.update((self.new_offers.len() as u64).to_be_bytes());
        for offer in &self.new_offers {
            offer.hash_into(&mut hasher);
        }
        hasher.update((self.cancellations.len() as u64).to_be_bytes());
        for cancel in &self.cancellations {
            hasher.update(cancel.owner.to_be_bytes());
            hasher.update(cancel.category.sell_asset.to_be_bytes());
            hasher.update(cancel.category.buy_asset.to_be_bytes());
            hasher.update([cancel.category.kind.to_u8()]);
            hasher.update(cancel.key.as_bytes());
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Production,
    Validation,
}

/// Apply `batch` to the account database and the markets' uncommitted
/// areas. Returns the entries that were applied.
///
/// # Errors
///
/// * `Clearing` - an invalid entry, in validation mode only
/// * anything else - structural
pub fn apply_offer_batch(
    batch: &OfferBatch,
    mode: BatchMode,
    database: &mut AccountDatabase,
    manager: &mut WorkUnitManager,
) -> Result<OfferBatch, EngineError> {
    let mut accepted = OfferBatch::default();

    for owner in &batch.new_accounts {
        let result = database.create_account(*owner).map(|_| ()).map_err(EngineError::from);
        if keep(result, mode)? {
            accepted.new_accounts.push(*owner);
        }
    }

    for offer in &batch.new_offers {
        if keep(place_offer(offer, database, manager), mode)? {
            accepted.new_offers.push(offer.clone());
        }
    }

    for cancel in &batch.cancellations {
        if keep(cancel_offer(cancel, database, manager), mode)? {
            accepted.cancellations.push(*cancel);
        }
    }

    if accepted.len() != batch.len() {
        debug!(
            submitted = batch.len(),
            accepted = accepted.len(),
            "dropped invalid offer transactions"
        );
    }
    Ok(accepted)
}

/// `Ok(true)` to keep the entry, `Ok(false)` to skip it.
fn keep(result: Result<(), EngineError>, mode: BatchMode) -> Result<bool, EngineError> {
    match (result, mode) {
        (Ok(()), _) => Ok(true),
        (Err(e), BatchMode::Production) if e.is_claim_mismatch() => {
            debug!(error = %e, "skipping offer transaction");
            Ok(false)
        }
        (Err(e), _) => Err(e),
    }
}

fn place_offer(
    offer: &Offer,
    database: &AccountDatabase,
    manager: &mut WorkUnitManager,
) -> Result<(), EngineError> {
    let category = offer.category();
    let key = offer.key();
    if !category.is_valid(manager.num_assets()) {
        return Err(invalid(format!("offer {} has no market", key)));
    }
    if offer.amount == 0 {
        return Err(invalid(format!("offer {} has zero amount", key)));
    }
    if !is_valid_price(offer.min_price) {
        return Err(invalid(format!("offer {} has price {}", key, offer.min_price)));
    }
    if manager.contains_offer(category, &key) {
        return Err(invalid(format!("offer {} already exists", key)));
    }
    let account = database
        .lookup_user_id(offer.owner)
        .ok_or(ClearingError::UnknownAccount(offer.owner))?;

    database.escrow(account, offer.sell_asset, offer.amount)?;
    manager.add_offer(offer.clone())
}

fn cancel_offer(
    cancel: &Cancellation,
    database: &AccountDatabase,
    manager: &mut WorkUnitManager,
) -> Result<(), EngineError> {
    let offer = manager
        .cancel_offer(cancel.category, &cancel.key)
        .ok_or_else(|| invalid(format!("no open offer {}", cancel.key)))?;

    let result = if offer.owner != cancel.owner {
        Err(invalid(format!(
            "account {} cannot cancel offer {}",
            cancel.owner, cancel.key
        )))
    } else {
        match database.lookup_user_id(offer.owner) {
            Some(account) => database.release_escrow(account, offer.sell_asset, offer.amount),
            None => Err(ClearingError::UnknownAccount(offer.owner).into()),
        }
    };

    if result.is_err() {
        manager.unmark_cancellation(cancel.category, &cancel.key);
    }
    result
}

fn invalid(reason: String) -> EngineError {
    ClearingError::InvalidTransaction(reason).into()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::price::PRICE_ONE;

    fn setup() -> (AccountDatabase, WorkUnitManager) {
        let mut database = AccountDatabase::new(2);
        database.genesis_account(1, &[(0, 100)]).unwrap();
        let manager = WorkUnitManager::in_memory(EngineConfig {
            num_assets: 2,
            worker_threads: 1,
            ..Default::default()
        })
        .unwrap();
        (database, manager)
    }

    fn offer(id: u64, owner: AccountId, amount: u64) -> Offer {
        Offer::new(OfferCategory::new(0, 1), id, owner, amount, PRICE_ONE)
    }

    #[test]
    fn test_production_skips_invalid_entries() {
        let (mut database, mut manager) = setup();
        let batch = OfferBatch {
            new_accounts: vec![2, 1],
            new_offers: vec![offer(1, 1, 60), offer(2, 1, 60), offer(3, 9, 1), offer(4, 1, 0)],
            cancellations: vec![],
        };
        let accepted = apply_offer_batch(&batch, BatchMode::Production, &mut database, &mut manager).unwrap();

        assert_eq!(accepted.new_accounts, vec![2]);
        assert_eq!(accepted.new_offers, vec![offer(1, 1, 60)]);
        assert_eq!(database.escrowed(1, 0), Some(60));
        assert_eq!(database.available(1, 0), Some(40));
    }

    #[test]
    fn test_validation_rejects_first_invalid_entry() {
        let (mut database, mut manager) = setup();
        let batch = OfferBatch {
            new_offers: vec![offer(1, 1, 60), offer(2, 1, 60)],
            ..Default::default()
        };
        let result = apply_offer_batch(&batch, BatchMode::Validation, &mut database, &mut manager);
        assert!(matches!(
            result,
            Err(EngineError::Clearing(ClearingError::InvalidTransaction(_)))
        ));
    }

    #[test]
    fn test_cancel_releases_escrow() {
        let (mut database, mut manager) = setup();
        let placed = offer(1, 1, 60);
        let batch = OfferBatch {
            new_offers: vec![placed.clone()],
            cancellations: vec![Cancellation::of(&placed)],
            ..Default::default()
        };
        let accepted = apply_offer_batch(&batch, BatchMode::Validation, &mut database, &mut manager).unwrap();
        assert_eq!(accepted, batch);
        assert_eq!(database.available(1, 0), Some(100));

        let stats = manager.commit_for_production(1).unwrap();
        assert_eq!(stats.new_offer_count, 0);
        assert_eq!(manager.num_open_offers(), 0);
    }

    #[test]
    fn test_foreign_cancellation_is_unmarked() {
        let (mut database, mut manager) = setup();
        database.genesis_account(2, &[]).unwrap();
        let placed = offer(1, 1, 60);
        apply_offer_batch(
            &OfferBatch {
                new_offers: vec![placed.clone()],
                ..Default::default()
            },
            BatchMode::Production,
            &mut database,
            &mut manager,
        )
        .unwrap();

        let foreign = Cancellation {
            owner: 2,
            ..Cancellation::of(&placed)
        };
        let accepted = apply_offer_batch(
            &OfferBatch {
                cancellations: vec![foreign],
                ..Default::default()
            },
            BatchMode::Production,
            &mut database,
            &mut manager,
        )
        .unwrap();
        assert!(accepted.is_empty());

        manager.commit_for_production(1).unwrap();
        assert_eq!(manager.num_open_offers(), 1);
        assert_eq!(database.escrowed(1, 0), Some(60));
    }

    #[test]
    fn test_batch_hash_covers_every_field() {
        let placed = offer(1, 1, 60);
        let base = OfferBatch {
            new_accounts: vec![5],
            new_offers: vec![placed.clone()],
            cancellations: vec![],
        };
        let mut with_cancel = base.clone();
        with_cancel.cancellations.push(Cancellation::of(&placed));
        assert_ne!(base.hash(), with_cancel.hash());
        assert_ne!(base.hash(), OfferBatch::default().hash());
    }
}
