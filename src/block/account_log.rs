//! Per-block record of which accounts had offers modified.
//!
//! Settlement reports every executed offer here. The log's hash goes into
//! the block header; the log itself is emptied at every block boundary,
//! whether the block was kept or discarded.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::block::guard::TentativeState;
use crate::engine::accounts::ModificationLog;
use crate::error::EngineError;
use crate::types::AccountId;

#[derive(Debug, Default)]
pub struct AccountModificationLog {
    modified: Mutex<BTreeMap<AccountId, BTreeSet<u64>>>,
}

impl AccountModificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer ids of `owner` modified in the open block.
    pub fn modified_offers(&self, owner: AccountId) -> Vec<u64> {
        self.modified
            .lock()
            .get(&owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn num_accounts(&self) -> usize {
        self.modified.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modified.lock().is_empty()
    }

    pub fn hash(&self) -> [u8; 32] {
        let modified = self.modified.lock();
        let mut hasher = Sha256::new();
        hasher.update((modified.len() as u64).to_be_bytes());
        for (owner, offers) in modified.iter() {
            hasher.update(owner.to_be_bytes());
            hasher.update((offers.len() as u64).to_be_bytes());
            for offer_id in offers {
                hasher.update(offer_id.to_be_bytes());
            }
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        hash
    }
}

impl ModificationLog for AccountModificationLog {
    fn log_self_modification(&self, owner: AccountId, offer_id: u64) {
        self.modified.lock().entry(owner).or_default().insert(offer_id);
    }
}

impl TentativeState for AccountModificationLog {
    fn name(&self) -> &'static str {
        "account modification log"
    }

    fn finalize_round(&mut self, _round: u64) -> Result<(), EngineError> {
        self.modified.get_mut().clear();
        Ok(())
    }

    fn rollback_round(&mut self, _round: u64) -> Result<(), EngineError> {
        self.modified.get_mut().clear();
        Ok(())
    }
}
