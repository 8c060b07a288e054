//! Account balances touched by offer escrow and settlement.
//!
//! Each account holds an available and an escrowed balance per asset.
//! Placing an offer moves its amount from available to escrow; settlement
//! burns escrow of the sold asset and credits available of the bought one.
//!
//! Clearing runs in parallel across markets, so balances sit behind
//! per-account locks and every movement goes through `&self`. Each movement
//! is journaled; rolling back a round replays the journal in reverse.

use std::collections::HashMap;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::block::guard::TentativeState;
use crate::engine::accounts::{AccountIdx, AccountView};
use crate::error::{ClearingError, EngineError};
use crate::types::{AccountId, AssetId};

/// Balances of one account, indexed by asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountBalances {
    pub available: Vec<u128>,
    pub escrow: Vec<u128>,
}

impl AccountBalances {
    fn new(num_assets: u32) -> Self {
        Self {
            available: vec![0; num_assets as usize],
            escrow: vec![0; num_assets as usize],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BalanceKind {
    Available,
    Escrow,
}

#[derive(Debug, Clone, Copy)]
struct JournalEntry {
    account: AccountIdx,
    asset: AssetId,
    kind: BalanceKind,
    delta: i128,
}

/// In-memory account state with round-level rollback.
pub struct AccountDatabase {
    num_assets: u32,
    ids: HashMap<AccountId, AccountIdx>,
    owners: Vec<AccountId>,
    balances: Vec<Mutex<AccountBalances>>,
    /// Accounts `[committed..]` were opened in the current round
    committed: usize,
    journal: Mutex<Vec<JournalEntry>>,
}

impl AccountDatabase {
    pub fn new(num_assets: u32) -> Self {
        Self {
            num_assets,
            ids: HashMap::new(),
            owners: Vec::new(),
            balances: Vec::new(),
            committed: 0,
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn num_accounts(&self) -> usize {
        self.owners.len()
    }

    fn has_pending_changes(&self) -> bool {
        self.committed != self.owners.len() || !self.journal.lock().is_empty()
    }

    /// Open a funded account outside any round.
    ///
    /// # Errors
    ///
    /// `Invariant` while a round is open or the id is taken.
    pub fn genesis_account(
        &mut self,
        owner: AccountId,
        deposits: &[(AssetId, u128)],
    ) -> Result<AccountIdx, EngineError> {
        if self.has_pending_changes() {
            return Err(EngineError::Invariant(
                "genesis accounts cannot be opened during a round".to_string(),
            ));
        }
        let idx = self
            .create_account(owner)
            .map_err(|e| EngineError::Invariant(e.to_string()))?;
        let mut balances = AccountBalances::new(self.num_assets);
        for (asset, amount) in deposits {
            let slot = balances
                .available
                .get_mut(*asset as usize)
                .ok_or_else(|| EngineError::Invariant(format!("unknown asset {}", asset)))?;
            *slot += amount;
        }
        self.balances[idx] = Mutex::new(balances);
        self.committed = self.owners.len();
        Ok(idx)
    }

    /// Open an empty account in the current round.
    pub fn create_account(&mut self, owner: AccountId) -> Result<AccountIdx, ClearingError> {
        if self.ids.contains_key(&owner) {
            return Err(ClearingError::InvalidTransaction(format!(
                "account {} already exists",
                owner
            )));
        }
        let idx = self.owners.len();
        self.ids.insert(owner, idx);
        self.owners.push(owner);
        self.balances.push(Mutex::new(AccountBalances::new(self.num_assets)));
        Ok(idx)
    }

    pub fn balances(&self, owner: AccountId) -> Option<AccountBalances> {
        let idx = *self.ids.get(&owner)?;
        Some(self.balances[idx].lock().clone())
    }

    pub fn available(&self, owner: AccountId, asset: AssetId) -> Option<u128> {
        self.balances(owner)?.available.get(asset as usize).copied()
    }

    pub fn escrowed(&self, owner: AccountId, asset: AssetId) -> Option<u128> {
        self.balances(owner)?.escrow.get(asset as usize).copied()
    }

    fn apply(&self, entry: JournalEntry, journal: bool) -> Result<(), EngineError> {
        let cell = self
            .balances
            .get(entry.account)
            .ok_or_else(|| EngineError::Invariant(format!("no account at {}", entry.account)))?;
        let mut balances = cell.lock();
        let slots = match entry.kind {
            BalanceKind::Available => &mut balances.available,
            BalanceKind::Escrow => &mut balances.escrow,
        };
        let slot = slots
            .get_mut(entry.asset as usize)
            .ok_or_else(|| EngineError::Invariant(format!("unknown asset {}", entry.asset)))?;
        *slot = slot.checked_add_signed(entry.delta).ok_or_else(|| {
            EngineError::Invariant(format!(
                "{:?} balance of account {} asset {} would leave range",
                entry.kind, entry.account, entry.asset
            ))
        })?;
        drop(balances);
        if journal {
            self.journal.lock().push(entry);
        }
        Ok(())
    }

    /// Move `amount` of `asset` from available into escrow.
    pub fn escrow(&self, account: AccountIdx, asset: AssetId, amount: u64) -> Result<(), ClearingError> {
        let available = self
            .balances
            .get(account)
            .and_then(|cell| cell.lock().available.get(asset as usize).copied())
            .ok_or_else(|| ClearingError::InvalidTransaction(format!("no balance for asset {}", asset)))?;
        if available < amount as u128 {
            return Err(ClearingError::InvalidTransaction(format!(
                "account {} holds {} of asset {}, needs {}",
                self.owners[account], available, asset, amount
            )));
        }
        self.transfer_available(account, asset, -(amount as i128))
            .and_then(|()| self.transfer_escrow(account, asset, amount as i128))
            .map_err(|e| ClearingError::InvalidTransaction(e.to_string()))
    }

    /// Move `amount` of `asset` from escrow back to available.
    pub fn release_escrow(&self, account: AccountIdx, asset: AssetId, amount: u64) -> Result<(), EngineError> {
        self.transfer_escrow(account, asset, -(amount as i128))?;
        self.transfer_available(account, asset, amount as i128)
    }

    /// SHA-256 over every account in creation order.
    pub fn state_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.owners.len() as u64).to_be_bytes());
        for (owner, cell) in self.owners.iter().zip(&self.balances) {
            let balances = cell.lock();
            hasher.update(owner.to_be_bytes());
            for (available, escrow) in balances.available.iter().zip(&balances.escrow) {
                hasher.update(available.to_be_bytes());
                hasher.update(escrow.to_be_bytes());
            }
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        hash
    }
}

impl AccountView for AccountDatabase {
    fn lookup_user_id(&self, owner: AccountId) -> Option<AccountIdx> {
        self.ids.get(&owner).copied()
    }

    fn transfer_escrow(&self, account: AccountIdx, asset: AssetId, delta: i128) -> Result<(), EngineError> {
        self.apply(
            JournalEntry {
                account,
                asset,
                kind: BalanceKind::Escrow,
                delta,
            },
            true,
        )
    }

    fn transfer_available(&self, account: AccountIdx, asset: AssetId, delta: i128) -> Result<(), EngineError> {
        self.apply(
            JournalEntry {
                account,
                asset,
                kind: BalanceKind::Available,
                delta,
            },
            true,
        )
    }
}

impl TentativeState for AccountDatabase {
    fn name(&self) -> &'static str {
        "account database"
    }

    fn finalize_round(&mut self, _round: u64) -> Result<(), EngineError> {
        self.journal.get_mut().clear();
        self.committed = self.owners.len();
        Ok(())
    }

    fn rollback_round(&mut self, _round: u64) -> Result<(), EngineError> {
        let journal = std::mem::take(self.journal.get_mut());
        for entry in journal.into_iter().rev() {
            if entry.account >= self.committed {
                continue;
            }
            self.apply(
                JournalEntry {
                    delta: -entry.delta,
                    ..entry
                },
                false,
            )?;
        }
        for owner in self.owners.drain(self.committed..) {
            self.ids.remove(&owner);
        }
        self.balances.truncate(self.committed);
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> AccountDatabase {
        let mut db = AccountDatabase::new(2);
        db.genesis_account(1, &[(0, 100), (1, 50)]).unwrap();
        db.genesis_account(2, &[(1, 10)]).unwrap();
        db
    }

    #[test]
    fn test_escrow_and_release() {
        let db = database();
        db.escrow(0, 0, 60).unwrap();
        assert_eq!(db.available(1, 0), Some(40));
        assert_eq!(db.escrowed(1, 0), Some(60));

        assert!(matches!(db.escrow(0, 0, 41), Err(ClearingError::InvalidTransaction(_))));

        db.release_escrow(0, 0, 20).unwrap();
        assert_eq!(db.available(1, 0), Some(60));
        assert_eq!(db.escrowed(1, 0), Some(40));
    }

    #[test]
    fn test_negative_balance_is_structural() {
        let db = database();
        let result = db.transfer_escrow(1, 0, -1);
        assert!(matches!(result, Err(EngineError::Invariant(_))));
        assert_eq!(db.escrowed(2, 0), Some(0));
    }

    #[test]
    fn test_rollback_restores_hash() {
        let mut db = database();
        let before = db.state_hash();

        db.create_account(3).unwrap();
        db.escrow(0, 0, 30).unwrap();
        db.transfer_available(2, 1, 7).unwrap();
        assert_ne!(db.state_hash(), before);

        db.rollback_round(1).unwrap();
        assert_eq!(db.state_hash(), before);
        assert_eq!(db.lookup_user_id(3), None);
        assert_eq!(db.num_accounts(), 2);
    }

    #[test]
    fn test_finalize_keeps_changes() {
        let mut db = database();
        db.create_account(3).unwrap();
        db.escrow(0, 0, 30).unwrap();
        db.finalize_round(1).unwrap();
        let after = db.state_hash();

        db.rollback_round(2).unwrap();
        assert_eq!(db.state_hash(), after);
        assert_eq!(db.lookup_user_id(3), Some(2));
    }

    #[test]
    fn test_genesis_refused_mid_round() {
        let mut db = database();
        db.escrow(0, 0, 1).unwrap();
        assert!(db.genesis_account(9, &[]).is_err());
    }

    #[test]
    fn test_duplicate_account() {
        let mut db = database();
        assert!(db.create_account(1).is_err());
    }
}
