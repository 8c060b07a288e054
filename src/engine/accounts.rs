//! Collaborator interfaces for settlement.
//!
//! Clearing never owns balances. It looks accounts up and moves funds
//! through an [`AccountView`], and reports every touched offer to a
//! [`ModificationLog`]. Both are shared by every work unit clearing in
//! parallel, so they take `&self` and must be `Sync`.

use crate::error::EngineError;
use crate::types::{AccountId, AssetId};

/// Dense handle for an account inside the database.
pub type AccountIdx = usize;

/// Balance operations clearing needs from the account database.
pub trait AccountView: Sync {
    /// Resolve an owner id. `None` when no committed account exists.
    fn lookup_user_id(&self, owner: AccountId) -> Option<AccountIdx>;

    /// Add `delta` (possibly negative) to the escrowed balance of `asset`.
    ///
    /// # Errors
    ///
    /// `Invariant` if the balance would go negative or overflow.
    fn transfer_escrow(&self, account: AccountIdx, asset: AssetId, delta: i128)
        -> Result<(), EngineError>;

    /// Add `delta` (possibly negative) to the available balance of `asset`.
    fn transfer_available(&self, account: AccountIdx, asset: AssetId, delta: i128)
        -> Result<(), EngineError>;
}

/// Sink for "this account's offer changed" notifications.
pub trait ModificationLog: Sync {
    fn log_self_modification(&self, owner: AccountId, offer_id: u64);
}
