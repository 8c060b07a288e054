//! Block number to header hash, for every accepted block.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::block::guard::TentativeState;
use crate::error::EngineError;

#[derive(Debug, Clone, Default)]
pub struct BlockHeaderHashMap {
    committed: BTreeMap<u64, [u8; 32]>,
    pending: Option<(u64, [u8; 32])>,
}

impl BlockHeaderHashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hash` for `block_number` until the round is finalized or
    /// rolled back. One pending entry at a time.
    pub fn insert_tentative(&mut self, block_number: u64, hash: [u8; 32]) -> Result<(), EngineError> {
        if self.committed.contains_key(&block_number) {
            return Err(EngineError::Invariant(format!(
                "header hash for block {} already recorded",
                block_number
            )));
        }
        if let Some((pending, _)) = self.pending {
            return Err(EngineError::Invariant(format!(
                "block {} is still pending",
                pending
            )));
        }
        self.pending = Some((block_number, hash));
        Ok(())
    }

    pub fn get(&self, block_number: u64) -> Option<[u8; 32]> {
        match self.pending {
            Some((number, hash)) if number == block_number => Some(hash),
            _ => self.committed.get(&block_number).copied(),
        }
    }

    pub fn len(&self) -> usize {
        self.committed.len() + self.pending.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash over committed and pending entries, ascending by block number.
    pub fn hash(&self) -> [u8; 32] {
        let mut entries: Vec<(u64, [u8; 32])> = self.committed.iter().map(|(n, h)| (*n, *h)).collect();
        if let Some(pending) = self.pending {
            entries.push(pending);
            entries.sort_unstable_by_key(|(n, _)| *n);
        }
        let mut hasher = Sha256::new();
        for (number, hash) in entries {
            hasher.update(number.to_be_bytes());
            hasher.update(hash);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}

impl TentativeState for BlockHeaderHashMap {
    fn name(&self) -> &'static str {
        "block header hash map"
    }

    fn finalize_round(&mut self, _round: u64) -> Result<(), EngineError> {
        if let Some((number, hash)) = self.pending.take() {
            self.committed.insert(number, hash);
        }
        Ok(())
    }

    fn rollback_round(&mut self, _round: u64) -> Result<(), EngineError> {
        self.pending = None;
        Ok(())
    }
}
