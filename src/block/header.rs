//! Block header and its hash.
//!
//! The header commits to everything a validator must reproduce: the offer
//! batch, the clearing (prices, fee rate, per-market commitments including
//! each market's root hash) and the resulting state of the account database,
//! the modification log and the header hash map.
//!
//! The hash is SHA-256 over the fields in declaration order, integers
//! big-endian, vectors length-prefixed.

use sha2::{Digest, Sha256};

use crate::block::batch::OfferBatch;
use crate::types::{Price, WorkUnitStateCommitment};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub block_number: u64,
    pub prev_block_hash: [u8; 32],
    pub batch_hash: [u8; 32],
    /// One price per asset
    pub prices: Vec<Price>,
    pub tax_rate: u8,
    pub clearing: WorkUnitStateCommitment,
    pub database_hash: [u8; 32],
    pub modification_log_hash: [u8; 32],
    pub header_map_hash: [u8; 32],
}

impl BlockHeader {
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.block_number.to_be_bytes());
        hasher.update(self.prev_block_hash);
        hasher.update(self.batch_hash);
        hasher.update((self.prices.len() as u64).to_be_bytes());
        for price in &self.prices {
            hasher.update(price.to_be_bytes());
        }
        hasher.update([self.tax_rate]);
        self.clearing.hash_into(&mut hasher);
        hasher.update(self.database_hash);
        hasher.update(self.modification_log_hash);
        hasher.update(self.header_map_hash);

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        hash
    }
}

/// A header plus the offer transactions it commits to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub offers: OfferBatch,
}

/// A block together with its header hash, as proposed or accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedBlock {
    pub block: Block,
    pub hash: [u8; 32],
}

impl HashedBlock {
    pub fn new(block: Block) -> Self {
        let hash = block.header.hash();
        Self { block, hash }
    }

    #[inline]
    pub fn block_number(&self) -> u64 {
        self.block.header.block_number
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SingleWorkUnitStateCommitment;

    fn header() -> BlockHeader {
        BlockHeader {
            block_number: 3,
            prices: vec![1, 2],
            tax_rate: 10,
            clearing: WorkUnitStateCommitment {
                units: vec![SingleWorkUnitStateCommitment::default(); 2],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(header().hash(), header().hash());
        let hashed = HashedBlock::new(Block {
            header: header(),
            offers: OfferBatch::default(),
        });
        assert_eq!(hashed.hash_hex().len(), 64);
        assert_eq!(hashed.block_number(), 3);
    }

    #[test]
    fn test_hash_covers_commitments() {
        let base = header();
        let mut changed = header();
        changed.clearing.units[1].root_hash = [7; 32];
        assert_ne!(base.hash(), changed.hash());

        let mut changed = header();
        changed.prices = vec![1, 2, 0];
        assert_ne!(base.hash(), changed.hash());
    }
}
