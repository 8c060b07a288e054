//! Trie nodes for slab-based storage.
//!
//! ## Design
//!
//! The order index is a binary crit-bit trie. Every node stores the key
//! prefix it covers; branches always have exactly two children and split on
//! bit `prefix_len`. Leaves cover a full key and carry the offer.
//!
//! ## Slab Integration
//!
//! Nodes live in a `Slab<TrieNode>`; children are slab keys (`usize`), not
//! references. Keys may be reused after removal.
//!
//! ## Cached Summaries
//!
//! Each node caches [`NodeMetadata`] (endowment and offer count of its
//! subtree) and its hash. Mutations refresh metadata and drop cached hashes
//! along the path from the touched node to the root.

use crate::types::{Offer, OrderKey, ORDER_KEY_BITS};

/// Slab key of a trie node.
pub type NodeId = usize;

/// Subtree summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeMetadata {
    /// Sum of remaining amounts
    pub endow: u128,
    /// Number of offers
    pub size: u64,
}

impl NodeMetadata {
    pub fn of_offer(offer: &Offer) -> Self {
        Self {
            endow: offer.amount as u128,
            size: 1,
        }
    }

    pub fn combine(self, other: Self) -> Self {
        Self {
            endow: self.endow + other.endow,
            size: self.size + other.size,
        }
    }
}

/// Trie node stored in the slab.
#[derive(Debug, Clone)]
pub struct TrieNode {
    /// Key bits covered by this node; bits past `prefix_len` are zero
    pub prefix: OrderKey,

    /// Length of the covered prefix in bits; `ORDER_KEY_BITS` for leaves
    pub prefix_len: usize,

    /// Children of a branch (slab keys); both `None` for leaves
    pub children: [Option<NodeId>; 2],

    /// The offer stored at a leaf
    pub offer: Option<Offer>,

    /// Leaf is staged for deletion
    pub marked: bool,

    pub metadata: NodeMetadata,

    /// Cached subtree hash, `None` when stale
    pub hash: Option<[u8; 32]>,
}

impl TrieNode {
    #[inline]
    pub fn leaf(offer: Offer) -> Self {
        Self {
            prefix: offer.key(),
            prefix_len: ORDER_KEY_BITS,
            children: [None, None],
            metadata: NodeMetadata::of_offer(&offer),
            offer: Some(offer),
            marked: false,
            hash: None,
        }
    }

    /// A branch splitting on bit `prefix_len`. Metadata is filled in by the
    /// caller once both children are attached.
    #[inline]
    pub fn branch(prefix: OrderKey, prefix_len: usize, left: NodeId, right: NodeId) -> Self {
        Self {
            prefix: prefix.truncated(prefix_len),
            prefix_len,
            children: [Some(left), Some(right)],
            offer: None,
            marked: false,
            metadata: NodeMetadata::default(),
            hash: None,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.prefix_len == ORDER_KEY_BITS
    }

    /// True when `key` lies in this node's subtree.
    #[inline]
    pub fn covers(&self, key: &OrderKey) -> bool {
        key.common_prefix_len(&self.prefix) >= self.prefix_len
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
