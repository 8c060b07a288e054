//! Authenticated, order-preserving offer index.
//!
//! ## Architecture
//!
//! A binary crit-bit trie over [`OrderKey`]s with nodes in a
//! `Slab<TrieNode>`:
//!
//! - **Order**: in-order traversal yields offers by ascending key, i.e.
//!   cheapest minimum price first
//! - **Metadata**: every node caches the endowment and offer count of its
//!   subtree, so cumulative-endowment queries are O(depth)
//! - **Authentication**: every node caches a SHA-256 hash; the trie shape is
//!   a function of the key set alone, so equal contents give equal roots
//!
//! ## Staged Deletion
//!
//! [`OrderIndex::mark_for_deletion`] flags a leaf without reshaping the
//! trie; [`OrderIndex::perform_marked_deletions`] removes every flagged leaf
//! at once and returns what it removed.
//!
//! ## Example
//!
//! ```
//! use sharded_clearing::orderbook::OrderIndex;
//! use sharded_clearing::types::{Offer, OfferCategory};
//!
//! let category = OfferCategory::new(0, 1);
//! let mut index = OrderIndex::new();
//! index.insert(Offer::new(category, 1, 10, 60, 90)).unwrap();
//! index.insert(Offer::new(category, 2, 11, 50, 100)).unwrap();
//!
//! assert_eq!(index.get_root_metadata().endow, 110);
//!
//! // carve out the cheapest 60 units
//! let below = index.endow_split(60).unwrap();
//! assert_eq!(below.size(), 1);
//! assert_eq!(index.get_root_metadata().endow, 50);
//! ```

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use slab::Slab;

use crate::error::IndexError;
use crate::orderbook::node::{NodeId, NodeMetadata, TrieNode};
use crate::types::{Offer, OrderKey, Price};

/// Root hash of an empty index.
pub const EMPTY_ROOT_HASH: [u8; 32] = [0u8; 32];

const LEAF_TAG: u8 = 0x00;
const BRANCH_TAG: u8 = 0x01;

/// Merkle crit-bit trie mapping order keys to offers.
#[derive(Debug, Clone, Default)]
pub struct OrderIndex {
    nodes: Slab<TrieNode>,
    root: Option<NodeId>,
    marked: BTreeSet<OrderKey>,
}

impl OrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index with room for `offers` offers without reallocating.
    pub fn with_capacity(offers: usize) -> Self {
        Self {
            nodes: Slab::with_capacity(offers.saturating_mul(2)),
            root: None,
            marked: BTreeSet::new(),
        }
    }

    // ========================================================================
    // Size and Lookup
    // ========================================================================

    #[inline]
    pub fn size(&self) -> u64 {
        self.get_root_metadata().size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Endowment and offer count of the whole index.
    #[inline]
    pub fn get_root_metadata(&self) -> NodeMetadata {
        self.root
            .map(|root| self.nodes[root].metadata)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &OrderKey) -> Option<&Offer> {
        self.find(key).and_then(|id| self.nodes[id].offer.as_ref())
    }

    #[inline]
    pub fn contains_key(&self, key: &OrderKey) -> bool {
        self.find(key).is_some()
    }

    /// Smallest key in the index.
    pub fn get_lowest_key(&self) -> Option<OrderKey> {
        let mut current = self.root?;
        loop {
            let node = &self.nodes[current];
            if node.is_leaf() {
                return Some(node.prefix);
            }
            current = node.children[0]?;
        }
    }

    fn find(&self, key: &OrderKey) -> Option<NodeId> {
        let mut current = self.root?;
        loop {
            let node = self.nodes.get(current)?;
            if !node.covers(key) {
                return None;
            }
            if node.is_leaf() {
                return Some(current);
            }
            current = node.children[key.bit(node.prefix_len)]?;
        }
    }

    // ========================================================================
    // Insertion and Removal
    // ========================================================================

    /// Insert an offer under its key.
    ///
    /// # Errors
    ///
    /// * `DuplicateKey` - the key is already present
    /// * `ZeroAmount` - empty offers are never stored
    pub fn insert(&mut self, offer: Offer) -> Result<(), IndexError> {
        let key = offer.key();
        if offer.amount == 0 {
            return Err(IndexError::ZeroAmount(key));
        }
        let Some(mut current) = self.root else {
            self.root = Some(self.nodes.insert(TrieNode::leaf(offer)));
            return Ok(());
        };

        let mut path: Vec<NodeId> = Vec::new();
        loop {
            let (common, prefix_len, is_leaf) = {
                let node = &self.nodes[current];
                (
                    key.common_prefix_len(&node.prefix).min(node.prefix_len),
                    node.prefix_len,
                    node.is_leaf(),
                )
            };

            if common < prefix_len {
                let leaf = self.nodes.insert(TrieNode::leaf(offer));
                let (left, right) = if key.bit(common) == 0 {
                    (leaf, current)
                } else {
                    (current, leaf)
                };
                let branch = self.nodes.insert(TrieNode::branch(key, common, left, right));
                self.replace_child(path.last().copied(), current, branch);
                path.push(branch);
                break;
            }
            if is_leaf {
                return Err(IndexError::DuplicateKey(key));
            }
            path.push(current);
            current = self.nodes[current].children[key.bit(prefix_len)]
                .ok_or(IndexError::CorruptNode(current))?;
        }

        self.refresh_path(&path);
        Ok(())
    }

    /// Remove and return the offer at `key`.
    pub fn remove(&mut self, key: &OrderKey) -> Option<Offer> {
        let mut current = self.root?;
        let mut path: Vec<NodeId> = Vec::new();
        loop {
            let node = &self.nodes[current];
            if !node.covers(key) {
                return None;
            }
            if node.is_leaf() {
                break;
            }
            let next = node.children[key.bit(node.prefix_len)]?;
            path.push(current);
            current = next;
        }

        let leaf = self.nodes.remove(current);
        self.marked.remove(key);

        match path.pop() {
            None => self.root = None,
            Some(parent) => {
                let sibling = self.nodes[parent]
                    .children
                    .into_iter()
                    .flatten()
                    .find(|child| *child != current);
                self.nodes.remove(parent);
                if let Some(sibling) = sibling {
                    self.replace_child(path.last().copied(), parent, sibling);
                }
            }
        }

        self.refresh_path(&path);
        leaf.offer
    }

    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: NodeId) {
        match parent {
            None => self.root = Some(new),
            Some(parent) => {
                for slot in self.nodes[parent].children.iter_mut() {
                    if *slot == Some(old) {
                        *slot = Some(new);
                    }
                }
            }
        }
    }

    /// Recompute metadata and drop cached hashes, deepest node first.
    fn refresh_path(&mut self, path: &[NodeId]) {
        for &id in path.iter().rev() {
            let metadata = match self.nodes[id].children {
                [Some(left), Some(right)] => self.nodes[left]
                    .metadata
                    .combine(self.nodes[right].metadata),
                _ => self.nodes[id].metadata,
            };
            let node = &mut self.nodes[id];
            node.metadata = metadata;
            node.hash = None;
        }
    }

    // ========================================================================
    // Staged Deletion
    // ========================================================================

    /// Flag the offer at `key` for deletion and return a copy of it.
    ///
    /// Returns `None` if the key is absent or already flagged.
    pub fn mark_for_deletion(&mut self, key: &OrderKey) -> Option<Offer> {
        let id = self.find(key)?;
        let node = &mut self.nodes[id];
        if node.marked {
            return None;
        }
        node.marked = true;
        self.marked.insert(*key);
        node.offer.clone()
    }

    /// Clear a deletion flag set by [`OrderIndex::mark_for_deletion`].
    pub fn unmark_for_deletion(&mut self, key: &OrderKey) -> Option<Offer> {
        let id = self.find(key)?;
        let node = &mut self.nodes[id];
        if !node.marked {
            return None;
        }
        node.marked = false;
        self.marked.remove(key);
        node.offer.clone()
    }

    /// Clear every deletion flag.
    pub fn unmark_all(&mut self) {
        for key in std::mem::take(&mut self.marked) {
            if let Some(id) = self.find(&key) {
                self.nodes[id].marked = false;
            }
        }
    }

    #[inline]
    pub fn num_marked(&self) -> usize {
        self.marked.len()
    }

    /// Remove every flagged offer, returning them in key order.
    pub fn perform_marked_deletions(&mut self) -> Vec<(OrderKey, Offer)> {
        let keys = std::mem::take(&mut self.marked);
        keys.into_iter()
            .filter_map(|key| self.remove(&key).map(|offer| (key, offer)))
            .collect()
    }

    // ========================================================================
    // Endowment Queries and Splitting
    // ========================================================================

    /// Sum of amounts over every key strictly below `key`.
    pub fn endow_lt_key(&self, key: &OrderKey) -> u128 {
        let mut acc = 0u128;
        let Some(mut current) = self.root else {
            return 0;
        };
        loop {
            let node = &self.nodes[current];
            let common = key.common_prefix_len(&node.prefix);
            if common < node.prefix_len {
                if node.prefix.bit(common) < key.bit(common) {
                    acc += node.metadata.endow;
                }
                return acc;
            }
            if node.is_leaf() {
                return acc;
            }
            let side = key.bit(node.prefix_len);
            if side == 1 {
                if let Some(left) = node.children[0] {
                    acc += self.nodes[left].metadata.endow;
                }
            }
            match node.children[side] {
                Some(next) => current = next,
                None => return acc,
            }
        }
    }

    /// Move out the longest key-order prefix whose endowment is at most
    /// `threshold`, leaving the rest in place.
    ///
    /// # Errors
    ///
    /// * `SplitExceedsEndowment` - `threshold` is above the root endowment
    pub fn endow_split(&mut self, threshold: u128) -> Result<OrderIndex, IndexError> {
        let mut carved = OrderIndex::new();
        if threshold == 0 {
            return Ok(carved);
        }
        let available = self.get_root_metadata().endow;
        if threshold > available {
            return Err(IndexError::SplitExceedsEndowment {
                threshold,
                available,
            });
        }

        let mut keys = Vec::new();
        if let Some(root) = self.root {
            let mut budget = threshold;
            self.collect_prefix(root, &mut budget, &mut keys);
        }
        for key in keys {
            let offer = self.remove(&key).ok_or(IndexError::MissingKey(key))?;
            carved.insert(offer)?;
        }
        Ok(carved)
    }

    /// Returns true when the whole subtree fit in `budget`.
    fn collect_prefix(&self, id: NodeId, budget: &mut u128, keys: &mut Vec<OrderKey>) -> bool {
        let node = &self.nodes[id];
        if node.metadata.endow <= *budget {
            *budget -= node.metadata.endow;
            keys.extend(self.iter_from(Some(id)).map(|offer| offer.key()));
            return true;
        }
        match node.children {
            [Some(left), Some(right)] => {
                self.collect_prefix(left, budget, keys) && self.collect_prefix(right, budget, keys)
            }
            _ => false,
        }
    }

    /// Move every offer of `other` into this index.
    pub fn merge_in(&mut self, other: OrderIndex) -> Result<(), IndexError> {
        for offer in other.into_offers() {
            self.insert(offer)?;
        }
        Ok(())
    }

    /// Move the whole contents out, leaving this index empty.
    #[inline]
    pub fn take(&mut self) -> OrderIndex {
        std::mem::take(self)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = None;
        self.marked.clear();
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Offers in ascending key order.
    pub fn iter(&self) -> Iter<'_> {
        self.iter_from(self.root)
    }

    fn iter_from(&self, start: Option<NodeId>) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            stack: start.into_iter().collect(),
        }
    }

    /// Call `f` on every offer in key order, stopping at the first error.
    pub fn apply<E, F>(&self, f: F) -> Result<(), E>
    where
        F: FnMut(&Offer) -> Result<(), E>,
    {
        self.iter().try_for_each(f)
    }

    pub fn into_offers(self) -> Vec<Offer> {
        self.iter().cloned().collect()
    }

    /// Endowment per distinct minimum price, ascending.
    pub fn price_levels(&self) -> Vec<(Price, u128)> {
        let mut levels: Vec<(Price, u128)> = Vec::new();
        for offer in self.iter() {
            match levels.last_mut() {
                Some((price, endow)) if *price == offer.min_price => {
                    *endow += offer.amount as u128;
                }
                _ => levels.push((offer.min_price, offer.amount as u128)),
            }
        }
        levels
    }

    // ========================================================================
    // Hashing
    // ========================================================================

    /// Root hash, recomputing only stale nodes.
    pub fn root_hash(&mut self) -> [u8; 32] {
        match self.root {
            None => EMPTY_ROOT_HASH,
            Some(root) => self.hash_node(root),
        }
    }

    fn hash_node(&mut self, id: NodeId) -> [u8; 32] {
        if let Some(hash) = self.nodes[id].hash {
            return hash;
        }

        let mut hasher = Sha256::new();
        if self.nodes[id].is_leaf() {
            let node = &self.nodes[id];
            hasher.update([LEAF_TAG]);
            hasher.update(node.prefix.as_bytes());
            if let Some(offer) = node.offer.as_ref() {
                offer.hash_into(&mut hasher);
            }
        } else {
            let [left, right] = self.nodes[id].children;
            let left_hash = left.map(|c| self.hash_node(c)).unwrap_or(EMPTY_ROOT_HASH);
            let right_hash = right.map(|c| self.hash_node(c)).unwrap_or(EMPTY_ROOT_HASH);
            let node = &self.nodes[id];
            hasher.update([BRANCH_TAG]);
            hasher.update((node.prefix_len as u16).to_be_bytes());
            hasher.update(node.prefix.as_bytes());
            hasher.update(left_hash);
            hasher.update(right_hash);
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&hasher.finalize());
        self.nodes[id].hash = Some(hash);
        hash
    }
}

/// In-order iterator over the offers of an [`OrderIndex`].
pub struct Iter<'a> {
    nodes: &'a Slab<TrieNode>,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Offer;

    fn next(&mut self) -> Option<&'a Offer> {
        while let Some(id) = self.stack.pop() {
            let node = &self.nodes[id];
            if let Some(offer) = node.offer.as_ref() {
                return Some(offer);
            }
            if let Some(right) = node.children[1] {
                self.stack.push(right);
            }
            if let Some(left) = node.children[0] {
                self.stack.push(left);
            }
        }
        None
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
