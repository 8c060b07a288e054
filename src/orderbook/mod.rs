//! Order book storage for a single market.
//!
//! ## Architecture
//!
//! Each market keeps its resting offers in an [`OrderIndex`]:
//!
//! - **Slab-based storage**: trie nodes live in an arena, children are slab keys
//! - **Key order**: iteration visits offers by ascending (price, owner, offer id)
//! - **Merkle root**: the index hashes to a value that depends only on its contents
//!
//! ## Components
//!
//! - [`TrieNode`]: a leaf (one offer) or a branch with subtree totals
//! - [`OrderIndex`]: the trie, with staged deletion and endowment splitting
//! - [`MetadataIndex`]: price-sorted prefix sums for supply queries
//!
//! ## Performance
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | Insert / remove / get | O(depth) |
//! | Endowment below a key | O(depth) |
//! | Split off k offers | O(k * depth) |
//! | Root hash | O(touched nodes) |
//! | Metadata lookup | O(log levels) |
//!
//! ## Example
//!
//! ```
//! use sharded_clearing::orderbook::{MetadataIndex, OrderIndex};
//! use sharded_clearing::types::{Offer, OfferCategory};
//!
//! let mut index = OrderIndex::with_capacity(16);
//! index.insert(Offer::new(OfferCategory::new(0, 1), 1, 7, 40, 1 << 24)).unwrap();
//!
//! let metadata = MetadataIndex::generate(&index).unwrap();
//! assert_eq!(metadata.get_metadata(1 << 24).endow, 40);
//! ```

pub mod index;
pub mod metadata;
pub mod node;

pub use index::{OrderIndex, EMPTY_ROOT_HASH};
pub use metadata::{EndowAccumulator, MetadataIndex};
pub use node::{NodeId, NodeMetadata, TrieNode};
