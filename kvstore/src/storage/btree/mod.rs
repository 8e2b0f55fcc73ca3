//! B-tree implementation for the storage engine.
//!
//! This module provides a disk-based B-tree whose nodes each occupy one page
//! and refer to their children by page id.
//!
//! # Structure
//!
//! - Minimum degree `t = 14`: every node holds at most `2t - 1 = 27` entries
//! - Internal nodes hold `entries + 1` child page ids
//! - The root always lives at page 0
//!
//! # Usage
//!
//! ```
//! use kvstore::storage::btree::{KvPair, Node};
//!
//! let mut node = Node::leaf(7);
//! node.entries.push(KvPair::new("key", "value"));
//!
//! let page = node.to_page().expect("fits in a page");
//! let decoded = Node::from_page(&page).expect("valid page");
//! assert_eq!(decoded, Some(node));
//! ```

mod node;
mod tree;

pub use node::{
    ENTRY_SIZE, KvPair, MAX_ENTRIES, MAX_KEY_SIZE, MAX_VALUE_SIZE, MIN_DEGREE, Node, NodeError,
    check_entry_size,
};
pub use tree::{BTree, BTreeError, TreeStats};
