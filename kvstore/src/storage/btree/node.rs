//! B-tree node type and its fixed page layout.
//!
//! Every node occupies exactly one 4KB page. The layout reserves room for the
//! maximum number of entries regardless of how many are in use, so the leaf
//! flag and child pointers always sit at fixed offsets.
//!
//! Layout (all integers big-endian):
//! - `validity`: 1 byte (`0x00` = page holds no node)
//! - `node_id`: 8 bytes
//! - `entry_count`: 8 bytes
//! - entries: `MAX_ENTRIES` slots of `ENTRY_SIZE` bytes, each
//!   `key_len` (2) + key (30, zero padded) + `value_len` (2) + value (100, zero padded)
//! - `is_leaf`: 1 byte (`0x01` = leaf, anything else = internal)
//! - children: `entry_count + 1` page ids of 8 bytes, internal nodes only
//!
//! Trailing bytes after the last child are ignored.

// Entry counts and slot lengths are bounded by MAX_ENTRIES / MAX_VALUE_SIZE.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_SIZE, Page, PageId};

/// Minimum degree `t` of the tree.
pub const MIN_DEGREE: usize = 14;

/// Maximum number of entries in a node (`2t - 1`).
pub const MAX_ENTRIES: usize = 2 * MIN_DEGREE - 1;

/// Maximum key length in bytes.
pub const MAX_KEY_SIZE: usize = 30;

/// Maximum value length in bytes.
pub const MAX_VALUE_SIZE: usize = 100;

/// Size of one entry slot: `key_len` + key + `value_len` + value.
pub const ENTRY_SIZE: usize = 2 + MAX_KEY_SIZE + 2 + MAX_VALUE_SIZE;

const VALID_MARKER: u8 = 0x01;
const EMPTY_MARKER: u8 = 0x00;
const LEAF_MARKER: u8 = 0x01;
const INTERNAL_MARKER: u8 = 0x00;

/// Node field offsets.
mod offsets {
    use super::{ENTRY_SIZE, MAX_ENTRIES};

    pub const VALIDITY: usize = 0;
    pub const NODE_ID: usize = 1;
    pub const ENTRY_COUNT: usize = 9;
    pub const ENTRIES: usize = 17;
    pub const IS_LEAF: usize = ENTRIES + MAX_ENTRIES * ENTRY_SIZE;
    pub const CHILDREN: usize = IS_LEAF + 1;

    // Within an entry slot.
    pub const KEY_LEN: usize = 0;
    pub const KEY: usize = 2;
    pub const VALUE_LEN: usize = KEY + super::MAX_KEY_SIZE;
    pub const VALUE: usize = VALUE_LEN + 2;
}

// A full internal node must fit in a single page.
const _: () = assert!(offsets::CHILDREN + (MAX_ENTRIES + 1) * 8 <= PAGE_SIZE);

/// A key-value pair stored in a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KvPair {
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Decoded form of a B-tree page.
///
/// `children` is empty for leaves and holds `entries.len() + 1` page ids for
/// internal nodes. `children[i]` covers keys below `entries[i].key`, and
/// `children[i + 1]` covers keys above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: PageId,
    pub is_leaf: bool,
    /// Entries in strictly increasing key order.
    pub entries: Vec<KvPair>,
    pub children: Vec<PageId>,
}

impl Node {
    /// Create an empty leaf node.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::new() is not const-stable
    pub fn leaf(id: PageId) -> Self {
        Self {
            id,
            is_leaf: true,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create an internal node with no entries and a single child.
    #[must_use]
    pub fn internal_with_child(id: PageId, child: PageId) -> Self {
        Self {
            id,
            is_leaf: false,
            entries: Vec::new(),
            children: vec![child],
        }
    }

    /// Check if the node holds the maximum number of entries.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_ENTRIES
    }

    /// Find the index of `key`, or the position where it would be inserted.
    pub fn find_index(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
    }

    /// Serialize the node into a fresh page.
    ///
    /// An empty leaf encodes as an empty page, which decodes back to `None`.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        let count = self.entries.len();
        if count > MAX_ENTRIES {
            return Err(NodeError::TooManyEntries(count));
        }
        let expected_children = if self.is_leaf { 0 } else { count + 1 };
        if self.children.len() != expected_children {
            return Err(NodeError::ChildCountMismatch {
                entries: count,
                children: self.children.len(),
            });
        }
        for entry in &self.entries {
            check_entry_size(&entry.key, &entry.value)?;
        }

        let mut page = Page::new();
        if self.is_leaf && count == 0 {
            return Ok(page);
        }

        page.write_u8(offsets::VALIDITY, VALID_MARKER);
        page.write_u64(offsets::NODE_ID, self.id);
        page.write_u64(offsets::ENTRY_COUNT, count as u64);

        for (i, entry) in self.entries.iter().enumerate() {
            let slot = offsets::ENTRIES + i * ENTRY_SIZE;
            page.write_u16(slot + offsets::KEY_LEN, entry.key.len() as u16);
            page.write_bytes(slot + offsets::KEY, &entry.key);
            page.write_u16(slot + offsets::VALUE_LEN, entry.value.len() as u16);
            page.write_bytes(slot + offsets::VALUE, &entry.value);
        }

        if self.is_leaf {
            page.write_u8(offsets::IS_LEAF, LEAF_MARKER);
        } else {
            page.write_u8(offsets::IS_LEAF, INTERNAL_MARKER);
            for (i, child) in self.children.iter().enumerate() {
                page.write_u64(offsets::CHILDREN + i * 8, *child);
            }
        }

        Ok(page)
    }

    /// Deserialize a node from a page.
    ///
    /// Returns `Ok(None)` if the page holds no node.
    pub fn from_page(page: &Page) -> Result<Option<Self>, NodeError> {
        if page.read_u8(offsets::VALIDITY) == EMPTY_MARKER {
            return Ok(None);
        }

        let id = page.read_u64(offsets::NODE_ID);
        let raw_count = page.read_u64(offsets::ENTRY_COUNT);
        if raw_count > MAX_ENTRIES as u64 {
            return Err(NodeError::EntryCountOutOfRange(raw_count));
        }
        let count = raw_count as usize;

        let mut entries = Vec::with_capacity(count);
        for index in 0..count {
            let slot = offsets::ENTRIES + index * ENTRY_SIZE;

            let key_len = usize::from(page.read_u16(slot + offsets::KEY_LEN));
            if key_len > MAX_KEY_SIZE {
                return Err(NodeError::KeyLengthOutOfRange { index, len: key_len });
            }
            let value_len = usize::from(page.read_u16(slot + offsets::VALUE_LEN));
            if value_len > MAX_VALUE_SIZE {
                return Err(NodeError::ValueLengthOutOfRange {
                    index,
                    len: value_len,
                });
            }

            entries.push(KvPair {
                key: page.read_bytes(slot + offsets::KEY, key_len).to_vec(),
                value: page.read_bytes(slot + offsets::VALUE, value_len).to_vec(),
            });
        }

        let is_leaf = page.read_u8(offsets::IS_LEAF) == LEAF_MARKER;
        if is_leaf && count == 0 {
            return Ok(None);
        }

        let children = if is_leaf {
            Vec::new()
        } else {
            (0..=count)
                .map(|i| page.read_u64(offsets::CHILDREN + i * 8))
                .collect()
        };

        Ok(Some(Self {
            id,
            is_leaf,
            entries,
            children,
        }))
    }
}

/// Reject keys or values that do not fit their fixed slots.
pub const fn check_entry_size(key: &[u8], value: &[u8]) -> Result<(), NodeError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(NodeError::KeyTooLarge(key.len()));
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(NodeError::ValueTooLarge(value.len()));
    }
    Ok(())
}

/// Errors that can occur when encoding or decoding a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Key longer than `MAX_KEY_SIZE`.
    KeyTooLarge(usize),
    /// Value longer than `MAX_VALUE_SIZE`.
    ValueTooLarge(usize),
    /// Node holds more than `MAX_ENTRIES` entries.
    TooManyEntries(usize),
    /// Child list does not match the entry count.
    ChildCountMismatch { entries: usize, children: usize },
    /// Stored entry count exceeds `MAX_ENTRIES`.
    EntryCountOutOfRange(u64),
    /// Stored key length exceeds its slot.
    KeyLengthOutOfRange { index: usize, len: usize },
    /// Stored value length exceeds its slot.
    ValueLengthOutOfRange { index: usize, len: usize },
    /// Stored node id differs from the page the node was read from.
    IdMismatch { page_id: PageId, stored: PageId },
}

impl NodeError {
    /// True if the error describes a page whose stored contents are invalid.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::EntryCountOutOfRange(_)
                | Self::KeyLengthOutOfRange { .. }
                | Self::ValueLengthOutOfRange { .. }
                | Self::IdMismatch { .. }
        )
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyTooLarge(len) => {
                write!(f, "key too large: {len} bytes (max {MAX_KEY_SIZE})")
            }
            Self::ValueTooLarge(len) => {
                write!(f, "value too large: {len} bytes (max {MAX_VALUE_SIZE})")
            }
            Self::TooManyEntries(count) => {
                write!(f, "node has {count} entries (max {MAX_ENTRIES})")
            }
            Self::ChildCountMismatch { entries, children } => {
                write!(f, "node has {entries} entries but {children} children")
            }
            Self::EntryCountOutOfRange(count) => {
                write!(f, "corrupt page: entry count {count} exceeds {MAX_ENTRIES}")
            }
            Self::KeyLengthOutOfRange { index, len } => {
                write!(f, "corrupt page: entry {index} key length {len} exceeds {MAX_KEY_SIZE}")
            }
            Self::ValueLengthOutOfRange { index, len } => {
                write!(
                    f,
                    "corrupt page: entry {index} value length {len} exceeds {MAX_VALUE_SIZE}"
                )
            }
            Self::IdMismatch { page_id, stored } => {
                write!(f, "corrupt page: page {page_id} holds node id {stored}")
            }
        }
    }
}

impl std::error::Error for NodeError {}
