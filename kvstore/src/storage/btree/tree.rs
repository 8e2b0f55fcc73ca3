//! B-tree algorithm over page ids.
//!
//! This is a classic minimum-degree B-tree (t = 14) that splits full nodes on
//! the way down during insertion. Nodes refer to each other only by page id
//! and are read and written through the page manager. The root always lives
//! at page 0: when it fills up, its content moves to a freshly allocated page
//! and page 0 is overwritten with a new internal root pointing at it.

use crate::storage::btree::node::{KvPair, MIN_DEGREE, Node, NodeError, check_entry_size};
use crate::storage::page::{PageId, ROOT_PAGE_ID};
use crate::storage::pager::{PageManager, PagerError};

/// Shape of a tree as reported by `BTree::verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Number of levels; 0 for an empty tree.
    pub depth: usize,
    pub node_count: usize,
    pub entry_count: usize,
}

/// A B-tree backed by a page manager.
pub struct BTree<'a> {
    pager: &'a mut PageManager,
}

impl<'a> BTree<'a> {
    pub const fn new(pager: &'a mut PageManager) -> Self {
        Self { pager }
    }

    /// Read the root node, or `None` if the tree is empty.
    pub fn root(&mut self) -> Result<Option<Node>, BTreeError> {
        Ok(self.pager.read_node(ROOT_PAGE_ID)?)
    }

    /// Look up the value stored under `key`.
    ///
    /// A child page beyond the end of the file means the key cannot be in the
    /// tree and is reported as `KeyNotFound`.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, BTreeError> {
        let Some(mut node) = self.root()? else {
            return Err(BTreeError::KeyNotFound);
        };

        loop {
            let index = match node.find_index(key) {
                Ok(i) => return Ok(std::mem::take(&mut node.entries[i].value)),
                Err(i) => i,
            };
            if node.is_leaf {
                return Err(BTreeError::KeyNotFound);
            }
            node = match self.read_child(&node, index) {
                Err(BTreeError::Pager(PagerError::PageOutOfRange { .. })) => {
                    return Err(BTreeError::KeyNotFound);
                }
                other => other?,
            };
        }
    }

    /// Insert `key` with `value`, overwriting any existing value.
    ///
    /// Oversized keys or values are rejected before any node is modified.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), BTreeError> {
        check_entry_size(key, value)?;

        let Some(root) = self.root()? else {
            let mut root = Node::leaf(ROOT_PAGE_ID);
            root.entries.push(KvPair::new(key, value));
            self.pager.write_node(ROOT_PAGE_ID, &root)?;
            return Ok(());
        };

        if root.is_full() {
            // Page 0 stays the root: move the old root to a fresh page and
            // hang it under a new, empty internal root.
            let mut old_root = root;
            old_root.id = self.pager.allocate_page();
            let mut new_root = Node::internal_with_child(ROOT_PAGE_ID, old_root.id);
            self.split_child(&mut new_root, 0, old_root)?;
            tracing::debug!("Root split, tree grew a level");
            self.insert_non_full(new_root, key, value)
        } else {
            self.insert_non_full(root, key, value)
        }
    }

    /// Insert into a subtree whose root `node` is known not to be full.
    fn insert_non_full(
        &mut self,
        mut node: Node,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), BTreeError> {
        loop {
            let mut index = match node.find_index(key) {
                Ok(i) => {
                    node.entries[i].value = value.to_vec();
                    self.pager.write_node(node.id, &node)?;
                    return Ok(());
                }
                Err(i) => i,
            };

            if node.is_leaf {
                node.entries.insert(index, KvPair::new(key, value));
                self.pager.write_node(node.id, &node)?;
                return Ok(());
            }

            let child = self.read_child(&node, index)?;
            if !child.is_full() {
                node = child;
                continue;
            }

            self.split_child(&mut node, index, child)?;
            match key.cmp(node.entries[index].key.as_slice()) {
                std::cmp::Ordering::Equal => {
                    node.entries[index].value = value.to_vec();
                    self.pager.write_node(node.id, &node)?;
                    return Ok(());
                }
                std::cmp::Ordering::Greater => index += 1,
                std::cmp::Ordering::Less => {}
            }
            node = self.read_child(&node, index)?;
        }
    }

    /// Split the full `child` found at `parent.children[index]`.
    ///
    /// The median entry moves up into `parent`, the upper half moves to a new
    /// sibling on a fresh page, and all three nodes are staged together.
    fn split_child(
        &mut self,
        parent: &mut Node,
        index: usize,
        mut child: Node,
    ) -> Result<(), BTreeError> {
        if !child.is_full() {
            return Err(BTreeError::Invariant {
                page_id: child.id,
                reason: format!("split of a node with {} entries", child.entries.len()),
            });
        }

        let sibling = Node {
            id: self.pager.allocate_page(),
            is_leaf: child.is_leaf,
            entries: child.entries.split_off(MIN_DEGREE),
            children: if child.is_leaf {
                Vec::new()
            } else {
                child.children.split_off(MIN_DEGREE)
            },
        };
        let median = child.entries.pop().ok_or_else(|| BTreeError::Invariant {
            page_id: child.id,
            reason: "split of an empty node".to_string(),
        })?;
        debug_assert_eq!(child.entries.len(), MIN_DEGREE - 1);
        debug_assert_eq!(sibling.entries.len(), MIN_DEGREE - 1);

        parent.entries.insert(index, median);
        parent.children.insert(index + 1, sibling.id);

        self.pager.write_nodes(&[&*parent, &child, &sibling])?;
        tracing::trace!(
            "Split page {}, new sibling {} under {}",
            child.id,
            sibling.id,
            parent.id
        );
        Ok(())
    }

    /// Read `node.children[index]`, which must hold a node.
    fn read_child(&mut self, node: &Node, index: usize) -> Result<Node, BTreeError> {
        let page_id = node.children[index];
        self.pager
            .read_node(page_id)?
            .ok_or(BTreeError::MissingChild {
                parent: node.id,
                page_id,
            })
    }

    /// Collect all entries in key order.
    pub fn traverse(&mut self) -> Result<Vec<KvPair>, BTreeError> {
        let mut out = Vec::new();
        if let Some(root) = self.root()? {
            self.traverse_node(root, &mut out)?;
        }
        Ok(out)
    }

    fn traverse_node(&mut self, node: Node, out: &mut Vec<KvPair>) -> Result<(), BTreeError> {
        if node.is_leaf {
            out.extend(node.entries);
            return Ok(());
        }
        let mut entries = node.entries.iter();
        for index in 0..node.children.len() {
            let child = self.read_child(&node, index)?;
            self.traverse_node(child, out)?;
            if let Some(entry) = entries.next() {
                out.push(entry.clone());
            }
        }
        Ok(())
    }

    /// Check the structural invariants of the whole tree.
    ///
    /// Every node must hold at most `2t - 1` strictly increasing entries, every
    /// internal node one more child than entries, every key must fall between
    /// its parent's separators and all leaves must sit at the same depth.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let Some(root) = self.root()? else {
            return Ok(TreeStats::default());
        };
        let mut stats = TreeStats::default();
        let mut leaf_depth = None;
        self.verify_node(root, None, None, 1, &mut leaf_depth, &mut stats)?;
        stats.depth = leaf_depth.unwrap_or(0);
        Ok(stats)
    }

    fn verify_node(
        &mut self,
        node: Node,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        stats: &mut TreeStats,
    ) -> Result<(), BTreeError> {
        let violation = |reason: String| BTreeError::Invariant {
            page_id: node.id,
            reason,
        };

        if node.entries.len() > 2 * MIN_DEGREE - 1 {
            return Err(violation(format!("{} entries", node.entries.len())));
        }
        for pair in node.entries.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(violation("entries out of order".to_string()));
            }
        }
        if let (Some(first), Some(lower)) = (node.entries.first(), lower)
            && first.key.as_slice() <= lower
        {
            return Err(violation("key below parent separator".to_string()));
        }
        if let (Some(last), Some(upper)) = (node.entries.last(), upper)
            && last.key.as_slice() >= upper
        {
            return Err(violation("key above parent separator".to_string()));
        }

        stats.node_count += 1;
        stats.entry_count += node.entries.len();

        if node.is_leaf {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(violation(format!(
                        "leaf at depth {depth}, expected {expected}"
                    )));
                }
                Some(_) => {}
            }
            return Ok(());
        }

        if node.children.len() != node.entries.len() + 1 {
            return Err(violation(format!(
                "{} entries but {} children",
                node.entries.len(),
                node.children.len()
            )));
        }
        for index in 0..node.children.len() {
            let child = self.read_child(&node, index)?;
            let child_lower = if index == 0 {
                lower
            } else {
                Some(node.entries[index - 1].key.as_slice())
            };
            let child_upper = node
                .entries
                .get(index)
                .map(|entry| entry.key.as_slice())
                .or(upper);
            self.verify_node(child, child_lower, child_upper, depth + 1, leaf_depth, stats)?;
        }
        Ok(())
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Page manager error.
    Pager(PagerError),
    /// Node encoding error.
    Node(NodeError),
    /// The key is not in the tree.
    KeyNotFound,
    /// An internal node points at a page that holds no node.
    MissingChild { parent: PageId, page_id: PageId },
    /// A structural invariant does not hold.
    Invariant { page_id: PageId, reason: String },
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pager(e) => write!(f, "pager error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::MissingChild { parent, page_id } => {
                write!(f, "page {parent} points at empty child page {page_id}")
            }
            Self::Invariant { page_id, reason } => {
                write!(f, "invariant violated at page {page_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pager(e) => Some(e),
            Self::Node(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PagerError> for BTreeError {
    fn from(e: PagerError) -> Self {
        Self::Pager(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::node::{MAX_ENTRIES, MAX_KEY_SIZE};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use tempfile::tempdir;

    fn create_test_pager() -> (tempfile::TempDir, PageManager) {
        let dir = tempdir().expect("create temp dir");
        let pager = PageManager::open(&dir.path().join("test.db")).expect("open pager");
        (dir, pager)
    }

    fn key(i: usize) -> Vec<u8> {
        format!("key{i:05}").into_bytes()
    }

    #[test]
    fn test_btree_empty() {
        let (_dir, mut pager) = create_test_pager();
        let mut tree = BTree::new(&mut pager);

        assert!(tree.root().expect("root").is_none());
        assert!(matches!(tree.get(b"k"), Err(BTreeError::KeyNotFound)));
        assert!(tree.traverse().expect("traverse").is_empty());
        assert_eq!(tree.verify().expect("verify"), TreeStats::default());
    }

    #[test]
    fn test_btree_first_insert_creates_leaf_root() {
        let (_dir, mut pager) = create_test_pager();
        let mut tree = BTree::new(&mut pager);

        tree.insert(b"k", b"s").expect("insert");
        let root = tree.root().expect("root").expect("non-empty");
        assert_eq!(root.id, ROOT_PAGE_ID);
        assert!(root.is_leaf);
        assert_eq!(root.entries, vec![KvPair::new("k", "s")]);
        assert_eq!(tree.get(b"k").expect("get"), b"s");
        assert_eq!(pager.page_count(), 1);
    }

    #[test]
    fn test_btree_update_does_not_add_entries() {
        let (_dir, mut pager) = create_test_pager();
        let mut tree = BTree::new(&mut pager);

        tree.insert(b"k", b"v1").expect("insert");
        tree.insert(b"k", b"v2").expect("update");

        let root = tree.root().expect("root").expect("non-empty");
        assert_eq!(root.entries.len(), 1);
        assert_eq!(tree.get(b"k").expect("get"), b"v2");
    }

    #[test]
    fn test_btree_root_split() {
        let (_dir, mut pager) = create_test_pager();
        let mut tree = BTree::new(&mut pager);

        for i in 0..=MAX_ENTRIES {
            tree.insert(&key(i), &key(i)).expect("insert");
        }

        let root = tree.root().expect("root").expect("non-empty");
        assert_eq!(root.id, ROOT_PAGE_ID);
        assert!(!root.is_leaf);
        assert_eq!(root.entries.len(), 1);
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.entries[0].key, key(MIN_DEGREE - 1));

        let left = tree.read_child(&root, 0).expect("left");
        let right = tree.read_child(&root, 1).expect("right");
        assert!(left.is_leaf && right.is_leaf);
        // Both halves held t - 1 entries after the split; the 28th key then
        // landed in the right half.
        assert_eq!(left.entries.len(), MIN_DEGREE - 1);
        assert_eq!(right.entries.len(), MIN_DEGREE);
        assert_eq!(left.id, root.children[0]);
        assert_eq!(right.id, root.children[1]);
        assert_ne!(left.id, ROOT_PAGE_ID);
        assert_ne!(right.id, ROOT_PAGE_ID);
    }

    #[test]
    fn test_btree_split_child_halves() {
        let (_dir, mut pager) = create_test_pager();
        let child_id = pager.allocate_page();
        let mut child = Node::leaf(child_id);
        child.entries = (0..MAX_ENTRIES).map(|i| KvPair::new(key(i), "v")).collect();
        let mut parent = Node::internal_with_child(ROOT_PAGE_ID, child_id);

        let mut tree = BTree::new(&mut pager);
        tree.split_child(&mut parent, 0, child).expect("split");

        assert_eq!(parent.entries, vec![KvPair::new(key(MIN_DEGREE - 1), "v")]);
        assert_eq!(parent.children.len(), 2);
        let left = tree.read_child(&parent, 0).expect("left");
        let right = tree.read_child(&parent, 1).expect("right");
        assert_eq!(left.entries.len(), MIN_DEGREE - 1);
        assert_eq!(right.entries.len(), MIN_DEGREE - 1);
        assert_eq!(right.entries[0].key, key(MIN_DEGREE));
        assert_eq!(pager.dirty_page_count(), 3);
    }

    #[test]
    fn test_btree_split_of_non_full_node_is_rejected() {
        let (_dir, mut pager) = create_test_pager();
        let mut parent = Node::internal_with_child(ROOT_PAGE_ID, 1);
        let mut tree = BTree::new(&mut pager);

        let err = tree
            .split_child(&mut parent, 0, Node::leaf(1))
            .expect_err("should reject");
        assert!(matches!(err, BTreeError::Invariant { page_id: 1, .. }));
        assert!(parent.entries.is_empty());
    }

    #[test]
    fn test_btree_many_inserts() {
        let (_dir, mut pager) = create_test_pager();
        let mut tree = BTree::new(&mut pager);

        let n = 2000;
        for i in 0..n {
            tree.insert(&key(i), format!("value_{i}").as_bytes())
                .expect("insert");
        }

        for i in 0..n {
            let expected = format!("value_{i}").into_bytes();
            assert_eq!(tree.get(&key(i)).expect("get"), expected, "mismatch at {i}");
        }

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.entry_count, n);
        assert!(stats.depth >= 3);

        let keys: Vec<_> = tree
            .traverse()
            .expect("traverse")
            .into_iter()
            .map(|pair| pair.key)
            .collect();
        let expected: Vec<_> = (0..n).map(key).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_btree_shuffled_inserts_and_updates() {
        let (_dir, mut pager) = create_test_pager();
        let mut tree = BTree::new(&mut pager);

        let mut order: Vec<usize> = (0..1500).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));

        for &i in &order {
            tree.insert(&key(i), b"first").expect("insert");
        }
        for &i in order.iter().step_by(3) {
            tree.insert(&key(i), b"second").expect("update");
        }

        assert_eq!(tree.verify().expect("verify").entry_count, order.len());
        for &i in &order {
            let expected: &[u8] = if order.iter().step_by(3).any(|&j| j == i) {
                b"second"
            } else {
                b"first"
            };
            assert_eq!(tree.get(&key(i)).expect("get"), expected);
        }
    }

    #[test]
    fn test_btree_update_of_promoted_key() {
        let (_dir, mut pager) = create_test_pager();
        let mut tree = BTree::new(&mut pager);

        // Fill the root, split it, then fill the right leaf so the next
        // insert of its median splits it on the way down.
        for i in 0..=MAX_ENTRIES {
            tree.insert(&key(i * 2), b"old").expect("insert");
        }
        let right_child = |tree: &mut BTree<'_>| {
            let root = tree.root().expect("root").expect("non-empty");
            tree.read_child(&root, 1).expect("right child")
        };
        let mut i = MAX_ENTRIES + 1;
        while right_child(&mut tree).entries.len() < MAX_ENTRIES {
            tree.insert(&key(i * 2), b"old").expect("insert");
            i += 1;
        }

        let right = right_child(&mut tree);
        let median = right.entries[MIN_DEGREE - 1].key.clone();
        tree.insert(&median, b"new").expect("update median");

        let root = tree.root().expect("root").expect("non-empty");
        assert_eq!(root.entries.len(), 2);
        assert_eq!(root.entries[1].key, median);
        assert_eq!(tree.get(&median).expect("get"), b"new");

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.entry_count, i);
    }

    #[test]
    fn test_btree_rejects_oversized_key_without_changes() {
        let (_dir, mut pager) = create_test_pager();
        {
            let mut tree = BTree::new(&mut pager);
            tree.insert(b"a", b"1").expect("insert");
        }
        pager.commit().expect("commit");

        let mut tree = BTree::new(&mut pager);
        let err = tree
            .insert(&vec![b'k'; MAX_KEY_SIZE + 1], b"v")
            .expect_err("should reject");
        assert!(matches!(err, BTreeError::Node(NodeError::KeyTooLarge(31))));
        assert_eq!(pager.dirty_page_count(), 0);
    }

    #[test]
    fn test_btree_missing_child_is_error() {
        let (_dir, mut pager) = create_test_pager();
        let child = pager.allocate_page();
        let root = Node {
            id: ROOT_PAGE_ID,
            is_leaf: false,
            entries: vec![KvPair::new("m", "1")],
            children: vec![child, child],
        };
        pager.write_node(ROOT_PAGE_ID, &root).expect("write");
        pager.commit().expect("commit");

        let mut tree = BTree::new(&mut pager);
        assert!(matches!(
            tree.get(b"a"),
            Err(BTreeError::MissingChild { parent: 0, .. })
        ));
    }

    #[test]
    fn test_btree_child_with_wrong_id_is_not_rewritten() {
        let (_dir, mut pager) = create_test_pager();
        let c1 = pager.allocate_page();
        let c2 = pager.allocate_page();
        let root = Node {
            id: ROOT_PAGE_ID,
            is_leaf: false,
            entries: vec![KvPair::new("m", "1")],
            children: vec![c1, c2],
        };
        let mut misplaced = Node::leaf(c2);
        misplaced.entries.push(KvPair::new("a", "1"));
        let mut right = Node::leaf(c2);
        right.entries.push(KvPair::new("z", "26"));
        pager.write_node(ROOT_PAGE_ID, &root).expect("write");
        pager.write_node(c1, &misplaced).expect("write");
        pager.write_node(c2, &right).expect("write");
        pager.commit().expect("commit");

        let mut tree = BTree::new(&mut pager);
        let err = tree.insert(b"b", b"2").expect_err("corrupt child");
        assert!(matches!(
            err,
            BTreeError::Pager(PagerError::Node(NodeError::IdMismatch { page_id: 1, stored: 2 }))
        ));
        assert_eq!(tree.get(b"z").expect("get"), b"26");
    }

    #[test]
    fn test_btree_child_beyond_file_is_not_found() {
        let (_dir, mut pager) = create_test_pager();
        let root = Node {
            id: ROOT_PAGE_ID,
            is_leaf: false,
            entries: vec![KvPair::new("m", "1")],
            children: vec![40, 41],
        };
        pager.write_node(ROOT_PAGE_ID, &root).expect("write");

        let mut tree = BTree::new(&mut pager);
        assert!(matches!(tree.get(b"a"), Err(BTreeError::KeyNotFound)));
        assert_eq!(tree.get(b"m").expect("get separator"), b"1");
    }

    #[test]
    fn test_btree_verify_detects_disorder() {
        let (_dir, mut pager) = create_test_pager();
        let mut root = Node::leaf(ROOT_PAGE_ID);
        root.entries = vec![KvPair::new("b", ""), KvPair::new("a", "")];
        pager.write_node(ROOT_PAGE_ID, &root).expect("write");

        let mut tree = BTree::new(&mut pager);
        assert!(matches!(
            tree.verify(),
            Err(BTreeError::Invariant { page_id: 0, .. })
        ));
    }
}
