//! Page manager: the mapped file plus an overlay of staged pages.
//!
//! All node I/O goes through the page manager. Reads consult the overlay
//! before the mapped file; writes only ever land in the overlay. `commit`
//! grows the file if pages were allocated past its end and then copies every
//! dirty overlay page into the mapping.
//!
//! # Invariants
//!
//! - The mapped region is only modified by `commit`.
//! - `next_page_id >= 1`; page 0 is reserved for the root.
//! - Every overlay entry holds a full page; clean entries match the mapping.

use std::collections::HashMap;
use std::path::Path;

use crate::storage::btree::{Node, NodeError};
use crate::storage::file::{FileError, MappedFile};
use crate::storage::page::{Page, PageId};

/// A staged page in the overlay.
#[derive(Debug)]
struct OverlayPage {
    page: Page,
    dirty: bool,
}

/// Owner of the mapped file and the dirty-page overlay.
#[derive(Debug)]
pub struct PageManager {
    file: MappedFile,
    overlay: HashMap<PageId, OverlayPage>,
    /// Next page id handed out by `allocate_page`.
    next_page_id: PageId,
}

impl PageManager {
    /// Open the database file at `path`.
    ///
    /// The page counter starts at the number of pages already in the file.
    pub fn open(path: &Path) -> Result<Self, PagerError> {
        let file = MappedFile::open(path)?;
        let next_page_id = file.mapped_pages().max(1);
        Ok(Self {
            file,
            overlay: HashMap::new(),
            next_page_id,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of allocated pages, committed or not.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.next_page_id
    }

    /// Number of pages the mapped file currently holds.
    #[must_use]
    pub fn mapped_pages(&self) -> u64 {
        self.file.mapped_pages()
    }

    /// Number of staged pages not yet committed.
    #[must_use]
    pub fn dirty_page_count(&self) -> usize {
        self.overlay.values().filter(|p| p.dirty).count()
    }

    /// Hand out a fresh page id.
    ///
    /// The page only reaches the file once it is written and committed.
    pub const fn allocate_page(&mut self) -> PageId {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        page_id
    }

    /// Read and decode the node stored at `page_id`.
    ///
    /// Returns `Ok(None)` if the page holds no node. A node whose stored id
    /// differs from `page_id` is reported as `NodeError::IdMismatch`.
    pub fn read_node(&mut self, page_id: PageId) -> Result<Option<Node>, PagerError> {
        if let Some(staged) = self.overlay.get(&page_id) {
            return check_id(page_id, Node::from_page(&staged.page)?);
        }

        let page = self
            .file
            .read_page(page_id)?
            .ok_or(PagerError::PageOutOfRange {
                page_id,
                mapped_pages: self.file.mapped_pages(),
            })?;
        let node = check_id(page_id, Node::from_page(&page)?)?;
        self.overlay
            .insert(page_id, OverlayPage { page, dirty: false });
        Ok(node)
    }

    /// Encode `node` and stage it at `page_id`.
    ///
    /// Only pages handed out by `allocate_page` (or the root) may be written.
    pub fn write_node(&mut self, page_id: PageId, node: &Node) -> Result<(), PagerError> {
        self.check_allocated(page_id)?;
        let page = node.to_page()?;
        self.stage(page_id, page);
        Ok(())
    }

    /// Stage several nodes at once, each at its own `id`.
    ///
    /// Every node is encoded before any is staged, so an encoding failure
    /// leaves the overlay untouched.
    pub fn write_nodes(&mut self, nodes: &[&Node]) -> Result<(), PagerError> {
        for node in nodes {
            self.check_allocated(node.id)?;
        }
        let pages = nodes
            .iter()
            .map(|node| node.to_page().map(|page| (node.id, page)))
            .collect::<Result<Vec<_>, _>>()?;
        for (page_id, page) in pages {
            self.stage(page_id, page);
        }
        Ok(())
    }

    const fn check_allocated(&self, page_id: PageId) -> Result<(), PagerError> {
        if page_id >= self.next_page_id {
            return Err(PagerError::UnallocatedPage {
                page_id,
                page_count: self.next_page_id,
            });
        }
        Ok(())
    }

    fn stage(&mut self, page_id: PageId, page: Page) {
        self.overlay
            .insert(page_id, OverlayPage { page, dirty: true });
    }

    /// Flush every dirty page into the mapped file.
    ///
    /// Grows the file first if pages were allocated past its end. Every dirty
    /// page is below the page count, so once the file has grown no copy can
    /// fail. Returns the number of pages written; committing with nothing
    /// staged writes nothing.
    pub fn commit(&mut self) -> Result<usize, PagerError> {
        if self.next_page_id > self.file.mapped_pages() {
            let old_pages = self.file.mapped_pages();
            self.file.grow(self.next_page_id)?;
            tracing::debug!(
                "Grew {} from {} to {} pages",
                self.file.path().display(),
                old_pages,
                self.next_page_id
            );
        }

        let mut written = 0;
        for (&page_id, staged) in &mut self.overlay {
            if staged.dirty {
                self.file.write_page(page_id, &staged.page)?;
                staged.dirty = false;
                written += 1;
            }
        }

        if written > 0 {
            self.file.sync()?;
        }
        tracing::debug!(
            "Committed {} dirty pages to {}",
            written,
            self.file.path().display()
        );
        Ok(written)
    }

    /// Release the mapping and close the file.
    ///
    /// Staged pages that were never committed are discarded.
    pub fn close(self) -> Result<(), PagerError> {
        let pending = self.dirty_page_count();
        if pending > 0 {
            tracing::warn!(
                "Closing {} with {} uncommitted pages",
                self.file.path().display(),
                pending
            );
        }
        self.file.close()?;
        Ok(())
    }
}

/// Errors that can occur during page manager operations.
#[derive(Debug)]
pub enum PagerError {
    /// Mapping, growth or flush failure.
    File(FileError),
    /// Requested page lies beyond the mapped file.
    PageOutOfRange { page_id: PageId, mapped_pages: u64 },
    /// Write to a page id that was never allocated.
    UnallocatedPage { page_id: PageId, page_count: u64 },
    /// Page encoding or decoding failure.
    Node(NodeError),
}

impl std::fmt::Display for PagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::PageOutOfRange {
                page_id,
                mapped_pages,
            } => write!(
                f,
                "page {page_id} out of range (mapped pages: {mapped_pages})"
            ),
            Self::UnallocatedPage {
                page_id,
                page_count,
            } => write!(
                f,
                "page {page_id} was never allocated (page count: {page_count})"
            ),
            Self::Node(e) => write!(f, "node error: {e}"),
        }
    }
}

impl std::error::Error for PagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::PageOutOfRange { .. } | Self::UnallocatedPage { .. } => None,
        }
    }
}

fn check_id(page_id: PageId, node: Option<Node>) -> Result<Option<Node>, PagerError> {
    match node {
        Some(node) if node.id != page_id => Err(PagerError::Node(NodeError::IdMismatch {
            page_id,
            stored: node.id,
        })),
        node => Ok(node),
    }
}

impl From<FileError> for PagerError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<NodeError> for PagerError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::KvPair;
    use tempfile::tempdir;

    fn leaf(id: PageId, key: &str, value: &str) -> Node {
        let mut node = Node::leaf(id);
        node.entries.push(KvPair::new(key, value));
        node
    }

    #[test]
    fn test_new_file_has_empty_root() {
        let dir = tempdir().expect("create temp dir");
        let mut pager = PageManager::open(&dir.path().join("test.db")).expect("open");

        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.read_node(0).expect("read root"), None);
    }

    #[test]
    fn test_read_beyond_mapping_is_out_of_range() {
        let dir = tempdir().expect("create temp dir");
        let mut pager = PageManager::open(&dir.path().join("test.db")).expect("open");

        let err = pager.read_node(5).expect_err("should fail");
        assert!(matches!(
            err,
            PagerError::PageOutOfRange {
                page_id: 5,
                mapped_pages: 1
            }
        ));
    }

    #[test]
    fn test_write_is_staged_until_commit() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");
        let mut pager = PageManager::open(&path).expect("open");

        let node = leaf(0, "k", "v");
        pager.write_node(0, &node).expect("write");
        assert_eq!(pager.dirty_page_count(), 1);
        assert_eq!(pager.read_node(0).expect("read"), Some(node.clone()));

        // The mapped file still holds the empty page.
        let on_disk = pager.file.read_page(0).expect("read").expect("in range");
        assert_eq!(on_disk, Page::new());

        assert_eq!(pager.commit().expect("commit"), 1);
        assert_eq!(pager.dirty_page_count(), 0);
        let on_disk = pager.file.read_page(0).expect("read").expect("in range");
        assert_eq!(Node::from_page(&on_disk).expect("decode"), Some(node));
    }

    #[test]
    fn test_commit_is_idempotent() {
        let dir = tempdir().expect("create temp dir");
        let mut pager = PageManager::open(&dir.path().join("test.db")).expect("open");

        pager.write_node(0, &leaf(0, "k", "v")).expect("write");
        assert_eq!(pager.commit().expect("first commit"), 1);
        assert_eq!(pager.commit().expect("second commit"), 0);
    }

    #[test]
    fn test_commit_grows_file_for_allocated_pages() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");
        let mut pager = PageManager::open(&path).expect("open");

        let first = pager.allocate_page();
        let second = pager.allocate_page();
        assert_eq!((first, second), (1, 2));

        pager.write_node(first, &leaf(first, "a", "1")).expect("write");
        pager.write_node(second, &leaf(second, "b", "2")).expect("write");
        assert_eq!(pager.mapped_pages(), 1);

        pager.commit().expect("commit");
        assert_eq!(pager.mapped_pages(), 3);
        assert_eq!(
            std::fs::metadata(&path).expect("metadata").len(),
            3 * crate::storage::page::PAGE_SIZE_U64
        );
        pager.close().expect("close");

        let mut pager = PageManager::open(&path).expect("reopen");
        assert_eq!(pager.page_count(), 3);
        assert_eq!(
            pager.read_node(second).expect("read"),
            Some(leaf(second, "b", "2"))
        );
    }

    #[test]
    fn test_write_nodes_is_all_or_nothing() {
        let dir = tempdir().expect("create temp dir");
        let mut pager = PageManager::open(&dir.path().join("test.db")).expect("open");

        let good = leaf(pager.allocate_page(), "a", "1");
        let bad = leaf(pager.allocate_page(), "b", &"x".repeat(200));
        let err = pager.write_nodes(&[&good, &bad]).expect_err("should fail");
        assert!(matches!(err, PagerError::Node(NodeError::ValueTooLarge(200))));
        assert_eq!(pager.dirty_page_count(), 0);
    }

    #[test]
    fn test_uncommitted_writes_discarded_on_close() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");

        let mut pager = PageManager::open(&path).expect("open");
        pager.write_node(0, &leaf(0, "k", "v")).expect("write");
        pager.close().expect("close");

        let mut pager = PageManager::open(&path).expect("reopen");
        assert_eq!(pager.read_node(0).expect("read"), None);
    }

    #[test]
    fn test_node_stored_under_wrong_page_is_corrupt() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");
        let mut pager = PageManager::open(&path).expect("open");

        let c1 = pager.allocate_page();
        let c2 = pager.allocate_page();
        pager.write_node(c1, &leaf(c2, "a", "1")).expect("write");
        pager.write_node(c2, &leaf(c2, "z", "26")).expect("write");

        let err = pager.read_node(c1).expect_err("staged copy");
        assert!(matches!(
            err,
            PagerError::Node(NodeError::IdMismatch {
                page_id: 1,
                stored: 2
            })
        ));

        pager.commit().expect("commit");
        pager.close().expect("close");

        let mut pager = PageManager::open(&path).expect("reopen");
        let err = pager.read_node(c1).expect_err("mapped copy");
        assert!(matches!(
            err,
            PagerError::Node(NodeError::IdMismatch {
                page_id: 1,
                stored: 2
            })
        ));
        assert_eq!(pager.read_node(c2).expect("read"), Some(leaf(c2, "z", "26")));
    }

    #[test]
    fn test_write_to_unallocated_page_is_rejected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.db");
        let mut pager = PageManager::open(&path).expect("open");
        for _ in 0..19 {
            pager.allocate_page();
        }

        pager.write_node(0, &leaf(0, "k", "v")).expect("write root");
        let err = pager
            .write_node(50, &leaf(50, "x", "y"))
            .expect_err("never allocated");
        assert!(matches!(
            err,
            PagerError::UnallocatedPage {
                page_id: 50,
                page_count: 20
            }
        ));
        let err = pager
            .write_nodes(&[&leaf(3, "a", "1"), &leaf(50, "b", "2")])
            .expect_err("never allocated");
        assert!(matches!(err, PagerError::UnallocatedPage { page_id: 50, .. }));
        assert_eq!(pager.dirty_page_count(), 1);

        // Nothing has reached the file yet.
        let on_disk = pager.file.read_page(0).expect("read").expect("in range");
        assert_eq!(on_disk, Page::new());

        assert_eq!(pager.commit().expect("commit"), 1);
        assert_eq!(pager.mapped_pages(), 20);
    }
}
