//! High-level database interface.
//!
//! Provides a clean API for opening a store, reading and writing keys, and
//! committing staged writes to disk.

use std::path::Path;

use crate::config::StoreConfig;
use crate::storage::btree::{BTree, BTreeError, KvPair, NodeError, TreeStats};
use crate::storage::file::FileError;
use crate::storage::lock::{FileLock, LockError};
use crate::storage::pager::{PageManager, PagerError};

/// A database instance.
///
/// Owns the advisory lock, the mapped file and the overlay of staged pages.
/// Writes are visible to reads on the same handle immediately but only reach
/// the file on `commit`.
///
/// A handle is single-threaded; callers sharing one across threads must wrap
/// it in their own mutex.
#[derive(Debug)]
pub struct Database {
    pager: PageManager,
    lock: FileLock,
}

impl Database {
    /// Open (or create) the database at `path` with default settings.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with_config(path, &StoreConfig::default())
    }

    /// Open (or create) the database at `path`.
    ///
    /// The advisory lock is acquired before the file is mapped.
    pub fn open_with_config(path: &Path, config: &StoreConfig) -> Result<Self, DatabaseError> {
        let lock = FileLock::acquire(path, config.lock_timeout, config.lock_retry_interval)?;
        let pager = PageManager::open(path)?;
        tracing::info!(
            "Opened database {} ({} pages)",
            path.display(),
            pager.page_count()
        );
        Ok(Self { pager, lock })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.pager.path()
    }

    /// Number of allocated pages, including ones not yet committed.
    #[must_use]
    pub const fn page_count(&self) -> u64 {
        self.pager.page_count()
    }

    /// Number of staged pages waiting for `commit`.
    #[must_use]
    pub fn dirty_page_count(&self) -> usize {
        self.pager.dirty_page_count()
    }

    /// Look up the value stored under `key`.
    ///
    /// Fails with a `KeyNotFound` error if the key is absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>, DatabaseError> {
        Ok(BTree::new(&mut self.pager).get(key)?)
    }

    /// Stage `key` = `value`, overwriting any previous value.
    ///
    /// Not durable until `commit`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        Ok(BTree::new(&mut self.pager).insert(key, value)?)
    }

    /// Flush all staged writes to the file.
    pub fn commit(&mut self) -> Result<(), DatabaseError> {
        self.pager.commit()?;
        Ok(())
    }

    /// All entries in key order.
    pub fn traverse(&mut self) -> Result<Vec<KvPair>, DatabaseError> {
        Ok(BTree::new(&mut self.pager).traverse()?)
    }

    /// Check the tree's structural invariants.
    pub fn verify(&mut self) -> Result<TreeStats, DatabaseError> {
        Ok(BTree::new(&mut self.pager).verify()?)
    }

    /// Release the mapping, the file and the lock.
    ///
    /// Uncommitted writes are discarded.
    pub fn close(self) -> Result<(), DatabaseError> {
        let path = self.pager.path().to_path_buf();
        self.pager.close()?;
        self.lock.release()?;
        tracing::info!("Closed database {}", path.display());
        Ok(())
    }
}

/// Classification of database errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File open, lock, growth, mapping or flush failure.
    Io,
    /// A page id beyond the mapped file was requested.
    PageOutOfRange,
    /// The key is not in the store.
    KeyNotFound,
    /// A page does not hold a valid node, or the tree is malformed.
    CorruptPage,
    /// A key or value is too large to store.
    Encoding,
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// Advisory lock error.
    Lock(LockError),
    /// Page manager error.
    Pager(PagerError),
    /// B-tree error.
    BTree(BTreeError),
}

impl DatabaseError {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Lock(_) => ErrorKind::Io,
            Self::Pager(e) | Self::BTree(BTreeError::Pager(e)) => pager_error_kind(e),
            Self::BTree(BTreeError::Node(e)) => node_error_kind(e),
            Self::BTree(BTreeError::KeyNotFound) => ErrorKind::KeyNotFound,
            Self::BTree(BTreeError::MissingChild { .. } | BTreeError::Invariant { .. }) => {
                ErrorKind::CorruptPage
            }
        }
    }

    /// True if the key simply is not in the store.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::KeyNotFound)
    }

    /// True if the store holds data that violates the page layout or tree shape.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self.kind(), ErrorKind::CorruptPage)
    }
}

const fn pager_error_kind(e: &PagerError) -> ErrorKind {
    match e {
        PagerError::File(FileError::Misaligned { .. }) => ErrorKind::CorruptPage,
        PagerError::File(_) => ErrorKind::Io,
        PagerError::PageOutOfRange { .. } | PagerError::UnallocatedPage { .. } => {
            ErrorKind::PageOutOfRange
        }
        PagerError::Node(e) => node_error_kind(e),
    }
}

const fn node_error_kind(e: &NodeError) -> ErrorKind {
    if e.is_corruption() {
        ErrorKind::CorruptPage
    } else {
        ErrorKind::Encoding
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lock(e) => write!(f, "lock error: {e}"),
            Self::Pager(e) => write!(f, "pager error: {e}"),
            Self::BTree(e) => write!(f, "btree error: {e}"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Lock(e) => Some(e),
            Self::Pager(e) => Some(e),
            Self::BTree(e) => Some(e),
        }
    }
}

impl From<LockError> for DatabaseError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}

impl From<PagerError> for DatabaseError {
    fn from(e: PagerError) -> Self {
        Self::Pager(e)
    }
}

impl From<BTreeError> for DatabaseError {
    fn from(e: BTreeError) -> Self {
        Self::BTree(e)
    }
}
