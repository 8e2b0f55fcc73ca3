//! Key-value storage engine.
//!
//! A single-file, memory-mapped B-tree store.
//!
//! # File Format
//!
//! The database is stored in a single file of 4KB pages:
//!
//! - Page 0: root node of the B-tree (all zeros for an empty store)
//! - Pages 1-N: other B-tree nodes, in allocation order
//!
//! The file length is always a whole number of pages.
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use kvstore::storage::Database;
//!
//! let mut db = Database::open(Path::new("store.db"))?;
//!
//! db.put(b"hello", b"world")?;
//! db.commit()?;
//!
//! assert_eq!(db.get(b"hello")?, b"world");
//! db.close()?;
//! # Ok::<(), kvstore::storage::DatabaseError>(())
//! ```

pub mod btree;
mod database;
mod file;
mod lock;
mod page;
mod pager;

pub use database::{Database, DatabaseError, ErrorKind};
pub use file::{FileError, MappedFile};
pub use lock::{FileLock, LockError, lock_path};
pub use page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId, ROOT_PAGE_ID};
pub use pager::{PageManager, PagerError};
