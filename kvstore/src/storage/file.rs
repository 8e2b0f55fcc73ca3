//! Memory-mapped database file.
//!
//! The whole file is mapped read-write. Growing the file releases the current
//! mapping, reopens and extends the file, and maps it again at the new size.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::storage::page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId, page_range};

/// A database file mapped into memory.
pub struct MappedFile {
    path: PathBuf,
    file: File,
    /// `None` only after a failed remap or after `close`.
    mmap: Option<MmapMut>,
}

impl MappedFile {
    /// Open (or create) the file at `path` and map it.
    ///
    /// An empty file is first extended to a single zeroed page.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let file = open_read_write(path)?;

        let len = file.metadata().map_err(FileError::Io)?.len();
        if len == 0 {
            file.set_len(PAGE_SIZE_U64).map_err(FileError::Io)?;
        } else if len % PAGE_SIZE_U64 != 0 {
            return Err(FileError::Misaligned {
                path: path.to_path_buf(),
                len,
            });
        }

        let mmap = map(&file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap: Some(mmap),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the current mapping in bytes.
    #[must_use]
    pub fn mapped_len(&self) -> usize {
        self.mmap.as_ref().map_or(0, |mmap| mmap.len())
    }

    /// Number of whole pages covered by the current mapping.
    #[must_use]
    pub fn mapped_pages(&self) -> u64 {
        self.mapped_len() as u64 / PAGE_SIZE_U64
    }

    /// Copy page `page_id` out of the mapping.
    ///
    /// Returns `Ok(None)` if the page lies beyond the mapped region.
    pub fn read_page(&self, page_id: PageId) -> Result<Option<Page>, FileError> {
        let mmap = self.mmap.as_ref().ok_or(FileError::NotMapped)?;
        let Some(range) = page_range(page_id).filter(|r| r.end <= mmap.len()) else {
            return Ok(None);
        };
        Ok(Page::from_slice(&mmap[range]))
    }

    /// Copy `page` into the mapping at `page_id`.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), FileError> {
        let mmap = self.mmap.as_mut().ok_or(FileError::NotMapped)?;
        let mapped_len = mmap.len();
        let range = page_range(page_id)
            .filter(|r| r.end <= mapped_len)
            .ok_or(FileError::PageBeyondMapping {
                page_id,
                mapped_len,
            })?;
        mmap[range].copy_from_slice(page.as_bytes());
        Ok(())
    }

    /// Extend the file to `page_count` pages and remap it.
    ///
    /// The previous mapping is dropped before the new one is created. If
    /// remapping fails the file is left unmapped and further page access fails
    /// with `NotMapped`.
    pub fn grow(&mut self, page_count: u64) -> Result<(), FileError> {
        let new_len = page_count
            .checked_mul(PAGE_SIZE_U64)
            .ok_or(FileError::TooLarge { page_count })?;
        if new_len <= self.mapped_len() as u64 {
            return Ok(());
        }

        let file = open_read_write(&self.path)?;
        file.set_len(new_len).map_err(FileError::Io)?;

        if let Some(mmap) = self.mmap.take() {
            mmap.flush().map_err(FileError::Io)?;
        }
        // Replacing the handle closes the old one.
        self.file = file;
        self.mmap = Some(map(&self.file)?);

        Ok(())
    }

    /// Flush the mapping to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        match &self.mmap {
            Some(mmap) => mmap.flush().map_err(FileError::Io),
            None => Err(FileError::NotMapped),
        }
    }

    /// Release the mapping and close the file.
    pub fn close(mut self) -> Result<(), FileError> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush().map_err(FileError::Io)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("mapped_len", &self.mapped_len())
            .finish_non_exhaustive()
    }
}

fn open_read_write(path: &Path) -> Result<File, FileError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(FileError::Io)
}

#[allow(unsafe_code)]
fn map(file: &File) -> Result<MmapMut, FileError> {
    // SAFETY: the file is guarded by an exclusive advisory lock held for the
    // lifetime of the store, and the mapping is only reached through
    // `MappedFile`, which never hands out references that outlive a remap.
    unsafe { MmapMut::map_mut(file) }.map_err(FileError::Io)
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File length is not a whole number of pages.
    Misaligned { path: PathBuf, len: u64 },
    /// The file is not currently mapped.
    NotMapped,
    /// Write target lies beyond the mapped region.
    PageBeyondMapping { page_id: PageId, mapped_len: usize },
    /// Requested size overflows the address space.
    TooLarge { page_count: u64 },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Misaligned { path, len } => write!(
                f,
                "{} is {len} bytes, not a multiple of the {PAGE_SIZE}-byte page size",
                path.display()
            ),
            Self::NotMapped => write!(f, "database file is not mapped"),
            Self::PageBeyondMapping {
                page_id,
                mapped_len,
            } => write!(
                f,
                "page {page_id} lies beyond the mapped region ({mapped_len} bytes)"
            ),
            Self::TooLarge { page_count } => {
                write!(f, "cannot grow file to {page_count} pages")
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FileError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
