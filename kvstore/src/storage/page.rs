//! Page buffer and constants for the storage engine.
//!
//! The storage engine uses 4KB pages as the fundamental unit of I/O. Page `i`
//! occupies bytes `[i * PAGE_SIZE, (i + 1) * PAGE_SIZE)` of the database file.

/// Page size in bytes (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Page size as u64 for offset calculations.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// A page identifier (0-indexed page number).
pub type PageId = u64;

/// Page 0 always holds the root of the tree.
pub const ROOT_PAGE_ID: PageId = 0;

/// Byte range `[start, end)` that page `page_id` occupies in the file.
///
/// Returns `None` if the range does not fit in `usize` on this platform.
#[must_use]
pub fn page_range(page_id: PageId) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(page_id).ok()?.checked_mul(PAGE_SIZE)?;
    let end = start.checked_add(PAGE_SIZE)?;
    Some(start..end)
}

/// An owned page buffer.
///
/// All multi-byte integers are stored big-endian.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Create a new zeroed page.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Copy a page out of a byte slice.
    ///
    /// Returns `None` unless `bytes` is exactly `PAGE_SIZE` long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != PAGE_SIZE {
            return None;
        }
        let mut page = Self::new();
        page.data.copy_from_slice(bytes);
        Some(page)
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u8 at the given offset.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Write a u8 at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u16 (big-endian) at the given offset.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Write a u16 (big-endian) at the given offset.
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Read a u64 (big-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_be_bytes(buf)
    }

    /// Write a u64 (big-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("first_16_bytes", &&self.data[..16])
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_read_write() {
        let mut page = Page::new();

        page.write_u8(0, 0xFF);
        assert_eq!(page.read_u8(0), 0xFF);

        page.write_u16(100, 0x1234);
        assert_eq!(page.read_u16(100), 0x1234);

        page.write_u64(200, 0x0102_0304_0506_0708);
        assert_eq!(page.read_u64(200), 0x0102_0304_0506_0708);

        page.write_bytes(500, b"hello");
        assert_eq!(page.read_bytes(500, 5), b"hello");
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut page = Page::new();
        page.write_u64(1, 17);
        assert_eq!(page.read_bytes(1, 8), &[0, 0, 0, 0, 0, 0, 0, 17]);

        page.write_u16(9, 0x0102);
        assert_eq!(page.read_bytes(9, 2), &[0x01, 0x02]);
    }

    #[test]
    fn test_from_slice_requires_exact_length() {
        assert!(Page::from_slice(&[0u8; PAGE_SIZE - 1]).is_none());
        assert!(Page::from_slice(&[0u8; PAGE_SIZE + 1]).is_none());

        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[42] = 7;
        let page = Page::from_slice(&bytes).expect("exact length");
        assert_eq!(page.read_u8(42), 7);
    }

    #[test]
    fn test_page_range() {
        assert_eq!(page_range(0), Some(0..PAGE_SIZE));
        assert_eq!(page_range(3), Some(3 * PAGE_SIZE..4 * PAGE_SIZE));
        assert_eq!(page_range(u64::MAX), None);
    }
}
