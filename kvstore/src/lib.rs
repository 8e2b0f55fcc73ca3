// Life of a write:
// 1. `Database::put` validates key and value sizes
// 2. The B-tree descends from page 0, splitting full nodes on the way down
// 3. Touched nodes are encoded and staged in the page manager's overlay
// 4. `Database::commit` grows the file if needed and copies dirty pages into
//    the mapping, then flushes it
//
// System components:
//  - Memory-mapped page file guarded by an advisory lock
//  - Page manager with a dirty-page overlay
//  - B-tree of fixed-size key-value entries

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod storage;
#[cfg(test)]
mod testing;
