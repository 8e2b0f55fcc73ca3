use tempfile::TempDir;

use crate::storage::Database;

/// Create a new test database in a fresh temporary directory.
///
/// The database lives at `<dir>/test.db`. Keep the returned `TempDir` alive
/// for as long as the database is in use; dropping it removes the files.
pub fn new_test_database() -> Result<(TempDir, Database), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let db = Database::open(&dir.path().join("test.db"))?;
    Ok((dir, db))
}
