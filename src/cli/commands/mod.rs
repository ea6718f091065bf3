//! Command implementations.

pub mod category;
pub mod completions;
pub mod init;
pub mod sync;
pub mod task;
pub mod version;

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use std::path::PathBuf;

/// Resolve the database path, failing if it was never initialized.
fn existing_db_path(db_path: Option<&PathBuf>) -> Result<PathBuf> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }
    Ok(db_path)
}

/// Open the initialized database.
fn open_storage(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    SqliteStorage::open(&existing_db_path(db_path)?)
}
