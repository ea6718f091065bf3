//! Create the taskdoc database.
//!
//! The database lives at `~/.taskdoc/data/taskdoc.db` (or the test location
//! when `TD_TEST_DB` is set, or `--db`). The schema is applied on open, so
//! init only has to create the directory and open it once.

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    reinitialized: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` without `--force` when the database exists,
/// or an error if the directory or database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    let existed = db_path.exists();
    if existed && !force {
        return Err(Error::AlreadyInitialized { path: db_path });
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if existed {
        remove_database(&db_path)?;
    }

    SqliteStorage::open(&db_path)?;

    if json {
        let output = InitOutput {
            database: db_path,
            reinitialized: existed,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized taskdoc database");
        println!("  Database: {}", db_path.display());
        println!();
        println!("Next: 'td category add <name>', then 'td sync connect <dir>'.");
    }

    Ok(())
}

/// Remove a database together with its WAL side files.
fn remove_database(path: &Path) -> Result<()> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        paths.push(PathBuf::from(side));
    }

    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("taskdoc.db");

        execute(Some(&db_path), false, true).unwrap();
        assert!(db_path.exists());

        let err = execute(Some(&db_path), false, true).unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized { .. }));
    }

    #[test]
    fn test_force_starts_over() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("taskdoc.db");
        execute(Some(&db_path), false, true).unwrap();

        {
            let mut storage = SqliteStorage::open(&db_path).unwrap();
            storage.create_category("Work", None, "test").unwrap();
        }

        execute(Some(&db_path), true, true).unwrap();
        let storage = SqliteStorage::open(&db_path).unwrap();
        assert!(storage.list_categories(true).unwrap().is_empty());
    }
}
