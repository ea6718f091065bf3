//! Configuration management.
//!
//! This module resolves the database path, the audit actor and the folder
//! sync settings.
//!
//! # Layout
//!
//! taskdoc keeps a single database per user:
//! - **Database**: `~/.taskdoc/data/taskdoc.db`
//! - **Test database**: `~/.taskdoc/test/taskdoc.db` when `TD_TEST_DB` is set
//!
//! The sync folder itself is chosen at runtime and remembered in the database.

mod sync;

pub use sync::SyncConfig;

use std::path::{Path, PathBuf};

/// Get the global taskdoc directory location.
#[must_use]
pub fn global_taskdoc_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".taskdoc"))
}

/// Interpret an environment flag value.
///
/// Empty, `0` and `false` (any case) are off; anything else is on.
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `TD_TEST_DB=1` (or any truthy value).
/// This redirects all database operations to an isolated test database.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("TD_TEST_DB").is_ok_and(|v| is_truthy(&v))
}

/// Get the test database path.
///
/// Returns `~/.taskdoc/test/taskdoc.db` for isolated testing.
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_taskdoc_dir().map(|dir| dir.join("test").join("taskdoc.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `TD_TEST_DB` environment variable → uses test database
/// 3. `TASKDOC_DB` environment variable
/// 4. Global location: `~/.taskdoc/data/taskdoc.db`
///
/// # Returns
///
/// Returns the path to the database file, or `None` if no home directory
/// can be found.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Explicit path from CLI flag
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Test mode - use isolated test database
    if is_test_mode() {
        return test_db_path();
    }

    // Priority 3: TASKDOC_DB environment variable
    if let Ok(db_path) = std::env::var("TASKDOC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    // Priority 4: Global database location
    global_taskdoc_dir().map(|dir| dir.join("data").join("taskdoc.db"))
}

/// Get the default actor name recorded in the audit log.
///
/// Priority:
/// 1. `TD_ACTOR` environment variable
/// 2. Git user name
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("TD_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    // Try git user name
    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}
