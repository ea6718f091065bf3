//! Sync status display.
//!
//! Status is read from the store alone, so it works whether or not a
//! session is running in another process.

use std::collections::BTreeMap;

use colored::Colorize;
use serde::Serialize;

use crate::error::Result;
use crate::sync::coordinator::{CACHE_KEY, HANDLE_KEY};
use crate::sync::export::assign_file_names;
use crate::sync::store::{CategoryStore, HandleStore, TaskStore};

/// One category and the document it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryFile {
    pub category: String,
    pub file_name: String,
    pub tasks: usize,
    pub completed: usize,
}

/// Snapshot of the sync configuration stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Token of the remembered folder.
    pub folder: Option<String>,
    /// Documents with a last-written hash.
    pub cached_files: usize,
    pub categories: Vec<CategoryFile>,
}

impl SyncStatus {
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.folder.is_some()
    }
}

/// Get the current sync status.
///
/// # Errors
///
/// Returns an error if database queries fail.
pub fn get_sync_status<S>(store: &S) -> Result<SyncStatus>
where
    S: TaskStore + CategoryStore + HandleStore,
{
    let folder = store.get(HANDLE_KEY)?;
    let cached_files = store
        .get(CACHE_KEY)?
        .and_then(|json| serde_json::from_str::<BTreeMap<String, String>>(&json).ok())
        .map_or(0, |entries| entries.len());

    let categories = store.categories()?;
    let file_names = assign_file_names(categories.iter().map(|c| c.name.as_str()), &[]);
    let categories = categories
        .into_iter()
        .zip(file_names)
        .map(|(category, file_name)| {
            let tasks = store.list(&category.id)?;
            Ok(CategoryFile {
                file_name,
                tasks: tasks.len(),
                completed: tasks.iter().filter(|t| t.is_completed()).count(),
                category: category.name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SyncStatus {
        folder,
        cached_files,
        categories,
    })
}

/// Print sync status to stdout in a human-readable format.
pub fn print_status(status: &SyncStatus) {
    println!("{}", "Sync Status".bold().underline());
    println!();

    match &status.folder {
        Some(folder) => {
            println!("{} {}", "Folder:".blue().bold(), folder);
            println!("  Tracked files: {}", status.cached_files);
        }
        None => {
            println!("{}", "No folder connected.".dimmed());
            println!("{}", "Run 'td sync connect <dir>' to mirror tasks to a folder.".dimmed());
        }
    }
    println!();

    if status.categories.is_empty() {
        println!("{}", "No categories.".dimmed());
        return;
    }

    println!("{}", "Documents:".blue().bold());
    for file in &status.categories {
        let counts = format!("{}/{} done", file.completed, file.tasks);
        println!("  {} ({})", file.file_name, counts.dimmed());
    }
}
