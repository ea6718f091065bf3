//! Rendering categories and writing them to the sync folder.
//!
//! Rendering reads the store synchronously. Writing is async and compares
//! every document with the last-written cache first, so unchanged files are
//! never rewritten.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::Category;
use crate::sync::codec::encode;
use crate::sync::file::{category_file_name, document_stem, file_key, DOCUMENT_EXTENSION};
use crate::sync::hash::ContentCache;
use crate::sync::host::{DirEntry, DirectoryHandle, EntryKind};
use crate::sync::store::{CategoryStore, TaskStore};
use crate::sync::types::ExportStats;

/// A category rendered to document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub category: Category,
    pub file_name: String,
    pub text: String,
}

/// Render every active category.
///
/// # Errors
///
/// Returns an error if categories or tasks cannot be listed.
pub fn render_all<S>(store: &S) -> Result<Vec<RenderedDocument>>
where
    S: TaskStore + CategoryStore,
{
    let categories = store.categories()?;
    let file_names = assign_file_names(categories.iter().map(|c| c.name.as_str()), &[]);

    categories
        .into_iter()
        .zip(file_names)
        .map(|(category, file_name)| {
            let tasks = store.list(&category.id)?;
            Ok(RenderedDocument {
                file_name,
                text: encode(&category.name, &tasks),
                category,
            })
        })
        .collect()
}

/// File of each category, in the order given.
///
/// A category uses an existing entry whose name matches its canonical file
/// name ignoring case, otherwise the canonical name. Names that sanitize to a
/// file already claimed by an earlier category get a numbered suffix, so
/// `Home/Garden` and `Home_Garden` map to `Home_Garden.md` and
/// `Home_Garden (2).md`.
#[must_use]
pub fn assign_file_names<'a, I>(category_names: I, entries: &[DirEntry]) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken = HashSet::new();
    category_names
        .into_iter()
        .map(|name| {
            let canonical = category_file_name(name);
            let mut file_name = existing_or(canonical.clone(), entries);
            let mut n = 2;
            while !taken.insert(file_key(&file_name)) {
                let numbered = format!(
                    "{} ({n}).{DOCUMENT_EXTENSION}",
                    document_stem(&canonical)
                );
                file_name = existing_or(numbered, entries);
                n += 1;
            }
            file_name
        })
        .collect()
}

fn existing_or(file_name: String, entries: &[DirEntry]) -> String {
    let key = file_key(&file_name);
    entries
        .iter()
        .find(|e| e.kind == EntryKind::File && file_key(&e.name) == key)
        .map_or(file_name, |e| e.name.clone())
}

/// Writes rendered documents through a directory handle.
pub struct Exporter<'a> {
    handle: &'a dyn DirectoryHandle,
    cache: &'a ContentCache,
}

impl<'a> Exporter<'a> {
    #[must_use]
    pub fn new(handle: &'a dyn DirectoryHandle, cache: &'a ContentCache) -> Self {
        Self { handle, cache }
    }

    /// Write every document whose text differs from the cache.
    ///
    /// Failures are logged and counted per file.
    pub async fn write_all(&self, documents: &mut [RenderedDocument]) -> ExportStats {
        match self.handle.list_entries().await {
            Ok(entries) => {
                let names = documents.iter().map(|d| d.category.name.as_str());
                for (file_name, doc) in assign_file_names(names, &entries)
                    .into_iter()
                    .zip(documents.iter_mut())
                {
                    doc.file_name = file_name;
                }
            }
            Err(e) => debug!(error = %e, "Could not list folder, using canonical file names"),
        }

        let mut stats = ExportStats::default();
        for doc in documents.iter() {
            if self.cache.matches(&doc.file_name, &doc.text) {
                stats.unchanged += 1;
                continue;
            }

            match self.handle.write_file(&doc.file_name, &doc.text).await {
                Ok(()) => {
                    self.cache.record(&doc.file_name, &doc.text);
                    debug!(file = %doc.file_name, "Wrote document");
                    stats.written += 1;
                }
                Err(e) => {
                    warn!(file = %doc.file_name, error = %e, "Failed to write document");
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}
