//! Applying document changes to the record store.
//!
//! A [`Changeset`] is applied in a fixed order: creates (top to bottom),
//! then updates, then deletes. A failing store call is logged and counted,
//! the remaining operations still run.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{Category, NewTask, TaskChanges, TaskStatus};
use crate::sync::codec::{Document, ParsedLine};
use crate::sync::reconcile::{implied_parent, reconcile, Changeset};
use crate::sync::store::{CategoryStore, TaskStore};
use crate::sync::types::{ImportStats, ParentResolution};

/// Applies decoded documents to a store.
pub struct Importer<'a, S> {
    store: &'a mut S,
    resolution: ParentResolution,
}

impl<'a, S> Importer<'a, S>
where
    S: TaskStore + CategoryStore,
{
    #[must_use]
    pub fn new(store: &'a mut S, resolution: ParentResolution) -> Self {
        Self { store, resolution }
    }

    /// Reconcile a category's document against its current tasks and apply
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns an error only if the category's tasks cannot be listed.
    pub fn sync_category(&mut self, category: &Category, lines: &[ParsedLine]) -> Result<ImportStats> {
        let existing = self.store.list(&category.id)?;
        let changeset = reconcile(lines, &existing);

        if changeset.is_empty() {
            debug!(category = %category.name, "Document matches store");
            return Ok(ImportStats::default());
        }

        let stats = self.apply(&category.id, lines, &changeset);
        info!(
            category = %category.name,
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            failed = stats.failed,
            "Applied document changes"
        );
        Ok(stats)
    }

    /// Import a document that is not yet any category's file.
    ///
    /// The category is named after the heading, or `fallback_name` without
    /// one, and found or created ignoring case. Lines are only ever added:
    /// tasks of an existing category that are missing from the document are
    /// kept, and lines matching an existing task are not created again.
    ///
    /// # Errors
    ///
    /// Returns an error if the category cannot be found or created.
    pub fn import_document(
        &mut self,
        fallback_name: &str,
        doc: &Document,
    ) -> Result<(Category, ImportStats)> {
        let name = doc.heading.as_deref().unwrap_or(fallback_name).trim();

        let category = match self.store.find_category(name)? {
            Some(category) => category,
            None => {
                info!(category = name, "Creating category from document");
                self.store.add_category(name, None)?
            }
        };

        // A document merged into an existing category only adds the lines
        // it does not already hold; a new category gets every line created.
        let existing = self.store.list(&category.id)?;
        let mut changeset = reconcile(&doc.lines, &existing);
        changeset.to_update.clear();
        changeset.to_delete.clear();

        let stats = self.apply(&category.id, &doc.lines, &changeset);
        info!(category = %category.name, created = stats.created, "Imported document");
        Ok((category, stats))
    }

    /// Apply a changeset computed for `lines`.
    pub fn apply(&mut self, category_id: &str, lines: &[ParsedLine], changeset: &Changeset) -> ImportStats {
        let mut stats = ImportStats::default();
        let mut ids = changeset.line_ids.clone();
        ids.resize(lines.len(), None);

        for create in &changeset.to_create {
            let parent = match self.resolution {
                ParentResolution::PreOrder => {
                    implied_parent(lines, &ids, create.line_index).flatten()
                }
                ParentResolution::Flat => None,
            };

            let input = NewTask::in_category(create.title.clone(), category_id).with_parent(parent);
            let task = match self.store.create(&input) {
                Ok(task) => task,
                Err(e) => {
                    warn!(title = %create.title, error = %e, "Failed to create task");
                    stats.failed += 1;
                    continue;
                }
            };
            stats.created += 1;

            if create.completed {
                if let Err(e) = self
                    .store
                    .update(&task.id, &TaskChanges::status(TaskStatus::Completed))
                {
                    warn!(task = %task.id, error = %e, "Failed to complete created task");
                    stats.failed += 1;
                }
            }
            ids[create.line_index] = Some(task.id);
        }

        if self.resolution == ParentResolution::PreOrder && !changeset.to_create.is_empty() {
            self.attach_to_created(lines, changeset, &ids, &mut stats);
        }

        for update in &changeset.to_update {
            match self.store.update(&update.id, &update.changes) {
                Ok(()) => stats.updated += 1,
                Err(e) => {
                    warn!(task = %update.id, error = %e, "Failed to update task");
                    stats.failed += 1;
                }
            }
        }

        for id in &changeset.to_delete {
            match self.store.delete(id) {
                Ok(()) => stats.deleted += 1,
                Err(e) => {
                    warn!(task = %id, error = %e, "Failed to delete task");
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    /// Matched lines indented under a freshly created line get that task as
    /// parent. Their parent was unresolvable when the changeset was built.
    fn attach_to_created(
        &mut self,
        lines: &[ParsedLine],
        changeset: &Changeset,
        ids: &[Option<String>],
        stats: &mut ImportStats,
    ) {
        for (i, matched) in changeset.line_ids.iter().enumerate() {
            let Some(id) = matched else { continue };
            if implied_parent(lines, &changeset.line_ids, i).is_some() {
                continue;
            }
            let Some(Some(parent)) = implied_parent(lines, ids, i) else {
                continue;
            };

            match self.store.update(id, &TaskChanges::parent(Some(parent))) {
                Ok(()) => stats.updated += 1,
                Err(e) => {
                    warn!(task = %id, error = %e, "Failed to attach task to new parent");
                    stats.failed += 1;
                }
            }
        }
    }
}
