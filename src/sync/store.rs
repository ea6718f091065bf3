//! Record store collaborators used by folder sync.
//!
//! Sync only needs a handful of operations from the record store. They are
//! expressed as traits so the coordinator can be driven by any backend;
//! [`SqliteStorage`] implements all three.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::{Category, NewTask, Task, TaskChanges};
use crate::storage::{SqliteStorage, StoreEvent};
use crate::sync::types::SyncError;

/// Actor recorded in the audit log for changes made by folder sync.
pub const SYNC_ACTOR: &str = "folder-sync";

/// Task persistence.
pub trait TaskStore {
    /// Tasks belonging to a category.
    fn list(&self, category_id: &str) -> Result<Vec<Task>>;

    fn create(&mut self, input: &NewTask) -> Result<Task>;

    fn update(&mut self, id: &str, changes: &TaskChanges) -> Result<()>;

    fn delete(&mut self, id: &str) -> Result<()>;

    /// Notifications for every committed mutation.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Look for changes made outside this handle and publish them.
    ///
    /// Returns whether anything changed.
    fn refresh(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// Category persistence.
pub trait CategoryStore {
    /// Active categories.
    fn categories(&self) -> Result<Vec<Category>>;

    fn add_category(&mut self, name: &str, color: Option<&str>) -> Result<Category>;

    /// Active category whose name matches ignoring case.
    fn find_category(&self, name: &str) -> Result<Option<Category>> {
        Ok(self
            .categories()?
            .into_iter()
            .find(|c| c.matches_name(name)))
    }
}

/// Durable key-value store for the directory handle.
pub trait HandleStore {
    fn put(&mut self, key: &str, value: &str) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn erase(&mut self, key: &str) -> Result<()>;
}

/// Everything the coordinator needs from a store shared with background tasks.
pub trait SyncStore: TaskStore + CategoryStore + HandleStore + Send + 'static {}

impl<T> SyncStore for T where T: TaskStore + CategoryStore + HandleStore + Send + 'static {}

/// Store shared between the coordinator and its loops.
pub type SharedStore<S> = Arc<Mutex<S>>;

/// Lock the shared store.
///
/// # Errors
///
/// Returns `SyncError::StorePoisoned` if a holder panicked.
pub fn lock<S>(store: &Mutex<S>) -> Result<MutexGuard<'_, S>> {
    store
        .lock()
        .map_err(|_| SyncError::StorePoisoned.into())
}

impl TaskStore for SqliteStorage {
    fn list(&self, category_id: &str) -> Result<Vec<Task>> {
        self.list_tasks(category_id)
    }

    fn create(&mut self, input: &NewTask) -> Result<Task> {
        self.create_task(input, SYNC_ACTOR)
    }

    fn update(&mut self, id: &str, changes: &TaskChanges) -> Result<()> {
        self.update_task(id, changes, SYNC_ACTOR).map(|_| ())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        self.delete_task(id, SYNC_ACTOR)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        SqliteStorage::subscribe(self)
    }

    fn refresh(&mut self) -> Result<bool> {
        self.check_external_changes()
    }
}

impl CategoryStore for SqliteStorage {
    fn categories(&self) -> Result<Vec<Category>> {
        self.list_categories(false)
    }

    fn add_category(&mut self, name: &str, color: Option<&str>) -> Result<Category> {
        self.create_category(name, color, SYNC_ACTOR)
    }

    fn find_category(&self, name: &str) -> Result<Option<Category>> {
        self.find_category_by_name(name)
    }
}

impl HandleStore for SqliteStorage {
    fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.set_meta(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_meta(key)
    }

    fn erase(&mut self, key: &str) -> Result<()> {
        self.delete_meta(key).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;

    #[test]
    fn test_sqlite_task_store() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let work = storage.add_category("Work", None).unwrap();

        let task = storage.create(&NewTask::in_category("A", &work.id)).unwrap();
        storage
            .update(&task.id, &TaskChanges::status(TaskStatus::Completed))
            .unwrap();

        let listed = TaskStore::list(&storage, &work.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_completed());

        let history = storage.task_history(&task.id, None).unwrap();
        assert!(history.iter().all(|e| e.actor == SYNC_ACTOR));

        TaskStore::delete(&mut storage, &task.id).unwrap();
        assert!(TaskStore::list(&storage, &work.id).unwrap().is_empty());
    }

    #[test]
    fn test_find_category_ignores_case() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let work = storage.add_category("Work", None).unwrap();

        let found = storage.find_category("WORK").unwrap().unwrap();
        assert_eq!(found.id, work.id);
        assert!(storage.find_category("Home").unwrap().is_none());
    }

    #[test]
    fn test_handle_store() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.put("sync.handle", "/tmp/tasks").unwrap();
        assert_eq!(storage.get("sync.handle").unwrap().as_deref(), Some("/tmp/tasks"));
        storage.erase("sync.handle").unwrap();
        assert!(storage.get("sync.handle").unwrap().is_none());
        // Erasing twice is fine
        storage.erase("sync.handle").unwrap();
    }

    #[test]
    fn test_subscribe_sees_sync_mutations() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let mut rx = TaskStore::subscribe(&storage);

        storage.add_category("Work", None).unwrap();
        let event = rx.try_recv().unwrap();
        assert!(event.is_from(SYNC_ACTOR));
    }
}
