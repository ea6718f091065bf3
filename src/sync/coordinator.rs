//! Folder sync coordinator.
//!
//! [`FolderSync`] is either disconnected or holds one [`SyncSession`]. A
//! session owns the directory handle, the last-written cache and the
//! flag that keeps export and poll passes from overlapping, plus two
//! background tasks:
//!
//! - **write-back**: waits for store change events, debounces them, then
//!   exports every category whose text changed
//! - **poll**: on a fixed interval, reads every category file, reconciles the
//!   ones edited outside the app and imports unknown documents
//!
//! The record store is shared with both tasks behind a mutex that is never
//! held across an `.await`.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::storage::StoreEvent;
use crate::sync::codec::decode;
use crate::sync::export::{assign_file_names, render_all, Exporter};
use crate::sync::file::{document_stem, file_key, is_document_name};
use crate::sync::hash::ContentCache;
use crate::sync::host::{
    DirectoryHandle, DirectoryHost, EntryKind, HostError, PermissionState,
};
use crate::sync::import::Importer;
use crate::sync::store::{lock, SharedStore, SyncStore};
use crate::sync::types::{
    ExportStats, ParentResolution, PollStats, SyncError, SyncReport,
};

/// Meta key holding the directory handle token.
pub const HANDLE_KEY: &str = "sync.handle";

/// Meta key holding the last-written cache as JSON.
pub const CACHE_KEY: &str = "sync.file_hashes";

/// State shared by a session's background tasks.
struct SessionState {
    handle: Arc<dyn DirectoryHandle>,
    cache: ContentCache,
    busy: AtomicBool,
}

/// A connected folder and the tasks keeping it in sync.
pub struct SyncSession {
    state: Arc<SessionState>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resets the in-flight flag when an export or poll pass ends, however it
/// ends.
struct WriteGuard<'a>(&'a AtomicBool);

impl<'a> WriteGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps a folder of task documents in sync with the record store.
pub struct FolderSync<S: SyncStore> {
    store: SharedStore<S>,
    host: Arc<dyn DirectoryHost>,
    config: SyncConfig,
    session: Option<SyncSession>,
}

impl<S: SyncStore> FolderSync<S> {
    #[must_use]
    pub fn new(store: SharedStore<S>, host: Arc<dyn DirectoryHost>, config: SyncConfig) -> Self {
        Self {
            store,
            host,
            config,
            session: None,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore<S> {
        &self.store
    }

    /// Whether the host offers directory access at all.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.host.is_supported()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Display name of the connected folder.
    #[must_use]
    pub fn folder_name(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.state.handle.name())
    }

    /// Let the user pick a folder, remember it and export everything to it.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected`, `Unsupported`, `Cancelled` or
    /// `PermissionDenied` without changing state, or a store error if the
    /// handle cannot be persisted.
    pub async fn connect(&mut self) -> Result<ExportStats> {
        if self.session.is_some() {
            return Err(SyncError::AlreadyConnected.into());
        }
        if !self.host.is_supported() {
            return Err(SyncError::Unsupported.into());
        }

        let handle = self
            .host
            .request_directory()
            .await
            .map_err(SyncError::from)?;
        ensure_permission(handle.as_ref()).await?;

        {
            let mut store = lock(&self.store)?;
            store.put(HANDLE_KEY, &handle.token())?;
            store.erase(CACHE_KEY)?;
        }
        info!(folder = %handle.name(), "Connected sync folder");

        let state = Arc::new(SessionState {
            handle,
            cache: ContentCache::default(),
            busy: AtomicBool::new(false),
        });
        let stats = export_pass(&self.store, &state).await?;
        self.start(state)?;
        Ok(stats)
    }

    /// Reconnect to the folder remembered by a previous [`connect`](Self::connect).
    ///
    /// Edits made while no session was running are imported before anything
    /// is exported. On failure the state stays disconnected and the
    /// remembered folder is kept for a later attempt.
    ///
    /// # Errors
    ///
    /// Returns `NoPersistedHandle` when nothing was remembered, or the
    /// capability error that prevented access.
    pub async fn restore_from_persisted(&mut self) -> Result<SyncReport> {
        if self.session.is_some() {
            return Err(SyncError::AlreadyConnected.into());
        }
        if !self.host.is_supported() {
            return Err(SyncError::Unsupported.into());
        }

        let (token, snapshot) = {
            let store = lock(&self.store)?;
            (store.get(HANDLE_KEY)?, store.get(CACHE_KEY)?)
        };
        let token = token.ok_or(SyncError::NoPersistedHandle)?;

        let handle = self
            .host
            .restore_handle(&token)
            .await
            .map_err(SyncError::from)?;
        ensure_permission(handle.as_ref()).await?;
        info!(folder = %handle.name(), "Restored sync folder");

        let state = Arc::new(SessionState {
            handle,
            cache: load_cache(snapshot.as_deref()),
            busy: AtomicBool::new(false),
        });
        let poll = poll_pass(&self.store, &state, self.config.parent_resolution).await?;
        let export = export_pass(&self.store, &state).await?;
        self.start(state)?;
        Ok(SyncReport { poll, export })
    }

    /// Stop syncing and forget the folder.
    ///
    /// Safe to call when not connected; the remembered folder is erased
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the remembered folder cannot be erased.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.stop();
            session.state.cache.close();
            info!(folder = %session.state.handle.name(), "Disconnected sync folder");
        }

        let mut store = lock(&self.store)?;
        store.erase(HANDLE_KEY)?;
        store.erase(CACHE_KEY)?;
        Ok(())
    }

    /// Stop the background tasks but keep the folder remembered.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
            debug!(folder = %session.state.handle.name(), "Closed sync session");
        }
    }

    /// Run one write-back pass now.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a session, or a store error.
    pub async fn export_now(&self) -> Result<ExportStats> {
        let state = self.session_state()?;
        export_pass(&self.store, &state).await
    }

    /// Run one poll tick now.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` without a session, or a store error.
    pub async fn poll_now(&self) -> Result<PollStats> {
        let state = self.session_state()?;
        poll_pass(&self.store, &state, self.config.parent_resolution).await
    }

    fn session_state(&self) -> Result<Arc<SessionState>> {
        self.session
            .as_ref()
            .map(|s| Arc::clone(&s.state))
            .ok_or_else(|| SyncError::NotConnected.into())
    }

    fn start(&mut self, state: Arc<SessionState>) -> Result<()> {
        let events = lock(&self.store)?.subscribe();

        let write_back = tokio::spawn(write_back_loop(
            Arc::clone(&self.store),
            Arc::clone(&state),
            events,
            self.config.debounce,
        ));
        let poll = tokio::spawn(poll_loop(
            Arc::clone(&self.store),
            Arc::clone(&state),
            self.config.poll_interval,
            self.config.parent_resolution,
        ));

        self.session = Some(SyncSession {
            state,
            tasks: vec![write_back, poll],
        });
        Ok(())
    }
}

async fn ensure_permission(handle: &dyn DirectoryHandle) -> Result<()> {
    let permission = match handle.query_permission().await {
        PermissionState::Prompt => handle.request_permission().await,
        other => other,
    };
    if permission == PermissionState::Granted {
        Ok(())
    } else {
        Err(SyncError::PermissionDenied(handle.name()).into())
    }
}

fn load_cache(snapshot: Option<&str>) -> ContentCache {
    let Some(json) = snapshot else {
        return ContentCache::default();
    };
    match serde_json::from_str::<BTreeMap<String, String>>(json) {
        Ok(entries) => ContentCache::from_snapshot(entries),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable sync cache");
            ContentCache::default()
        }
    }
}

/// Save the cache if it changed. Skipped once the session is closed so a
/// late pass cannot bring back a cache that disconnect erased.
fn persist_cache<S: SyncStore>(store: &SharedStore<S>, cache: &ContentCache) -> Result<()> {
    let Some(snapshot) = cache.take_dirty_snapshot() else {
        return Ok(());
    };
    let json = serde_json::to_string(&snapshot)?;
    let mut store = lock(store)?;
    if !cache.is_closed() {
        store.put(CACHE_KEY, &json)?;
    }
    Ok(())
}

async fn export_pass<S: SyncStore>(
    store: &SharedStore<S>,
    state: &SessionState,
) -> Result<ExportStats> {
    let Some(_guard) = WriteGuard::acquire(&state.busy) else {
        debug!("Sync pass in flight, skipping export");
        return Ok(ExportStats {
            skipped: true,
            ..ExportStats::default()
        });
    };

    let mut documents = {
        let store = lock(store)?;
        render_all(&*store)?
    };
    let stats = Exporter::new(state.handle.as_ref(), &state.cache)
        .write_all(&mut documents)
        .await;
    persist_cache(store, &state.cache)?;

    if stats.written > 0 || stats.failed > 0 {
        info!(
            written = stats.written,
            unchanged = stats.unchanged,
            failed = stats.failed,
            "Exported categories"
        );
    }
    Ok(stats)
}

async fn poll_pass<S: SyncStore>(
    store: &SharedStore<S>,
    state: &SessionState,
    resolution: ParentResolution,
) -> Result<PollStats> {
    let mut stats = PollStats::default();
    // Held for the whole pass so no export lands between a read and the
    // cache record that follows it
    let Some(_guard) = WriteGuard::acquire(&state.busy) else {
        debug!("Sync pass in flight, skipping poll");
        stats.skipped = true;
        return Ok(stats);
    };

    let categories = {
        let mut store = lock(store)?;
        if let Err(e) = store.refresh() {
            warn!(error = %e, "Failed to check for outside store changes");
        }
        store.categories()?
    };

    let entries = match state.handle.list_entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Failed to list sync folder");
            Vec::new()
        }
    };

    let file_names = assign_file_names(categories.iter().map(|c| c.name.as_str()), &entries);
    let mut known = HashSet::new();
    for (category, file_name) in categories.iter().zip(file_names) {
        known.insert(file_key(&file_name));

        let text = match state.handle.read_file(&file_name).await {
            Ok(text) => text,
            Err(HostError::NotFound(_)) => {
                debug!(file = %file_name, "Category file missing");
                continue;
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "Failed to read category file");
                stats.failed += 1;
                continue;
            }
        };

        if state.cache.matches(&file_name, &text) {
            stats.unchanged += 1;
            continue;
        }

        let doc = decode(&text);
        for diagnostic in &doc.diagnostics {
            debug!(file = %file_name, %diagnostic, "Skipped line");
        }
        stats.diagnostics += doc.diagnostics.len();

        let result = {
            let mut store = lock(store)?;
            Importer::new(&mut *store, resolution).sync_category(category, &doc.lines)
        };
        match result {
            Ok(import) => {
                stats.reconciled += 1;
                stats.import.absorb(import);
                state.cache.record(&file_name, &text);
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "Failed to reconcile category file");
                stats.failed += 1;
            }
        }
    }

    let unknown = entries.iter().filter(|e| {
        e.kind == EntryKind::File
            && is_document_name(&e.name)
            && !known.contains(&file_key(&e.name))
            && !state.cache.contains(&e.name)
    });
    for entry in unknown {
        let text = match state.handle.read_file(&entry.name).await {
            Ok(text) => text,
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Failed to read new document");
                stats.failed += 1;
                continue;
            }
        };

        let doc = decode(&text);
        stats.diagnostics += doc.diagnostics.len();

        let result = {
            let mut store = lock(store)?;
            Importer::new(&mut *store, resolution).import_document(document_stem(&entry.name), &doc)
        };
        match result {
            Ok((category, import)) => {
                info!(file = %entry.name, category = %category.name, "Discovered document");
                stats.discovered += 1;
                stats.import.absorb(import);
                state.cache.record(&entry.name, &text);
            }
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Failed to import new document");
                stats.failed += 1;
            }
        }
    }

    persist_cache(store, &state.cache)?;
    Ok(stats)
}

async fn write_back_loop<S: SyncStore>(
    store: SharedStore<S>,
    state: Arc<SessionState>,
    mut events: broadcast::Receiver<StoreEvent>,
    debounce: Duration,
) {
    loop {
        match events.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return,
        }

        // Restart the timer on every further change
        let mut closed = false;
        loop {
            tokio::select! {
                () = sleep(debounce) => break,
                received = events.recv() => {
                    if let Err(RecvError::Closed) = received {
                        closed = true;
                        break;
                    }
                }
            }
        }

        loop {
            match export_pass(&store, &state).await {
                Ok(stats) if stats.skipped => sleep(debounce).await,
                Ok(_) => break,
                Err(e) => {
                    warn!(error = %e, "Export failed");
                    break;
                }
            }
        }

        if closed {
            return;
        }
    }
}

async fn poll_loop<S: SyncStore>(
    store: SharedStore<S>,
    state: Arc<SessionState>,
    period: Duration,
    resolution: ParentResolution,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match poll_pass(&store, &state, resolution).await {
            Ok(stats) if stats.reconciled > 0 || stats.discovered > 0 => info!(
                reconciled = stats.reconciled,
                discovered = stats.discovered,
                created = stats.import.created,
                updated = stats.import.updated,
                deleted = stats.import.deleted,
                "Imported folder changes"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Poll failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::model::{NewTask, TaskStatus};
    use crate::storage::SqliteStorage;
    use crate::sync::host::{DirEntry, HostResult, MemoryHost};
    use crate::sync::store::{CategoryStore, HandleStore, TaskStore};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    const WORK_DOC: &str = "# Work\n\n- [ ] Release\n  - [ ] Changelog\n";

    fn idle_config() -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(3600),
            debounce: Duration::from_secs(3600),
            parent_resolution: ParentResolution::PreOrder,
        }
    }

    fn shared_store() -> (SharedStore<SqliteStorage>, String) {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let work = storage.add_category("Work", None).unwrap();
        let parent = storage.create(&NewTask::in_category("Release", &work.id)).unwrap();
        storage
            .create(&NewTask::in_category("Changelog", &work.id).with_parent(Some(parent.id)))
            .unwrap();
        (Arc::new(Mutex::new(storage)), work.id)
    }

    fn folder_sync(
        store: &SharedStore<SqliteStorage>,
        host: &MemoryHost,
        config: SyncConfig,
    ) -> FolderSync<SqliteStorage> {
        FolderSync::new(Arc::clone(store), Arc::new(host.clone()), config)
    }

    fn titles(store: &SharedStore<SqliteStorage>, category_id: &str) -> Vec<String> {
        let store = store.lock().unwrap();
        TaskStore::list(&*store, category_id)
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_connect_exports_and_persists_handle() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());

        let stats = sync.connect().await.unwrap();

        assert_eq!(stats.written, 1);
        assert!(sync.is_connected());
        assert_eq!(sync.folder_name().as_deref(), Some("memory"));
        assert_eq!(host.file("Work.md").as_deref(), Some(WORK_DOC));
        let persisted = store.lock().unwrap().get(HANDLE_KEY).unwrap();
        assert_eq!(persisted.as_deref(), Some("memory:/"));
    }

    #[tokio::test]
    async fn test_connect_failures_leave_state_unchanged() {
        let (store, _) = shared_store();

        let unsupported = MemoryHost::unsupported();
        let mut sync = folder_sync(&store, &unsupported, idle_config());
        let err = sync.connect().await.unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::Unsupported)));
        assert!(!sync.is_connected());

        let host = MemoryHost::new();
        host.set_cancel_picker(true);
        let mut sync = folder_sync(&store, &host, idle_config());
        let err = sync.connect().await.unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::Cancelled)));
        assert!(!sync.is_connected());
        assert!(store.lock().unwrap().get(HANDLE_KEY).unwrap().is_none());
        assert!(host.file_names().is_empty());
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());

        sync.connect().await.unwrap();
        let err = sync.connect().await.unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn test_poll_reconciles_outside_edit() {
        let (store, work_id) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());
        sync.connect().await.unwrap();

        host.insert_file(
            "Work.md",
            "# Work\n\n- [x] Release\n  - [ ] Changelog\n- [ ] Announce\n",
        );
        let stats = sync.poll_now().await.unwrap();

        assert_eq!(stats.reconciled, 1);
        assert_eq!(stats.import.created, 1);
        assert_eq!(stats.import.updated, 1);
        assert_eq!(stats.import.deleted, 0);
        assert_eq!(titles(&store, &work_id), vec!["Release", "Changelog", "Announce"]);

        let tasks = TaskStore::list(&*store.lock().unwrap(), &work_id).unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);

        // Same text again is not reconciled twice
        let again = sync.poll_now().await.unwrap();
        assert_eq!(again.reconciled, 0);
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn test_poll_after_own_write_changes_nothing() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());
        sync.connect().await.unwrap();

        let stats = sync.poll_now().await.unwrap();
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.reconciled, 0);
        assert_eq!(stats.import.total(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_write_skips_poll_and_export() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());
        sync.connect().await.unwrap();

        let state = sync.session_state().unwrap();
        let guard = WriteGuard::acquire(&state.busy).unwrap();

        host.insert_file("Work.md", "# Work\n");
        assert!(sync.poll_now().await.unwrap().skipped);
        assert!(sync.export_now().await.unwrap().skipped);

        drop(guard);
        let stats = sync.poll_now().await.unwrap();
        assert!(!stats.skipped);
        assert_eq!(stats.import.deleted, 2);
    }

    #[tokio::test]
    async fn test_poll_discovers_unknown_document_once() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());
        sync.connect().await.unwrap();

        host.insert_file("groceries.md", "# Groceries\n\n- [ ] Milk\n  - [x] Eggs\n");
        host.insert_file("notes.txt", "not a task list");
        let stats = sync.poll_now().await.unwrap();
        assert_eq!(stats.discovered, 1);
        assert_eq!(stats.import.created, 2);

        let groceries = store
            .lock()
            .unwrap()
            .find_category("groceries")
            .unwrap()
            .unwrap();
        assert_eq!(groceries.name, "Groceries");
        assert_eq!(titles(&store, &groceries.id), vec!["Milk", "Eggs"]);

        let again = sync.poll_now().await.unwrap();
        assert_eq!(again.discovered, 0);
        assert_eq!(titles(&store, &groceries.id).len(), 2);

        // The discovered category keeps using the existing file
        sync.export_now().await.unwrap();
        assert!(host.file("Groceries.md").is_none());
    }

    #[tokio::test]
    async fn test_poll_skips_failing_file() {
        let (store, _) = shared_store();
        let home_id = store.lock().unwrap().add_category("Home", None).unwrap().id;
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());
        sync.connect().await.unwrap();

        host.fail_file("Work.md");
        host.insert_file("Home.md", "# Home\n\n- [ ] Plants\n");
        let stats = sync.poll_now().await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.reconciled, 1);
        assert_eq!(titles(&store, &home_id), vec!["Plants"]);
    }

    #[tokio::test]
    async fn test_disconnect_forgets_folder() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());
        sync.connect().await.unwrap();

        sync.disconnect().unwrap();

        assert!(!sync.is_connected());
        assert!(store.lock().unwrap().get(HANDLE_KEY).unwrap().is_none());
        assert!(store.lock().unwrap().get(CACHE_KEY).unwrap().is_none());
        let err = sync.export_now().await.unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::NotConnected)));

        // Idempotent
        sync.disconnect().unwrap();
    }

    #[tokio::test]
    async fn test_restore_imports_offline_edits_first() {
        let (store, work_id) = shared_store();
        let host = MemoryHost::new();
        let mut first = folder_sync(&store, &host, idle_config());
        first.connect().await.unwrap();
        first.close();
        assert!(store.lock().unwrap().get(HANDLE_KEY).unwrap().is_some());

        let edited = format!("{WORK_DOC}- [ ] Offline\n");
        host.insert_file("Work.md", &edited);

        let mut second = folder_sync(&store, &host, idle_config());
        let report = second.restore_from_persisted().await.unwrap();

        assert!(second.is_connected());
        assert_eq!(report.poll.import.created, 1);
        assert_eq!(report.export.written, 0);
        assert_eq!(host.file("Work.md").as_deref(), Some(edited.as_str()));
        assert_eq!(titles(&store, &work_id), vec!["Release", "Changelog", "Offline"]);
    }

    #[tokio::test]
    async fn test_restore_without_handle() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());

        let err = sync.restore_from_persisted().await.unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::NoPersistedHandle)));
        assert!(!sync.is_connected());
    }

    #[tokio::test]
    async fn test_restore_permission_flow() {
        let (store, _) = shared_store();
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());
        sync.connect().await.unwrap();
        sync.close();

        host.set_permission(PermissionState::Denied);
        let err = sync.restore_from_persisted().await.unwrap_err();
        assert!(matches!(err, Error::Sync(SyncError::PermissionDenied(_))));
        assert!(!sync.is_connected());
        // Stale handle kept for a manual reconnect
        assert!(store.lock().unwrap().get(HANDLE_KEY).unwrap().is_some());

        host.set_permission(PermissionState::Prompt);
        host.set_grant_on_request(true);
        sync.restore_from_persisted().await.unwrap();
        assert!(sync.is_connected());
    }

    /// Pauses the next armed `read_file` until released.
    #[derive(Default)]
    struct ReadGate {
        armed: AtomicBool,
        reading: Notify,
        release: Notify,
    }

    struct GatedHandle {
        inner: Arc<dyn DirectoryHandle>,
        gate: Arc<ReadGate>,
    }

    #[async_trait]
    impl DirectoryHandle for GatedHandle {
        fn token(&self) -> String {
            self.inner.token()
        }

        fn name(&self) -> String {
            self.inner.name()
        }

        async fn query_permission(&self) -> PermissionState {
            self.inner.query_permission().await
        }

        async fn request_permission(&self) -> PermissionState {
            self.inner.request_permission().await
        }

        async fn read_file(&self, name: &str) -> HostResult<String> {
            let text = self.inner.read_file(name).await;
            if self.gate.armed.swap(false, Ordering::SeqCst) {
                self.gate.reading.notify_one();
                self.gate.release.notified().await;
            }
            text
        }

        async fn write_file(&self, name: &str, text: &str) -> HostResult<()> {
            self.inner.write_file(name, text).await
        }

        async fn list_entries(&self) -> HostResult<Vec<DirEntry>> {
            self.inner.list_entries().await
        }
    }

    struct GatedHost {
        inner: MemoryHost,
        gate: Arc<ReadGate>,
    }

    #[async_trait]
    impl DirectoryHost for GatedHost {
        fn is_supported(&self) -> bool {
            self.inner.is_supported()
        }

        async fn request_directory(&self) -> HostResult<Arc<dyn DirectoryHandle>> {
            let inner = self.inner.request_directory().await?;
            Ok(Arc::new(GatedHandle {
                inner,
                gate: Arc::clone(&self.gate),
            }))
        }

        async fn restore_handle(&self, token: &str) -> HostResult<Arc<dyn DirectoryHandle>> {
            let inner = self.inner.restore_handle(token).await?;
            Ok(Arc::new(GatedHandle {
                inner,
                gate: Arc::clone(&self.gate),
            }))
        }
    }

    #[tokio::test]
    async fn test_export_cannot_land_inside_a_poll() {
        let (store, work_id) = shared_store();
        let host = MemoryHost::new();
        let gate = Arc::new(ReadGate::default());
        let gated = GatedHost {
            inner: host.clone(),
            gate: Arc::clone(&gate),
        };
        let mut sync = FolderSync::new(Arc::clone(&store), Arc::new(gated), idle_config());
        sync.connect().await.unwrap();

        let edited = "# Work\n\n- [ ] Release\n  - [ ] Changelog\n- [ ] Ext\n";
        host.insert_file("Work.md", edited);
        store
            .lock()
            .unwrap()
            .create(&NewTask::in_category("Local", &work_id))
            .unwrap();

        gate.armed.store(true, Ordering::SeqCst);
        let (poll, export) = tokio::join!(sync.poll_now(), async {
            gate.reading.notified().await;
            let export = sync.export_now().await;
            gate.release.notify_one();
            export
        });

        assert!(export.unwrap().skipped);
        let poll = poll.unwrap();
        assert_eq!(poll.reconciled, 1);
        assert_eq!(titles(&store, &work_id), vec!["Release", "Changelog", "Ext"]);

        // The folder, the cache and the store agree afterwards
        let follow_up = sync.export_now().await.unwrap();
        assert_eq!(follow_up.written, 0);
        assert_eq!(follow_up.unchanged, 1);
        assert_eq!(host.file("Work.md").as_deref(), Some(edited));
        let state = sync.session_state().unwrap();
        assert!(state.cache.matches("Work.md", edited));

        let again = sync.poll_now().await.unwrap();
        assert_eq!(again.reconciled, 0);
        assert_eq!(titles(&store, &work_id), vec!["Release", "Changelog", "Ext"]);
    }

    #[tokio::test]
    async fn test_colliding_file_names_sync_separately() {
        let (store, _) = shared_store();
        let (first_id, second_id) = {
            let mut storage = store.lock().unwrap();
            let first = storage.add_category("Home/Garden", None).unwrap();
            let second = storage.add_category("Home_Garden", None).unwrap();
            storage.create(&NewTask::in_category("Prune roses", &first.id)).unwrap();
            storage.create(&NewTask::in_category("Fix fence", &second.id)).unwrap();
            (first.id, second.id)
        };
        let host = MemoryHost::new();
        let mut sync = folder_sync(&store, &host, idle_config());

        let exported = sync.connect().await.unwrap();
        assert_eq!(exported.written, 3);
        assert_eq!(
            host.file("Home_Garden.md").as_deref(),
            Some("# Home/Garden\n\n- [ ] Prune roses\n")
        );
        assert_eq!(
            host.file("Home_Garden (2).md").as_deref(),
            Some("# Home_Garden\n\n- [ ] Fix fence\n")
        );

        host.insert_file("Home_Garden (2).md", "# Home_Garden\n\n- [x] Fix fence\n");
        let stats = sync.poll_now().await.unwrap();

        assert_eq!(stats.reconciled, 1);
        assert_eq!(stats.discovered, 0);
        assert_eq!(stats.import.updated, 1);
        assert_eq!(stats.import.created, 0);
        assert_eq!(stats.import.deleted, 0);
        assert_eq!(titles(&store, &first_id), vec!["Prune roses"]);
        let fence = TaskStore::list(&*store.lock().unwrap(), &second_id).unwrap();
        assert_eq!(fence[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_store_change_is_written_back_after_debounce() {
        let (store, work_id) = shared_store();
        let host = MemoryHost::new();
        let config = SyncConfig {
            debounce: Duration::from_millis(20),
            ..idle_config()
        };
        let mut sync = folder_sync(&store, &host, config);
        sync.connect().await.unwrap();

        store
            .lock()
            .unwrap()
            .create_task(&NewTask::in_category("Ship", &work_id), "cli")
            .unwrap();

        let expected = format!("{WORK_DOC}- [ ] Ship\n");
        let written = wait_for(|| host.file("Work.md").as_deref() == Some(expected.as_str())).await;
        assert!(written);
    }

    #[tokio::test]
    async fn test_poll_loop_picks_up_edits() {
        let (store, work_id) = shared_store();
        let host = MemoryHost::new();
        let config = SyncConfig {
            poll_interval: Duration::from_millis(20),
            ..idle_config()
        };
        let mut sync = folder_sync(&store, &host, config);
        sync.connect().await.unwrap();

        host.insert_file("Work.md", &format!("{WORK_DOC}- [ ] From editor\n"));

        let imported = wait_for(|| titles(&store, &work_id).len() == 3).await;
        assert!(imported);
        sync.close();
    }
}
