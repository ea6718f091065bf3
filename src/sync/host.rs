//! Host directory capability.
//!
//! The coordinator never touches paths directly. It asks a [`DirectoryHost`]
//! for a directory, keeps the returned [`DirectoryHandle`], and persists the
//! handle's token so the same directory can be restored in a later session.
//!
//! Implementations:
//! - [`NativeHost`] - a real directory on disk via `tokio::fs`
//! - [`MemoryHost`] - an in-memory directory for tests

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;

use crate::sync::file::atomic_write;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Directory selection was cancelled")]
    Cancelled,

    #[error("Directory access is not supported on this host")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(String),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Access state of a previously obtained handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    /// Access must be requested again before use.
    Prompt,
    Denied,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File or directory name (not full path)
    pub name: String,
    pub kind: EntryKind,
}

/// A granted directory.
#[async_trait]
pub trait DirectoryHandle: Send + Sync {
    /// Durable form of this handle, accepted by [`DirectoryHost::restore_handle`].
    fn token(&self) -> String;

    /// Display name of the directory.
    fn name(&self) -> String;

    async fn query_permission(&self) -> PermissionState;

    /// Ask for read/write access again. Hosts that cannot prompt return the
    /// current state.
    async fn request_permission(&self) -> PermissionState;

    /// Read a file's text.
    async fn read_file(&self, name: &str) -> HostResult<String>;

    /// Replace a file's text, creating it if needed.
    async fn write_file(&self, name: &str, text: &str) -> HostResult<()>;

    async fn list_entries(&self) -> HostResult<Vec<DirEntry>>;
}

/// Source of directory handles.
#[async_trait]
pub trait DirectoryHost: Send + Sync {
    /// Whether directory access is available at all.
    fn is_supported(&self) -> bool;

    /// Let the user pick a directory.
    async fn request_directory(&self) -> HostResult<Arc<dyn DirectoryHandle>>;

    /// Turn a persisted token back into a handle.
    async fn restore_handle(&self, token: &str) -> HostResult<Arc<dyn DirectoryHandle>>;
}

// ── Native ────────────────────────────────────────────────────

/// Real filesystem host. The "picker" is a path supplied up front.
#[derive(Debug, Clone, Default)]
pub struct NativeHost {
    picked: Option<PathBuf>,
}

impl NativeHost {
    /// A host whose picker returns `picked`, or is cancelled when `None`.
    #[must_use]
    pub fn new(picked: Option<PathBuf>) -> Self {
        Self { picked }
    }

    async fn open(path: &Path) -> HostResult<Arc<dyn DirectoryHandle>> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|e| map_io_error(&path.display().to_string(), &e))?;
        if !metadata.is_dir() {
            return Err(HostError::NotFound(path.display().to_string()));
        }

        let root = fs::canonicalize(path)
            .await
            .map_err(|e| map_io_error(&path.display().to_string(), &e))?;
        Ok(Arc::new(NativeDirectory { root }))
    }
}

#[async_trait]
impl DirectoryHost for NativeHost {
    fn is_supported(&self) -> bool {
        true
    }

    async fn request_directory(&self) -> HostResult<Arc<dyn DirectoryHandle>> {
        match &self.picked {
            Some(path) => Self::open(path).await,
            None => Err(HostError::Cancelled),
        }
    }

    async fn restore_handle(&self, token: &str) -> HostResult<Arc<dyn DirectoryHandle>> {
        Self::open(Path::new(token)).await
    }
}

/// A directory on disk.
#[derive(Debug, Clone)]
pub struct NativeDirectory {
    root: PathBuf,
}

impl NativeDirectory {
    fn path_of(&self, name: &str) -> HostResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(HostError::NotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl DirectoryHandle for NativeDirectory {
    fn token(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    fn name(&self) -> String {
        self.root
            .file_name()
            .map_or_else(|| self.token(), |n| n.to_string_lossy().into_owned())
    }

    async fn query_permission(&self) -> PermissionState {
        match fs::metadata(&self.root).await {
            Ok(m) if m.is_dir() && !m.permissions().readonly() => PermissionState::Granted,
            _ => PermissionState::Denied,
        }
    }

    async fn request_permission(&self) -> PermissionState {
        self.query_permission().await
    }

    async fn read_file(&self, name: &str) -> HostResult<String> {
        let path = self.path_of(name)?;
        fs::read_to_string(&path)
            .await
            .map_err(|e| map_io_error(name, &e))
    }

    async fn write_file(&self, name: &str, text: &str) -> HostResult<()> {
        let path = self.path_of(name)?;
        let text = text.to_string();
        let owned_name = name.to_string();

        tokio::task::spawn_blocking(move || atomic_write(&path, &text))
            .await
            .map_err(|e| HostError::Io(e.to_string()))?
            .map_err(|e| map_io_error(&owned_name, &e))
    }

    async fn list_entries(&self) -> HostResult<Vec<DirEntry>> {
        let root = self.root.display().to_string();
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| map_io_error(&root, &e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| map_io_error(&root, &e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| map_io_error(&name, &e))?;

            entries.push(DirEntry {
                name,
                kind: if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

fn map_io_error(subject: &str, err: &std::io::Error) -> HostError {
    match err.kind() {
        std::io::ErrorKind::NotFound => HostError::NotFound(subject.to_string()),
        std::io::ErrorKind::PermissionDenied => HostError::PermissionDenied(subject.to_string()),
        _ => HostError::Io(format!("{subject}: {err}")),
    }
}

// ── In-memory ─────────────────────────────────────────────────

const MEMORY_TOKEN: &str = "memory:/";

#[derive(Debug)]
struct MemoryState {
    supported: bool,
    files: Mutex<BTreeMap<String, String>>,
    permission: Mutex<PermissionState>,
    grant_on_request: AtomicBool,
    cancel_picker: AtomicBool,
    failing: Mutex<HashSet<String>>,
    writes: AtomicUsize,
}

impl MemoryState {
    fn files(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_access(&self, name: &str) -> HostResult<()> {
        if self.permission() != PermissionState::Granted {
            return Err(HostError::PermissionDenied(name.to_string()));
        }
        let failing = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(name) {
            return Err(HostError::Io(format!("{name}: simulated failure")));
        }
        Ok(())
    }
}

/// In-memory host for tests. Clones share the same directory.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    state: Arc<MemoryState>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::with_support(true)
    }

    /// A host without directory access.
    #[must_use]
    pub fn unsupported() -> Self {
        Self::with_support(false)
    }

    fn with_support(supported: bool) -> Self {
        Self {
            state: Arc::new(MemoryState {
                supported,
                files: Mutex::new(BTreeMap::new()),
                permission: Mutex::new(PermissionState::Granted),
                grant_on_request: AtomicBool::new(true),
                cancel_picker: AtomicBool::new(false),
                failing: Mutex::new(HashSet::new()),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the next picker interactions fail as cancelled.
    pub fn set_cancel_picker(&self, cancel: bool) {
        self.state.cancel_picker.store(cancel, Ordering::SeqCst);
    }

    pub fn set_permission(&self, state: PermissionState) {
        *self
            .state
            .permission
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Whether a permission request upgrades `Prompt` to `Granted`.
    pub fn set_grant_on_request(&self, grant: bool) {
        self.state.grant_on_request.store(grant, Ordering::SeqCst);
    }

    /// Make reads and writes of `name` fail with an I/O error.
    pub fn fail_file(&self, name: &str) {
        self.state
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Put a file in place as if edited outside the app.
    pub fn insert_file(&self, name: &str, text: &str) {
        self.state.files().insert(name.to_string(), text.to_string());
    }

    pub fn remove_file(&self, name: &str) {
        self.state.files().remove(name);
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<String> {
        self.state.files().get(name).cloned()
    }

    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.state.files().keys().cloned().collect()
    }

    /// Number of successful writes through any handle.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    fn handle(&self) -> Arc<dyn DirectoryHandle> {
        Arc::new(MemoryDirectory {
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl DirectoryHost for MemoryHost {
    fn is_supported(&self) -> bool {
        self.state.supported
    }

    async fn request_directory(&self) -> HostResult<Arc<dyn DirectoryHandle>> {
        if !self.state.supported {
            return Err(HostError::Unsupported);
        }
        if self.state.cancel_picker.load(Ordering::SeqCst) {
            return Err(HostError::Cancelled);
        }
        // Picking a directory grants access to it
        self.set_permission(PermissionState::Granted);
        Ok(self.handle())
    }

    async fn restore_handle(&self, token: &str) -> HostResult<Arc<dyn DirectoryHandle>> {
        if !self.state.supported {
            return Err(HostError::Unsupported);
        }
        if token != MEMORY_TOKEN {
            return Err(HostError::NotFound(token.to_string()));
        }
        Ok(self.handle())
    }
}

struct MemoryDirectory {
    state: Arc<MemoryState>,
}

#[async_trait]
impl DirectoryHandle for MemoryDirectory {
    fn token(&self) -> String {
        MEMORY_TOKEN.to_string()
    }

    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn query_permission(&self) -> PermissionState {
        self.state.permission()
    }

    async fn request_permission(&self) -> PermissionState {
        let current = self.state.permission();
        if current == PermissionState::Prompt && self.state.grant_on_request.load(Ordering::SeqCst)
        {
            *self
                .state
                .permission
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = PermissionState::Granted;
            return PermissionState::Granted;
        }
        current
    }

    async fn read_file(&self, name: &str) -> HostResult<String> {
        self.state.check_access(name)?;
        self.state
            .files()
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::NotFound(name.to_string()))
    }

    async fn write_file(&self, name: &str, text: &str) -> HostResult<()> {
        self.state.check_access(name)?;
        self.state.files().insert(name.to_string(), text.to_string());
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_entries(&self) -> HostResult<Vec<DirEntry>> {
        if self.state.permission() != PermissionState::Granted {
            return Err(HostError::PermissionDenied(MEMORY_TOKEN.to_string()));
        }
        Ok(self
            .state
            .files()
            .keys()
            .map(|name| DirEntry {
                name: name.clone(),
                kind: EntryKind::File,
            })
            .collect())
    }
}
