//! Markdown folder sync.
//!
//! Every category is mirrored to one checkbox document in a user-chosen
//! folder, and edits made to those documents flow back into the store:
//!
//! - **Codec**: canonical text encoding of a category's task tree
//! - **Reconcile**: parsed lines vs. stored tasks → create/update/delete
//! - **Import / Export**: apply changesets, write changed documents
//! - **Coordinator**: connect/restore lifecycle, debounced write-back, polling
//!
//! # Document Format
//!
//! ```text
//! # Work
//!
//! - [ ] Release
//!   - [x] Changelog
//! ```
//!
//! # Example
//!
//! ```ignore
//! use td::sync::{FolderSync, NativeHost};
//!
//! let mut sync = FolderSync::new(store, Arc::new(NativeHost::new(Some(dir))), config);
//! sync.connect().await?;       // export everything, start the loops
//! let stats = sync.poll_now().await?;
//! sync.disconnect()?;          // stop and forget the folder
//! ```

pub mod codec;
mod coordinator;
mod export;
mod file;
mod hash;
pub mod hierarchy;
pub mod host;
mod import;
pub mod reconcile;
mod status;
pub mod store;
mod types;

// Re-export main types and functions
pub use codec::{decode, encode, DiagnosticKind, Document, ParseDiagnostic, ParsedLine};
pub use coordinator::{FolderSync, SyncSession, CACHE_KEY, HANDLE_KEY};
pub use export::{assign_file_names, render_all, Exporter, RenderedDocument};
pub use file::{atomic_write, category_file_name, is_document_name};
pub use hash::{content_hash, has_changed, ContentCache};
pub use hierarchy::build_hierarchy;
pub use host::{
    DirEntry, DirectoryHandle, DirectoryHost, EntryKind, HostError, MemoryHost, NativeHost,
    PermissionState,
};
pub use import::Importer;
pub use reconcile::{reconcile, Changeset, TaskCreate, TaskUpdate};
pub use status::{get_sync_status, print_status, CategoryFile, SyncStatus};
pub use store::{CategoryStore, HandleStore, SharedStore, SyncStore, TaskStore, SYNC_ACTOR};
pub use types::{
    ExportStats, ImportStats, ParentResolution, PollStats, SyncError, SyncReport, SyncResult,
};
