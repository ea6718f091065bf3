//! Content hashing and the last-written cache.
//!
//! The cache remembers, per document, the SHA-256 of the text last written
//! or last reconciled. A file whose current text hashes to the cached value
//! has not been edited outside the app.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};

use crate::sync::file::file_key;

/// Compute a SHA256 hash of document text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check if text has changed since it was last cached.
///
/// Returns `true` if there is no stored hash or the hashes differ.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.is_none_or(|h| h != current_hash)
}

/// Per-file hashes of the last text written or reconciled.
///
/// Once closed, the cache is empty and ignores further records, so work
/// still in flight when a session ends cannot repopulate it.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: Mutex<BTreeMap<String, String>>,
    closed: AtomicBool,
    dirty: AtomicBool,
}

impl ContentCache {
    /// A cache seeded from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: BTreeMap<String, String>) -> Self {
        Self {
            entries: Mutex::new(snapshot),
            ..Self::default()
        }
    }

    /// Whether `text` is exactly what was last cached for `file_name`.
    #[must_use]
    pub fn matches(&self, file_name: &str, text: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        !has_changed(
            &content_hash(text),
            entries.get(&file_key(file_name)).map(String::as_str),
        )
    }

    #[must_use]
    pub fn contains(&self, file_name: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&file_key(file_name))
    }

    /// Remember `text` as the current content of `file_name`.
    pub fn record(&self, file_name: &str, text: &str) {
        if self.closed.load(Ordering::Acquire) {
            tracing::trace!(file = file_name, "Cache closed, discarding record");
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let hash = content_hash(text);
        if entries.insert(file_key(file_name), hash.clone()).as_ref() != Some(&hash) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Clear all entries and ignore later records.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot for persistence, if anything changed since the last one.
    #[must_use]
    pub fn take_dirty_snapshot(&self) -> Option<BTreeMap<String, String>> {
        if self.closed.load(Ordering::Acquire) || !self.dirty.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        )
    }
}
