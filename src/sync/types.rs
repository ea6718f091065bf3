//! Shared sync types: errors, statistics and the parent resolution policy.

use serde::Serialize;

use crate::sync::host::HostError;

/// How a created line's parent is resolved when the parent line is itself new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentResolution {
    /// Creates are applied top to bottom and a child is attached to the
    /// nearest preceding line one level up, whether it was matched or just
    /// created.
    #[default]
    PreOrder,
    /// Non-root creates stay unparented.
    Flat,
}

impl ParentResolution {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreOrder => "preorder",
            Self::Flat => "flat",
        }
    }
}

impl std::fmt::Display for ParentResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParentResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preorder" | "pre-order" | "pre_order" => Ok(Self::PreOrder),
            "flat" => Ok(Self::Flat),
            other => Err(format!(
                "Unknown parent resolution: {other} (expected preorder or flat)"
            )),
        }
    }
}

/// Statistics for one write-back pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    /// Files written because their text changed.
    pub written: usize,
    /// Files skipped because the text matches what was last written.
    pub unchanged: usize,
    /// Files that failed to write.
    pub failed: usize,
    /// The pass was skipped because another export or poll was in flight.
    pub skipped: bool,
}

impl ExportStats {
    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }
}

/// Statistics for applying changes to the record store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Individual store operations that failed and were skipped.
    pub failed: usize,
}

impl ImportStats {
    /// Total number of successful store operations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Fold another category's results into this one.
    pub fn absorb(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

/// Statistics for one poll tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Category files whose text changed and were reconciled.
    pub reconciled: usize,
    /// Category files identical to the cached text.
    pub unchanged: usize,
    /// Unknown documents imported as categories.
    pub discovered: usize,
    /// Files that could not be read.
    pub failed: usize,
    /// Lines skipped by the decoder across all files.
    pub diagnostics: usize,
    /// Store changes applied.
    pub import: ImportStats,
    /// The tick was skipped because another export or poll was in flight.
    pub skipped: bool,
}

/// Outcome of restoring a session: the catch-up poll, then the export.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub poll: PollStats,
    pub export: ExportStats,
}

/// Sync-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory capability failure.
    #[error("{0}")]
    Host(HostError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    #[error("No folder is connected")]
    NotConnected,

    #[error("A folder is already connected")]
    AlreadyConnected,

    #[error("Directory access is not supported on this host")]
    Unsupported,

    #[error("Permission denied for folder: {0}")]
    PermissionDenied(String),

    #[error("Folder selection was cancelled")]
    Cancelled,

    #[error("No previously connected folder to restore")]
    NoPersistedHandle,

    /// A thread panicked while holding the record store.
    #[error("Record store is unavailable")]
    StorePoisoned,
}

impl From<HostError> for SyncError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::PermissionDenied(path) => Self::PermissionDenied(path),
            HostError::Cancelled => Self::Cancelled,
            HostError::Unsupported => Self::Unsupported,
            other => Self::Host(other),
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_resolution_parse() {
        assert_eq!("preorder".parse::<ParentResolution>(), Ok(ParentResolution::PreOrder));
        assert_eq!(" FLAT ".parse::<ParentResolution>(), Ok(ParentResolution::Flat));
        assert!("tree".parse::<ParentResolution>().is_err());
        assert_eq!(ParentResolution::default(), ParentResolution::PreOrder);
    }

    #[test]
    fn test_import_stats_absorb() {
        let mut total = ImportStats::default();
        total.absorb(ImportStats {
            created: 2,
            updated: 1,
            deleted: 0,
            failed: 1,
        });
        total.absorb(ImportStats {
            created: 1,
            updated: 0,
            deleted: 3,
            failed: 0,
        });
        assert_eq!(total.total(), 7);
        assert_eq!(total.failed, 1);
    }

    #[test]
    fn test_host_errors_map_to_capability_errors() {
        assert!(matches!(
            SyncError::from(HostError::Cancelled),
            SyncError::Cancelled
        ));
        assert!(matches!(
            SyncError::from(HostError::PermissionDenied("/x".into())),
            SyncError::PermissionDenied(p) if p == "/x"
        ));
        assert!(matches!(
            SyncError::from(HostError::Io("disk full".into())),
            SyncError::Host(HostError::Io(_))
        ));
    }
}
