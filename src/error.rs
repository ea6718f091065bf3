//! Error types for the taskdoc CLI.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Retryability flags
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::SyncError;

/// Result type alias for taskdoc operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Not Found (exit 3)
    TaskNotFound,
    CategoryNotFound,

    // Validation (exit 4)
    InvalidStatus,
    InvalidArgument,
    RequiredField,
    DuplicateName,

    // Hierarchy (exit 5)
    CycleDetected,

    // Sync (exit 6)
    SyncError,
    NotConnected,
    PermissionDenied,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::TaskNotFound => "TASK_NOT_FOUND",
            Self::CategoryNotFound => "CATEGORY_NOT_FOUND",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RequiredField => "REQUIRED_FIELD",
            Self::DuplicateName => "DUPLICATE_NAME",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::SyncError => "SYNC_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
        }
    }

    /// Category-based exit code (2-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::TaskNotFound | Self::CategoryNotFound => 3,
            Self::InvalidStatus
            | Self::InvalidArgument
            | Self::RequiredField
            | Self::DuplicateName => 4,
            Self::CycleDetected => 5,
            Self::SyncError | Self::NotConnected | Self::PermissionDenied => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether a caller should retry with corrected input.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatus
                | Self::InvalidArgument
                | Self::RequiredField
                | Self::DuplicateName
                | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in taskdoc operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `td init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Category not found: {name}")]
    CategoryNotFound { name: String },

    #[error("Category already exists: {name}")]
    CategoryExists { name: String },

    #[error("Invalid status: {value}")]
    InvalidStatus {
        value: String,
        suggestion: Option<String>,
    },

    #[error("Setting parent of {task_id} to {parent_id} would create a cycle")]
    CycleDetected { task_id: String, parent_id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Missing required field: {0}")]
    RequiredField(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::TaskNotFound { .. } => ErrorCode::TaskNotFound,
            Self::CategoryNotFound { .. } => ErrorCode::CategoryNotFound,
            Self::CategoryExists { .. } => ErrorCode::DuplicateName,
            Self::InvalidStatus { .. } => ErrorCode::InvalidStatus,
            Self::CycleDetected { .. } => ErrorCode::CycleDetected,
            Self::Sync(SyncError::NotConnected | SyncError::NoPersistedHandle) => {
                ErrorCode::NotConnected
            }
            Self::Sync(SyncError::PermissionDenied(_)) => ErrorCode::PermissionDenied,
            Self::Sync(_) => ErrorCode::SyncError,
            Self::RequiredField(_) => ErrorCode::RequiredField,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `td init` to initialize the database".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::TaskNotFound { id } => Some(format!(
                "No task with ID '{id}'. Use `td task list` to see available tasks."
            )),

            Self::CategoryNotFound { name } => Some(format!(
                "No category named '{name}'. Create it with `td category add \"{name}\"`."
            )),

            Self::CategoryExists { .. } => {
                Some("Category names are unique ignoring case.".to_string())
            }

            Self::InvalidStatus { suggestion, .. } => Some(match suggestion {
                Some(s) => format!("Did you mean: {s}? Valid statuses: open, completed"),
                None => "Valid statuses: open, completed. Synonyms: done→completed, todo→open"
                    .to_string(),
            }),

            Self::CycleDetected { .. } => Some(
                "A task cannot be moved under itself or one of its subtasks.".to_string(),
            ),

            Self::Sync(SyncError::NotConnected | SyncError::NoPersistedHandle) => Some(
                "No folder connected. Run `td sync connect <dir>` first.".to_string(),
            ),

            Self::Sync(SyncError::PermissionDenied(_)) => Some(
                "The sync folder is no longer readable/writable. Reconnect with `td sync connect <dir>`."
                    .to_string(),
            ),

            Self::Sync(SyncError::Cancelled) => {
                Some("Pass the folder to mirror: `td sync connect <dir>`.".to_string())
            }

            Self::RequiredField(field) => Some(format!("Provide a non-empty {field}.")),

            Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Sync(_)
            | Self::InvalidArgument(_)
            | Self::Config(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
