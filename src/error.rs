//! Error types and client-visible error codes for cindex

use std::path::PathBuf;

use thiserror::Error;

use crate::parser::Diagnostics;

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Failed to parse {}: {diagnostics}", path.display())]
    ParseFailure {
        path: PathBuf,
        diagnostics: Diagnostics,
    },

    #[error("Saved unit for {} is older than its source", path.display())]
    StaleCache { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },

    #[error("Concurrent modification of {}", path.display())]
    ConcurrentModification { path: PathBuf },

    #[error("File registry invariant violated: {message}")]
    RegistryInvariant { message: String },

    #[error("Job failed: {message}")]
    JobFailed { message: String },
}

impl IndexError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    /// Stable error code reported to clients:
    /// - not_found: path, id or unit absent
    /// - parse_failure / stale_cache: per-file, recoverable
    /// - io_failure: persistence read/write failed
    /// - malformed_input / unknown_command: rejected client command
    /// - concurrent_modification: reparse raced with removal
    /// - registry_invariant: lock-discipline bug, command aborted
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ParseFailure { .. } => "parse_failure",
            Self::StaleCache { .. } => "stale_cache",
            Self::Io(_) | Self::Storage(_) | Self::Serialization { .. } => "io_failure",
            Self::MalformedInput { .. } => "malformed_input",
            Self::UnknownCommand { .. } => "unknown_command",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::RegistryInvariant { .. } => "registry_invariant",
            Self::JobFailed { .. } => "job_failed",
        }
    }

    /// Per-file failures mark the file as not indexed but leave the daemon healthy
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::ParseFailure { .. } | Self::StaleCache { .. })
    }
}

impl From<bincode::Error> for IndexError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;
