//! # AppError
//!
//! Centralized error handling for the MyArchive workspace.
//! Every port trait and service returns this type so importers can tell a
//! hard failure apart from a retryable fetch problem.

use thiserror::Error;

/// The primary error type for all ma-core operations.
///
/// Duplicate content is not an error: ingest calls report it through the
/// `bool` half of their `(TrackedFile, bool)` result.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., TrackedFile, Tag)
    #[error("{0} not found: {1}")]
    NotFound(String, String),

    /// Source path is missing or unreadable, or an expected buffer was empty.
    #[error("unreadable source {source_name}: {reason}")]
    UnreadableSource { source_name: String, reason: String },

    /// Two different payloads claim the same content hash.
    #[error("hash collision on {hash}: stored {stored_size} bytes, incoming {incoming_size} bytes")]
    HashCollision {
        hash: String,
        stored_size: u64,
        incoming_size: u64,
    },

    /// A file for a hash with no catalog row already sits in the media root.
    /// Only the recovery pass may adopt it.
    #[error("orphaned file in media root: {0} (run the recovery pass)")]
    OrphanedFile(String),

    /// Downloading remote content failed (network, HTTP status, empty body).
    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// Rejected tag parenting that would introduce a cycle.
    #[error("circular tag dependency: '{child}' is already an ancestor of '{parent}'")]
    CircularTag { parent: String, child: String },

    /// Resource already exists (e.g., unique hash, URL or tag name)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Validation failure (e.g., malformed content hash)
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Infrastructure failure (e.g., database unavailable)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unreadable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::UnreadableSource {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn fetch_failed(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::FetchFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures that must abort the current run instead of being
    /// skipped per item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HashCollision { .. } | Self::OrphanedFile(_))
    }
}

/// A specialized Result type for MyArchive logic.
pub type Result<T> = std::result::Result<T, AppError>;
