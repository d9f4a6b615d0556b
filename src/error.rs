//! Error types for media-dl
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - top-level error returned by every fallible operation
//! - [`BackendError`] - failures reported by the extraction backend, classified
//!   so the retry policy can tell transient problems from ones that need the
//!   user to act (refresh credentials, fix the link)
//! - [`UserFacing`] - coarse classification for presentation layers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Unparsable URL or identifier
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Valid identifier, but the backend has no such item or collection
    #[error("not found: {0}")]
    NotFound(String),

    /// Extraction backend failure
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Encoding does not belong to the media item it was chosen for
    #[error("encoding {token} is not available for {media_id}")]
    InvalidEncoding {
        /// The media item the task was built for
        media_id: String,
        /// The rejected format token
        token: String,
    },

    /// No encoding of a media item matched the requested preference
    #[error("no matching encoding for {media_id}")]
    NoMatchingEncoding {
        /// The media item that had no acceptable encoding
        media_id: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// ZIP writer failure
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Operation abandoned because the batch was cancelled
    #[error("cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Failures reported by an extraction backend.
///
/// The variants form the taxonomy the orchestrator's retry policy consumes:
/// only [`BackendError::Transient`] and [`BackendError::RateLimited`] are ever
/// retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum BackendError {
    /// Bot-check challenge, missing or expired credentials
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The backend (or the site behind it) is throttling requests
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The backend reports that the target does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network blip, timeout, interrupted transfer
    #[error("transient failure: {0}")]
    Transient(String),

    /// Anything the backend reports that fits none of the above
    #[error("{0}")]
    Other(String),
}

/// Coarse error classification for presentation layers.
///
/// A UI needs to tell "malformed request" from "nothing found" from "found
/// but could not retrieve"; credential problems get their own bucket because
/// the fix is a user action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFacing {
    /// The link or identifier could not be understood
    Malformed,
    /// The link was fine but there is nothing behind it
    NothingFound,
    /// The item exists but could not be retrieved
    CouldNotRetrieve,
    /// Credentials or a bot-check must be refreshed before retrying
    NeedsCredentials,
}

impl Error {
    /// Classify this error for display
    pub fn user_facing(&self) -> UserFacing {
        match self {
            Error::InvalidInput(_) | Error::Config { .. } => UserFacing::Malformed,
            Error::NotFound(_) | Error::Backend(BackendError::NotFound(_)) => {
                UserFacing::NothingFound
            }
            Error::Backend(BackendError::AuthRequired(_)) => UserFacing::NeedsCredentials,
            _ => UserFacing::CouldNotRetrieve,
        }
    }

    /// Short machine-readable code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
            Error::Backend(e) => e.code(),
            Error::InvalidEncoding { .. } => "invalid_encoding",
            Error::NoMatchingEncoding { .. } => "no_matching_encoding",
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Archive(_) => "archive_error",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }

    /// Build a configuration error for a specific key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

impl BackendError {
    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::AuthRequired(_) => "auth_required",
            BackendError::RateLimited(_) => "rate_limited",
            BackendError::NotFound(_) => "not_found",
            BackendError::Transient(_) => "transient",
            BackendError::Other(_) => "backend_error",
        }
    }
}

/// A file that could not be included in an archive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSkip {
    /// The path that was requested
    pub path: PathBuf,
    /// Why it was left out
    pub reason: String,
}
