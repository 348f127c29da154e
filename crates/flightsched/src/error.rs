//! Error types for flightsched.
//!
//! This module defines all error types used throughout the flightsched crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for flightsched operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Network Errors ===
    /// A network request to the schedules API failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description of what went wrong.
        message: String,
    },

    /// The schedules API answered with HTTP 429.
    #[error("rate limited by schedules API")]
    RateLimited,

    /// The request did not complete within the configured timeout.
    #[error("request timed out after {}ms", elapsed.as_millis())]
    Timeout {
        /// The timeout that was exceeded.
        elapsed: Duration,
    },

    // === Record Errors ===
    /// A raw API record could not be normalized.
    #[error("malformed record: {reason}")]
    MalformedRecord {
        /// Why the record was rejected.
        reason: String,
    },

    // === Storage Errors ===
    /// The live `flights` table does not have the expected shape.
    #[error("schema mismatch on table 'flights': {details}")]
    SchemaMismatch {
        /// Columns the code requires but the table lacks.
        missing: Vec<String>,
        /// Human-readable summary of the drift.
        details: String,
    },

    /// The database file does not exist.
    #[error("database not found at {path}")]
    DatabaseMissing {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run a database migration.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// The query presets file could not be parsed.
    #[error("invalid presets file {path}: {message}")]
    Presets {
        /// Path to the presets file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A user-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for flightsched operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            Self::RateLimited
        } else {
            Self::Transport {
                message: err.to_string(),
            }
        }
    }
}

impl Error {
    /// Create a new transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new malformed record error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            reason: reason.into(),
        }
    }

    /// Create a schema mismatch error listing the missing columns.
    #[must_use]
    pub fn schema_mismatch(missing: Vec<String>, details: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            missing,
            details: details.into(),
        }
    }

    /// Create a new invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Check if this error is a transient network failure worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::RateLimited | Self::Timeout { .. }
        )
    }

    /// Check if this error is a schema mismatch.
    #[must_use]
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. })
    }
}
