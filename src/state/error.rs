//! Error types for the local state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during state store operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open state store at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a schema migration.
    #[error("State store migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("State store query failed: {0}")]
    Query(String),

    /// A stored value could not be encoded or decoded.
    #[error("Corrupt value for key {key}: {source}")]
    Codec {
        key: String,
        source: serde_json::Error,
    },

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("State store schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },
}

impl StateError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    pub(crate) fn codec(key: &str, source: serde_json::Error) -> Self {
        Self::Codec {
            key: key.to_string(),
            source,
        }
    }
}
