use std::time::Duration;

use thiserror::Error;

/// Typed download errors enabling retry classification.
///
/// The `is_retryable()` method separates transient failures (server errors,
/// rate limits, short or corrupt transfers) from permanent ones (missing
/// media, disk failures) so the attempt loop can stop early.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Transfer error downloading {url} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_written: u64,
    },

    #[error("Downloaded file too small: {written} bytes (expected {expected:?})")]
    Integrity { written: u64, expected: Option<u64> },

    #[error("Checksum mismatch for {url}")]
    ChecksumMismatch { url: String },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Download did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Content item has no downloadable media")]
    NoMedia,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DownloadError {
    /// Whether this error is transient and worth another attempt.
    ///
    /// Short files and checksum mismatches are retried because they usually
    /// mean a truncated transfer, not bad data on the server.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Http { .. } => true,
            DownloadError::Integrity { .. } => true,
            DownloadError::ChecksumMismatch { .. } => true,
            DownloadError::Storage(_) => false,
            DownloadError::TimedOut(_) => false,
            DownloadError::NoMedia => false,
            DownloadError::Other(_) => false,
        }
    }
}
