use std::path::PathBuf;

use serde::Serialize;

/// Lifecycle of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Live state of one content download, published through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadTask {
    pub content_id: String,
    pub url: String,
    pub status: DownloadStatus,
    /// 0..=100
    pub progress: u8,
    pub retry_count: u32,
    pub error: Option<String>,
    pub local_path: Option<PathBuf>,
    pub size_bytes: u64,
    pub timed_out: bool,
}

impl DownloadTask {
    pub(crate) fn new(content_id: &str, url: &str) -> Self {
        Self {
            content_id: content_id.to_string(),
            url: url.to_string(),
            status: DownloadStatus::Pending,
            progress: 0,
            retry_count: 0,
            error: None,
            local_path: None,
            size_bytes: 0,
            timed_out: false,
        }
    }
}

/// Progress event broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadProgress {
    pub content_id: String,
    pub status: DownloadStatus,
    pub progress: u8,
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
}

/// Whole-percent progress, or `None` when the total is unknown.
pub(crate) fn percent(written: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|&t| t > 0)?;
    Some(((written.saturating_mul(100)) / total).min(100) as u8)
}
