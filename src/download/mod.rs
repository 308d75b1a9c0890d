//! Bounded-concurrency media download engine.
//!
//! Every content item maps to one deterministic cache file. `enqueue` returns
//! immediately with a [`DownloadHandle`]: already-cached items resolve without
//! touching the network, items already in flight share the running task, and
//! everything else spawns a task that waits for one of `concurrency` slots.
//! Task state is published on a per-task `watch` channel; progress events go
//! out on a `broadcast` channel.

pub mod error;
pub mod file;
pub mod paths;
pub mod task;

use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use futures_util::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use tokio::sync::{broadcast, watch, Semaphore};

use crate::catalog::ContentItem;
use crate::retry::{self, RetryAction, RetryPolicy};

pub use self::error::DownloadError;
pub use self::file::Verification;
pub use self::task::{DownloadProgress, DownloadStatus, DownloadTask};

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub cache_dir: PathBuf,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Hard ceiling for a whole task and for anyone waiting on it.
    pub wait_ceiling: Duration,
    pub verification: Verification,
}

impl DownloadConfig {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            concurrency: 3,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            wait_ceiling: Duration::from_secs(300),
            verification: Verification::default(),
        }
    }
}

/// Final result of a download request.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    /// A verified copy was already on disk.
    Cached { path: PathBuf, size_bytes: u64 },
    Downloaded { path: PathBuf, size_bytes: u64 },
    Failed(String),
    /// The task or the wait exceeded the ceiling.
    TimedOut,
}

impl DownloadOutcome {
    /// Local file backing this outcome, if the content is playable.
    pub fn local_file(&self) -> Option<(&Path, u64)> {
        match self {
            Self::Cached { path, size_bytes } | Self::Downloaded { path, size_bytes } => {
                Some((path.as_path(), *size_bytes))
            }
            Self::Failed(_) | Self::TimedOut => None,
        }
    }

    fn from_task(task: &DownloadTask) -> Self {
        match (&task.status, &task.local_path) {
            (DownloadStatus::Completed, Some(path)) => Self::Downloaded {
                path: path.clone(),
                size_bytes: task.size_bytes,
            },
            _ if task.timed_out => Self::TimedOut,
            _ => Self::Failed(
                task.error
                    .clone()
                    .unwrap_or_else(|| "download failed".to_string()),
            ),
        }
    }
}

enum HandleState {
    Ready(DownloadOutcome),
    Waiting {
        rx: watch::Receiver<DownloadTask>,
        ceiling: Duration,
    },
}

/// Handle to a queued, running or already-satisfied download.
pub struct DownloadHandle {
    content_id: String,
    state: HandleState,
}

impl DownloadHandle {
    fn ready(content_id: &str, outcome: DownloadOutcome) -> Self {
        Self {
            content_id: content_id.to_string(),
            state: HandleState::Ready(outcome),
        }
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// Wait for the task to settle.
    ///
    /// Time spent queued for a download slot is not counted; the wait ceiling
    /// starts once the transfer does.
    pub async fn wait(self) -> DownloadOutcome {
        let (mut rx, ceiling) = match self.state {
            HandleState::Ready(outcome) => return outcome,
            HandleState::Waiting { rx, ceiling } => (rx, ceiling),
        };
        if rx
            .wait_for(|t| t.status != DownloadStatus::Pending)
            .await
            .is_err()
        {
            return DownloadOutcome::Failed("download task ended unexpectedly".into());
        }
        let settled = tokio::time::timeout(ceiling, async {
            rx.wait_for(|t| t.status.is_terminal())
                .await
                .map(|task| DownloadOutcome::from_task(&task))
        })
        .await;
        match settled {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => DownloadOutcome::Failed("download task ended unexpectedly".into()),
            Err(_) => {
                tracing::warn!(content_id = %self.content_id, "Gave up waiting for download");
                DownloadOutcome::TimedOut
            }
        }
    }
}

struct Inner {
    config: DownloadConfig,
    client: Client,
    slots: Semaphore,
    tasks: Mutex<HashMap<String, watch::Receiver<DownloadTask>>>,
    progress: broadcast::Sender<DownloadProgress>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts a task as downloading for as long as it holds a slot.
struct ActiveGuard<'a> {
    inner: &'a Inner,
}

impl<'a> ActiveGuard<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak.fetch_max(now, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Shared handle to the download engine. Clones are cheap.
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("cache_dir", &self.inner.config.cache_dir)
            .field("concurrency", &self.inner.config.concurrency)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Create the cache directory if needed and build the HTTP client.
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        std::fs::create_dir_all(&config.cache_dir)?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(concat!("signage-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DownloadError::Other(e.into()))?;
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let concurrency = config.concurrency.max(1);
        Ok(Self {
            inner: Arc::new(Inner {
                slots: Semaphore::new(concurrency),
                config,
                client,
                tasks: Mutex::new(HashMap::new()),
                progress,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.config.cache_dir
    }

    /// Subscribe to progress events for all tasks.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadProgress> {
        self.inner.progress.subscribe()
    }

    /// Tasks currently holding a download slot.
    pub fn active_downloads(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously downloading tasks seen.
    pub fn peak_active_downloads(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Tasks not yet settled, pending or downloading.
    pub fn in_flight(&self) -> usize {
        self.lock_tasks().len()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Receiver<DownloadTask>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deterministic cache path for `item`, or `None` without media.
    pub fn cache_path_for(&self, item: &ContentItem) -> Option<PathBuf> {
        let url = item.media_url()?;
        let ext = paths::infer_extension(url, item.content_type);
        Some(paths::cache_path(&self.inner.config.cache_dir, &item.id, &ext))
    }

    /// Size of `path` when it holds a plausible complete copy.
    pub fn verified_size(&self, path: &Path, expected: Option<u64>) -> Option<u64> {
        self.inner.config.verification.verified_size(path, expected)
    }

    /// Request a local copy of `item`.
    ///
    /// Never issues a request when a verified copy exists. At most one task
    /// runs per content id; later callers join it.
    pub fn enqueue(&self, item: &ContentItem) -> DownloadHandle {
        let (Some(url), Some(path)) = (item.media_url(), self.cache_path_for(item)) else {
            return DownloadHandle::ready(
                &item.id,
                DownloadOutcome::Failed(DownloadError::NoMedia.to_string()),
            );
        };
        let ceiling = self.inner.config.wait_ceiling;

        let mut tasks = self.lock_tasks();
        if let Some(rx) = tasks.get(&item.id) {
            tracing::debug!(content_id = %item.id, "Joining in-flight download");
            return DownloadHandle {
                content_id: item.id.clone(),
                state: HandleState::Waiting {
                    rx: rx.clone(),
                    ceiling,
                },
            };
        }

        if let Some(size_bytes) = self.verified_size(&path, item.declared_size()) {
            return DownloadHandle::ready(&item.id, DownloadOutcome::Cached { path, size_bytes });
        }

        let (tx, rx) = watch::channel(DownloadTask::new(&item.id, url));
        tasks.insert(item.id.clone(), rx.clone());
        drop(tasks);

        let engine = self.clone();
        let owned = item.clone();
        tokio::spawn(async move {
            engine.run_task(&owned, path, tx).await;
        });

        DownloadHandle {
            content_id: item.id.clone(),
            state: HandleState::Waiting { rx, ceiling },
        }
    }

    /// Enqueue every downloadable item and wait for all of them.
    ///
    /// Items without media are skipped. One failure never affects the others.
    pub async fn await_all(&self, items: &[ContentItem]) -> Vec<(String, DownloadOutcome)> {
        let handles: Vec<DownloadHandle> = items
            .iter()
            .filter(|item| item.media_url().is_some())
            .map(|item| self.enqueue(item))
            .collect();
        join_all(handles.into_iter().map(|handle| async move {
            let id = handle.content_id().to_string();
            (id, handle.wait().await)
        }))
        .await
    }

    async fn run_task(&self, item: &ContentItem, path: PathBuf, tx: watch::Sender<DownloadTask>) {
        let ceiling = self.inner.config.wait_ceiling;
        let result = match self.inner.slots.acquire().await {
            Ok(_permit) => {
                let _active = ActiveGuard::enter(&self.inner);
                tokio::time::timeout(ceiling, self.download_with_retries(item, &path, &tx))
                    .await
                    .unwrap_or_else(|_| Err(DownloadError::TimedOut(ceiling)))
            }
            Err(e) => Err(DownloadError::Other(e.into())),
        };

        let mut task = tx.borrow().clone();
        match result {
            Ok(size_bytes) => {
                self.remove_siblings(&item.id, &path).await;
                tracing::info!(content_id = %item.id, size_bytes, path = %path.display(), "Downloaded");
                task.status = DownloadStatus::Completed;
                task.progress = 100;
                task.local_path = Some(path);
                task.size_bytes = size_bytes;
                task.error = None;
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(paths::part_path(&path)).await;
                tracing::error!(content_id = %item.id, error = %e, "Download failed");
                task.status = DownloadStatus::Failed;
                task.timed_out = matches!(e, DownloadError::TimedOut(_));
                task.error = Some(e.to_string());
            }
        }
        // Publish before waking waiters so subscribers see the final event first.
        self.publish(&task, task.size_bytes, None);
        tx.send_replace(task);
        self.lock_tasks().remove(&item.id);
    }

    /// Bounded attempt loop. The caller holds a download slot.
    async fn download_with_retries(
        &self,
        item: &ContentItem,
        path: &Path,
        tx: &watch::Sender<DownloadTask>,
    ) -> Result<u64, DownloadError> {
        let url = item.media_url().ok_or(DownloadError::NoMedia)?;

        tx.send_modify(|t| t.status = DownloadStatus::Downloading);
        self.publish(&tx.borrow(), 0, item.declared_size());
        tracing::debug!(content_id = %item.id, url, path = %path.display(), "Downloading");

        let expectation = file::Expectation {
            size: item.declared_size(),
            checksum: expected_checksum(item),
        };
        let verify = self.inner.config.verification;

        retry::retry_with_policy(
            &self.inner.config.retry,
            |e: &DownloadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            |failures, e| {
                tracing::warn!(content_id = %item.id, attempt = failures, error = %e, "Download attempt failed");
                tx.send_modify(|t| {
                    t.retry_count = failures;
                    t.progress = 0;
                    t.error = Some(e.to_string());
                });
            },
            |_attempt| {
                let mut last_percent = None;
                file::attempt_download(
                    &self.inner.client,
                    url,
                    path,
                    expectation,
                    &verify,
                    move |written, total| {
                        let Some(pct) = task::percent(written, total) else {
                            return;
                        };
                        if last_percent == Some(pct) {
                            return;
                        }
                        last_percent = Some(pct);
                        tx.send_modify(|t| t.progress = pct);
                        self.publish(&tx.borrow(), written, total);
                    },
                )
            },
        )
        .await
    }

    fn publish(&self, task: &DownloadTask, bytes_written: u64, total_bytes: Option<u64>) {
        // No subscribers is fine.
        let _ = self.inner.progress.send(DownloadProgress {
            content_id: task.content_id.clone(),
            status: task.status,
            progress: task.progress,
            bytes_written,
            total_bytes,
        });
    }

    /// Remove `content_<id>.*` files other than `keep`, left behind when the
    /// URL extension changed.
    async fn remove_siblings(&self, content_id: &str, keep: &Path) {
        let prefix = paths::file_stem_prefix(content_id);
        for entry in self.list_cache_files().await {
            if entry.name.starts_with(&prefix)
                && !paths::is_part_file(&entry.name)
                && entry.path != keep
            {
                if let Err(e) = tokio::fs::remove_file(&entry.path).await {
                    tracing::warn!(path = %entry.path.display(), error = %e, "Failed to remove stale cache file");
                }
            }
        }
    }

    /// Delete every cache file for `content_id` unless a download for it is
    /// in flight. Used when its URL changed so the old copy isn't reused.
    pub async fn discard(&self, content_id: &str) -> usize {
        if self.lock_tasks().contains_key(content_id) {
            return 0;
        }
        let prefix = paths::file_stem_prefix(content_id);
        let mut removed = 0;
        for entry in self.list_cache_files().await {
            if entry.name.starts_with(&prefix) && tokio::fs::remove_file(&entry.path).await.is_ok()
            {
                removed += 1;
            }
        }
        removed
    }

    /// Total bytes of complete cache files.
    pub async fn cache_size_bytes(&self) -> u64 {
        cache_size_in(&self.inner.config.cache_dir).await
    }

    /// Delete every complete cache file. Partial files of in-flight tasks are
    /// left alone. Returns the number of files removed.
    pub async fn clear_cache(&self) -> Result<usize, DownloadError> {
        let busy = self.in_flight_prefixes();
        let mut removed = 0;
        for entry in self.list_cache_files().await {
            if busy.iter().any(|p| entry.name.starts_with(p.as_str())) {
                continue;
            }
            tokio::fs::remove_file(&entry.path).await?;
            removed += 1;
        }
        tracing::info!(removed, "Cleared content cache");
        Ok(removed)
    }

    /// Delete cache files not modified within `retention`, referenced or not.
    /// Returns the number of files removed.
    pub async fn evict_older_than(&self, retention: Duration) -> usize {
        let Some(cutoff) = SystemTime::now().checked_sub(retention) else {
            return 0;
        };
        let busy = self.in_flight_prefixes();
        let mut removed = 0;
        for entry in self.list_cache_files().await {
            if entry.modified >= cutoff || busy.iter().any(|p| entry.name.starts_with(p.as_str())) {
                continue;
            }
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = %e, "Failed to evict cache file");
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, retention_secs = retention.as_secs(), "Evicted old cache files");
        }
        removed
    }

    fn in_flight_prefixes(&self) -> Vec<String> {
        self.lock_tasks()
            .keys()
            .map(|id| paths::file_stem_prefix(id))
            .collect()
    }

    async fn list_cache_files(&self) -> Vec<CacheEntry> {
        scan_cache_dir(&self.inner.config.cache_dir).await
    }
}

/// Total bytes of complete cache files in `cache_dir`.
///
/// Read-only: a missing directory counts as empty and is not created.
pub async fn cache_size_in(cache_dir: &Path) -> u64 {
    scan_cache_dir(cache_dir)
        .await
        .iter()
        .filter(|e| !paths::is_part_file(&e.name))
        .map(|e| e.size)
        .sum()
}

/// Decoded checksum for `item`. Blank checksums are ignored; unrecognised
/// encodings are logged and the download is verified by size only.
fn expected_checksum(item: &ContentItem) -> Option<file::Sha256Digest> {
    let raw = item.checksum.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
    let digest = file::parse_checksum(raw);
    if digest.is_none() {
        tracing::warn!(content_id = %item.id, checksum = raw, "Unrecognized checksum format, verifying by size only");
    }
    digest
}

async fn scan_cache_dir(cache_dir: &Path) -> Vec<CacheEntry> {
    let mut out = Vec::new();
    let mut dir = match tokio::fs::read_dir(cache_dir).await {
        Ok(dir) => dir,
        Err(e) => {
            tracing::debug!(error = %e, "Cache directory unreadable");
            return out;
        }
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !paths::is_cache_file(&name) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        out.push(CacheEntry {
            path: entry.path(),
            name,
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    out
}

struct CacheEntry {
    path: PathBuf,
    name: String,
    size: u64,
    modified: SystemTime,
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY, so piped output stays clean.
pub fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ContentType;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(dir: &Path) -> DownloadConfig {
        DownloadConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::ZERO,
            },
            ..DownloadConfig::new(dir.to_path_buf())
        }
    }

    fn video(id: &str, url: String, size: Option<u64>) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            content_type: ContentType::Video,
            remote_url: Some(url),
            expected_size_bytes: size,
            checksum: None,
            duration_seconds: 10,
            local_path: None,
        }
    }

    #[tokio::test]
    async fn test_cached_item_issues_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("content_v1.mp4"), vec![1u8; 4096]).unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();

        let item = video("v1", format!("{}/v1.mp4", server.uri()), Some(4096));
        let outcome = engine.enqueue(&item).wait().await;
        assert_eq!(
            outcome,
            DownloadOutcome::Cached {
                path: dir.path().join("content_v1.mp4"),
                size_bytes: 4096
            }
        );
    }

    #[tokio::test]
    async fn test_short_transfer_is_retried_then_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 850_000]))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/big.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 950_000]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let item = video("big", format!("{}/big.mp4", server.uri()), Some(1_000_000));

        let outcome = engine.enqueue(&item).wait().await;
        let dest = dir.path().join("content_big.mp4");
        assert_eq!(
            outcome,
            DownloadOutcome::Downloaded {
                path: dest.clone(),
                size_bytes: 950_000
            }
        );
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 950_000);
        assert!(!paths::part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_fails_after_exactly_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 500_000]))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let item = video("short", format!("{}/s.mp4", server.uri()), Some(1_000_000));

        let handle = engine.enqueue(&item);
        let mut rx = match &handle.state {
            HandleState::Waiting { rx, .. } => rx.clone(),
            HandleState::Ready(_) => panic!("expected a running task"),
        };
        let outcome = handle.wait().await;
        assert!(matches!(outcome, DownloadOutcome::Failed(_)));

        let task = rx.borrow_and_update().clone();
        assert_eq!(task.status, DownloadStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert!(!dir.path().join("content_short.mp4").exists());
        assert!(!dir.path().join("content_short.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let item = video("gone", format!("{}/gone.mp4", server.uri()), None);
        assert!(matches!(
            engine.enqueue(&item).wait().await,
            DownloadOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrency_bound_holds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 4096])
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(5)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let items: Vec<ContentItem> = (0..5)
            .map(|i| video(&format!("c{i}"), format!("{}/c{i}.mp4", server.uri()), None))
            .collect();

        let outcomes = engine.await_all(&items).await;
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes
            .iter()
            .all(|(_, o)| matches!(o, DownloadOutcome::Downloaded { .. })));
        assert!(engine.peak_active_downloads() <= 3);
        assert!(engine.peak_active_downloads() >= 1);
        assert_eq!(engine.active_downloads(), 0);
        assert_eq!(engine.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_shares_one_task() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 4096])
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let item = video("dup", format!("{}/d.mp4", server.uri()), None);

        let first = engine.enqueue(&item);
        let second = engine.enqueue(&item);
        assert_eq!(engine.in_flight(), 1);
        let (a, b) = tokio::join!(first.wait(), second.wait());
        assert!(matches!(a, DownloadOutcome::Downloaded { .. }));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_await_all_skips_items_without_media() {
        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let ticker = ContentItem {
            id: "t".into(),
            content_type: ContentType::Ticker,
            remote_url: None,
            expected_size_bytes: None,
            checksum: None,
            duration_seconds: 5,
            local_path: None,
        };
        assert!(engine.await_all(&[ticker]).await.is_empty());
    }

    #[tokio::test]
    async fn test_wait_ceiling_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 4096])
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(DownloadConfig {
            wait_ceiling: Duration::from_millis(200),
            ..config(dir.path())
        })
        .unwrap();
        let item = video("slow", format!("{}/slow.mp4", server.uri()), None);
        assert_eq!(engine.enqueue(&item).wait().await, DownloadOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_queue_time_does_not_count_against_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 4096])
                    .set_delay(Duration::from_millis(150)),
            )
            .expect(5)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(DownloadConfig {
            concurrency: 1,
            wait_ceiling: Duration::from_millis(400),
            ..config(dir.path())
        })
        .unwrap();
        let items: Vec<ContentItem> = (0..5)
            .map(|i| video(&format!("q{i}"), format!("{}/q{i}.mp4", server.uri()), None))
            .collect();

        // Five serial 150 ms transfers take longer than the ceiling in total,
        // but each one alone fits.
        let outcomes = engine.await_all(&items).await;
        for (id, outcome) in &outcomes {
            assert!(
                matches!(outcome, DownloadOutcome::Downloaded { .. }),
                "{id}: {outcome:?}"
            );
        }
        assert_eq!(outcomes.len(), 5);
        assert_eq!(engine.peak_active_downloads(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_checksum_falls_back_to_size_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let item = ContentItem {
            checksum: Some("md5:5d41402abc4b2a76b9719d911017c592".into()),
            ..video("m", format!("{}/m.mp4", server.uri()), Some(4096))
        };
        assert!(matches!(
            engine.enqueue(&item).wait().await,
            DownloadOutcome::Downloaded { size_bytes: 4096, .. }
        ));
    }

    #[test]
    fn test_expected_checksum_ignores_blank_and_unknown() {
        let mut item = video("x", "https://cdn/x.mp4".into(), None);
        assert_eq!(expected_checksum(&item), None);
        item.checksum = Some("   ".into());
        assert_eq!(expected_checksum(&item), None);
        item.checksum = Some("sha1:aaf4c61d".into());
        assert_eq!(expected_checksum(&item), None);
        item.checksum = Some("ab".repeat(32));
        assert_eq!(expected_checksum(&item), Some([0xab; 32]));
    }

    #[tokio::test]
    async fn test_cache_size_in_leaves_missing_dir_alone() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        assert_eq!(cache_size_in(&cache).await, 0);
        assert!(!cache.exists());

        std::fs::create_dir(&cache).unwrap();
        std::fs::write(cache.join("content_a.mp4"), vec![0u8; 2000]).unwrap();
        std::fs::write(cache.join("content_b.mp4.part"), vec![0u8; 500]).unwrap();
        assert_eq!(cache_size_in(&cache).await, 2000);
    }

    #[tokio::test]
    async fn test_download_replaces_sibling_extension() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("content_p.png"), vec![1u8; 4096]).unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let item = ContentItem {
            content_type: ContentType::Image,
            ..video("p", format!("{}/p.webp", server.uri()), None)
        };

        let outcome = engine.enqueue(&item).wait().await;
        assert!(matches!(outcome, DownloadOutcome::Downloaded { .. }));
        assert!(dir.path().join("content_p.webp").exists());
        assert!(!dir.path().join("content_p.png").exists());
    }

    #[tokio::test]
    async fn test_progress_events_are_broadcast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64 * 1024]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let mut events = engine.subscribe();
        let item = video("e", format!("{}/e.mp4", server.uri()), Some(64 * 1024));
        engine.enqueue(&item).wait().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.first().unwrap().status, DownloadStatus::Downloading);
        let last = seen.last().unwrap();
        assert_eq!(last.status, DownloadStatus::Completed);
        assert_eq!(last.progress, 100);
        // Whole-percent throttling: never more than one event per percent.
        assert!(seen.len() <= 103);
    }

    #[tokio::test]
    async fn test_cache_size_clear_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("content_a.mp4"), vec![0u8; 2000]).unwrap();
        std::fs::write(dir.path().join("content_b.jpg"), vec![0u8; 3000]).unwrap();
        std::fs::write(dir.path().join("content_b.png"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), vec![0u8; 50]).unwrap();
        let engine = DownloadEngine::new(config(dir.path())).unwrap();

        assert_eq!(engine.cache_size_bytes().await, 5100);
        assert_eq!(engine.discard("b").await, 2);
        assert_eq!(engine.cache_size_bytes().await, 2000);
        assert_eq!(engine.clear_cache().await.unwrap(), 1);
        assert_eq!(engine.cache_size_bytes().await, 0);
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_evict_older_than_uses_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("content_old.mp4");
        let fresh = dir.path().join("content_new.mp4");
        std::fs::write(&old, vec![0u8; 2000]).unwrap();
        std::fs::write(&fresh, vec![0u8; 2000]).unwrap();
        let long_ago = SystemTime::now() - Duration::from_secs(40 * 24 * 3600);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(long_ago)
            .unwrap();

        let engine = DownloadEngine::new(config(dir.path())).unwrap();
        let removed = engine
            .evict_older_than(Duration::from_secs(30 * 24 * 3600))
            .await;
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m 01s");
    }

    #[test]
    fn test_create_progress_bar_hidden_when_disabled() {
        let pb = create_progress_bar(true, 10);
        assert!(pb.is_hidden());
    }
}
