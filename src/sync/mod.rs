//! Heartbeat, pull, download and confirm protocol.
//!
//! [`SyncOrchestrator::sync`] runs one cycle and never fails: every error is
//! logged, recorded in the returned [`SyncState`] and leaves the previously
//! persisted playlist and cache untouched. Only one cycle runs at a time;
//! a request that arrives mid-cycle returns the last known state.

pub mod heartbeat;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{Local, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::api::{ApiError, DeviceInfo, SignageApi};
use crate::catalog::{ContentItem, PlaylistSnapshot};
use crate::download::{DownloadEngine, DownloadOutcome};
use crate::schedule::resolve_active_playlist;
use crate::state::{CachedContent, StateError, StateStore, SyncState};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors that end or degrade a sync cycle. None of them reach playback.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Server sent sync version {pulled}, older than confirmed version {confirmed}")]
    StaleVersion { pulled: u64, confirmed: u64 },
}

/// Notifications for local listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started,
    Completed(SyncState),
    /// The persisted snapshot differs from the previous one. Playback should
    /// resolve again.
    PlaylistChanged,
}

/// Drives sync cycles against the server, the store and the download engine.
pub struct SyncOrchestrator {
    api: Arc<dyn SignageApi>,
    store: Arc<dyn StateStore>,
    downloads: DownloadEngine,
    device_code: String,
    started: Instant,
    guard: tokio::sync::Mutex<()>,
    last_state: Mutex<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(
        api: Arc<dyn SignageApi>,
        store: Arc<dyn StateStore>,
        downloads: DownloadEngine,
        device_code: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            store,
            downloads,
            device_code: device_code.into(),
            started: Instant::now(),
            guard: tokio::sync::Mutex::new(()),
            last_state: Mutex::new(SyncState::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn downloads(&self) -> &DownloadEngine {
        &self.downloads
    }

    pub fn is_syncing(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Most recent state this orchestrator produced. `is_syncing` reflects
    /// whether a cycle holds the guard right now.
    pub fn last_state(&self) -> SyncState {
        let mut state = self
            .last_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        state.is_syncing = self.is_syncing();
        state
    }

    fn set_last_state(&self, state: &SyncState) {
        *self.last_state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
    }

    /// Run one sync cycle, or return the current state if one is running.
    pub async fn sync(&self) -> SyncState {
        let Ok(_guard) = self.guard.try_lock() else {
            tracing::debug!("Sync already in progress");
            let mut state = self.last_state();
            state.is_syncing = true;
            return state;
        };

        let mut state = match self.store.sync_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load sync state");
                self.last_state()
            }
        };
        // Never persisted: a cycle dropped mid-flight must not leave it set.
        state.is_syncing = true;
        self.set_last_state(&state);
        let _ = self.events.send(SyncEvent::Started);
        tracing::info!(confirmed_version = state.confirmed_version, "Sync started");

        match self.run_cycle(&mut state).await {
            Ok(()) => tracing::info!(
                confirmed_version = state.confirmed_version,
                cached = state.cached_count,
                pending = state.pending_downloads,
                failed = state.failed_downloads,
                "Sync finished"
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Sync cycle aborted, keeping cached state");
                state.last_error = Some(e.to_string());
            }
        }

        state.is_syncing = false;
        self.persist_state(&state).await;
        let _ = self.events.send(SyncEvent::Completed(state.clone()));
        state
    }

    async fn persist_state(&self, state: &SyncState) {
        self.set_last_state(state);
        if let Err(e) = self.store.save_sync_state(state).await {
            tracing::error!(error = %e, "Failed to persist sync state");
        }
    }

    async fn run_cycle(&self, state: &mut SyncState) -> Result<(), SyncError> {
        self.api.check_health().await?;

        let previous = self.store.load_snapshot().await?;
        let (snapshot, fresh) = match self.pull(state.confirmed_version).await {
            Ok(snapshot) => (snapshot, true),
            Err(e) => {
                let Some(cached) = previous.clone() else {
                    return Err(e);
                };
                tracing::warn!(error = %e, version = cached.sync_version, "Pull failed, using cached playlist");
                state.last_error = Some(e.to_string());
                (cached, false)
            }
        };

        if fresh {
            let diff = self.store.replace_snapshot(&snapshot).await?;
            for id in &diff.url_changed {
                let removed = self.downloads.discard(id).await;
                tracing::debug!(content_id = %id, removed, "Content URL changed, discarded local copy");
            }
            let changed = previous.as_ref().is_none_or(|p| {
                p.playlists != snapshot.playlists || p.schedules != snapshot.schedules
            });
            if changed {
                tracing::info!(version = snapshot.sync_version, "Playlist snapshot changed");
                let _ = self.events.send(SyncEvent::PlaylistChanged);
            }
        }

        self.reconcile_downloads(&snapshot, state).await?;
        state.playlist_count = snapshot.playlists.len() as u32;

        if !fresh {
            return Ok(());
        }

        if snapshot.sync_version > 0 {
            let playlist_id = snapshot.playlists.first().map(|p| p.id.as_str());
            match self.api.confirm_sync(snapshot.sync_version, playlist_id).await {
                Ok(reply) => {
                    state.confirmed_version = state.confirmed_version.max(reply.confirmed_version);
                }
                Err(e) => {
                    tracing::warn!(error = %e, version = snapshot.sync_version, "Confirm failed, version stays unconfirmed");
                    state.last_error = Some(e.to_string());
                    state.last_sync_at = Some(Utc::now());
                    return Ok(());
                }
            }
        }

        state.last_sync_at = Some(Utc::now());
        state.last_error = None;
        Ok(())
    }

    async fn pull(&self, confirmed: u64) -> Result<PlaylistSnapshot, SyncError> {
        let reply = self.api.pull_playlist().await?;
        let mut snapshot = reply.into_snapshot(Utc::now());
        if snapshot.sync_version < confirmed {
            return Err(SyncError::StaleVersion {
                pulled: snapshot.sync_version,
                confirmed,
            });
        }
        snapshot.schedules.sort_by_key(|s| s.id);
        Ok(snapshot)
    }

    /// Download every media item lacking a verified local copy and record the
    /// results. Per-item failures only affect the counters.
    async fn reconcile_downloads(
        &self,
        snapshot: &PlaylistSnapshot,
        state: &mut SyncState,
    ) -> Result<(), SyncError> {
        let records = self.store.all_cached_content().await?;
        let media: Vec<&ContentItem> = snapshot
            .unique_contents()
            .into_iter()
            .filter(|c| c.media_url().is_some())
            .collect();

        let missing: Vec<ContentItem> = media
            .iter()
            .filter(|item| !self.has_verified_copy(item, &records))
            .map(|item| (*item).clone())
            .collect();

        state.content_count = media.len() as u32;
        state.pending_downloads = missing.len() as u32;
        self.set_last_state(state);
        tracing::info!(
            total = media.len(),
            missing = missing.len(),
            "Reconciling content cache"
        );

        let outcomes = self.downloads.await_all(&missing).await;
        let urls: HashMap<&str, &str> = missing
            .iter()
            .filter_map(|c| Some((c.id.as_str(), c.media_url()?)))
            .collect();

        let mut failed = 0u32;
        for (content_id, outcome) in &outcomes {
            match outcome.local_file() {
                Some((path, size_bytes)) => {
                    let record = CachedContent {
                        local_path: path.to_path_buf(),
                        size_bytes,
                        remote_url: urls.get(content_id.as_str()).copied().unwrap_or_default().to_string(),
                        verified_at: Utc::now(),
                    };
                    self.store.mark_cached(content_id, &record).await?;
                }
                None => {
                    failed += 1;
                    if let DownloadOutcome::Failed(reason) = outcome {
                        tracing::warn!(content_id = %content_id, reason = %reason, "Content not cached");
                    } else {
                        tracing::warn!(content_id = %content_id, "Content download timed out");
                    }
                }
            }
        }

        state.failed_downloads = failed;
        state.pending_downloads = failed;
        state.cached_count = state.content_count.saturating_sub(failed);
        Ok(())
    }

    fn has_verified_copy(&self, item: &ContentItem, records: &HashMap<String, CachedContent>) -> bool {
        let Some(record) = records.get(&item.id) else {
            return false;
        };
        item.media_url() == Some(record.remote_url.as_str())
            && self
                .downloads
                .verified_size(&record.local_path, item.declared_size())
                .is_some()
    }

    /// Status report sent with every heartbeat.
    pub async fn device_info(&self) -> DeviceInfo {
        let state = self.last_state();
        let current_playlist_id = match self.store.load_snapshot().await {
            Ok(Some(snapshot)) => resolve_active_playlist(
                &snapshot.playlists,
                &snapshot.schedules,
                Local::now().naive_local(),
            )
            .map(|p| p.id.clone()),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Snapshot unavailable for device info");
                None
            }
        };
        DeviceInfo {
            device_code: self.device_code.clone(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            current_playlist_id,
            confirmed_version: state.confirmed_version,
            cache_size_bytes: self.downloads.cache_size_bytes().await,
            pending_downloads: state.pending_downloads,
            uptime_seconds: self.started.elapsed().as_secs(),
            hostname: hostname(),
            os: std::env::consts::OS.to_string(),
        }
    }
}

fn hostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
}
