//! What the player should show right now.
//!
//! The playback side only ever reads the last persisted snapshot and the
//! verified cache records; sync errors never reach it.

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::catalog::Playlist;
use crate::download::Verification;
use crate::schedule::resolve_active_playlist;
use crate::state::StateStore;

/// Result of a playback query.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackView {
    /// Nothing has ever synced, or the snapshot holds no playlist.
    NoContent,
    /// A playlist is active but none of its media is cached yet.
    Waiting(Playlist),
    /// Playable items only, media items carrying their `local_path`.
    Playing(Playlist),
}

/// Read-only: never touches the network or creates files.
pub struct PlaybackSource {
    store: Arc<dyn StateStore>,
    verification: Verification,
}

impl PlaybackSource {
    pub fn new(store: Arc<dyn StateStore>, verification: Verification) -> Self {
        Self {
            store,
            verification,
        }
    }

    /// Resolve the active playlist at `now` (device local time) and keep only
    /// items that can play from disk.
    pub async fn current(&self, now: NaiveDateTime) -> PlaybackView {
        let snapshot = match self.store.load_snapshot().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return PlaybackView::NoContent,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load playlist snapshot");
                return PlaybackView::NoContent;
            }
        };
        let Some(active) =
            resolve_active_playlist(&snapshot.playlists, &snapshot.schedules, now)
        else {
            return PlaybackView::NoContent;
        };
        let records = match self.store.all_cached_content().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load cache records");
                Default::default()
            }
        };

        let mut playlist = active.clone();
        playlist.items.retain_mut(|item| {
            let Some(url) = item.media_url() else {
                return true;
            };
            let Some(record) = records.get(&item.id).filter(|r| r.remote_url == url) else {
                return false;
            };
            if self
                .verification
                .verified_size(&record.local_path, item.declared_size())
                .is_none()
            {
                return false;
            }
            item.local_path = Some(record.local_path.clone());
            true
        });

        if playlist.items.is_empty() && !active.items.is_empty() {
            tracing::debug!(playlist_id = %active.id, "Active playlist has no cached media yet");
            return PlaybackView::Waiting(active.clone());
        }
        PlaybackView::Playing(playlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ContentItem, ContentType, PlaylistSnapshot};
    use crate::state::{CachedContent, SqliteStateStore};
    use chrono::{NaiveDate, Utc};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 16)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn item(id: &str, content_type: ContentType) -> ContentItem {
        ContentItem {
            id: id.into(),
            content_type,
            remote_url: content_type
                .has_media()
                .then(|| format!("https://cdn/{id}.bin")),
            expected_size_bytes: None,
            checksum: None,
            duration_seconds: 10,
            local_path: None,
        }
    }

    fn snapshot(items: Vec<ContentItem>) -> PlaylistSnapshot {
        PlaylistSnapshot {
            playlists: vec![Playlist {
                id: "p".into(),
                name: "Main".into(),
                version: 1,
                priority: 0,
                is_active: true,
                items,
            }],
            schedules: Vec::new(),
            sync_version: 1,
            pulled_at: Utc::now(),
        }
    }

    fn source() -> (Arc<SqliteStateStore>, PlaybackSource) {
        let store = Arc::new(SqliteStateStore::open_in_memory().unwrap());
        (
            store.clone(),
            PlaybackSource::new(store, Verification::default()),
        )
    }

    #[tokio::test]
    async fn test_no_snapshot_is_no_content() {
        let (_, source) = source();
        assert_eq!(source.current(now()).await, PlaybackView::NoContent);
    }

    #[tokio::test]
    async fn test_uncached_media_is_waiting() {
        let (store, source) = source();
        store
            .replace_snapshot(&snapshot(vec![item("v", ContentType::Video)]))
            .await
            .unwrap();
        assert!(matches!(
            source.current(now()).await,
            PlaybackView::Waiting(p) if p.id == "p"
        ));
    }

    #[tokio::test]
    async fn test_only_verified_media_plays() {
        let dir = tempfile::tempdir().unwrap();
        let (store, source) = source();
        store
            .replace_snapshot(&snapshot(vec![
                item("a", ContentType::Image),
                item("b", ContentType::Video),
                item("t", ContentType::Ticker),
            ]))
            .await
            .unwrap();

        let path = dir.path().join("content_a.bin");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();
        store
            .mark_cached(
                "a",
                &CachedContent {
                    local_path: path.clone(),
                    size_bytes: 2048,
                    remote_url: "https://cdn/a.bin".into(),
                    verified_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        // Record without a file behind it.
        store
            .mark_cached(
                "b",
                &CachedContent {
                    local_path: dir.path().join("content_b.bin"),
                    size_bytes: 2048,
                    remote_url: "https://cdn/b.bin".into(),
                    verified_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let PlaybackView::Playing(playlist) = source.current(now()).await else {
            panic!("expected a playable playlist");
        };
        let ids: Vec<&str> = playlist.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "t"]);
        assert_eq!(playlist.items[0].local_path.as_deref(), Some(path.as_path()));
    }
}
