//! State store trait and SQLite implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::error::StateError;
use super::schema;
use super::types::{
    content_key, CachedContent, Device, OfflineAction, OfflineActionKind, SyncState,
    CONTENT_PREFIX, KEY_AUTH_TOKEN, KEY_DEVICE, KEY_SETTINGS, KEY_SNAPSHOT, KEY_SYNC_STATE,
};
use crate::catalog::PlaylistSnapshot;

/// What replacing the snapshot did to the per-content cache records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Content ids still referenced but now pointing at a different URL.
    /// Their local files hold the old media and must be discarded.
    pub url_changed: Vec<String>,
    /// Content ids no longer referenced by any playlist.
    pub dropped: Vec<String>,
}

/// Trait for local state operations.
///
/// Object-safe so it can be shared as `Arc<dyn StateStore>` between the
/// heartbeat loop, manual sync triggers and command execution.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Paired device identity, with its auth token, if any.
    async fn device(&self) -> Result<Option<Device>, StateError>;

    /// Persist device identity and auth token together.
    async fn save_device(&self, device: &Device) -> Result<(), StateError>;

    /// Forget device identity and auth token (logout).
    async fn clear_device(&self) -> Result<(), StateError>;

    async fn auth_token(&self) -> Result<Option<String>, StateError>;

    /// Last playlist snapshot that was fully persisted.
    async fn load_snapshot(&self) -> Result<Option<PlaylistSnapshot>, StateError>;

    /// Replace the snapshot wholesale in one transaction.
    ///
    /// Cache records whose content is gone, or whose URL changed, are removed
    /// in the same transaction so readers never pair a new snapshot with a
    /// stale local copy.
    async fn replace_snapshot(&self, snapshot: &PlaylistSnapshot)
        -> Result<SnapshotDiff, StateError>;

    async fn cached_content(&self, content_id: &str)
        -> Result<Option<CachedContent>, StateError>;

    /// All cache records keyed by content id.
    async fn all_cached_content(&self) -> Result<HashMap<String, CachedContent>, StateError>;

    /// Record a verified local copy.
    async fn mark_cached(&self, content_id: &str, record: &CachedContent)
        -> Result<(), StateError>;

    async fn clear_cached(&self, content_id: &str) -> Result<(), StateError>;

    /// Remove every cache record. Returns how many were removed.
    async fn clear_all_cached(&self) -> Result<u64, StateError>;

    /// Stored sync summary, or the default when no sync has run yet.
    async fn sync_state(&self) -> Result<SyncState, StateError>;

    async fn save_sync_state(&self, state: &SyncState) -> Result<(), StateError>;

    /// Device settings pushed by the server, as a JSON object.
    async fn settings(&self) -> Result<Map<String, Value>, StateError>;

    /// Shallow-merge `patch` into the stored settings and return the result.
    async fn merge_settings(&self, patch: &Map<String, Value>)
        -> Result<Map<String, Value>, StateError>;

    /// Queue an action for delivery once the server is reachable.
    async fn push_offline_action(
        &self,
        kind: OfflineActionKind,
        payload: &Value,
    ) -> Result<i64, StateError>;

    /// Oldest queued actions first.
    async fn pending_offline_actions(&self, limit: u32) -> Result<Vec<OfflineAction>, StateError>;

    async fn remove_offline_action(&self, id: i64) -> Result<(), StateError>;

    /// Increment the attempt counter and return the new value.
    async fn bump_offline_action_attempts(&self, id: i64) -> Result<u32, StateError>;

    async fn offline_action_count(&self) -> Result<u64, StateError>;
}

/// SQLite implementation of the state store.
pub struct SqliteStateStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync. The mutex
    /// is also what serializes writers.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStateStore {
    /// Open or create a store at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory store (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

fn get_value<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>, StateError> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .map_err(StateError::query)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| StateError::codec(key, e)))
        .transpose()
}

fn put_value<T: Serialize + ?Sized>(
    conn: &Connection,
    key: &str,
    value: &T,
) -> Result<(), StateError> {
    let json = serde_json::to_string(value).map_err(|e| StateError::codec(key, e))?;
    conn.execute(
        r#"
        INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        rusqlite::params![key, json, Utc::now().timestamp()],
    )
    .map_err(StateError::query)?;
    Ok(())
}

fn delete_key(conn: &Connection, key: &str) -> Result<(), StateError> {
    conn.execute("DELETE FROM kv WHERE key = ?1", [key])
        .map_err(StateError::query)?;
    Ok(())
}

/// Range bounds matching every `content:` key. `;` sorts right after `:`,
/// which avoids LIKE and its wildcard characters in content ids.
const CONTENT_RANGE_END: &str = "content;";

fn load_cached(conn: &Connection) -> Result<HashMap<String, CachedContent>, StateError> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM kv WHERE key >= ?1 AND key < ?2")
        .map_err(StateError::query)?;
    let rows = stmt
        .query_map([CONTENT_PREFIX, CONTENT_RANGE_END], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(StateError::query)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(StateError::query)?;

    let mut out = HashMap::with_capacity(rows.len());
    for (key, value) in rows {
        match serde_json::from_str::<CachedContent>(&value) {
            Ok(record) => {
                let id = key[CONTENT_PREFIX.len()..].to_string();
                out.insert(id, record);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Skipping corrupt cache record");
            }
        }
    }
    Ok(out)
}

fn row_to_offline_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<OfflineAction>> {
    let id: i64 = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let payload_str: String = row.get(2)?;
    let created_at_ts: i64 = row.get(3)?;
    let attempts: i64 = row.get(4)?;

    let Some(kind) = OfflineActionKind::from_str(&kind_str) else {
        tracing::warn!(id, kind = %kind_str, "Unknown offline action kind");
        return Ok(None);
    };
    let payload = serde_json::from_str(&payload_str).unwrap_or(Value::Null);

    Ok(Some(OfflineAction {
        id,
        kind,
        payload,
        created_at: Utc
            .timestamp_opt(created_at_ts, 0)
            .single()
            .unwrap_or(chrono::DateTime::UNIX_EPOCH),
        attempts: attempts.max(0) as u32,
    }))
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn device(&self) -> Result<Option<Device>, StateError> {
        let conn = self.lock()?;
        let device: Option<Device> = get_value(&conn, KEY_DEVICE)?;
        let token: Option<String> = get_value(&conn, KEY_AUTH_TOKEN)?;
        Ok(device.map(|mut d| {
            d.auth_token = token.unwrap_or_default();
            d
        }))
    }

    async fn save_device(&self, device: &Device) -> Result<(), StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        put_value(&tx, KEY_DEVICE, device)?;
        put_value(&tx, KEY_AUTH_TOKEN, &device.auth_token)?;
        tx.commit().map_err(StateError::query)?;
        Ok(())
    }

    async fn clear_device(&self) -> Result<(), StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        delete_key(&tx, KEY_DEVICE)?;
        delete_key(&tx, KEY_AUTH_TOKEN)?;
        tx.commit().map_err(StateError::query)?;
        Ok(())
    }

    async fn auth_token(&self) -> Result<Option<String>, StateError> {
        let conn = self.lock()?;
        get_value(&conn, KEY_AUTH_TOKEN)
    }

    async fn load_snapshot(&self) -> Result<Option<PlaylistSnapshot>, StateError> {
        let conn = self.lock()?;
        get_value(&conn, KEY_SNAPSHOT)
    }

    async fn replace_snapshot(
        &self,
        snapshot: &PlaylistSnapshot,
    ) -> Result<SnapshotDiff, StateError> {
        let mut ordered = snapshot.clone();
        ordered.schedules.sort_by_key(|s| s.id);

        let wanted: HashMap<&str, Option<&str>> = snapshot
            .unique_contents()
            .into_iter()
            .map(|c| (c.id.as_str(), c.media_url()))
            .collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;

        let mut diff = SnapshotDiff::default();
        for (id, record) in load_cached(&tx)? {
            match wanted.get(id.as_str()) {
                None => diff.dropped.push(id),
                Some(Some(url)) if *url == record.remote_url => {}
                Some(_) => diff.url_changed.push(id),
            }
        }
        for id in diff.dropped.iter().chain(diff.url_changed.iter()) {
            delete_key(&tx, &content_key(id))?;
        }

        put_value(&tx, KEY_SNAPSHOT, &ordered)?;
        tx.commit().map_err(StateError::query)?;

        diff.dropped.sort();
        diff.url_changed.sort();
        Ok(diff)
    }

    async fn cached_content(
        &self,
        content_id: &str,
    ) -> Result<Option<CachedContent>, StateError> {
        let conn = self.lock()?;
        get_value(&conn, &content_key(content_id))
    }

    async fn all_cached_content(&self) -> Result<HashMap<String, CachedContent>, StateError> {
        let conn = self.lock()?;
        load_cached(&conn)
    }

    async fn mark_cached(
        &self,
        content_id: &str,
        record: &CachedContent,
    ) -> Result<(), StateError> {
        let conn = self.lock()?;
        put_value(&conn, &content_key(content_id), record)
    }

    async fn clear_cached(&self, content_id: &str) -> Result<(), StateError> {
        let conn = self.lock()?;
        delete_key(&conn, &content_key(content_id))
    }

    async fn clear_all_cached(&self) -> Result<u64, StateError> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM kv WHERE key >= ?1 AND key < ?2",
                [CONTENT_PREFIX, CONTENT_RANGE_END],
            )
            .map_err(StateError::query)?;
        Ok(removed as u64)
    }

    async fn sync_state(&self) -> Result<SyncState, StateError> {
        let conn = self.lock()?;
        Ok(get_value(&conn, KEY_SYNC_STATE)?.unwrap_or_default())
    }

    async fn save_sync_state(&self, state: &SyncState) -> Result<(), StateError> {
        let conn = self.lock()?;
        put_value(&conn, KEY_SYNC_STATE, state)
    }

    async fn settings(&self) -> Result<Map<String, Value>, StateError> {
        let conn = self.lock()?;
        Ok(get_value(&conn, KEY_SETTINGS)?.unwrap_or_default())
    }

    async fn merge_settings(
        &self,
        patch: &Map<String, Value>,
    ) -> Result<Map<String, Value>, StateError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StateError::query)?;
        let mut current: Map<String, Value> = get_value(&tx, KEY_SETTINGS)?.unwrap_or_default();
        for (k, v) in patch {
            current.insert(k.clone(), v.clone());
        }
        put_value(&tx, KEY_SETTINGS, &current)?;
        tx.commit().map_err(StateError::query)?;
        Ok(current)
    }

    async fn push_offline_action(
        &self,
        kind: OfflineActionKind,
        payload: &Value,
    ) -> Result<i64, StateError> {
        let conn = self.lock()?;
        let payload_str = serde_json::to_string(payload)
            .map_err(|e| StateError::codec("offline_actions.payload", e))?;
        conn.execute(
            "INSERT INTO offline_actions (kind, payload, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![kind.as_str(), payload_str, Utc::now().timestamp()],
        )
        .map_err(StateError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn pending_offline_actions(
        &self,
        limit: u32,
    ) -> Result<Vec<OfflineAction>, StateError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, kind, payload, created_at, attempts FROM offline_actions ORDER BY id LIMIT ?1",
            )
            .map_err(StateError::query)?;
        let actions = stmt
            .query_map([limit], row_to_offline_action)
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;
        Ok(actions.into_iter().flatten().collect())
    }

    async fn remove_offline_action(&self, id: i64) -> Result<(), StateError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM offline_actions WHERE id = ?1", [id])
            .map_err(StateError::query)?;
        Ok(())
    }

    async fn bump_offline_action_attempts(&self, id: i64) -> Result<u32, StateError> {
        let conn = self.lock()?;
        let attempts: Option<i64> = conn
            .query_row(
                "UPDATE offline_actions SET attempts = attempts + 1 WHERE id = ?1 RETURNING attempts",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StateError::query)?;
        Ok(attempts.unwrap_or(0).max(0) as u32)
    }

    async fn offline_action_count(&self) -> Result<u64, StateError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM offline_actions", [], |row| row.get(0))
            .map_err(StateError::query)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ContentItem, ContentType, Playlist, Schedule, ScheduleType};
    use serde_json::json;

    fn item(id: &str, url: &str) -> ContentItem {
        ContentItem {
            id: id.to_string(),
            content_type: ContentType::Video,
            remote_url: Some(url.to_string()),
            expected_size_bytes: Some(1000),
            checksum: None,
            duration_seconds: 10,
            local_path: None,
        }
    }

    fn schedule(id: i64) -> Schedule {
        Schedule {
            id,
            playlist_id: "p1".into(),
            schedule_type: ScheduleType::Always,
            days_of_week: None,
            start_time: None,
            end_time: None,
            start_date: None,
            end_date: None,
            priority: 0,
            is_active: true,
        }
    }

    fn snapshot(items: Vec<ContentItem>, version: u64) -> PlaylistSnapshot {
        PlaylistSnapshot {
            playlists: vec![Playlist {
                id: "p1".into(),
                name: "Lobby".into(),
                version,
                priority: 0,
                is_active: true,
                items,
            }],
            schedules: vec![schedule(9), schedule(2), schedule(5)],
            sync_version: version,
            pulled_at: Utc::now(),
        }
    }

    fn cached(url: &str) -> CachedContent {
        CachedContent {
            local_path: PathBuf::from("/tmp/content_x.mp4"),
            size_bytes: 1000,
            remote_url: url.to_string(),
            verified_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = SqliteStateStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn test_device_roundtrip_and_logout() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        assert!(store.device().await.unwrap().is_none());

        let device = Device {
            code: "TV-001".into(),
            auth_token: "secret".into(),
            store_id: Some("store-9".into()),
        };
        store.save_device(&device).await.unwrap();

        let loaded = store.device().await.unwrap().unwrap();
        assert_eq!(loaded, device);
        assert_eq!(store.auth_token().await.unwrap().as_deref(), Some("secret"));

        store.clear_device().await.unwrap();
        assert!(store.device().await.unwrap().is_none());
        assert!(store.auth_token().await.unwrap().is_none());
    }

    #[test]
    fn test_device_debug_redacts_token() {
        let device = Device {
            code: "TV".into(),
            auth_token: "hunter2".into(),
            store_id: None,
        };
        assert!(!format!("{device:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_snapshot_replaced_with_schedules_sorted_by_id() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        assert!(store.load_snapshot().await.unwrap().is_none());

        store
            .replace_snapshot(&snapshot(vec![item("c1", "https://x/1.mp4")], 3))
            .await
            .unwrap();

        let loaded = store.load_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.sync_version, 3);
        let ids: Vec<i64> = loaded.schedules.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[tokio::test]
    async fn test_replace_snapshot_drops_stale_cache_records() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store.mark_cached("keep", &cached("https://x/keep.mp4")).await.unwrap();
        store.mark_cached("moved", &cached("https://x/old.mp4")).await.unwrap();
        store.mark_cached("gone", &cached("https://x/gone.mp4")).await.unwrap();

        let diff = store
            .replace_snapshot(&snapshot(
                vec![
                    item("keep", "https://x/keep.mp4"),
                    item("moved", "https://x/new.mp4"),
                ],
                4,
            ))
            .await
            .unwrap();

        assert_eq!(diff.url_changed, vec!["moved".to_string()]);
        assert_eq!(diff.dropped, vec!["gone".to_string()]);

        let remaining = store.all_cached_content().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains_key("keep"));
    }

    #[tokio::test]
    async fn test_cache_records_with_underscore_ids() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store.mark_cached("a_b%c", &cached("u")).await.unwrap();
        assert!(store.cached_content("a_b%c").await.unwrap().is_some());
        assert!(store.cached_content("a").await.unwrap().is_none());

        // Keys outside the content namespace are untouched by bulk clears.
        store.save_sync_state(&SyncState::default()).await.unwrap();
        assert_eq!(store.clear_all_cached().await.unwrap(), 1);
        assert!(store.all_cached_content().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_cached_single() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store.mark_cached("c1", &cached("u1")).await.unwrap();
        store.mark_cached("c2", &cached("u2")).await.unwrap();
        store.clear_cached("c1").await.unwrap();
        let all = store.all_cached_content().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("c2"));
    }

    #[tokio::test]
    async fn test_sync_state_defaults_then_persists() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let state = store.sync_state().await.unwrap();
        assert_eq!(state, SyncState::default());

        let updated = SyncState {
            last_sync_at: Some(Utc::now()),
            confirmed_version: 7,
            pending_downloads: 2,
            ..SyncState::default()
        };
        store.save_sync_state(&updated).await.unwrap();
        assert_eq!(store.sync_state().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_stored_syncing_flag_reads_back_cleared() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let stuck = SyncState {
            confirmed_version: 3,
            is_syncing: true,
            ..SyncState::default()
        };
        store.save_sync_state(&stuck).await.unwrap();
        let loaded = store.sync_state().await.unwrap();
        assert!(!loaded.is_syncing);
        assert_eq!(loaded.confirmed_version, 3);
    }

    #[tokio::test]
    async fn test_merge_settings_is_shallow() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let first = json!({"volume": 40, "orientation": "landscape"});
        store
            .merge_settings(first.as_object().unwrap())
            .await
            .unwrap();
        let second = json!({"volume": 70});
        let merged = store
            .merge_settings(second.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(merged.get("volume"), Some(&json!(70)));
        assert_eq!(merged.get("orientation"), Some(&json!("landscape")));
        assert_eq!(store.settings().await.unwrap(), merged);
    }

    #[tokio::test]
    async fn test_offline_queue_fifo_and_attempts() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        let a = store
            .push_offline_action(OfflineActionKind::CommandResult, &json!({"n": 1}))
            .await
            .unwrap();
        let b = store
            .push_offline_action(OfflineActionKind::CommandResult, &json!({"n": 2}))
            .await
            .unwrap();
        assert_eq!(store.offline_action_count().await.unwrap(), 2);

        let pending = store.pending_offline_actions(10).await.unwrap();
        assert_eq!(pending.iter().map(|a| a.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(pending[0].payload, json!({"n": 1}));
        assert_eq!(pending[0].attempts, 0);

        assert_eq!(store.bump_offline_action_attempts(a).await.unwrap(), 1);
        assert_eq!(store.bump_offline_action_attempts(a).await.unwrap(), 2);

        store.remove_offline_action(a).await.unwrap();
        let pending = store.pending_offline_actions(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
    }

    #[tokio::test]
    async fn test_pending_offline_actions_respects_limit() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        for n in 0..5 {
            store
                .push_offline_action(OfflineActionKind::CommandResult, &json!({ "n": n }))
                .await
                .unwrap();
        }
        assert_eq!(store.pending_offline_actions(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_value_surfaces_codec_error() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES ('sync_state', 'not json', 0)",
                [],
            )
            .unwrap();
        }
        assert!(matches!(
            store.sync_state().await,
            Err(StateError::Codec { .. })
        ));
    }
}
