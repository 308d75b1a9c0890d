//! Records persisted by the local state store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const KEY_DEVICE: &str = "device";
pub(crate) const KEY_AUTH_TOKEN: &str = "auth_token";
pub(crate) const KEY_SNAPSHOT: &str = "playlist_snapshot";
pub(crate) const KEY_SYNC_STATE: &str = "sync_state";
pub(crate) const KEY_SETTINGS: &str = "settings";
pub(crate) const CONTENT_PREFIX: &str = "content:";

pub(crate) fn content_key(content_id: &str) -> String {
    format!("{CONTENT_PREFIX}{content_id}")
}

/// Device identity established at pairing time.
///
/// The auth token is stored under its own key; `Device` carries it in memory
/// only so callers get the full identity from one lookup.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub code: String,
    #[serde(skip)]
    pub auth_token: String,
    #[serde(default)]
    pub store_id: Option<String>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("code", &self.code)
            .field("auth_token", &"<redacted>")
            .field("store_id", &self.store_id)
            .finish()
    }
}

/// Proof that a verified local copy of a content item exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedContent {
    pub local_path: PathBuf,
    pub size_bytes: u64,
    /// URL the copy was fetched from. A snapshot carrying a different URL for
    /// the same id invalidates the record.
    pub remote_url: String,
    pub verified_at: DateTime<Utc>,
}

/// Summary of the most recent sync cycle, written only by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub confirmed_version: u64,
    pub pending_downloads: u32,
    /// Live flag. Whatever was stored is stale by the time it is read.
    #[serde(skip_deserializing)]
    pub is_syncing: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub playlist_count: u32,
    #[serde(default)]
    pub content_count: u32,
    #[serde(default)]
    pub cached_count: u32,
    #[serde(default)]
    pub failed_downloads: u32,
}

/// Kinds of work queued while the server was unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineActionKind {
    CommandResult,
}

impl OfflineActionKind {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandResult => "command_result",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "command_result" => Some(Self::CommandResult),
            _ => None,
        }
    }
}

/// A queued action awaiting delivery to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineAction {
    pub id: i64,
    pub kind: OfflineActionKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
}
