use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{string_or_number, Playlist, PlaylistSnapshot, Schedule};

/// Reply to `POST /devices/heartbeat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub sync_required: bool,
    #[serde(default)]
    pub pending_commands: Vec<Command>,
}

/// An imperative command pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "type", alias = "command_type")]
    pub command: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// Reply to `GET /devices/{code}/playlist`.
///
/// `playlist` is the device's assigned playlist; `playlists` carries any
/// additional playlists referenced by schedules.
#[derive(Debug, Clone, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub playlist: Option<Playlist>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
    #[serde(default)]
    pub sync_version: u64,
}

impl PullResponse {
    /// Fold the reply into one snapshot, assigned playlist first.
    pub fn into_snapshot(self, pulled_at: DateTime<Utc>) -> PlaylistSnapshot {
        let mut playlists = Vec::with_capacity(self.playlists.len() + 1);
        if let Some(p) = self.playlist {
            playlists.push(p);
        }
        for p in self.playlists {
            if !playlists.iter().any(|existing: &Playlist| existing.id == p.id) {
                playlists.push(p);
            }
        }
        PlaylistSnapshot {
            playlists,
            schedules: self.schedules,
            sync_version: self.sync_version,
            pulled_at,
        }
    }
}

/// Reply to `POST /devices/{code}/sync/confirm`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmResponse {
    pub confirmed_version: u64,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

/// Liveness and status payload sent with every heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub device_code: String,
    pub app_version: String,
    pub current_playlist_id: Option<String>,
    pub confirmed_version: u64,
    pub cache_size_bytes: u64,
    pub pending_downloads: u32,
    pub uptime_seconds: u64,
    pub hostname: Option<String>,
    pub os: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    Failed,
}

/// Body of `POST /devices/{code}/commands/{id}/result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    pub command_id: String,
    pub status: CommandStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Body of `POST /devices/{code}/logs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
