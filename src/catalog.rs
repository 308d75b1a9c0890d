//! Playlist, content and schedule records as the server publishes them.
//!
//! These are plain serde types shared by the API client, the state store and
//! the schedule resolver. Wire names are snake_case; a few aliases accept the
//! older field names some server builds still emit.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Kind of content a playlist item renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Image,
    Ticker,
    Template,
    #[serde(other)]
    Other,
}

impl ContentType {
    /// Whether items of this type reference a media file that must be cached.
    pub fn has_media(&self) -> bool {
        matches!(self, Self::Video | Self::Image)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image => "image",
            Self::Ticker => "ticker",
            Self::Template => "template",
            Self::Other => "other",
        }
    }

    /// Fallback file extension when the URL doesn't carry one.
    pub fn default_extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Image => "jpg",
            Self::Ticker | Self::Template | Self::Other => "bin",
        }
    }
}

/// A single piece of content referenced by a playlist.
///
/// `local_path` is never sent by the server. It is filled in on the device once
/// the download engine has verified a local copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default, alias = "url")]
    pub remote_url: Option<String>,
    #[serde(default, alias = "file_size")]
    pub expected_size_bytes: Option<u64>,
    /// Lowercase hex SHA-256 of the media file, when the server knows it.
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl ContentItem {
    /// The URL to fetch, if this item has downloadable media.
    pub fn media_url(&self) -> Option<&str> {
        if !self.content_type.has_media() {
            return None;
        }
        self.remote_url.as_deref().filter(|u| !u.trim().is_empty())
    }

    /// Expected size, treating a declared zero as unknown.
    pub fn declared_size(&self) -> Option<u64> {
        self.expected_size_bytes.filter(|&s| s > 0)
    }
}

/// A versioned playlist as pulled from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, alias = "contents")]
    pub items: Vec<ContentItem>,
}

/// How a schedule decides whether it applies at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Always,
    Daily,
    Weekly,
    DateRange,
    #[serde(other)]
    Unknown,
}

/// A time/day window during which a playlist is eligible to play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub playlist_id: String,
    #[serde(rename = "type", alias = "schedule_type")]
    pub schedule_type: ScheduleType,
    /// Day numbers; both ISO (Monday=1..Sunday=7) and Sunday=0 are accepted.
    #[serde(default)]
    pub days_of_week: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "optional_time")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "optional_time")]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Everything one successful pull delivered, replaced wholesale on the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistSnapshot {
    pub playlists: Vec<Playlist>,
    pub schedules: Vec<Schedule>,
    pub sync_version: u64,
    pub pulled_at: DateTime<Utc>,
}

impl PlaylistSnapshot {
    /// Distinct content items across every playlist, first occurrence wins.
    pub fn unique_contents(&self) -> Vec<&ContentItem> {
        let mut seen = std::collections::HashSet::new();
        self.playlists
            .iter()
            .flat_map(|p| p.items.iter())
            .filter(|item| seen.insert(item.id.as_str()))
            .collect()
    }

    pub fn playlist(&self, id: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|p| p.id == id)
    }
}

fn default_true() -> bool {
    true
}

/// Ids arrive as integers from some endpoints and strings from others.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

/// Accepts `HH:MM`, `HH:MM:SS`, an empty string or null.
fn optional_time<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_time_of_day(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {s}"))),
    }
}

pub(crate) fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_item_accepts_aliases_and_numeric_id() {
        let item: ContentItem = serde_json::from_value(json!({
            "id": 42,
            "type": "video",
            "url": "https://cdn.example.com/a.mp4",
            "file_size": 1000,
            "duration": 15
        }))
        .unwrap();
        assert_eq!(item.id, "42");
        assert_eq!(item.content_type, ContentType::Video);
        assert_eq!(item.media_url(), Some("https://cdn.example.com/a.mp4"));
        assert_eq!(item.declared_size(), Some(1000));
        assert_eq!(item.duration_seconds, 15);
        assert!(item.local_path.is_none());
    }

    #[test]
    fn test_ticker_has_no_media_url() {
        let item: ContentItem = serde_json::from_value(json!({
            "id": "t1",
            "type": "ticker",
            "remote_url": "https://example.com/ignored"
        }))
        .unwrap();
        assert_eq!(item.media_url(), None);
    }

    #[test]
    fn test_unknown_content_type_maps_to_other() {
        let item: ContentItem =
            serde_json::from_value(json!({"id": "x", "type": "hologram"})).unwrap();
        assert_eq!(item.content_type, ContentType::Other);
    }

    #[test]
    fn test_zero_declared_size_is_unknown() {
        let item: ContentItem = serde_json::from_value(json!({
            "id": "a", "type": "image", "remote_url": "u", "expected_size_bytes": 0
        }))
        .unwrap();
        assert_eq!(item.declared_size(), None);
    }

    #[test]
    fn test_schedule_parses_short_and_long_times() {
        let s: Schedule = serde_json::from_value(json!({
            "id": 1,
            "playlist_id": 7,
            "type": "daily",
            "start_time": "08:30",
            "end_time": "17:00:00",
            "priority": 3
        }))
        .unwrap();
        assert_eq!(s.playlist_id, "7");
        assert_eq!(s.schedule_type, ScheduleType::Daily);
        assert_eq!(s.start_time, NaiveTime::from_hms_opt(8, 30, 0));
        assert_eq!(s.end_time, NaiveTime::from_hms_opt(17, 0, 0));
        assert!(s.is_active);
    }

    #[test]
    fn test_schedule_empty_time_is_none() {
        let s: Schedule = serde_json::from_value(json!({
            "id": 1, "playlist_id": "p", "type": "always", "start_time": "", "end_time": null
        }))
        .unwrap();
        assert!(s.start_time.is_none());
        assert!(s.end_time.is_none());
    }

    #[test]
    fn test_schedule_rejects_garbage_time() {
        let r: Result<Schedule, _> = serde_json::from_value(json!({
            "id": 1, "playlist_id": "p", "type": "daily", "start_time": "noon"
        }));
        assert!(r.is_err());
    }

    #[test]
    fn test_unique_contents_dedups_across_playlists() {
        let item = |id: &str| ContentItem {
            id: id.to_string(),
            content_type: ContentType::Image,
            remote_url: Some(format!("https://x/{id}.jpg")),
            expected_size_bytes: None,
            checksum: None,
            duration_seconds: 10,
            local_path: None,
        };
        let snapshot = PlaylistSnapshot {
            playlists: vec![
                Playlist {
                    id: "1".into(),
                    name: "a".into(),
                    version: 1,
                    priority: 0,
                    is_active: true,
                    items: vec![item("c1"), item("c2")],
                },
                Playlist {
                    id: "2".into(),
                    name: "b".into(),
                    version: 1,
                    priority: 0,
                    is_active: false,
                    items: vec![item("c2"), item("c3")],
                },
            ],
            schedules: Vec::new(),
            sync_version: 1,
            pulled_at: Utc::now(),
        };
        let ids: Vec<&str> = snapshot
            .unique_contents()
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }
}
