//! Active-playlist resolution.
//!
//! [`resolve_active_playlist`] is a pure function of the cached playlists,
//! the cached schedules and the current local time. It keeps no state:
//! schedules may change between calls, so callers resolve again on every
//! playback query.

pub mod window;

use chrono::NaiveDateTime;

use crate::catalog::{Playlist, Schedule};

pub use window::{applies_at, iso_weekday, time_in_window};

/// Pick the playlist that should be playing at `now`.
///
/// Among active schedules that apply at `now` and point at a cached playlist,
/// the highest `priority` wins. Equal priorities go to the schedule with the
/// lowest id. With no applicable schedule, falls back to the playlist flagged
/// `is_active`, then to the first cached playlist.
pub fn resolve_active_playlist<'a>(
    playlists: &'a [Playlist],
    schedules: &[Schedule],
    now: NaiveDateTime,
) -> Option<&'a Playlist> {
    let mut candidates: Vec<&Schedule> = schedules
        .iter()
        .filter(|s| s.is_active && applies_at(s, now))
        .collect();
    // Stable sort: ties on id keep the caller's order.
    candidates.sort_by_key(|s| s.id);

    let mut best: Option<(&Schedule, &'a Playlist)> = None;
    for schedule in candidates {
        let Some(playlist) = playlists.iter().find(|p| p.id == schedule.playlist_id) else {
            tracing::debug!(
                schedule_id = schedule.id,
                playlist_id = %schedule.playlist_id,
                "Schedule references a playlist that is not cached"
            );
            continue;
        };
        match best {
            Some((current, _)) if schedule.priority <= current.priority => {}
            _ => best = Some((schedule, playlist)),
        }
    }

    if let Some((schedule, playlist)) = best {
        tracing::debug!(
            schedule_id = schedule.id,
            playlist_id = %playlist.id,
            priority = schedule.priority,
            "Resolved playlist from schedule"
        );
        return Some(playlist);
    }

    playlists
        .iter()
        .find(|p| p.is_active)
        .or_else(|| playlists.first())
}
