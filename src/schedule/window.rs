//! Day and time-of-day matching for a single schedule.

use chrono::{Datelike, NaiveDateTime, NaiveTime};

use crate::catalog::{Schedule, ScheduleType};

/// Normalize a day number to ISO (Monday=1..Sunday=7).
///
/// Servers that follow the Sunday=0 convention send 0 for Sunday; 1..6 mean
/// the same weekday in both conventions.
pub fn iso_weekday(day: u8) -> Option<u8> {
    match day {
        0 => Some(7),
        1..=7 => Some(day),
        _ => None,
    }
}

/// Whether `t` falls inside `[start, end)`.
///
/// When `end < start` the window crosses midnight and matches
/// `t >= start || t <= end`. A window with `start == end` is empty.
pub fn time_in_window(start: NaiveTime, end: NaiveTime, t: NaiveTime) -> bool {
    if end < start {
        t >= start || t <= end
    } else {
        t >= start && t < end
    }
}

/// Whether `schedule` makes its playlist eligible at `now` (local time).
///
/// `is_active` is not checked here; the resolver filters on it first.
pub fn applies_at(schedule: &Schedule, now: NaiveDateTime) -> bool {
    let day_ok = match schedule.schedule_type {
        ScheduleType::Always | ScheduleType::Daily => true,
        ScheduleType::Weekly => {
            let today = now.weekday().number_from_monday() as u8;
            schedule
                .days_of_week
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(|&d| iso_weekday(d))
                .any(|d| d == today)
        }
        ScheduleType::DateRange => {
            let date = now.date();
            schedule.start_date.is_none_or(|start| date >= start)
                && schedule.end_date.is_none_or(|end| date <= end)
        }
        ScheduleType::Unknown => false,
    };
    if !day_ok {
        return false;
    }

    let t = now.time();
    match (schedule.start_time, schedule.end_time) {
        (Some(start), Some(end)) => time_in_window(start, end, t),
        (Some(start), None) => t >= start,
        (None, Some(end)) => t < end,
        (None, None) => true,
    }
}
