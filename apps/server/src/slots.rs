use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::models::Reservation;
use crate::schedule::DaySchedule;

// ── The fixed slot table ──

/// Start times of the fixed booking slots: hourly, business day 09:00–17:00.
/// This is the universe of valid slot start times; overrides and reservations
/// only ever reference members of this list.
pub const SLOT_STARTS: [&str; 8] = [
    "09:00", "10:00", "11:00", "12:00", "13:00", "14:00", "15:00", "16:00",
];

/// Fixed duration of every slot (minutes).
pub const SLOT_DURATION_MIN: i64 = 60;

/// The weekday on which the practice never takes bookings.
pub const CLOSED_WEEKDAY: Weekday = Weekday::Sun;

/// Whether `time` ("HH:MM") is a member of the fixed slot table.
pub fn is_slot_start(time: &str) -> bool {
    SLOT_STARTS.contains(&time)
}

/// End time of a slot starting at `time` ("HH:MM" → "HH:MM").
pub fn slot_end(time: &str) -> String {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 2 {
        return time.to_string();
    }
    let hour: i64 = parts[0].parse().unwrap_or(0);
    let min: i64 = parts[1].parse().unwrap_or(0);
    let total = hour * 60 + min + SLOT_DURATION_MIN;
    format!("{:02}:{:02}", (total / 60).min(23), total % 60)
}

/// Parse a "YYYY-MM-DD" date.
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Whether `date` falls on the always-closed weekday.
pub fn is_closed_weekday(date: NaiveDate) -> bool {
    date.weekday() == CLOSED_WEEKDAY
}

// ── Bookability ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// Bookable.
    Open,
    /// Blocked by the day flag or a slot override.
    Closed,
    /// Consumed by an active reservation.
    Booked,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub time: String,
    pub end_time: String,
    pub status: SlotStatus,
}

/// Compute per-slot status for one day as two explicit filter passes over the
/// fixed slot table: first the schedule (day flag + overrides), then the
/// active reservations. The closed-vs-booked distinction is cosmetic for
/// clients but kept so the two filters stay independently observable.
pub fn slot_statuses(day: &DaySchedule, reservations: &[Reservation]) -> Vec<SlotView> {
    // Pass 1: day flag and per-slot overrides.
    let mut views: Vec<SlotView> = day
        .slots
        .iter()
        .map(|s| SlotView {
            time: s.time.clone(),
            end_time: slot_end(&s.time),
            status: if day.is_open && s.is_available {
                SlotStatus::Open
            } else {
                SlotStatus::Closed
            },
        })
        .collect();

    // Pass 2: any non-cancelled reservation consumes its exact start time.
    for r in reservations {
        if r.status == "cancelled" {
            continue;
        }
        if let Some(v) = views.iter_mut().find(|v| v.time == r.start_time) {
            v.status = SlotStatus::Booked;
        }
    }

    views
}

/// The bookable set: slots still open after both filter passes.
pub fn bookable_times(views: &[SlotView]) -> Vec<String> {
    views
        .iter()
        .filter(|v| v.status == SlotStatus::Open)
        .map(|v| v.time.clone())
        .collect()
}

// ── Tests ──
