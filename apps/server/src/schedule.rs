use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::SlotOverrideRow;
use crate::slots::{self, SLOT_STARTS};

// ── Errors ──

/// Validation failures raised by schedule edits. These are local errors:
/// nothing has touched storage when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    /// The date falls on the always-closed weekday.
    ClosedWeekday,
    /// A slot was toggled while the day is closed.
    DayClosed,
    /// The time is not a member of the fixed slot table.
    UnknownSlot,
    /// The date string did not parse as YYYY-MM-DD.
    BadDate,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ScheduleError::ClosedWeekday => "Sundays are not bookable",
            ScheduleError::DayClosed => "Open the day before editing its slots",
            ScheduleError::UnknownSlot => "Unknown slot time",
            ScheduleError::BadDate => "Invalid date, expected YYYY-MM-DD",
        };
        f.write_str(msg)
    }
}

// ── Day schedule value type ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotState {
    pub time: String,
    pub is_available: bool,
}

/// One consultant day as the availability editor sees it: the open/closed
/// flag plus one entry per fixed slot, always in slot-table order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub date: String,
    pub is_open: bool,
    pub slots: Vec<SlotState>,
}

impl DaySchedule {
    fn full_grid(date: NaiveDate, is_open: bool, available: impl Fn(&str) -> bool) -> Self {
        DaySchedule {
            date: date.format("%Y-%m-%d").to_string(),
            is_open,
            slots: SLOT_STARTS
                .iter()
                .map(|t| SlotState {
                    time: (*t).to_string(),
                    is_available: is_open && available(t),
                })
                .collect(),
        }
    }

    /// Merge one day out of storage: the stored flag (if any) plus the
    /// stored overrides (if any) over the defaults. A missing flag means
    /// open, a missing override means available. The always-closed weekday
    /// wins over everything stored — a stale `is_open` row for a Sunday is
    /// never trusted.
    pub fn merge(date: NaiveDate, stored_open: Option<bool>, overrides: &[SlotOverrideRow]) -> Self {
        if slots::is_closed_weekday(date) {
            return Self::full_grid(date, false, |_| false);
        }
        let is_open = stored_open.unwrap_or(true);
        Self::full_grid(date, is_open, |time| {
            overrides
                .iter()
                .find(|o| o.start_time == time)
                .map(|o| o.is_available)
                .unwrap_or(true)
        })
    }

    /// Flip the day between open and closed. Opening resets every slot to
    /// available and closing forces every slot unavailable — a reset, not a
    /// restore, since no prior-state log is kept.
    pub fn toggle_open(&mut self) -> Result<(), ScheduleError> {
        let date = slots::parse_date(&self.date).ok_or(ScheduleError::BadDate)?;
        if slots::is_closed_weekday(date) {
            return Err(ScheduleError::ClosedWeekday);
        }
        self.is_open = !self.is_open;
        for slot in &mut self.slots {
            slot.is_available = self.is_open;
        }
        Ok(())
    }

    /// Flip one slot. Only meaningful on an open, non-Sunday day.
    pub fn toggle_slot(&mut self, time: &str) -> Result<(), ScheduleError> {
        let date = slots::parse_date(&self.date).ok_or(ScheduleError::BadDate)?;
        if slots::is_closed_weekday(date) {
            return Err(ScheduleError::ClosedWeekday);
        }
        if !self.is_open {
            return Err(ScheduleError::DayClosed);
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.time == time)
            .ok_or(ScheduleError::UnknownSlot)?;
        slot.is_available = !slot.is_available;
        Ok(())
    }

    /// Build a schedule from a client-supplied day (the replace-save body).
    /// Every listed time must be a fixed slot; missing slots take the day's
    /// default. A closed day is normalized to all-unavailable, matching the
    /// toggle semantics.
    pub fn from_parts(
        date: &str,
        is_open: bool,
        slots_in: &[SlotState],
    ) -> Result<Self, ScheduleError> {
        let parsed = slots::parse_date(date).ok_or(ScheduleError::BadDate)?;
        if slots::is_closed_weekday(parsed) {
            return Err(ScheduleError::ClosedWeekday);
        }
        for s in slots_in {
            if !slots::is_slot_start(&s.time) {
                return Err(ScheduleError::UnknownSlot);
            }
        }
        Ok(Self::full_grid(parsed, is_open, |time| {
            slots_in
                .iter()
                .find(|s| s.time == time)
                .map(|s| s.is_available)
                .unwrap_or(true)
        }))
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::parse_date;

    const MONDAY: &str = "2026-09-07";
    const SUNDAY: &str = "2026-09-06";

    fn override_row(time: &str, available: bool) -> SlotOverrideRow {
        SlotOverrideRow {
            consultant_id: 1,
            date: MONDAY.into(),
            start_time: time.into(),
            is_available: available,
        }
    }

    #[test]
    fn test_merge_defaults_open_with_all_slots() {
        let day = DaySchedule::merge(parse_date(MONDAY).unwrap(), None, &[]);
        assert!(day.is_open);
        assert_eq!(day.slots.len(), SLOT_STARTS.len());
        assert!(day.slots.iter().all(|s| s.is_available));
    }

    #[test]
    fn test_merge_applies_stored_flag() {
        let day = DaySchedule::merge(parse_date(MONDAY).unwrap(), Some(false), &[]);
        assert!(!day.is_open);
        assert!(day.slots.iter().all(|s| !s.is_available));
    }

    #[test]
    fn test_merge_applies_overrides() {
        let day = DaySchedule::merge(
            parse_date(MONDAY).unwrap(),
            Some(true),
            &[override_row("10:00", false)],
        );
        assert!(day.is_open);
        let ten = day.slots.iter().find(|s| s.time == "10:00").unwrap();
        assert!(!ten.is_available);
        assert_eq!(day.slots.iter().filter(|s| s.is_available).count(), 7);
    }

    #[test]
    fn test_merge_sunday_forced_closed_despite_stored_open() {
        // A contradicting stored row must not reopen a Sunday.
        let day = DaySchedule::merge(
            parse_date(SUNDAY).unwrap(),
            Some(true),
            &[override_row("10:00", true)],
        );
        assert!(!day.is_open);
        assert!(day.slots.iter().all(|s| !s.is_available));
    }

    #[test]
    fn test_toggle_open_closes_and_clears() {
        let mut day = DaySchedule::merge(parse_date(MONDAY).unwrap(), None, &[]);
        day.toggle_open().unwrap();
        assert!(!day.is_open);
        assert!(day.slots.iter().all(|s| !s.is_available));
    }

    #[test]
    fn test_toggle_open_reopens_with_full_reset() {
        // Reopening resets to all-available; it does not restore prior edits.
        let mut day = DaySchedule::merge(
            parse_date(MONDAY).unwrap(),
            Some(true),
            &[override_row("10:00", false)],
        );
        day.toggle_open().unwrap();
        day.toggle_open().unwrap();
        assert!(day.is_open);
        assert!(day.slots.iter().all(|s| s.is_available));
    }

    #[test]
    fn test_toggle_open_rejected_on_sunday() {
        let mut day = DaySchedule::merge(parse_date(SUNDAY).unwrap(), None, &[]);
        assert_eq!(day.toggle_open(), Err(ScheduleError::ClosedWeekday));
        assert!(!day.is_open);
    }

    #[test]
    fn test_toggle_slot_flips_one_slot() {
        let mut day = DaySchedule::merge(parse_date(MONDAY).unwrap(), None, &[]);
        day.toggle_slot("11:00").unwrap();
        assert!(!day.slots.iter().find(|s| s.time == "11:00").unwrap().is_available);
        day.toggle_slot("11:00").unwrap();
        assert!(day.slots.iter().find(|s| s.time == "11:00").unwrap().is_available);
    }

    #[test]
    fn test_toggle_slot_rejected_when_day_closed() {
        let mut day = DaySchedule::merge(parse_date(MONDAY).unwrap(), Some(false), &[]);
        assert_eq!(day.toggle_slot("11:00"), Err(ScheduleError::DayClosed));
    }

    #[test]
    fn test_toggle_slot_rejected_on_sunday() {
        let mut day = DaySchedule::merge(parse_date(SUNDAY).unwrap(), None, &[]);
        assert_eq!(day.toggle_slot("11:00"), Err(ScheduleError::ClosedWeekday));
    }

    #[test]
    fn test_toggle_slot_unknown_time() {
        let mut day = DaySchedule::merge(parse_date(MONDAY).unwrap(), None, &[]);
        assert_eq!(day.toggle_slot("08:30"), Err(ScheduleError::UnknownSlot));
    }

    #[test]
    fn test_from_parts_round_trips_slot_map() {
        let input = vec![
            SlotState { time: "09:00".into(), is_available: true },
            SlotState { time: "10:00".into(), is_available: false },
            SlotState { time: "11:00".into(), is_available: true },
        ];
        let day = DaySchedule::from_parts(MONDAY, true, &input).unwrap();
        assert!(day.is_open);
        assert!(!day.slots.iter().find(|s| s.time == "10:00").unwrap().is_available);
        // Unlisted slots default to available on an open day.
        assert!(day.slots.iter().find(|s| s.time == "15:00").unwrap().is_available);
    }

    #[test]
    fn test_from_parts_normalizes_closed_day() {
        let input = vec![SlotState { time: "09:00".into(), is_available: true }];
        let day = DaySchedule::from_parts(MONDAY, false, &input).unwrap();
        assert!(!day.is_open);
        assert!(day.slots.iter().all(|s| !s.is_available));
    }

    #[test]
    fn test_from_parts_rejects_sunday() {
        assert_eq!(
            DaySchedule::from_parts(SUNDAY, true, &[]),
            Err(ScheduleError::ClosedWeekday)
        );
    }

    #[test]
    fn test_from_parts_rejects_unknown_slot() {
        let input = vec![SlotState { time: "07:00".into(), is_available: true }];
        assert_eq!(
            DaySchedule::from_parts(MONDAY, true, &input),
            Err(ScheduleError::UnknownSlot)
        );
    }

    #[test]
    fn test_from_parts_rejects_bad_date() {
        assert_eq!(
            DaySchedule::from_parts("not-a-date", true, &[]),
            Err(ScheduleError::BadDate)
        );
    }
}
