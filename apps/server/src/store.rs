use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;

use crate::models::{Reservation, SlotOverrideRow};
use crate::schedule::DaySchedule;

/// Longest schedule window a single load may span (a bit over two months,
/// matching the editor's two-month calendar).
pub const MAX_WINDOW_DAYS: i64 = 92;

/// Unpaid reservations older than this are released.
const PENDING_PAYMENT_TTL_MIN: i64 = 15;

// ── Errors ──

/// Storage failures as the booking core sees them. The one database error
/// with domain meaning — the active-slot unique index firing — gets its own
/// variant so handlers can report a conflict instead of a generic failure.
#[derive(Debug)]
pub enum StoreError {
    SlotTaken,
    Db(sqlx::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::SlotTaken => f.write_str("slot already booked"),
            StoreError::Db(e) => write!(f, "database error: {}", e),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let unique = e
            .as_database_error()
            .map(|d| d.is_unique_violation())
            .unwrap_or(false);
        if unique {
            StoreError::SlotTaken
        } else {
            StoreError::Db(e)
        }
    }
}

// ── Schedule load/save ──

/// Load a merged `DaySchedule` for every date in `from..=to`. Dates without
/// stored rows come back as defaults (open except Sunday, all slots
/// available).
pub async fn load_window(
    db: &SqlitePool,
    consultant_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<DaySchedule>, sqlx::Error> {
    let day_rows: Vec<(String, bool)> = sqlx::query_as(
        "SELECT date, is_open FROM day_availability
         WHERE consultant_id = ? AND date BETWEEN ? AND ?",
    )
    .bind(consultant_id)
    .bind(from.format("%Y-%m-%d").to_string())
    .bind(to.format("%Y-%m-%d").to_string())
    .fetch_all(db)
    .await?;

    let overrides: Vec<SlotOverrideRow> = sqlx::query_as(
        "SELECT consultant_id, date, start_time, is_available FROM slot_overrides
         WHERE consultant_id = ? AND date BETWEEN ? AND ?
         ORDER BY date ASC, start_time ASC",
    )
    .bind(consultant_id)
    .bind(from.format("%Y-%m-%d").to_string())
    .bind(to.format("%Y-%m-%d").to_string())
    .fetch_all(db)
    .await?;

    let flags: HashMap<String, bool> = day_rows.into_iter().collect();
    let mut overrides_by_date: HashMap<String, Vec<SlotOverrideRow>> = HashMap::new();
    for row in overrides {
        overrides_by_date.entry(row.date.clone()).or_default().push(row);
    }

    let empty = Vec::new();
    let window = from
        .iter_days()
        .take_while(|d| *d <= to)
        .map(|date| {
            let key = date.format("%Y-%m-%d").to_string();
            DaySchedule::merge(
                date,
                flags.get(&key).copied(),
                overrides_by_date.get(&key).unwrap_or(&empty),
            )
        })
        .collect();

    Ok(window)
}

/// Load one merged day.
pub async fn load_day(
    db: &SqlitePool,
    consultant_id: i64,
    date: NaiveDate,
) -> Result<DaySchedule, sqlx::Error> {
    let key = date.format("%Y-%m-%d").to_string();

    let flag: Option<bool> = sqlx::query_scalar(
        "SELECT is_open FROM day_availability WHERE consultant_id = ? AND date = ?",
    )
    .bind(consultant_id)
    .bind(&key)
    .fetch_optional(db)
    .await?;

    let overrides: Vec<SlotOverrideRow> = sqlx::query_as(
        "SELECT consultant_id, date, start_time, is_available FROM slot_overrides
         WHERE consultant_id = ? AND date = ? ORDER BY start_time ASC",
    )
    .bind(consultant_id)
    .bind(&key)
    .fetch_all(db)
    .await?;

    Ok(DaySchedule::merge(date, flag, &overrides))
}

/// Persist one day's schedule: upsert the day flag, then replace the full
/// override set (store-all strategy — one row per fixed slot on an open day,
/// none for a closed day). Runs in a single transaction so a failure cannot
/// leave the flag and the overrides disagreeing.
pub async fn save_day(
    db: &SqlitePool,
    consultant_id: i64,
    day: &DaySchedule,
) -> Result<(), sqlx::Error> {
    let mut tx = db.begin().await?;

    sqlx::query(
        "INSERT INTO day_availability (consultant_id, date, is_open) VALUES (?, ?, ?)
         ON CONFLICT(consultant_id, date) DO UPDATE SET is_open = excluded.is_open",
    )
    .bind(consultant_id)
    .bind(&day.date)
    .bind(day.is_open)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM slot_overrides WHERE consultant_id = ? AND date = ?")
        .bind(consultant_id)
        .bind(&day.date)
        .execute(&mut *tx)
        .await?;

    if day.is_open {
        for slot in &day.slots {
            sqlx::query(
                "INSERT INTO slot_overrides (consultant_id, date, start_time, is_available)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(consultant_id)
            .bind(&day.date)
            .bind(&slot.time)
            .bind(slot.is_available)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await
}

// ── Reservations ──

/// All reservations for one consultant day, every status included; the
/// bookability pass skips cancelled ones itself.
pub async fn reservations_for_day(
    db: &SqlitePool,
    consultant_id: i64,
    date: NaiveDate,
) -> Result<Vec<Reservation>, sqlx::Error> {
    sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE consultant_id = ? AND date = ?
         ORDER BY start_time ASC",
    )
    .bind(consultant_id)
    .bind(date.format("%Y-%m-%d").to_string())
    .fetch_all(db)
    .await
}

pub struct NewReservation {
    pub client_id: i64,
    pub consultant_id: i64,
    pub service_id: i64,
    pub date: String,
    pub start_time: String,
    pub duration_min: i64,
    pub mode: String,
    pub price: i64,
    pub notes: String,
    pub created_at: String,
}

/// Insert a provisional reservation. The partial unique index on active
/// (non-cancelled) rows is the double-booking guard: a concurrent commit for
/// the same (consultant, date, start time) loses here and surfaces as
/// `SlotTaken` rather than a generic failure.
pub async fn insert_reservation(db: &SqlitePool, r: &NewReservation) -> Result<i64, StoreError> {
    let starts_at = format!("{} {}", r.date, r.start_time);
    let id = sqlx::query(
        "INSERT INTO reservations (client_id, consultant_id, service_id, date, start_time,
         starts_at, duration_min, mode, price, status, payment_status, notes, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending_payment', 'pending', ?, ?)",
    )
    .bind(r.client_id)
    .bind(r.consultant_id)
    .bind(r.service_id)
    .bind(&r.date)
    .bind(&r.start_time)
    .bind(&starts_at)
    .bind(r.duration_min)
    .bind(&r.mode)
    .bind(r.price)
    .bind(&r.notes)
    .bind(&r.created_at)
    .execute(db)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Release reservations whose payment window lapsed. Cancelling them frees
/// the slot under the partial unique index. Called from a background task;
/// errors are logged, the next tick retries.
pub async fn expire_stale_reservations(db: &SqlitePool) {
    let expired: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM reservations
         WHERE status = 'pending_payment'
         AND datetime(created_at, ?) < datetime('now')",
    )
    .bind(format!("+{} minutes", PENDING_PAYMENT_TTL_MIN))
    .fetch_all(db)
    .await
    .unwrap_or_default();

    for id in expired {
        tracing::info!("Releasing unpaid reservation {}", id);
        sqlx::query(
            "UPDATE reservations
             SET status = 'cancelled', payment_status = 'expired', cancelled_at = datetime('now')
             WHERE id = ? AND status = 'pending_payment'",
        )
        .bind(id)
        .execute(db)
        .await
        .ok();
    }
}

// ── Tests ──
