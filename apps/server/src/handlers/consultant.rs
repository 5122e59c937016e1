use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    Json,
};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    auth::{self, SessionUser},
    models::*,
    notify,
    schedule::DaySchedule,
    slots, store, AppState,
};

use super::client::reservation_detail_select;

type HandlerError = (StatusCode, Json<ApiResponse<()>>);

fn bad_request(msg: impl Into<String>) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(msg)))
}

fn db_error() -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error("DB error")),
    )
}

/// Helper: extract a user allowed on the consultant surface.
fn extract_consultant(
    auth_header: Option<&str>,
    state: &AppState,
) -> Result<SessionUser, HandlerError> {
    let user = super::client::extract_user(auth_header, &state.session_secret)?;
    if !auth::is_consultant(&user) {
        return Err((
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error("Consultant access required")),
        ));
    }
    Ok(user)
}

fn parse_path_date(date: &str) -> Result<chrono::NaiveDate, HandlerError> {
    slots::parse_date(date).ok_or_else(|| bad_request("Invalid date, expected YYYY-MM-DD"))
}

/// Persist one edited day and hand it back.
async fn save_and_return(
    db: &SqlitePool,
    consultant_id: i64,
    day: DaySchedule,
) -> Result<Json<ApiResponse<DaySchedule>>, HandlerError> {
    store::save_day(db, consultant_id, &day).await.map_err(|e| {
        tracing::error!("save_day {}: {}", day.date, e);
        db_error()
    })?;
    Ok(Json(ApiResponse::success(day)))
}

// ── Availability editor ──

/// GET /api/consultant/schedule?from=YYYY-MM-DD&to=YYYY-MM-DD — merged
/// schedule for every date in the window (the editor shows two months).
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<ScheduleWindowQuery>,
) -> Result<Json<ApiResponse<Vec<DaySchedule>>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_consultant(auth_header, &state)?;

    let from = parse_path_date(&query.from)?;
    let to = parse_path_date(&query.to)?;
    if to < from {
        return Err(bad_request("'to' must not precede 'from'"));
    }
    if (to - from).num_days() >= store::MAX_WINDOW_DAYS {
        return Err(bad_request("Window too large"));
    }

    let window = store::load_window(&state.db, user.id, from, to)
        .await
        .map_err(|e| {
            tracing::error!("get_schedule: {}", e);
            db_error()
        })?;

    Ok(Json(ApiResponse::success(window)))
}

/// PUT /api/consultant/schedule/:date — replace one day's schedule.
pub async fn put_schedule(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(date): Path<String>,
    Json(body): Json<SaveScheduleRequest>,
) -> Result<Json<ApiResponse<DaySchedule>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_consultant(auth_header, &state)?;

    let day = DaySchedule::from_parts(&date, body.is_open, &body.slots)
        .map_err(|e| bad_request(e.to_string()))?;

    save_and_return(&state.db, user.id, day).await
}

/// POST /api/consultant/schedule/:date/toggle-day — flip open/closed.
pub async fn toggle_day(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(date): Path<String>,
) -> Result<Json<ApiResponse<DaySchedule>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_consultant(auth_header, &state)?;
    let parsed = parse_path_date(&date)?;

    let mut day = store::load_day(&state.db, user.id, parsed)
        .await
        .map_err(|e| {
            tracing::error!("toggle_day load: {}", e);
            db_error()
        })?;
    day.toggle_open().map_err(|e| bad_request(e.to_string()))?;

    save_and_return(&state.db, user.id, day).await
}

/// POST /api/consultant/schedule/:date/toggle-slot — flip one slot.
pub async fn toggle_slot(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(date): Path<String>,
    Json(body): Json<ToggleSlotRequest>,
) -> Result<Json<ApiResponse<DaySchedule>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_consultant(auth_header, &state)?;
    let parsed = parse_path_date(&date)?;

    let mut day = store::load_day(&state.db, user.id, parsed)
        .await
        .map_err(|e| {
            tracing::error!("toggle_slot load: {}", e);
            db_error()
        })?;
    day.toggle_slot(&body.time)
        .map_err(|e| bad_request(e.to_string()))?;

    save_and_return(&state.db, user.id, day).await
}

// ── Reservation management ──

/// GET /api/consultant/reservations — one day, a range, or upcoming.
pub async fn list_reservations(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Query(query): Query<ReservationsQuery>,
) -> Result<Json<ApiResponse<Vec<ReservationDetail>>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_consultant(auth_header, &state)?;

    let reservations = if let Some(date) = &query.date {
        let sql = format!(
            "{} WHERE r.consultant_id = ? AND r.date = ? AND r.status != 'cancelled'
             ORDER BY r.start_time ASC",
            reservation_detail_select()
        );
        sqlx::query_as::<_, ReservationDetail>(&sql)
            .bind(user.id)
            .bind(date)
            .fetch_all(&state.db)
            .await
    } else if let (Some(from), Some(to)) = (&query.from, &query.to) {
        let sql = format!(
            "{} WHERE r.consultant_id = ? AND r.date BETWEEN ? AND ? AND r.status != 'cancelled'
             ORDER BY r.date ASC, r.start_time ASC",
            reservation_detail_select()
        );
        sqlx::query_as::<_, ReservationDetail>(&sql)
            .bind(user.id)
            .bind(from)
            .bind(to)
            .fetch_all(&state.db)
            .await
    } else {
        let sql = format!(
            "{} WHERE r.consultant_id = ? AND r.date >= date('now') AND r.status != 'cancelled'
             ORDER BY r.date ASC, r.start_time ASC",
            reservation_detail_select()
        );
        sqlx::query_as::<_, ReservationDetail>(&sql)
            .bind(user.id)
            .fetch_all(&state.db)
            .await
    }
    .map_err(|e| {
        tracing::error!("list_reservations: {}", e);
        db_error()
    })?;

    Ok(Json(ApiResponse::success(reservations)))
}

/// Guarded status transition; returns false when the reservation is missing
/// or not in an allowed source state.
async fn transition(
    db: &SqlitePool,
    id: i64,
    consultant_id: i64,
    from: &[&str],
    to: &str,
) -> Result<bool, sqlx::Error> {
    let placeholders = vec!["?"; from.len()].join(", ");
    let sql = format!(
        "UPDATE reservations SET status = ?,
             cancelled_at = CASE WHEN ? = 'cancelled' THEN datetime('now') ELSE cancelled_at END
         WHERE id = ? AND consultant_id = ? AND status IN ({})",
        placeholders
    );

    let mut q = sqlx::query(&sql).bind(to).bind(to).bind(id).bind(consultant_id);
    for status in from {
        q = q.bind(*status);
    }

    Ok(q.execute(db).await?.rows_affected() > 0)
}

async fn apply_transition(
    state: &AppState,
    headers: &axum::http::HeaderMap,
    id: i64,
    from: &[&str],
    to: &'static str,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_consultant(auth_header, state)?;

    let changed = transition(&state.db, id, user.id, from, to)
        .await
        .map_err(|e| {
            tracing::error!("transition {} -> {}: {}", id, to, e);
            db_error()
        })?;

    if !changed {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Reservation not found or not in a valid state")),
        ));
    }

    Ok(Json(ApiResponse::success(to)))
}

/// POST /api/consultant/reservations/:id/mark-paid — record payment received
/// out of band (bank transfer); moves pending_payment → pending.
pub async fn mark_paid(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    let response = apply_transition(&state, &headers, id, &["pending_payment"], "pending").await?;
    sqlx::query("UPDATE reservations SET payment_status = 'paid' WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await
        .map_err(|e| {
            tracing::error!("mark_paid payment_status {}: {}", id, e);
            db_error()
        })?;
    Ok(response)
}

/// POST /api/consultant/reservations/:id/confirm — pending → confirmed.
pub async fn confirm_reservation(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    apply_transition(&state, &headers, id, &["pending"], "confirmed").await
}

/// POST /api/consultant/reservations/:id/complete — confirmed → completed.
pub async fn complete_reservation(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    apply_transition(&state, &headers, id, &["confirmed"], "completed").await
}

/// POST /api/consultant/reservations/:id/no-show — confirmed → no_show.
pub async fn no_show_reservation(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    apply_transition(&state, &headers, id, &["confirmed"], "no_show").await
}

/// POST /api/consultant/reservations/:id/cancel — any active state →
/// cancelled; frees the slot and notifies the webhook.
pub async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    let response = apply_transition(
        &state,
        &headers,
        id,
        &["pending_payment", "pending", "confirmed"],
        "cancelled",
    )
    .await?;

    notify::send_event(
        &state.notify_webhook_url,
        "reservation_cancelled",
        serde_json::json!({
            "reservation_id": id,
            "by": "consultant",
        }),
    )
    .await;

    Ok(response)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    const CONSULTANT: i64 = 1;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed_reservation(pool: &SqlitePool, start: &str) -> i64 {
        store::insert_reservation(
            pool,
            &store::NewReservation {
                client_id: 10,
                consultant_id: CONSULTANT,
                service_id: 1,
                date: "2026-09-07".into(),
                start_time: start.into(),
                duration_min: 60,
                mode: "remote".into(),
                price: 9000,
                notes: String::new(),
                created_at: "2026-09-01 10:00:00".into(),
            },
        )
        .await
        .unwrap()
    }

    async fn status_of(pool: &SqlitePool, id: i64) -> String {
        sqlx::query_scalar("SELECT status FROM reservations WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle_transitions() {
        let pool = test_pool().await;
        let id = seed_reservation(&pool, "10:00").await;

        assert!(transition(&pool, id, CONSULTANT, &["pending_payment"], "pending")
            .await
            .unwrap());
        assert!(transition(&pool, id, CONSULTANT, &["pending"], "confirmed")
            .await
            .unwrap());
        assert!(transition(&pool, id, CONSULTANT, &["confirmed"], "completed")
            .await
            .unwrap());
        assert_eq!(status_of(&pool, id).await, "completed");
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let pool = test_pool().await;
        let id = seed_reservation(&pool, "10:00").await;

        // Cannot confirm before payment.
        assert!(!transition(&pool, id, CONSULTANT, &["pending"], "confirmed")
            .await
            .unwrap());
        assert_eq!(status_of(&pool, id).await, "pending_payment");
    }

    #[tokio::test]
    async fn test_transition_scoped_to_consultant() {
        let pool = test_pool().await;
        let id = seed_reservation(&pool, "10:00").await;

        let other_consultant = 99;
        assert!(
            !transition(&pool, id, other_consultant, &["pending_payment"], "pending")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_cancel_sets_timestamp_and_frees_slot() {
        let pool = test_pool().await;
        let id = seed_reservation(&pool, "10:00").await;

        assert!(transition(
            &pool,
            id,
            CONSULTANT,
            &["pending_payment", "pending", "confirmed"],
            "cancelled"
        )
        .await
        .unwrap());

        let cancelled_at: Option<String> =
            sqlx::query_scalar("SELECT cancelled_at FROM reservations WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(cancelled_at.is_some());

        // The same slot can be booked again.
        assert!(seed_reservation(&pool, "10:00").await > id);
    }

    #[tokio::test]
    async fn test_non_cancel_transitions_leave_timestamp_empty() {
        let pool = test_pool().await;
        let id = seed_reservation(&pool, "10:00").await;

        transition(&pool, id, CONSULTANT, &["pending_payment"], "pending")
            .await
            .unwrap();

        let cancelled_at: Option<String> =
            sqlx::query_scalar("SELECT cancelled_at FROM reservations WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(cancelled_at.is_none());
    }
}
