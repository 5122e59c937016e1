use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    Json,
};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    auth::{self, SessionUser},
    models::*,
    notify, slots, store,
    store::StoreError,
    AppState,
};

// ── Shared reservation query (used by consultant.rs too) ──

const RESERVATION_DETAIL_SELECT: &str =
    "SELECT r.id, s.name AS service_name, r.client_id, r.date, r.start_time,
            r.duration_min, r.mode, r.price, r.status, r.payment_status,
            r.notes, r.created_at
     FROM reservations r
     JOIN services s ON s.id = r.service_id";

pub fn reservation_detail_select() -> &'static str {
    RESERVATION_DETAIL_SELECT
}

// ── Helpers ──

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

/// Helper: extract the session user from the Authorization header.
pub fn extract_user(
    auth_header: Option<&str>,
    secret: &str,
) -> Result<SessionUser, HandlerError> {
    let header = auth_header.ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Missing Authorization header")),
        )
    })?;
    auth::extract_user_from_header(header, secret).ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("Invalid session token")),
        )
    })
}

pub fn utc_now_string() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Local commit preconditions — checked before any storage call. Returns the
/// parsed date on success.
fn check_commit_preconditions(req: &CreateReservationRequest) -> Result<NaiveDate, &'static str> {
    if !req.terms_accepted {
        return Err("Terms must be accepted before booking");
    }
    let date = slots::parse_date(&req.date).ok_or("Invalid date, expected YYYY-MM-DD")?;
    if !slots::is_slot_start(&req.start_time) {
        return Err("Invalid slot time");
    }
    if slots::is_closed_weekday(date) {
        return Err("Sundays are not bookable");
    }
    Ok(date)
}

/// Resolve the delivery mode: required when the service offers both,
/// auto-selected when it offers exactly one.
fn resolve_mode(service: &Service, requested: Option<Mode>) -> Result<Mode, &'static str> {
    match (service.offers_remote, service.offers_in_person) {
        (true, true) => requested.ok_or("Choose remote or in-person delivery"),
        (true, false) => match requested {
            None | Some(Mode::Remote) => Ok(Mode::Remote),
            Some(Mode::InPerson) => Err("This service is remote-only"),
        },
        (false, true) => match requested {
            None | Some(Mode::InPerson) => Ok(Mode::InPerson),
            Some(Mode::Remote) => Err("This service is in-person only"),
        },
        (false, false) => Err("This service has no delivery mode configured"),
    }
}

/// Base price plus the flat per-mode adjustment.
fn price_for(service: &Service, mode: Mode) -> i64 {
    match mode {
        Mode::Remote => service.price + service.remote_price_adjust,
        Mode::InPerson => service.price + service.in_person_price_adjust,
    }
}

async fn fetch_active_service(
    db: &sqlx::SqlitePool,
    id: i64,
) -> Result<Option<Service>, sqlx::Error> {
    sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = ? AND is_active = 1")
        .bind(id)
        .fetch_optional(db)
        .await
}

// ── Endpoints ──

/// GET /api/services — list active offerings.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Service>>>, StatusCode> {
    let services = sqlx::query_as::<_, Service>(
        "SELECT * FROM services WHERE is_active = 1 ORDER BY sort_order ASC",
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("list_services: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ApiResponse::success(services)))
}

/// GET /api/availability?consultant_id=N&date=YYYY-MM-DD — per-slot status
/// for one day: the merged schedule filtered by overrides, then by active
/// reservations.
pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<ApiResponse<DayAvailability>>, HandlerError> {
    let consultant_id = query.consultant_id.unwrap_or(state.consultant_id);
    let date = slots::parse_date(&query.date)
        .ok_or_else(|| bad_request("Invalid date, expected YYYY-MM-DD"))?;

    let day = store::load_day(&state.db, consultant_id, date)
        .await
        .map_err(|e| {
            tracing::error!("availability load_day: {}", e);
            db_error()
        })?;

    let reservations = store::reservations_for_day(&state.db, consultant_id, date)
        .await
        .map_err(|e| {
            tracing::error!("availability reservations: {}", e);
            db_error()
        })?;

    let views = slots::slot_statuses(&day, &reservations);

    Ok(Json(ApiResponse::success(DayAvailability {
        date: day.date.clone(),
        is_open: day.is_open,
        slots: views,
    })))
}

/// GET /api/calendar?consultant_id=N&year=2026&month=9 — per-day open flag
/// and free-slot count for a month. Bulk queries, no per-day round trips.
pub async fn calendar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<ApiResponse<Vec<CalendarDay>>>, HandlerError> {
    let consultant_id = query.consultant_id.unwrap_or(state.consultant_id);

    let first = NaiveDate::from_ymd_opt(query.year, query.month, 1)
        .ok_or_else(|| bad_request("Invalid year/month"))?;
    let last = {
        let (ny, nm) = if query.month == 12 {
            (query.year + 1, 1)
        } else {
            (query.year, query.month + 1)
        };
        NaiveDate::from_ymd_opt(ny, nm, 1)
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| bad_request("Invalid year/month"))?
    };

    let window = store::load_window(&state.db, consultant_id, first, last)
        .await
        .map_err(|e| {
            tracing::error!("calendar load_window: {}", e);
            db_error()
        })?;

    let month_reservations: Vec<Reservation> = sqlx::query_as(
        "SELECT * FROM reservations
         WHERE consultant_id = ? AND date BETWEEN ? AND ?",
    )
    .bind(consultant_id)
    .bind(first.format("%Y-%m-%d").to_string())
    .bind(last.format("%Y-%m-%d").to_string())
    .fetch_all(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("calendar reservations: {}", e);
        db_error()
    })?;

    let mut by_date: HashMap<String, Vec<Reservation>> = HashMap::new();
    for r in month_reservations {
        by_date.entry(r.date.clone()).or_default().push(r);
    }

    let empty = Vec::new();
    let days = window
        .iter()
        .map(|day| {
            let reservations = by_date.get(&day.date).unwrap_or(&empty);
            let views = slots::slot_statuses(day, reservations);
            CalendarDay {
                date: day.date.clone(),
                is_open: day.is_open,
                free: slots::bookable_times(&views).len() as i64,
            }
        })
        .collect();

    Ok(Json(ApiResponse::success(days)))
}

/// POST /api/bookings — commit a reservation for one slot.
pub async fn create_reservation(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<CreateReservationRequest>,
) -> Result<Json<ApiResponse<CreateReservationResponse>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_user(auth_header, &state.session_secret)?;

    // Local preconditions: nothing below runs unless these pass.
    let date = check_commit_preconditions(&body).map_err(bad_request)?;

    let consultant_id = body.consultant_id.unwrap_or(state.consultant_id);

    let service = fetch_active_service(&state.db, body.service_id)
        .await
        .map_err(|e| {
            tracing::error!("create_reservation service lookup: {}", e);
            db_error()
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("Service not found")),
            )
        })?;

    let mode = resolve_mode(&service, body.mode).map_err(bad_request)?;
    let price = price_for(&service, mode);

    // The unique index guards against a concurrent reservation, but not
    // against a closed day or a disabled slot — check the schedule here.
    let day = store::load_day(&state.db, consultant_id, date)
        .await
        .map_err(|e| {
            tracing::error!("create_reservation load_day: {}", e);
            db_error()
        })?;
    let slot_open = day.is_open
        && day
            .slots
            .iter()
            .any(|s| s.time == body.start_time && s.is_available);
    if !slot_open {
        return Err((
            StatusCode::CONFLICT,
            Json(ApiResponse::error("Slot is not open for booking")),
        ));
    }

    let new = store::NewReservation {
        client_id: user.id,
        consultant_id,
        service_id: service.id,
        date: body.date.clone(),
        start_time: body.start_time.clone(),
        duration_min: slots::SLOT_DURATION_MIN,
        mode: mode.as_str().to_string(),
        price,
        notes: body.notes.clone(),
        created_at: utc_now_string(),
    };

    let reservation_id = match store::insert_reservation(&state.db, &new).await {
        Ok(id) => id,
        Err(StoreError::SlotTaken) => {
            return Err((
                StatusCode::CONFLICT,
                Json(ApiResponse::error("Slot already booked")),
            ));
        }
        Err(StoreError::Db(e)) => {
            tracing::error!("create_reservation insert: {}", e);
            return Err(db_error());
        }
    };

    notify::send_event(
        &state.notify_webhook_url,
        "reservation_created",
        serde_json::json!({
            "reservation_id": reservation_id,
            "service": service.name,
            "date": body.date,
            "start_time": body.start_time,
            "mode": mode.as_str(),
            "price": price,
        }),
    )
    .await;

    Ok(Json(ApiResponse::success(CreateReservationResponse {
        reservation_id,
        status: "pending_payment".into(),
        price,
        payment_url: format!("{}/pay/{}", state.webapp_url, reservation_id),
    })))
}

/// GET /api/bookings/my — the client's upcoming reservations.
pub async fn my_reservations(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<Json<ApiResponse<Vec<ReservationDetail>>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_user(auth_header, &state.session_secret)?;

    let query = format!(
        "{} WHERE r.client_id = ? AND r.status != 'cancelled' AND r.date >= date('now')
         ORDER BY r.date ASC, r.start_time ASC",
        RESERVATION_DETAIL_SELECT
    );

    let reservations = sqlx::query_as::<_, ReservationDetail>(&query)
        .bind(user.id)
        .fetch_all(&state.db)
        .await
        .map_err(|e| {
            tracing::error!("my_reservations: {}", e);
            db_error()
        })?;

    Ok(Json(ApiResponse::success(reservations)))
}

/// DELETE /api/bookings/:id — the client cancels an upcoming reservation.
/// The slot frees itself: the bookable set only counts non-cancelled rows.
pub async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<&'static str>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_user(auth_header, &state.session_secret)?;

    let reservation = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations
         WHERE id = ? AND client_id = ?
         AND status IN ('pending_payment', 'pending', 'confirmed')",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("cancel_reservation lookup: {}", e);
        db_error()
    })?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Reservation not found")),
        )
    })?;

    sqlx::query(
        "UPDATE reservations SET status = 'cancelled', cancelled_at = datetime('now')
         WHERE id = ?",
    )
    .bind(id)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("cancel_reservation update: {}", e);
        db_error()
    })?;

    notify::send_event(
        &state.notify_webhook_url,
        "reservation_cancelled",
        serde_json::json!({
            "reservation_id": id,
            "date": reservation.date,
            "start_time": reservation.start_time,
            "by": "client",
        }),
    )
    .await;

    Ok(Json(ApiResponse::success("Reservation cancelled")))
}

/// GET /api/bookings/:id/status — poll reservation + payment status.
pub async fn reservation_status(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ReservationStatusResponse>>, HandlerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let user = extract_user(auth_header, &state.session_secret)?;

    let result = sqlx::query_as::<_, (String, String)>(
        "SELECT status, payment_status FROM reservations WHERE id = ? AND client_id = ?",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("reservation_status: {}", e);
        db_error()
    })?
    .ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Reservation not found")),
        )
    })?;

    Ok(Json(ApiResponse::success(ReservationStatusResponse {
        status: result.0,
        payment_status: result.1,
    })))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn service(remote: bool, in_person: bool) -> Service {
        Service {
            id: 1,
            name: "Strategy session".into(),
            description: String::new(),
            price: 15000,
            duration_min: 60,
            offers_remote: remote,
            offers_in_person: in_person,
            remote_price_adjust: -1000,
            in_person_price_adjust: 2500,
            is_active: true,
            sort_order: 1,
        }
    }

    fn request(date: &str, start: &str, terms: bool) -> CreateReservationRequest {
        CreateReservationRequest {
            consultant_id: None,
            service_id: 1,
            date: date.into(),
            start_time: start.into(),
            mode: Some(Mode::Remote),
            notes: String::new(),
            terms_accepted: terms,
        }
    }

    // ── resolve_mode ──

    #[test]
    fn test_mode_required_when_both_offered() {
        assert!(resolve_mode(&service(true, true), None).is_err());
    }

    #[test]
    fn test_mode_honored_when_both_offered() {
        assert_eq!(
            resolve_mode(&service(true, true), Some(Mode::InPerson)),
            Ok(Mode::InPerson)
        );
    }

    #[test]
    fn test_mode_auto_selected_when_single() {
        assert_eq!(resolve_mode(&service(true, false), None), Ok(Mode::Remote));
        assert_eq!(resolve_mode(&service(false, true), None), Ok(Mode::InPerson));
    }

    #[test]
    fn test_mode_not_offered_rejected() {
        assert!(resolve_mode(&service(true, false), Some(Mode::InPerson)).is_err());
        assert!(resolve_mode(&service(false, true), Some(Mode::Remote)).is_err());
    }

    #[test]
    fn test_mode_none_offered_rejected() {
        assert!(resolve_mode(&service(false, false), None).is_err());
    }

    // ── price_for ──

    #[test]
    fn test_price_applies_mode_adjustment() {
        let s = service(true, true);
        assert_eq!(price_for(&s, Mode::Remote), 14000);
        assert_eq!(price_for(&s, Mode::InPerson), 17500);
    }

    // ── commit preconditions (all local, no storage) ──

    #[test]
    fn test_preconditions_ok() {
        assert!(check_commit_preconditions(&request("2026-09-07", "11:00", true)).is_ok());
    }

    #[test]
    fn test_preconditions_reject_unaccepted_terms() {
        // Slot chosen, mode set — terms alone missing.
        assert!(check_commit_preconditions(&request("2026-09-07", "11:00", false)).is_err());
    }

    #[test]
    fn test_preconditions_reject_bad_date() {
        assert!(check_commit_preconditions(&request("07.09.2026", "11:00", true)).is_err());
    }

    #[test]
    fn test_preconditions_reject_off_table_slot() {
        assert!(check_commit_preconditions(&request("2026-09-07", "11:30", true)).is_err());
    }

    #[test]
    fn test_preconditions_reject_sunday() {
        assert!(check_commit_preconditions(&request("2026-09-06", "11:00", true)).is_err());
    }
}
