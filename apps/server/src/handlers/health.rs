use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub db_ok: bool,
    /// Reservations still waiting on payment (watched by the expiry task).
    pub pending_payment: i64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pending_payment: Option<i64> = sqlx::query_scalar(
        "SELECT COUNT(*) FROM reservations WHERE status = 'pending_payment'",
    )
    .fetch_one(&state.db)
    .await
    .ok();

    Json(HealthResponse {
        status: if pending_payment.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        db_ok: pending_payment.is_some(),
        pending_payment: pending_payment.unwrap_or(0),
    })
}
