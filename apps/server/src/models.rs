use serde::{Deserialize, Serialize};

use crate::schedule::SlotState;

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: i64,
    pub duration_min: i64,
    pub offers_remote: bool,
    pub offers_in_person: bool,
    pub remote_price_adjust: i64,
    pub in_person_price_adjust: i64,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlotOverrideRow {
    pub consultant_id: i64,
    pub date: String,
    pub start_time: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reservation {
    pub id: i64,
    pub client_id: i64,
    pub consultant_id: i64,
    pub service_id: i64,
    pub date: String,
    pub start_time: String,
    pub starts_at: String,
    pub duration_min: i64,
    pub mode: String,
    pub price: i64,
    pub status: String,
    pub payment_status: String,
    pub notes: String,
    pub created_at: String,
    pub cancelled_at: Option<String>,
}

// ── Delivery mode ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Remote,
    InPerson,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Remote => "remote",
            Mode::InPerson => "in_person",
        }
    }
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Defaults to the configured practice owner when absent.
    pub consultant_id: Option<i64>,
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub consultant_id: Option<i64>,
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub consultant_id: Option<i64>,
    pub service_id: i64,
    pub date: String,
    pub start_time: String,
    pub mode: Option<Mode>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub terms_accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleWindowQuery {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveScheduleRequest {
    pub is_open: bool,
    #[serde(default)]
    pub slots: Vec<SlotState>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleSlotRequest {
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct ReservationsQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DayAvailability {
    pub date: String,
    pub is_open: bool,
    pub slots: Vec<crate::slots::SlotView>,
}

#[derive(Debug, Serialize)]
pub struct CalendarDay {
    pub date: String,
    pub is_open: bool,
    pub free: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateReservationResponse {
    pub reservation_id: i64,
    pub status: String,
    pub price: i64,
    /// Payment handoff page; payment itself happens outside this server.
    pub payment_url: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReservationDetail {
    pub id: i64,
    pub service_name: String,
    pub client_id: i64,
    pub date: String,
    pub start_time: String,
    pub duration_min: i64,
    pub mode: String,
    pub price: i64,
    pub status: String,
    pub payment_status: String,
    pub notes: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationStatusResponse {
    pub status: String,
    pub payment_status: String,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
