mod auth;
mod db;
mod handlers;
mod models;
mod notify;
mod rate_limit;
mod schedule;
mod slots;
mod store;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use rate_limit::{
    rate_limit_auth, rate_limit_booking, rate_limit_consultant, rate_limit_public, RateLimiter,
};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub session_secret: String,
    /// The practice owner; public endpoints default to this consultant.
    pub consultant_id: i64,
    pub started_at: Instant,
    pub webapp_url: String,
    pub notify_webhook_url: String,
}

/// Unpaid-reservation expiry check interval (seconds).
const RESERVATION_EXPIRY_INTERVAL_SECS: u64 = 300;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:praxis.db?mode=rwc".into());
    let session_secret = std::env::var("SESSION_SECRET").expect("SESSION_SECRET must be set");
    let consultant_id: i64 = std::env::var("CONSULTANT_ID")
        .expect("CONSULTANT_ID must be set")
        .parse()
        .expect("CONSULTANT_ID must be a number");

    // ── Tracing ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Optional env vars ──
    let webapp_url =
        std::env::var("WEBAPP_URL").unwrap_or_else(|_| "https://example.com".into());
    let notify_webhook_url = std::env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default();

    if notify_webhook_url.is_empty() {
        tracing::warn!("NOTIFY_WEBHOOK_URL not set — booking notifications disabled");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let state = Arc::new(AppState {
        db: pool,
        session_secret,
        consultant_id,
        started_at: Instant::now(),
        webapp_url: webapp_url.clone(),
        notify_webhook_url,
    });

    // ── Background task: release unpaid reservations ──
    let expire_db = state.db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
            RESERVATION_EXPIRY_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            store::expire_stale_reservations(&expire_db).await;
        }
    });

    // ── Rate limiter + cleanup task ──
    let rate_limiter = RateLimiter::new();
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if webapp_url != "https://example.com" {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:5173".parse().unwrap(), // Vite dev server
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (route groups with per-group rate limits) ──

    // 1. No-limit: health checks
    let no_limit_routes = Router::new().route("/api/health", get(handlers::health::health));

    // 2. Public: read-only endpoints (no auth, 60 req/min)
    let public_routes = Router::new()
        .route("/api/services", get(handlers::client::list_services))
        .route("/api/availability", get(handlers::client::availability))
        .route("/api/calendar", get(handlers::client::calendar))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_public));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/bookings", post(handlers::client::create_reservation))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_booking));

    // 4. Auth: authenticated client endpoints (30 req/min)
    let auth_routes = Router::new()
        .route("/api/bookings/my", get(handlers::client::my_reservations))
        .route(
            "/api/bookings/{id}",
            delete(handlers::client::cancel_reservation),
        )
        .route(
            "/api/bookings/{id}/status",
            get(handlers::client::reservation_status),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_auth));

    // 5. Consultant: availability editor + reservation management (120 req/min)
    let consultant_routes = Router::new()
        .route(
            "/api/consultant/schedule",
            get(handlers::consultant::get_schedule),
        )
        .route(
            "/api/consultant/schedule/{date}",
            put(handlers::consultant::put_schedule),
        )
        .route(
            "/api/consultant/schedule/{date}/toggle-day",
            post(handlers::consultant::toggle_day),
        )
        .route(
            "/api/consultant/schedule/{date}/toggle-slot",
            post(handlers::consultant::toggle_slot),
        )
        .route(
            "/api/consultant/reservations",
            get(handlers::consultant::list_reservations),
        )
        .route(
            "/api/consultant/reservations/{id}/mark-paid",
            post(handlers::consultant::mark_paid),
        )
        .route(
            "/api/consultant/reservations/{id}/confirm",
            post(handlers::consultant::confirm_reservation),
        )
        .route(
            "/api/consultant/reservations/{id}/complete",
            post(handlers::consultant::complete_reservation),
        )
        .route(
            "/api/consultant/reservations/{id}/no-show",
            post(handlers::consultant::no_show_reservation),
        )
        .route(
            "/api/consultant/reservations/{id}/cancel",
            post(handlers::consultant::cancel_reservation),
        )
        .layer(from_fn_with_state(
            rate_limiter.clone(),
            rate_limit_consultant,
        ));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(auth_routes)
        .merge(consultant_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Praxis server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
