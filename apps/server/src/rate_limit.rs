use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

// ── Tiers ──

/// Rate-limit tiers, one per route group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Read-only public endpoints.
    Public,
    /// Booking creation — strictest.
    Booking,
    /// Authenticated client endpoints.
    Auth,
    /// Consultant endpoints.
    Consultant,
}

impl Tier {
    /// (max requests, sliding window) for this tier.
    fn limit(self) -> (usize, Duration) {
        match self {
            Tier::Public => (60, Duration::from_secs(60)),
            Tier::Booking => (5, Duration::from_secs(300)),
            Tier::Auth => (30, Duration::from_secs(60)),
            Tier::Consultant => (120, Duration::from_secs(60)),
        }
    }
}

// ── Core limiter ──

/// In-memory per-IP sliding-window rate limiter.
///
/// One map keyed by (tier, ip); values are the timestamps of recent requests.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    hits: Arc<DashMap<(Tier, IpAddr), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a request from `ip` is allowed under `tier`.
    ///
    /// Returns `Ok(())` if allowed, `Err(retry_after_secs)` if rate limited.
    pub fn check(&self, tier: Tier, ip: IpAddr) -> Result<(), u64> {
        let (max_requests, window) = tier.limit();
        let now = Instant::now();
        let window_start = now - window;

        let mut entry = self.hits.entry((tier, ip)).or_default();
        entry.retain(|t| *t > window_start);

        if entry.len() >= max_requests {
            let oldest = entry[0];
            let retry_after = (oldest + window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }

    /// Drop entries idle for longer than twice their tier's window.
    /// Call periodically from a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(tier, _ip), timestamps| {
            let cutoff = tier.limit().1 * 2;
            timestamps.retain(|t| now.duration_since(*t) < cutoff);
            !timestamps.is_empty()
        });
    }
}

// ── IP extraction ──

/// Client IP from X-Forwarded-For (reverse proxy) or ConnectInfo.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| "127.0.0.1".parse().unwrap())
}

fn too_many_requests(retry_after: u64) -> Response {
    let body = ApiResponse::<()>::error(format!(
        "Too many requests. Try again in {} seconds",
        retry_after
    ));
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        Json(body),
    )
        .into_response()
}

async fn enforce(
    limiter: RateLimiter,
    tier: Tier,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let ip = client_ip(&req);
    limiter.check(tier, ip).map_err(too_many_requests)?;
    Ok(next.run(req).await)
}

// ── Middleware functions (one per tier) ──

pub async fn rate_limit_public(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Public, req, next).await
}

pub async fn rate_limit_booking(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Booking, req, next).await
}

pub async fn rate_limit_auth(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Auth, req, next).await
}

pub async fn rate_limit_consultant(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    enforce(limiter, Tier::Consultant, req, next).await
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check(Tier::Booking, test_ip(1)).is_ok());
        }
    }

    #[test]
    fn test_blocks_over_limit() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(Tier::Booking, test_ip(2)).unwrap();
        }
        let blocked = limiter.check(Tier::Booking, test_ip(2));
        assert!(blocked.is_err());
        assert!(blocked.unwrap_err() >= 1);
    }

    #[test]
    fn test_ips_tracked_independently() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(Tier::Booking, test_ip(3)).unwrap();
        }
        assert!(limiter.check(Tier::Booking, test_ip(4)).is_ok());
    }

    #[test]
    fn test_tiers_tracked_independently() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(Tier::Booking, test_ip(5)).unwrap();
        }
        assert!(limiter.check(Tier::Public, test_ip(5)).is_ok());
    }

    #[test]
    fn test_cleanup_keeps_live_entries() {
        let limiter = RateLimiter::new();
        limiter.check(Tier::Public, test_ip(6)).unwrap();
        limiter.cleanup();
        assert_eq!(limiter.hits.len(), 1);
    }
}
