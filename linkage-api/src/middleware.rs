//! Rate Limiting Middleware
//!
//! Per-client request quotas backed by `governor`, one limiter per client
//! IP. Rejected requests get `429 Too Many Requests` with `Retry-After`.
//!
//! The limiter table is bounded: entries idle long enough to have fully
//! replenished are swept when the table fills, and clients arriving while it
//! is still full share a single overflow quota.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ApiConfig;
use crate::error::ApiError;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Longest gap between two sweeps of a full table.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Key for rate limiting.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    Ip(IpAddr),
    /// No peer address and no trusted proxy header; all such requests share a quota.
    Unknown,
    /// Shared by new clients while the limiter table is full.
    Overflow,
}

struct ClientLimiter {
    limiter: DirectRateLimiter,
    /// Milliseconds since `RateLimitState::epoch` of the last request.
    last_seen_ms: AtomicU64,
}

/// State for rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<ApiConfig>,
    limiters: Arc<DashMap<RateLimitKey, Arc<ClientLimiter>>>,
    epoch: Instant,
    last_sweep_ms: Arc<AtomicU64>,
}

impl RateLimitState {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config: Arc::new(config),
            limiters: Arc::new(DashMap::new()),
            epoch: Instant::now(),
            last_sweep_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn quota(&self) -> Quota {
        Quota::per_minute(NonZeroU32::new(self.config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(self.config.rate_limit_burst).unwrap_or(NonZeroU32::MIN))
    }

    /// After this long without requests a limiter is back at full burst and
    /// indistinguishable from a fresh one.
    fn idle_after(&self) -> Duration {
        let quota = self.quota();
        quota
            .replenish_interval()
            .saturating_mul(quota.burst_size().get())
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn limiter_for(&self, key: RateLimitKey) -> (RateLimitKey, Arc<ClientLimiter>) {
        let now = self.now_ms();

        if let Some(existing) = self.limiters.get(&key) {
            existing.last_seen_ms.store(now, Ordering::Relaxed);
            return (key, Arc::clone(existing.value()));
        }

        let max_clients = self.config.rate_limit_max_clients.max(1);
        let key = if self.limiters.len() < max_clients || self.sweep_idle(now) < max_clients {
            key
        } else {
            tracing::debug!(client = ?key, max_clients, "Limiter table full, using overflow quota");
            RateLimitKey::Overflow
        };

        let entry = self
            .limiters
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(ClientLimiter {
                    limiter: RateLimiter::direct(self.quota()),
                    last_seen_ms: AtomicU64::new(now),
                })
            })
            .clone();
        entry.last_seen_ms.store(now, Ordering::Relaxed);
        (key, entry)
    }

    /// Drop fully replenished limiters. Runs at most once per sweep interval;
    /// returns the table size afterwards.
    fn sweep_idle(&self, now: u64) -> usize {
        let idle_after = self.idle_after();
        let interval = u64::try_from(idle_after.min(MAX_SWEEP_INTERVAL).as_millis())
            .unwrap_or(u64::MAX);
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval
            || self
                .last_sweep_ms
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
        {
            return self.limiters.len();
        }

        let idle_ms = u64::try_from(idle_after.as_millis()).unwrap_or(u64::MAX);
        let before = self.limiters.len();
        self.limiters.retain(|_, client| {
            now.saturating_sub(client.last_seen_ms.load(Ordering::Relaxed)) < idle_ms
        });
        let after = self.limiters.len();
        if after < before {
            tracing::debug!(evicted = before - after, remaining = after, "Swept idle rate limiters");
        }
        after
    }

    /// Number of limiters currently held.
    pub fn tracked_clients(&self) -> usize {
        self.limiters.len()
    }
}

/// Error type for rate limit middleware.
#[derive(Debug)]
pub struct RateLimitError {
    /// Seconds until the client may retry
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let error = ApiError::too_many_requests(Some(self.retry_after));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(error)).into_response();
        response.headers_mut().insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );
        response
    }
}

/// Client address. With `trust_proxy` the first `X-Forwarded-For` hop wins,
/// then `X-Real-IP`; otherwise, and as the fallback, the connection peer.
pub fn extract_client_ip(request: &Request, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        if let Some(ip) = forwarded_ip(request) {
            return Some(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn forwarded_ip(request: &Request) -> Option<IpAddr> {
    let headers = request.headers();

    if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(Ok(ip)) = forwarded_for.split(',').next().map(|ip| ip.trim().parse()) {
            return Some(ip);
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|h| h.to_str().ok()) {
        if let Ok(ip) = real_ip.trim().parse() {
            return Some(ip);
        }
    }

    None
}

/// Rate limiting middleware.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.config.rate_limit_enabled {
        return Ok(next.run(request).await);
    }

    let key = extract_client_ip(&request, state.config.rate_limit_trust_proxy)
        .map(RateLimitKey::Ip)
        .unwrap_or(RateLimitKey::Unknown);
    let (key, client) = state.limiter_for(key);

    match client.limiter.check() {
        Ok(_) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(state.config.rate_limit_per_minute),
            );
            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1);
            tracing::warn!(client = ?key, retry_after, "Rate limit exceeded");
            Err(RateLimitError { retry_after })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
