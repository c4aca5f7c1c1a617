//! Per-client token bucket in front of the webhook route.
//!
//! Clients are keyed by the first `x-forwarded-for` hop, falling back to a
//! shared bucket when the header is absent. The header is caller-controlled,
//! so the table is bounded: buckets that have refilled completely are
//! forgotten on each sweep, and once `max_clients` keys are tracked any new
//! key is charged against the shared bucket instead of getting its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dine_telemetry::{RequestOutcome, record_request};

use crate::config::RateLimitConfig;

pub const MAX_TRACKED_CLIENTS: usize = 10_000;

const FORWARDED_FOR: &str = "x-forwarded-for";
const SHARED_BUCKET: &str = "unknown";
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// Minimum spacing between sweeps forced by a full table.
const FULL_SWEEP_BACKOFF: Duration = Duration::from_secs(1);

struct Bucket {
    tokens: f64,
    updated: Instant,
}

struct Table {
    buckets: HashMap<String, Bucket>,
    swept_at: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    table: Arc<Mutex<Table>>,
    capacity: f64,
    per_sec: f64,
    max_clients: usize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_max_clients(config, MAX_TRACKED_CLIENTS)
    }

    pub fn with_max_clients(config: RateLimitConfig, max_clients: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                buckets: HashMap::new(),
                swept_at: Instant::now(),
            })),
            capacity: f64::from(config.cap),
            per_sec: f64::from(config.refill_per_sec),
            max_clients: max_clients.max(1),
        }
    }

    /// Takes one token for `client`; false when its bucket is empty.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    /// Keys currently held, the shared bucket included.
    pub fn tracked_clients(&self) -> usize {
        self.lock().buckets.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        // Bucket levels stay consistent even if a holder panicked.
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn level(&self, bucket: &Bucket, now: Instant) -> f64 {
        let earned = now.saturating_duration_since(bucket.updated).as_secs_f64() * self.per_sec;
        (bucket.tokens + earned).min(self.capacity)
    }

    fn check_at(&self, client: &str, now: Instant) -> bool {
        let mut table = self.lock();

        let since_sweep = now.saturating_duration_since(table.swept_at);
        let full = table.buckets.len() >= self.max_clients;
        if since_sweep >= SWEEP_INTERVAL || (full && since_sweep >= FULL_SWEEP_BACKOFF) {
            table
                .buckets
                .retain(|_, bucket| self.level(bucket, now) < self.capacity);
            table.swept_at = now;
        }

        let key = if table.buckets.contains_key(client) || table.buckets.len() < self.max_clients
        {
            client
        } else {
            SHARED_BUCKET
        };
        let capacity = self.capacity;
        let bucket = table.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            updated: now,
        });
        bucket.tokens = self.level(bucket, now);
        bucket.updated = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

fn client_key(req: &Request<Body>) -> &str {
    req.headers()
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(SHARED_BUCKET)
}

/// Middleware answering 429 once the caller's bucket is empty.
pub async fn throttle(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&req).to_string();
    if limiter.check(&client) {
        return next.run(req).await;
    }
    tracing::warn!(client = %client, "webhook rate limited");
    record_request(RequestOutcome::Throttled);
    StatusCode::TOO_MANY_REQUESTS.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware, routing::post};
    use tower::ServiceExt;

    fn limits(cap: u32, refill_per_sec: u32) -> RateLimitConfig {
        RateLimitConfig {
            cap,
            refill_per_sec,
        }
    }

    fn request(forwarded: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/line/webhook");
        if let Some(value) = forwarded {
            builder = builder.header(FORWARDED_FOR, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bucket_refills_continuously() {
        let limiter = RateLimiter::new(limits(2, 10));
        let t0 = Instant::now();
        assert!(limiter.check_at("client", t0));
        assert!(limiter.check_at("client", t0));
        assert!(!limiter.check_at("client", t0));
        // Half a token earned here carries over to the next check.
        assert!(!limiter.check_at("client", t0 + Duration::from_millis(50)));
        assert!(limiter.check_at("client", t0 + Duration::from_millis(110)));
    }

    #[test]
    fn buckets_are_isolated_per_client() {
        let limiter = RateLimiter::new(limits(1, 0));
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
        assert!(!limiter.check("a"));
        assert!(!limiter.check("b"));
    }

    #[test]
    fn spoofed_clients_cannot_grow_the_table() {
        let limiter = RateLimiter::with_max_clients(limits(5, 1), 100);
        let t0 = Instant::now();
        for i in 0..100_000 {
            limiter.check_at(&format!("spoofed-{i}"), t0);
        }
        assert!(
            limiter.tracked_clients() <= 101,
            "table grew to {}",
            limiter.tracked_clients()
        );
    }

    #[test]
    fn overflow_clients_share_one_bucket() {
        let limiter = RateLimiter::with_max_clients(limits(1, 0), 2);
        let t0 = Instant::now();
        assert!(limiter.check_at("a", t0));
        assert!(limiter.check_at("b", t0));
        assert!(limiter.check_at("c", t0));
        assert!(!limiter.check_at("d", t0));
        // Known clients keep their own buckets.
        assert!(!limiter.check_at("a", t0));
    }

    #[test]
    fn refilled_buckets_are_forgotten_on_sweep() {
        let limiter = RateLimiter::new(limits(2, 10));
        let t0 = Instant::now();
        assert!(limiter.check_at("idle", t0));
        assert!(limiter.check_at("busy", t0));
        assert_eq!(limiter.tracked_clients(), 2);

        let later = t0 + SWEEP_INTERVAL + Duration::from_secs(1);
        assert!(limiter.check_at("busy", later));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn client_key_uses_first_forwarded_hop() {
        assert_eq!(client_key(&request(Some("10.0.0.1, 172.16.0.9"))), "10.0.0.1");
        assert_eq!(client_key(&request(Some("  "))), SHARED_BUCKET);
        assert_eq!(client_key(&request(None)), SHARED_BUCKET);
    }

    #[tokio::test]
    async fn middleware_answers_429_once_bucket_is_empty() {
        let limiter = RateLimiter::new(limits(1, 0));
        let app = Router::new()
            .route("/line/webhook", post(|| async { StatusCode::OK }))
            .route_layer(middleware::from_fn_with_state(limiter, throttle));

        let first = app.clone().oneshot(request(Some("1.2.3.4"))).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.clone().oneshot(request(Some("1.2.3.4"))).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let other = app.oneshot(request(Some("5.6.7.8"))).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }
}
