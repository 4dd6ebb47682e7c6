//! Per-user token buckets.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use sentra_core::models::UserInfo;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Buckets untouched for this long are dropped on the next access.
const IDLE_EVICTION: Duration = Duration::from_secs(30 * 60);

pub trait RateLimiter: Send + Sync {
    /// Take one token for `key`. On rejection returns the seconds until one is available.
    fn take(&self, key: &str, now: Instant) -> Result<(), u64>;
}

struct TokenBucket {
    tokens: f64,
    last: Instant,
}

/// In-process token buckets with continuous refill.
pub struct TokenBuckets {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rate_per_sec: f64,
    burst: f64,
}

impl TokenBuckets {
    pub fn new(requests_per_minute: u32, burst: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate_per_sec: f64::from(requests_per_minute.max(1)) / 60.0,
            burst: burst.max(1.0),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

impl RateLimiter for TokenBuckets {
    fn take(&self, key: &str, now: Instant) -> Result<(), u64> {
        // A poisoned lock fails open.
        let Ok(mut buckets) = self.buckets.lock() else {
            return Ok(());
        };

        buckets.retain(|_, b| now.saturating_duration_since(b.last) <= IDLE_EVICTION);

        let bucket = buckets.entry(key.to_string()).or_insert(TokenBucket {
            tokens: self.burst,
            last: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err((missing / self.rate_per_sec).ceil().max(1.0) as u64)
        }
    }
}

fn user_key(request: &Request) -> Result<String, ApiError> {
    request
        .extensions()
        .get::<UserInfo>()
        .map(|u| u.id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::Unauthorized)
}

fn check(limiter: &dyn RateLimiter, request: &Request) -> Result<(), ApiError> {
    let key = user_key(request)?;
    limiter.take(&key, Instant::now()).map_err(|retry_after_secs| {
        tracing::info!("rate limited user {} on {}", key, request.uri().path());
        ApiError::RateLimited { retry_after_secs }
    })
}

pub async fn limit_pushes(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check(state.push_limiter.as_ref(), &request)?;
    Ok(next.run(request).await)
}

pub async fn limit_registrations(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check(state.register_limiter.as_ref(), &request)?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let limiter = TokenBuckets::new(60, 3.0);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(limiter.take("u1", t0).is_ok());
        }
        assert_eq!(limiter.take("u1", t0), Err(1));
        // Other users have their own bucket.
        assert!(limiter.take("u2", t0).is_ok());
    }

    #[test]
    fn test_continuous_refill() {
        let limiter = TokenBuckets::new(60, 1.0);
        let t0 = Instant::now();
        assert!(limiter.take("u1", t0).is_ok());
        assert!(limiter.take("u1", t0 + Duration::from_millis(500)).is_err());
        assert!(limiter.take("u1", t0 + Duration::from_millis(1100)).is_ok());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        // 6 rpm: one token every ten seconds.
        let limiter = TokenBuckets::new(6, 1.0);
        let t0 = Instant::now();
        assert!(limiter.take("u1", t0).is_ok());
        assert_eq!(limiter.take("u1", t0 + Duration::from_secs(1)), Err(9));
    }

    #[test]
    fn test_idle_buckets_evicted() {
        let limiter = TokenBuckets::new(60, 1.0);
        let t0 = Instant::now();
        limiter.take("u1", t0).unwrap();
        limiter.take("u2", t0 + IDLE_EVICTION + Duration::from_secs(1)).unwrap();
        assert_eq!(limiter.len(), 1);
    }
}
