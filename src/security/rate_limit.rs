//! Rate limiting middleware.
//!
//! A global bucket caps the whole server; per-method buckets cap individual
//! HTTP methods. Both have a burst of one request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::schema::RateLimitConfig;
use crate::observability::metrics;

const BURST: f64 = 1.0;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    refill_rate: f64,
}

impl TokenBucket {
    fn new(refill_rate: f64) -> Self {
        Self {
            tokens: BURST,
            last_update: Instant::now(),
            refill_rate,
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(BURST);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Shared limiter state.
#[derive(Debug)]
pub struct RateLimiterState {
    global: Option<Mutex<TokenBucket>>,
    per_method: HashMap<Method, Mutex<TokenBucket>>,
}

impl RateLimiterState {
    /// Build from configuration. Method names that do not parse are skipped;
    /// validation reports them.
    pub fn new(config: &RateLimitConfig) -> Self {
        let global = config.rate.map(|rate| Mutex::new(TokenBucket::new(rate as f64)));
        let per_method = config
            .methods
            .iter()
            .filter_map(|m| {
                let method = Method::from_bytes(m.method.to_ascii_uppercase().as_bytes()).ok()?;
                Some((method, Mutex::new(TokenBucket::new(m.rate as f64))))
            })
            .collect();
        Self { global, per_method }
    }

    /// Returns the name of the limiter that rejected the request, if any.
    pub fn check(&self, method: &Method) -> Option<&'static str> {
        if let Some(global) = &self.global {
            if !global.lock().unwrap_or_else(PoisonError::into_inner).try_acquire() {
                return Some("global");
            }
        }
        if let Some(bucket) = self.per_method.get(method) {
            if !bucket.lock().unwrap_or_else(PoisonError::into_inner).try_acquire() {
                return Some("method");
            }
        }
        None
    }
}

/// Middleware function for rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match state.check(request.method()) {
        None => next.run(request).await,
        Some(limiter) => {
            tracing::warn!(method = %request.method(), limiter, "Rate limit exceeded");
            metrics::record_rate_limited(limiter);
            (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::MethodRateLimit;

    #[test]
    fn global_bucket_has_burst_of_one() {
        let state = RateLimiterState::new(&RateLimitConfig {
            rate: Some(1),
            methods: vec![],
        });
        assert_eq!(state.check(&Method::GET), None);
        assert_eq!(state.check(&Method::GET), Some("global"));
    }

    #[test]
    fn per_method_buckets_are_independent() {
        let state = RateLimiterState::new(&RateLimitConfig {
            rate: None,
            methods: vec![MethodRateLimit {
                method: "put".into(),
                rate: 1,
            }],
        });
        assert_eq!(state.check(&Method::PUT), None);
        assert_eq!(state.check(&Method::PUT), Some("method"));
        assert_eq!(state.check(&Method::GET), None);
        assert_eq!(state.check(&Method::GET), None);
    }
}
