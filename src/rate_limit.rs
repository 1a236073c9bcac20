//! Rate limiting for the credential endpoints.
//!
//! Uses a token bucket per client IP to slow down password guessing and
//! account spam.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use serde_json::json;
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Requests allowed per minute per client.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub login_per_minute: NonZeroU32,
    pub user_create_per_minute: NonZeroU32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login_per_minute: NonZeroU32::new(30).unwrap_or(NonZeroU32::MIN),
            user_create_per_minute: NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitConfig {
    pub login: Arc<IpLimiter>,
    pub user_create: Arc<IpLimiter>,
    pub trust_proxy: bool,
}

impl RateLimitConfig {
    pub fn new(limits: RateLimits, trust_proxy: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(Quota::per_minute(limits.login_per_minute))),
            user_create: Arc::new(RateLimiter::keyed(Quota::per_minute(
                limits.user_create_per_minute,
            ))),
            trust_proxy,
        }
    }
}

fn too_many(message: &'static str) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn client_key(request: &Request, trust_proxy: bool) -> String {
    let ip = client_ip(request, trust_proxy);
    // Callers with no known address share one bucket.
    if ip.is_empty() {
        "unknown".to_string()
    } else {
        ip
    }
}

/// Middleware for rate limiting login attempts.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request, config.trust_proxy);
    match config.login.check_key(&key) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(client_ip = %key, "Login rate limit exceeded");
            too_many("Too many login attempts. Please wait before trying again.")
        }
    }
}

/// Middleware for rate limiting user creation.
pub async fn rate_limit_user_create(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request, config.trust_proxy);
    match config.user_create.check_key(&key) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(client_ip = %key, "Signup rate limit exceeded");
            too_many("Too many signup attempts. Please wait before trying again.")
        }
    }
}
