//! Fixed-window request limiting per client
//!
//! Counters live in process memory, so limits hold per instance only.

use axum::{
    extract::{ConnectInfo, OriginalUri, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use marketplace_common::Error;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::ApiError;

/// Stale windows are swept once the table grows past this many keys
const PRUNE_THRESHOLD: usize = 10_000;

/// What a limiter counts against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    /// One bucket per client IP
    Ip,
    /// One bucket per client IP and request path
    IpAndPath,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Allows `points` requests per key in each `window`
#[derive(Debug)]
pub struct FixedWindowLimiter {
    points: u32,
    window: Duration,
    scope: KeyScope,
    counters: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(points: u32, window: Duration, scope: KeyScope) -> Self {
        Self {
            points,
            window,
            scope,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one point for `key`; `false` once the window is exhausted
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now())
    }

    fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);

        if counters.len() > PRUNE_THRESHOLD {
            counters.retain(|_, w| now.duration_since(w.started) < self.window);
        }

        let window = counters.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.points {
            return false;
        }

        window.count += 1;
        true
    }

    fn key_for(&self, request: &Request) -> String {
        let ip = client_ip(request);
        match self.scope {
            KeyScope::Ip => ip,
            KeyScope::IpAndPath => {
                let path = request
                    .extensions()
                    .get::<OriginalUri>()
                    .map_or_else(|| request.uri().path(), |uri| uri.path());
                format!("{ip}:{path}")
            }
        }
    }
}

/// First `X-Forwarded-For` entry, else the socket peer, else `unknown`
pub fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Reject requests over the limiter's budget with 429
pub async fn limit(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = limiter.key_for(&request);

    if !limiter.try_acquire(&key) {
        warn!("Rate limit exceeded for {}", key);
        return ApiError::from(Error::RateLimited).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http;

    #[test]
    fn test_budget_per_window() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60), KeyScope::Ip);
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.try_acquire_at("10.0.0.1", start));
        }
        assert!(!limiter.try_acquire_at("10.0.0.1", start));

        // Other clients are unaffected
        assert!(limiter.try_acquire_at("10.0.0.2", start));

        // A fresh window restores the budget
        let later = start + Duration::from_secs(60);
        assert!(limiter.try_acquire_at("10.0.0.1", later));
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let request = http::Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let mut request = http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), "unknown");

        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 4000))));
        assert_eq!(client_ip(&request), "192.168.1.5");
    }

    #[test]
    fn test_path_scoped_keys() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60), KeyScope::IpAndPath);
        let request = http::Request::builder()
            .uri("/api/auth/login")
            .header("x-forwarded-for", "198.51.100.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(limiter.key_for(&request), "198.51.100.1:/api/auth/login");
    }
}
