//! Cloud Marketplace API
//!
//! HTTP gateway in front of the marketplace store. Every request except the
//! health check, the login redirects and the payment webhook carries a bearer
//! token issued by the identity provider; endpoint groups are further gated
//! by the permissions inside that token.
//!
//! ## Endpoints
//!
//! - `/api/cloud-user/*` - deployments, profile and quotes (`cloud-user`)
//! - `/api/cloud-provider/*` - provider registration and profile
//! - `/api/cloud-operator/*` - settings, pricing and moderation (`cloud-operator`)
//! - `/api/payments/*` - payment intents and the payment provider webhook
//! - `/api/auth/*` - login, callback, logout, session
//! - `GET /api/health` - Health check

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity_provider;
pub mod payments;
pub mod rate_limit;
pub mod validation;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use marketplace_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::auth::IdentityResolver;
use crate::identity_provider::IdentityProvider;
use crate::payments::{PaymentProvider, WebhookVerifier};
use crate::rate_limit::{FixedWindowLimiter, KeyScope};

/// Limiters applied to the whole API and to the sensitive route groups
#[derive(Clone)]
pub struct RateLimits {
    pub global: Arc<FixedWindowLimiter>,
    pub auth: Arc<FixedWindowLimiter>,
    pub payments: Arc<FixedWindowLimiter>,
}

impl RateLimits {
    /// `points` per `window` per client IP overall, fixed budgets for auth and payments
    pub fn new(points: u32, window: Duration) -> Self {
        Self {
            global: Arc::new(FixedWindowLimiter::new(points, window, KeyScope::Ip)),
            auth: Arc::new(FixedWindowLimiter::new(
                20,
                Duration::from_secs(60),
                KeyScope::IpAndPath,
            )),
            payments: Arc::new(FixedWindowLimiter::new(
                30,
                Duration::from_secs(60),
                KeyScope::IpAndPath,
            )),
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,

    /// Verifies bearer tokens
    pub identity: IdentityResolver,

    pub identity_provider: Arc<dyn IdentityProvider>,

    pub payments: Arc<dyn PaymentProvider>,

    pub webhooks: WebhookVerifier,

    pub limits: RateLimits,

    /// Browser origin for CORS and login redirects
    pub frontend_url: String,

    pub environment: String,

    /// Hide server error details
    pub production: bool,
}

fn cors(frontend_url: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(frontend_url) {
        Ok(origin) => origin,
        Err(err) => {
            warn!("FRONTEND_URL is not a valid origin ({}), CORS disabled", err);
            return CorsLayer::new();
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);
    let limits = state.limits.clone();

    Router::new()
        // Health check
        .route("/api/health", get(handlers::health::health_handler))
        // Dashboards
        .nest(
            "/api/cloud-user",
            handlers::cloud_user::router(state.clone()),
        )
        .nest(
            "/api/cloud-provider",
            handlers::cloud_provider::router(state.clone()),
        )
        .nest(
            "/api/cloud-operator",
            handlers::cloud_operator::router(state.clone()),
        )
        // Payments and login get their own, tighter budgets
        .nest(
            "/api/payments",
            handlers::payments::router(state.clone())
                .layer(from_fn_with_state(limits.payments, rate_limit::limit)),
        )
        .nest(
            "/api/auth",
            handlers::auth::router(state.clone())
                .layer(from_fn_with_state(limits.auth, rate_limit::limit)),
        )
        .fallback(handlers::not_found)
        // Middleware
        .layer(from_fn_with_state(limits.global, rate_limit::limit))
        .layer(from_fn_with_state(
            state.clone(),
            error::redact_server_errors,
        ))
        .layer(cors(&state.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
