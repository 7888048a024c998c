//! Cloud Marketplace API Service

use anyhow::{Context, Result};
use marketplace_api::{
    auth::{HttpKeySource, IdentityResolver, JwksCache},
    config::Config,
    create_router,
    identity_provider::Auth0Client,
    payments::{StripeClient, WebhookVerifier},
    AppState, RateLimits,
};
use marketplace_storage::Store;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "marketplace_api=debug,marketplace_storage=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cloud Marketplace API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Configuration loaded - environment {}, listening on {}",
        config.app_env,
        config.api_address()
    );

    let store = Store::connect(&config.store_backend)
        .await
        .context("Failed to open store")?;

    // Signing keys
    let keys = JwksCache::new(
        Arc::new(HttpKeySource::new(&config.auth0.domain)),
        config.jwks_cooldown,
    );
    match keys.refresh().await {
        Ok(count) => info!("Loaded {} signing keys", count),
        Err(e) => warn!("Initial signing key fetch failed, retrying on demand: {}", e),
    }
    let identity = IdentityResolver::new(keys, config.auth0.issuer(), config.auth0.audience.clone())
        .with_algorithms(config.token_algorithms.clone());

    let state = AppState {
        store,
        identity,
        identity_provider: Arc::new(Auth0Client::new(config.auth0.clone())),
        payments: Arc::new(StripeClient::new(config.stripe_secret_key.clone())),
        webhooks: WebhookVerifier::new(config.stripe_webhook_secret.clone()),
        limits: RateLimits::new(config.rate_limit_points, config.rate_limit_window),
        frontend_url: config.frontend_url.clone(),
        environment: config.app_env.clone(),
        production: config.is_production(),
    };

    let app = create_router(state);

    // Start server
    let listener = TcpListener::bind(&config.api_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_address()))?;

    info!("Cloud Marketplace API listening on {}", config.api_address());
    info!("Health check: http://{}/api/health", config.api_address());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
