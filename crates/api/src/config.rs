//! Configuration management for the marketplace API
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use jsonwebtoken::Algorithm;
use marketplace_storage::StoreBackend;
use std::env;
use std::time::Duration;

/// Identity provider (Auth0 tenant) settings
#[derive(Debug, Clone, Default)]
pub struct Auth0Config {
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
    pub audience: String,
    pub callback_url: String,
}

impl Auth0Config {
    /// Issuer expected in access tokens
    pub fn issuer(&self) -> String {
        format!("https://{}/", self.domain)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// `development`, `production`, ...
    pub app_env: String,

    pub auth0: Auth0Config,

    /// Browser origin allowed by CORS and used for post-login redirects
    pub frontend_url: String,

    pub stripe_secret_key: String,

    pub stripe_webhook_secret: String,

    pub store_backend: StoreBackend,

    /// Minimum time between two key endpoint fetches
    pub jwks_cooldown: Duration,

    /// Signature algorithms accepted on access tokens
    pub token_algorithms: Vec<Algorithm>,

    /// Requests allowed per client IP per window
    pub rate_limit_points: u32,

    pub rate_limit_window: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),

            auth0: Auth0Config {
                domain: env::var("AUTH0_DOMAIN").unwrap_or_default(),
                client_id: env::var("AUTH0_CLIENT_ID").unwrap_or_default(),
                client_secret: env::var("AUTH0_CLIENT_SECRET").unwrap_or_default(),
                audience: env::var("AUTH0_AUDIENCE").unwrap_or_default(),
                callback_url: env::var("AUTH0_CALLBACK_URL")
                    .unwrap_or_else(|_| "http://localhost:3001/api/auth/callback".to_string()),
            },

            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),

            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),

            store_backend: parse_store_backend(
                &env::var("STORE_BACKEND").unwrap_or_else(|_| "redis".to_string()),
                env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            )?,

            jwks_cooldown: Duration::from_secs(
                env::var("JWKS_COOLDOWN_SECS")
                    .unwrap_or_else(|_| "12".to_string())
                    .parse()
                    .context("Invalid JWKS_COOLDOWN_SECS")?,
            ),

            token_algorithms: parse_algorithms(
                &env::var("AUTH0_TOKEN_ALGORITHMS").unwrap_or_else(|_| "RS256".to_string()),
            )?,

            rate_limit_points: env::var("RATE_LIMIT_POINTS")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_POINTS")?,

            rate_limit_window: Duration::from_secs(
                env::var("RATE_LIMIT_WINDOW_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("Invalid RATE_LIMIT_WINDOW_SECS")?,
            ),
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.rate_limit_points == 0 || self.rate_limit_window.is_zero() {
            anyhow::bail!("RATE_LIMIT_POINTS and RATE_LIMIT_WINDOW_SECS must be greater than 0");
        }

        if self.token_algorithms.is_empty() {
            anyhow::bail!("AUTH0_TOKEN_ALGORITHMS must name at least one algorithm");
        }

        if self.is_production() {
            let shared = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
            if self.token_algorithms.iter().any(|alg| shared.contains(alg)) {
                anyhow::bail!("Shared-secret token algorithms are not allowed in production");
            }

            let required = [
                ("AUTH0_DOMAIN", &self.auth0.domain),
                ("AUTH0_CLIENT_ID", &self.auth0.client_id),
                ("AUTH0_CLIENT_SECRET", &self.auth0.client_secret),
                ("AUTH0_AUDIENCE", &self.auth0.audience),
                ("STRIPE_SECRET_KEY", &self.stripe_secret_key),
                ("STRIPE_WEBHOOK_SECRET", &self.stripe_webhook_secret),
            ];
            for (name, value) in required {
                if value.is_empty() {
                    anyhow::bail!("{} is required in production", name);
                }
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

fn parse_algorithms(list: &str) -> Result<Vec<Algorithm>> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<Algorithm>()
                .with_context(|| format!("Unknown token algorithm '{}'", name))
        })
        .collect()
}

fn parse_store_backend(kind: &str, redis_url: String) -> Result<StoreBackend> {
    match kind.to_lowercase().as_str() {
        "redis" => Ok(StoreBackend::Redis { url: redis_url }),
        "memory" => Ok(StoreBackend::Memory),
        other => anyhow::bail!("Unknown STORE_BACKEND '{}' (expected redis or memory)", other),
    }
}
