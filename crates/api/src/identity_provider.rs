//! Identity provider client (OAuth code flow, profile lookups)

use async_trait::async_trait;
use marketplace_common::{Error, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Auth0Config;

/// Tokens returned by the authorization-code exchange
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,

    #[serde(default)]
    pub id_token: Option<String>,

    #[serde(default)]
    pub expires_in: u64,
}

/// OpenID Connect `/userinfo` profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub nickname: Option<String>,

    #[serde(default)]
    pub picture: Option<String>,
}

impl UserInfo {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.nickname.clone())
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.sub.clone())
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start a login
    fn authorize_url(&self, state: &str) -> Result<String>;

    /// Where to send the browser to end the provider session
    fn logout_url(&self, return_to: &str) -> Result<String>;

    async fn exchange_code(&self, code: &str) -> Result<TokenSet>;

    async fn user_info(&self, access_token: &str) -> Result<UserInfo>;

    /// Full profile from the management API
    async fn get_user(&self, subject_id: &str) -> Result<Value>;
}

struct ManagementToken {
    value: String,
    expires_at: Instant,
}

/// Auth0 tenant client
pub struct Auth0Client {
    http: reqwest::Client,
    config: Auth0Config,
    management_token: Mutex<Option<ManagementToken>>,
}

fn upstream(context: &str) -> impl FnOnce(reqwest::Error) -> Error + '_ {
    move |e| {
        warn!("{}: {}", context, e);
        Error::Upstream(format!("{context}: {e}"))
    }
}

impl Auth0Client {
    pub fn new(config: Auth0Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            management_token: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}{}", self.config.domain, path)
    }

    /// Client-credentials token for the management API, cached until shortly before expiry
    async fn management_token(&self) -> Result<String> {
        let mut cached = self.management_token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting management API token");
        let tokens: TokenSet = self
            .http
            .post(self.url("/oauth/token"))
            .json(&json!({
                "grant_type": "client_credentials",
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "audience": self.url("/api/v2/"),
            }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(upstream("Management token request failed"))?
            .json()
            .await
            .map_err(upstream("Management token response invalid"))?;

        let lifetime = Duration::from_secs(tokens.expires_in.saturating_sub(60));
        *cached = Some(ManagementToken {
            value: tokens.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(tokens.access_token)
    }
}

#[async_trait]
impl IdentityProvider for Auth0Client {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.url("/authorize"),
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.callback_url.as_str()),
                ("scope", "openid profile email"),
                ("audience", self.config.audience.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| Error::Upstream(format!("Invalid identity provider URL: {e}")))?;

        Ok(url.into())
    }

    fn logout_url(&self, return_to: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.url("/v2/logout"),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("returnTo", return_to),
            ],
        )
        .map_err(|e| Error::Upstream(format!("Invalid identity provider URL: {e}")))?;

        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        let tokens = self
            .http
            .post(self.url("/oauth/token"))
            .json(&json!({
                "grant_type": "authorization_code",
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "code": code,
                "redirect_uri": self.config.callback_url,
            }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(upstream("Code exchange failed"))?
            .json()
            .await
            .map_err(upstream("Code exchange response invalid"))?;

        info!("Exchanged authorization code");
        Ok(tokens)
    }

    async fn user_info(&self, access_token: &str) -> Result<UserInfo> {
        self.http
            .get(self.url("/userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(upstream("User info request failed"))?
            .json()
            .await
            .map_err(upstream("User info response invalid"))
    }

    async fn get_user(&self, subject_id: &str) -> Result<Value> {
        let token = self.management_token().await?;

        let mut url = Url::parse(&self.url("/api/v2/users"))
            .map_err(|e| Error::Upstream(format!("Invalid identity provider URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::Upstream("Invalid identity provider URL".to_string()))?
            .push(subject_id);

        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(upstream("Management API user lookup failed"))?
            .json()
            .await
            .map_err(upstream("Management API response invalid"))
    }
}
