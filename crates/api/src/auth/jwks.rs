//! Signing key discovery with a cooldown-limited cache

use async_trait::async_trait;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use marketplace_common::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Where published signing keys come from
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet>;
}

/// Upper bound on one key endpoint round trip
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches the tenant's `/.well-known/jwks.json`
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(domain: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("https://{domain}/.well-known/jwks.json"),
        }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet> {
        debug!("Fetching signing keys from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Error::Upstream(format!("Key endpoint request failed: {e}")))?;

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::Upstream(format!("Key endpoint returned invalid JSON: {e}")))
    }
}

/// A fixed key set
pub struct StaticKeySource {
    keys: JwkSet,
}

impl StaticKeySource {
    pub fn new(keys: JwkSet) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<JwkSet> {
        Ok(self.keys.clone())
    }
}

/// A verification key and the only algorithm it may be used with
#[derive(Clone)]
pub struct SigningKey {
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

struct CacheState {
    keys: HashMap<String, SigningKey>,
    last_refresh: Option<Instant>,
}

/// Process-wide `kid -> key` cache.
///
/// An unknown `kid` triggers a refetch, at most once per cooldown.
pub struct JwksCache {
    source: Arc<dyn KeySource>,
    cooldown: Duration,
    state: RwLock<CacheState>,
}

impl JwksCache {
    pub fn new(source: Arc<dyn KeySource>, cooldown: Duration) -> Self {
        Self {
            source,
            cooldown,
            state: RwLock::new(CacheState {
                keys: HashMap::new(),
                last_refresh: None,
            }),
        }
    }

    /// Load the key set now, returning how many usable keys it held
    pub async fn refresh(&self) -> Result<usize> {
        self.state.write().await.last_refresh = Some(Instant::now());
        self.reload().await
    }

    /// Key for `kid`, refetching the key set if allowed.
    ///
    /// The fetch runs without holding the cache lock, so lookups of known
    /// keys never wait on the key endpoint.
    pub async fn key(&self, kid: &str) -> Result<SigningKey> {
        if let Some(key) = self.state.read().await.keys.get(kid) {
            return Ok(key.clone());
        }

        {
            let mut state = self.state.write().await;

            // Another request may have refreshed while we waited for the lock
            if let Some(key) = state.keys.get(kid) {
                return Ok(key.clone());
            }

            let cooling_down = state
                .last_refresh
                .is_some_and(|at| at.elapsed() < self.cooldown);
            if cooling_down {
                debug!("Unknown key id {} during refresh cooldown", kid);
                return Err(unknown_key());
            }

            // Claim the refresh; concurrent misses now see the cooldown
            state.last_refresh = Some(Instant::now());
        }

        self.reload().await?;
        self.state
            .read()
            .await
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(unknown_key)
    }

    async fn reload(&self) -> Result<usize> {
        let set = self.source.fetch().await?;
        let keys: HashMap<String, SigningKey> = set
            .keys
            .iter()
            .filter_map(|jwk| {
                let kid = jwk.common.key_id.clone()?;
                match signing_key(jwk) {
                    Some(key) => Some((kid, key)),
                    None => {
                        warn!("Skipping unusable signing key {}", kid);
                        None
                    }
                }
            })
            .collect();

        let count = keys.len();
        self.state.write().await.keys = keys;

        info!("Loaded {} signing key(s)", count);
        Ok(count)
    }
}

fn unknown_key() -> Error {
    Error::Unauthorized("Unknown signing key".to_string())
}

fn signing_key(jwk: &Jwk) -> Option<SigningKey> {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return None;
    }

    let algorithm = match jwk.common.key_algorithm {
        Some(alg) => signature_algorithm(alg)?,
        None => match jwk.algorithm {
            AlgorithmParameters::RSA(_) => Algorithm::RS256,
            AlgorithmParameters::EllipticCurve(_) => Algorithm::ES256,
            AlgorithmParameters::OctetKey(_) => Algorithm::HS256,
            AlgorithmParameters::OctetKeyPair(_) => Algorithm::EdDSA,
        },
    };

    let key = DecodingKey::from_jwk(jwk).ok()?;
    Some(SigningKey { key, algorithm })
}

fn signature_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        // Encryption-only algorithms
        _ => None,
    }
}
