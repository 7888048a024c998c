//! Bearer token verification

use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, Validation};
use marketplace_common::{Error, IdentityContext, Result};
use serde::Deserialize;
use tracing::debug;

use super::jwks::JwksCache;

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,

    #[serde(default)]
    permissions: Vec<String>,
}

/// Turns a signed access token into an [`IdentityContext`]
pub struct IdentityResolver {
    keys: JwksCache,
    issuer: String,
    audience: String,
    /// Accepted signature algorithms, RS256 unless configured otherwise
    algorithms: Vec<Algorithm>,
}

impl IdentityResolver {
    pub fn new(keys: JwksCache, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            algorithms: vec![Algorithm::RS256],
        }
    }

    pub fn with_algorithms(mut self, algorithms: impl Into<Vec<Algorithm>>) -> Self {
        self.algorithms = algorithms.into();
        self
    }

    pub fn keys(&self) -> &JwksCache {
        &self.keys
    }

    /// Verify signature, audience, issuer and expiry
    pub async fn resolve(&self, token: &str) -> Result<IdentityContext> {
        let header = decode_header(token)
            .map_err(|e| Error::Unauthorized(format!("Malformed token: {e}")))?;

        if !self.algorithms.contains(&header.alg) {
            debug!("Rejected token signed with {:?}", header.alg);
            return Err(Error::Unauthorized(
                "Token algorithm is not accepted".to_string(),
            ));
        }

        let kid = header
            .kid
            .ok_or_else(|| Error::Unauthorized("Token does not name a signing key".to_string()))?;

        let signing = self.keys.key(&kid).await?;
        if header.alg != signing.algorithm {
            return Err(Error::Unauthorized(
                "Token algorithm does not match its signing key".to_string(),
            ));
        }

        let mut validation = Validation::new(signing.algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "aud", "iss"]);

        let data = decode::<AccessClaims>(token, &signing.key, &validation).map_err(|e| {
            debug!("Rejected token: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => Error::Unauthorized("Token expired".to_string()),
                _ => Error::Unauthorized("Invalid token".to_string()),
            }
        })?;

        Ok(IdentityContext::new(
            data.claims.sub,
            data.claims.permissions,
        ))
    }
}
