//! Caller authentication
//!
//! Requests carry `Authorization: Bearer <token>`. The [`authenticate`]
//! middleware verifies the token against the identity provider's published
//! keys and stores the resulting [`IdentityContext`] in request extensions,
//! where [`Caller`] picks it up.

pub mod guard;
pub mod jwks;
pub mod resolver;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use marketplace_common::{Error, IdentityContext};
use std::sync::Arc;

use crate::error::ApiError;
use crate::AppState;

pub use jwks::{HttpKeySource, JwksCache, KeySource, StaticKeySource};
pub use resolver::IdentityResolver;

/// Token from an `Authorization` header, scheme matched case-insensitively
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the bearer token or answer 401
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| Error::Unauthorized("Missing bearer token".to_string()))?
        .to_string();

    let context = state.identity.resolve(&token).await?;
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

/// The authenticated caller of a handler
#[derive(Debug, Clone)]
pub struct Caller(pub IdentityContext);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<IdentityContext>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| Error::Unauthorized("Authentication required".to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&headers("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers("BEARER abc")), Some("abc"));
    }

    #[test]
    fn test_bearer_token_rejects_other_schemes() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer   ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
