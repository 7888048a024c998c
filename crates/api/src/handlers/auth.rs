//! Browser login flow and session introspection

use axum::{
    extract::State,
    middleware::from_fn_with_state,
    response::Redirect,
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use marketplace_common::{Error, User};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{authenticate, Caller};
use crate::error::{ApiError, ApiQuery};
use crate::identity_provider::UserInfo;
use crate::AppState;

/// `/session` and `/me` need a token; the redirect endpoints do not
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let session = Router::new()
        .route("/session", get(session_handler))
        .route("/me", get(me_handler))
        .route_layer(from_fn_with_state(state, authenticate));

    Router::new()
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        .route("/logout", get(logout_handler))
        .merge(session)
}

/// Round-tripped through the identity provider as the OAuth `state`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct LoginState {
    #[serde(default)]
    return_to: Option<String>,
}

impl LoginState {
    fn encode(&self) -> Result<String, Error> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// `candidate` when it stays on the frontend origin, else the frontend itself
fn safe_return_to(frontend_url: &str, candidate: Option<&str>) -> String {
    let base = frontend_url.trim_end_matches('/');

    match candidate {
        Some(url)
            if url == base
                || url
                    .strip_prefix(base)
                    .is_some_and(|rest| rest.starts_with(['/', '?', '#'])) =>
        {
            url.to_string()
        }
        Some(url) => {
            warn!("Ignoring return URL outside the frontend: {}", url);
            frontend_url.to_string()
        }
        None => frontend_url.to_string(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnParams {
    pub return_to: Option<String>,
}

/// Send the browser to the identity provider
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ReturnParams>,
) -> Result<Redirect, ApiError> {
    let login_state = LoginState {
        return_to: params.return_to.filter(|url| !url.is_empty()),
    }
    .encode()?;

    let url = state.identity_provider.authorize_url(&login_state)?;
    Ok(Redirect::to(&url))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

async fn ensure_user(state: &AppState, info: &UserInfo) -> Result<(), Error> {
    if state.store.users.get_by_id(&info.sub).await?.is_some() {
        return Ok(());
    }

    let user = User::new(
        info.sub.clone(),
        info.email.clone().unwrap_or_default(),
        info.display_name(),
        info.picture.clone(),
    );

    match state.store.users.create(user).await {
        Ok(_) => {
            info!("Created user record for {}", info.sub);
            Ok(())
        }
        Err(err @ Error::DuplicateKey { .. }) => {
            // A concurrent first login for the same subject is fine
            if state.store.users.get_by_id(&info.sub).await?.is_some() {
                return Ok(());
            }
            warn!("Could not create user record for {}: {}", info.sub, err);
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Finish the code flow and hand the tokens to the frontend in the URL fragment
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let (Some(code), Some(raw_state)) = (
        params.code.filter(|c| !c.is_empty()),
        params.state.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing required parameters"));
    };

    let login_state =
        LoginState::decode(&raw_state).ok_or_else(|| ApiError::bad_request("Invalid state parameter"))?;

    let tokens = state.identity_provider.exchange_code(&code).await?;
    let info = state
        .identity_provider
        .user_info(&tokens.access_token)
        .await?;
    ensure_user(&state, &info).await?;

    let target = safe_return_to(&state.frontend_url, login_state.return_to.as_deref());
    let target = target.split('#').next().unwrap_or_default();

    info!("Login completed for {}", info.sub);
    Ok(Redirect::to(&format!(
        "{}#access_token={}&id_token={}&expires_in={}",
        target,
        tokens.access_token,
        tokens.id_token.unwrap_or_default(),
        tokens.expires_in
    )))
}

/// End the identity provider session
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ReturnParams>,
) -> Result<Redirect, ApiError> {
    let return_to = safe_return_to(&state.frontend_url, params.return_to.as_deref());
    let url = state.identity_provider.logout_url(&return_to)?;
    Ok(Redirect::to(&url))
}

pub async fn session_handler(Caller(caller): Caller) -> Json<Value> {
    Json(json!({
        "authenticated": true,
        "user": caller
    }))
}

/// Identity provider profile next to the local user record
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<Value>, ApiError> {
    let identity_profile = state.identity_provider.get_user(&caller.subject_id).await?;
    let user_profile = state.store.users.get_by_id(&caller.subject_id).await?;

    Ok(Json(json!({
        "identityProfile": identity_profile,
        "userProfile": user_profile
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRONTEND: &str = "http://localhost:3000";

    #[test]
    fn test_login_state_round_trip() {
        let state = LoginState {
            return_to: Some("http://localhost:3000/dashboard".to_string()),
        };
        let encoded = state.encode().unwrap();
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        assert_eq!(LoginState::decode(&encoded), Some(state));
    }

    #[test]
    fn test_login_state_rejects_garbage() {
        assert_eq!(LoginState::decode("%%%"), None);
        assert_eq!(LoginState::decode(&URL_SAFE_NO_PAD.encode("not json")), None);
    }

    #[test]
    fn test_return_to_stays_on_frontend() {
        assert_eq!(
            safe_return_to(FRONTEND, Some("http://localhost:3000/deployments?page=2")),
            "http://localhost:3000/deployments?page=2"
        );
        assert_eq!(safe_return_to(FRONTEND, Some(FRONTEND)), FRONTEND);
        assert_eq!(safe_return_to(FRONTEND, None), FRONTEND);
    }

    #[test]
    fn test_return_to_rejects_lookalike_hosts() {
        assert_eq!(
            safe_return_to(FRONTEND, Some("http://localhost:3000.evil.com/")),
            FRONTEND
        );
        assert_eq!(safe_return_to(FRONTEND, Some("https://evil.com")), FRONTEND);
    }
}
