//! Provider onboarding and the provider dashboard

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use marketplace_common::{assert_ownership, ContactInfo, Error, NodeDetails, ProviderRequest, Role};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::profile;
use crate::auth::{authenticate, guard::require_role, Caller};
use crate::error::{ApiError, ApiJson};
use crate::validation::{is_email, ResourcesInput, Violations, PROVIDER_LIMITS};
use crate::AppState;

/// Registration is open to any signed-in subject; the profile needs `cloud-provider`
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let dashboard = Router::new()
        .route(
            "/profile",
            get(get_profile_handler).put(update_profile_handler),
        )
        .route_layer(from_fn_with_state(Role::CloudProvider, require_role));

    Router::new()
        .route("/register", post(register_handler))
        .route("/requests/{id}", get(get_request_handler))
        .merge(dashboard)
        .route_layer(from_fn_with_state(state, authenticate))
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeDetailsInput {
    pub location: Option<String>,
    pub resources: Option<ResourcesInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactInput {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub node_details: Option<NodeDetailsInput>,
    pub contact_info: Option<ContactInput>,
}

impl RegisterRequest {
    fn validate(self) -> marketplace_common::Result<(NodeDetails, ContactInfo)> {
        let mut violations = Violations::new();
        let node = self.node_details.unwrap_or_default();
        let contact = self.contact_info.unwrap_or_default();

        let location = match node.location.map(|l| l.trim().to_string()) {
            Some(location) => violations
                .length(
                    "nodeDetails.location",
                    &location,
                    2,
                    100,
                    "Location must be between 2 and 100 characters",
                )
                .then_some(location),
            None => violations.require(None, "nodeDetails.location"),
        };

        let resources = node.resources.unwrap_or_default().validate(
            "nodeDetails.resources",
            PROVIDER_LIMITS,
            &mut violations,
        );

        let email = match contact.email.map(|e| e.trim().to_string()) {
            Some(email) => violations
                .check(is_email(&email), "contactInfo.email", "Email must be valid")
                .then_some(email),
            None => violations.require(None, "contactInfo.email"),
        };

        let phone = contact.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        if let Some(phone) = &phone {
            violations.length(
                "contactInfo.phone",
                phone,
                1,
                30,
                "Phone must be at most 30 characters",
            );
        }

        let ((location, resources), email) =
            violations.finish(location.zip(resources).zip(email))?;

        Ok((
            NodeDetails {
                location,
                resources,
            },
            ContactInfo { email, phone },
        ))
    }
}

/// Apply to become a provider; the request starts out pending
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (node_details, contact_info) = body.validate()?;

    let request = ProviderRequest::new(
        Uuid::new_v4().to_string(),
        caller.subject_id.clone(),
        node_details,
        contact_info,
    );
    let request = state.store.provider_requests.create(request).await?;

    info!(
        "Provider request {} submitted by {}",
        request.id, caller.subject_id
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "request": request,
            "message": "Provider request submitted successfully. You will be notified once your request is reviewed."
        })),
    ))
}

pub async fn get_request_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let request = state
        .store
        .provider_requests
        .get_by_id(&id)
        .await?
        .ok_or_else(|| Error::not_found("Provider request", &id))?;

    assert_ownership(&request, &caller)?;
    Ok(Json(json!({ "request": request })))
}

pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> Result<Json<Value>, ApiError> {
    let user = profile::load(&state, &caller.subject_id).await?;
    Ok(Json(json!({ "providerProfile": user })))
}

pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<profile::UpdateProfileRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = profile::update(&state, &caller.subject_id, body).await?;
    Ok(Json(json!({ "providerProfile": user })))
}
