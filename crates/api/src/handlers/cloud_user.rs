//! Cloud user dashboard: deployments, profile and price quotes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use marketplace_common::{
    assert_ownership, Deployment, DeploymentPatch, DeploymentStatus, Error, IdentityContext,
    Result, Role,
};
use marketplace_storage::DeploymentFilter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{listing, profile, ListParams};
use crate::auth::{authenticate, guard::require_role, Caller};
use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::validation::{BillingInput, ResourcesInput, Violations, DEPLOYMENT_LIMITS};
use crate::AppState;

/// Every route needs the `cloud-user` role
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/deployments",
            get(list_deployments_handler).post(create_deployment_handler),
        )
        .route(
            "/deployments/{id}",
            get(get_deployment_handler)
                .put(update_deployment_handler)
                .delete(delete_deployment_handler),
        )
        .route(
            "/profile",
            get(get_profile_handler).put(update_profile_handler),
        )
        .route("/pricing/quote", get(quote_handler))
        .route_layer(from_fn_with_state(Role::CloudUser, require_role))
        .route_layer(from_fn_with_state(state, authenticate))
}

/// A deployment that exists and belongs to the caller
pub async fn owned_deployment(
    state: &AppState,
    id: &str,
    caller: &IdentityContext,
) -> Result<Deployment> {
    let deployment = state
        .store
        .deployments
        .get_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("Deployment", id))?;

    assert_ownership(&deployment, caller)?;
    Ok(deployment)
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateDeploymentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub resources: Option<ResourcesInput>,
    pub billing: Option<BillingInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateDeploymentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub resources: Option<ResourcesInput>,
    pub billing: Option<BillingInput>,
}

fn check_name(violations: &mut Violations, name: &str) {
    violations.length(
        "name",
        name,
        3,
        50,
        "Name must be between 3 and 50 characters",
    );
}

fn check_description(violations: &mut Violations, description: &str) {
    violations.length(
        "description",
        description,
        0,
        500,
        "Description must be at most 500 characters",
    );
}

/// Create a deployment owned by the caller
pub async fn create_deployment_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<CreateDeploymentRequest>,
) -> std::result::Result<(StatusCode, Json<Value>), ApiError> {
    let mut violations = Violations::new();

    let name = violations
        .require(body.name, "name")
        .map(|name| name.trim().to_string());
    if let Some(name) = &name {
        check_name(&mut violations, name);
    }
    if let Some(description) = &body.description {
        check_description(&mut violations, description);
    }

    let resources = match &body.resources {
        Some(input) => input.validate("resources", DEPLOYMENT_LIMITS, &mut violations),
        None => violations.require(None, "resources"),
    };
    let billing = match &body.billing {
        Some(input) => input.validate("billing", &mut violations),
        None => violations.require(None, "billing"),
    };

    let ((name, resources), billing) = violations.finish(name.zip(resources).zip(billing))?;

    let deployment = Deployment::new(
        Uuid::new_v4().to_string(),
        caller.subject_id.clone(),
        name,
        body.description.filter(|d| !d.is_empty()),
        resources,
        billing,
    );
    let deployment = state.store.deployments.create(deployment).await?;

    info!(
        "Created deployment {} for {}",
        deployment.id, caller.subject_id
    );
    Ok((StatusCode::CREATED, Json(json!({ "deployment": deployment }))))
}

/// The caller's deployments, oldest first
pub async fn list_deployments_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiQuery(params): ApiQuery<ListParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let request = params.page_request()?;

    let page = state
        .store
        .deployments
        .list(&DeploymentFilter::Owner(caller.subject_id), &request)
        .await?;

    Ok(listing("deployments", page, &request)?)
}

pub async fn get_deployment_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> std::result::Result<Json<Value>, ApiError> {
    let deployment = owned_deployment(&state, &id, &caller).await?;
    Ok(Json(json!({ "deployment": deployment })))
}

/// Partial update; the owner never changes
pub async fn update_deployment_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<UpdateDeploymentRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let mut violations = Violations::new();

    let name = body.name.map(|name| name.trim().to_string());
    if let Some(name) = &name {
        check_name(&mut violations, name);
    }
    if let Some(description) = &body.description {
        check_description(&mut violations, description);
    }

    let status = match body.status.as_deref().map(str::parse::<DeploymentStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(message)) => {
            violations.add("status", message);
            None
        }
        None => None,
    };
    let resources = body
        .resources
        .as_ref()
        .and_then(|input| input.validate("resources", DEPLOYMENT_LIMITS, &mut violations));
    let billing = body
        .billing
        .as_ref()
        .and_then(|input| input.validate("billing", &mut violations));

    violations.into_result()?;

    owned_deployment(&state, &id, &caller).await?;

    let deployment = state
        .store
        .deployments
        .update_if(
            &id,
            &|current| match status {
                Some(next) => current.status.transition_to(next).map(|_| ()),
                None => Ok(()),
            },
            DeploymentPatch {
                name,
                description: body.description,
                status,
                resources,
                billing,
            },
        )
        .await?;

    Ok(Json(json!({ "deployment": deployment })))
}

pub async fn delete_deployment_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> std::result::Result<Json<Value>, ApiError> {
    owned_deployment(&state, &id, &caller).await?;

    if !state.store.deployments.delete(&id).await? {
        return Err(Error::not_found("Deployment", id).into());
    }

    info!("Deleted deployment {} for {}", id, caller.subject_id);
    Ok(Json(json!({
        "success": true,
        "message": "Deployment deleted successfully"
    })))
}

pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> std::result::Result<Json<Value>, ApiError> {
    let user = profile::load(&state, &caller.subject_id).await?;
    Ok(Json(json!({ "profile": user })))
}

pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<profile::UpdateProfileRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let user = profile::update(&state, &caller.subject_id, body).await?;
    Ok(Json(json!({ "profile": user })))
}

#[derive(Debug, Default, Deserialize)]
pub struct QuoteParams {
    pub cpu: Option<i64>,
    pub memory: Option<i64>,
    pub storage: Option<i64>,
    pub stake: Option<f64>,
}

/// Monthly price for a resource bundle at the caller's stake
pub async fn quote_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QuoteParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let mut violations = Violations::new();

    let resources = ResourcesInput {
        cpu: params.cpu,
        memory: params.memory,
        storage: params.storage,
    }
    .validate("", DEPLOYMENT_LIMITS, &mut violations);

    let stake = params.stake.unwrap_or(0.0);
    violations.check(
        stake.is_finite() && stake >= 0.0,
        "stake",
        "Stake must be a non-negative number",
    );

    let resources = violations.finish(resources)?;
    let pricing = state.store.pricing.get().await?.unwrap_or_default();

    Ok(Json(json!({ "quote": pricing.quote(&resources, stake) })))
}
