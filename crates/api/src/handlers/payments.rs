//! Payment intents and payment provider webhooks

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    middleware::from_fn_with_state,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use marketplace_common::{DeploymentPatch, DeploymentStatus, Error, Result, Role};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{cloud_user::owned_deployment, profile};
use crate::auth::{authenticate, guard::require_role, Caller};
use crate::error::{ApiError, ApiJson};
use crate::payments::{PaymentIntentRequest, WebhookEvent};
use crate::validation::{is_currency_code, Violations};
use crate::AppState;

/// The webhook is public and authenticated by its signature instead
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let intents = Router::new()
        .route("/create-intent", post(create_intent_handler))
        .route_layer(from_fn_with_state(Role::CloudUser, require_role))
        .route_layer(from_fn_with_state(state, authenticate));

    Router::new()
        .route("/webhook", post(webhook_handler))
        .merge(intents)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub deployment_id: Option<String>,
}

impl CreateIntentRequest {
    /// Amount in cents and the lowercase currency code
    fn validate(&self) -> Result<(u64, String)> {
        let mut v = Violations::new();

        let cents = match self.amount {
            Some(amount) if amount.is_finite() && amount >= 0.5 => {
                Some((amount * 100.0).round() as u64)
            }
            Some(_) => {
                v.add("amount", "Amount must be at least 0.5");
                None
            }
            None => v.require(None, "amount"),
        };

        let currency = match self.currency.as_deref() {
            Some(code) if is_currency_code(code) => Some(code.to_lowercase()),
            Some(_) => {
                v.add("currency", "Currency must be a 3-letter code");
                None
            }
            None => v.require(None, "currency"),
        };

        if let Some(description) = &self.description {
            v.length(
                "description",
                description,
                0,
                255,
                "Description cannot exceed 255 characters",
            );
        }

        v.finish(cents.zip(currency))
    }
}

/// Start a payment for the caller, optionally tied to one of their deployments
pub async fn create_intent_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<CreateIntentRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let (amount_cents, currency) = body.validate()?;

    let deployment_id = body.deployment_id.filter(|id| !id.is_empty());
    if let Some(id) = &deployment_id {
        owned_deployment(&state, id, &caller).await?;
    }

    let user = profile::load(&state, &caller.subject_id).await?;

    let mut metadata = BTreeMap::new();
    metadata.insert("userId".to_string(), caller.subject_id.clone());
    metadata.insert("userEmail".to_string(), user.email);
    if let Some(id) = deployment_id {
        metadata.insert("deploymentId".to_string(), id);
    }

    let intent = state
        .payments
        .create_payment_intent(PaymentIntentRequest {
            amount_cents,
            currency,
            description: body.description,
            metadata,
        })
        .await?;

    info!(
        "Created payment intent {} for {}",
        intent.id, caller.subject_id
    );
    Ok(Json(json!({ "clientSecret": intent.client_secret })))
}

/// Move the deployment named in the event metadata, if the move is legal
async fn settle_deployment(state: &AppState, event: &WebhookEvent, next: DeploymentStatus) -> Result<()> {
    let Some(id) = event.deployment_id() else {
        warn!("{} event {} carries no deployment", event.kind, event.id);
        return Ok(());
    };

    let settled = state
        .store
        .deployments
        .update_if(
            id,
            &|current| {
                if current.status == next {
                    return Err(Error::InvalidTransition {
                        from: current.status.to_string(),
                        to: next.to_string(),
                    });
                }
                current.status.transition_to(next).map(|_| ())
            },
            DeploymentPatch::status(next),
        )
        .await;

    match settled {
        Ok(_) => {
            info!("Deployment {} is now {} after {}", id, next, event.kind);
            Ok(())
        }
        Err(Error::NotFound { .. }) => {
            warn!("{} event {} names unknown deployment {}", event.kind, event.id, id);
            Ok(())
        }
        Err(Error::InvalidTransition { from, .. }) => {
            info!("Deployment {} stays {} after {}", id, from, event.kind);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn dispatch(state: &AppState, event: &WebhookEvent) -> Result<()> {
    match event.kind.as_str() {
        "payment_intent.succeeded" => {
            info!("Payment {} succeeded", event.object_id().unwrap_or("unknown"));
            settle_deployment(state, event, DeploymentStatus::Active).await
        }
        "payment_intent.payment_failed" => {
            warn!("Payment {} failed", event.object_id().unwrap_or("unknown"));
            settle_deployment(state, event, DeploymentStatus::Failed).await
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            info!(
                "Subscription {} event: {}",
                event.object_id().unwrap_or("unknown"),
                event.kind
            );
            Ok(())
        }
        other => {
            info!("Unhandled event type: {}", other);
            Ok(())
        }
    }
}

/// Verify the signature over the raw body before anything is parsed
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<Value>, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Stripe signature"))?;

    if let Err(err) = state
        .webhooks
        .verify(&body, signature, Utc::now().timestamp())
    {
        warn!("Webhook signature verification failed: {}", err);
        return Err(ApiError::bad_request("Invalid signature"));
    }

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|err| {
        warn!("Unparseable webhook payload: {}", err);
        ApiError::bad_request("Invalid event payload")
    })?;

    dispatch(&state, &event).await?;

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_in_cents() {
        let request = CreateIntentRequest {
            amount: Some(19.99),
            currency: Some("EUR".to_string()),
            ..Default::default()
        };
        assert_eq!(request.validate().unwrap(), (1999, "eur".to_string()));
    }

    #[test]
    fn test_rejects_small_amounts_and_long_descriptions() {
        let request = CreateIntentRequest {
            amount: Some(0.49),
            currency: Some("usd".to_string()),
            description: Some("x".repeat(256)),
            deployment_id: None,
        };

        let Err(Error::Validation(list)) = request.validate() else {
            panic!("expected validation failure");
        };
        let fields: Vec<_> = list.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["amount", "description"]);
    }

    #[test]
    fn test_missing_fields() {
        let Err(Error::Validation(list)) = CreateIntentRequest::default().validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(list.len(), 2);
    }
}
