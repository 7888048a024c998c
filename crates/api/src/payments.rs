//! Payment provider client and webhook signature verification

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use marketplace_common::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Signed events older or newer than this are rejected
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentIntentRequest {
    /// Smallest currency unit
    pub amount_cents: u64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_intent(&self, request: PaymentIntentRequest) -> Result<PaymentIntent>;
}

/// Stripe REST client
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.into(),
            base_url: STRIPE_API_BASE.to_string(),
        }
    }
}

fn intent_form(request: &PaymentIntentRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), request.amount_cents.to_string()),
        ("currency".to_string(), request.currency.to_lowercase()),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
    ];
    if let Some(description) = &request.description {
        form.push(("description".to_string(), description.clone()));
    }
    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
    form
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_payment_intent(&self, request: PaymentIntentRequest) -> Result<PaymentIntent> {
        let intent: PaymentIntent = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&intent_form(&request))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                warn!("Payment intent creation failed: {}", e);
                Error::Upstream(format!("Payment provider request failed: {e}"))
            })?
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Payment provider response invalid: {e}")))?;

        info!("Created payment intent {}", intent.id);
        Ok(intent)
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    Malformed,

    #[error("Signature timestamp outside tolerance")]
    Stale,

    #[error("No signature matches the payload")]
    Mismatch,
}

/// Verifies `Stripe-Signature` headers (`t=<unix>,v1=<hex hmac>`)
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    fn mac(&self, timestamp: &str, payload: &[u8]) -> std::result::Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Check `header` against `payload` at unix time `now`
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> std::result::Result<(), SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed);
        }

        let signed_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
        if (now - signed_at).abs() > self.tolerance_secs {
            return Err(SignatureError::Stale);
        }

        let mac = self.mac(timestamp, payload)?;
        let matched = signatures.iter().any(|signature| {
            hex::decode(signature)
                .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Build a header for `payload`, as the provider signs outgoing events
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> std::result::Result<String, SignatureError> {
        let signature = self.mac(&timestamp.to_string(), payload)?.finalize().into_bytes();
        Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
    }
}

/// The parts of a webhook event the marketplace reads
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,

    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

impl WebhookEvent {
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }

    /// `metadata.deploymentId` of the event object
    pub fn deployment_id(&self) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|metadata| metadata.get("deploymentId"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }
}
