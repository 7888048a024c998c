//! Platform administration for operators

use axum::{
    extract::{Path, State},
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use marketplace_common::{
    DiscountTier, Error, OperatorSettings, PricingConfiguration, ProviderRequestPatch,
    ProviderRequestStatus, Result, Role, UnitPrice,
};
use marketplace_storage::{DeploymentFilter, ProviderRequestFilter, UserFilter};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{listing, ListParams};
use crate::auth::{authenticate, guard::require_role, Caller};
use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::validation::{field, is_currency_code, is_http_url, Violations};
use crate::AppState;

/// Every route needs the `cloud-operator` role
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/settings", get(get_settings_handler).put(update_settings_handler))
        .route("/pricing", get(get_pricing_handler).put(update_pricing_handler))
        .route("/provider-requests", get(list_provider_requests_handler))
        .route(
            "/provider-requests/{id}",
            get(get_provider_request_handler).put(update_provider_request_handler),
        )
        .route("/users", get(list_users_handler))
        .route("/deployments", get(list_deployments_handler))
        .route_layer(from_fn_with_state(Role::CloudOperator, require_role))
        .route_layer(from_fn_with_state(state, authenticate))
}

fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(digits) => {
            matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRequest {
    pub dashboard_title: Option<String>,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub featured_apps: Option<Vec<String>>,
    pub maintenance_mode: Option<bool>,
}

impl SettingsRequest {
    fn validate(self) -> Result<OperatorSettings> {
        let mut v = Violations::new();

        let title = v
            .require(self.dashboard_title.map(|t| t.trim().to_string()), "dashboardTitle")
            .filter(|title| {
                v.length(
                    "dashboardTitle",
                    title,
                    1,
                    100,
                    "Dashboard title must be between 1 and 100 characters",
                )
            });
        let logo = v
            .require(self.logo_url, "logoUrl")
            .filter(|url| v.check(is_http_url(url), "logoUrl", "Logo URL must be an http(s) URL"));
        let primary = v.require(self.primary_color, "primaryColor").filter(|color| {
            v.check(
                is_hex_color(color),
                "primaryColor",
                "Primary color must be a hex color",
            )
        });
        let secondary = v.require(self.secondary_color, "secondaryColor").filter(|color| {
            v.check(
                is_hex_color(color),
                "secondaryColor",
                "Secondary color must be a hex color",
            )
        });

        let (((dashboard_title, logo_url), primary_color), secondary_color) =
            v.finish(title.zip(logo).zip(primary).zip(secondary))?;

        Ok(OperatorSettings {
            dashboard_title,
            logo_url,
            primary_color,
            secondary_color,
            featured_apps: self.featured_apps.unwrap_or_default(),
            maintenance_mode: self.maintenance_mode.unwrap_or(false),
            updated_at: Some(Utc::now()),
        })
    }
}

pub async fn get_settings_handler(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<Value>, ApiError> {
    let settings = state.store.settings.get().await?.unwrap_or_default();
    Ok(Json(json!({ "settings": settings })))
}

pub async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<SettingsRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let settings = state.store.settings.put(body.validate()?).await?;

    info!("Operator settings updated by {}", caller.subject_id);
    Ok(Json(json!({ "settings": settings })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPriceInput {
    pub price_per_unit: Option<f64>,
    pub currency: Option<String>,
}

impl UnitPriceInput {
    fn validate(&self, prefix: &str, v: &mut Violations) -> Option<UnitPrice> {
        let price = self
            .price_per_unit
            .filter(|p| p.is_finite() && *p >= 0.0);
        if price.is_none() {
            v.add(field(prefix, "pricePerUnit"), "Price must be a non-negative number");
        }

        let currency = self
            .currency
            .as_deref()
            .filter(|c| is_currency_code(c))
            .map(str::to_uppercase);
        if currency.is_none() {
            v.add(field(prefix, "currency"), "Currency must be a 3-letter code");
        }

        Some(UnitPrice {
            price_per_unit: price?,
            currency: currency?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountTierInput {
    pub name: Option<String>,
    pub discount_percent: Option<f64>,
    pub minimum_stake: Option<f64>,
}

impl DiscountTierInput {
    fn validate(&self, prefix: &str, v: &mut Violations) -> Option<DiscountTier> {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        if name.is_none() {
            v.add(field(prefix, "name"), "Tier name is required");
        }

        let discount = self
            .discount_percent
            .filter(|d| (0.0..=100.0).contains(d));
        if discount.is_none() {
            v.add(
                field(prefix, "discountPercent"),
                "Discount must be between 0 and 100",
            );
        }

        let stake = self.minimum_stake.filter(|s| s.is_finite() && *s >= 0.0);
        if stake.is_none() {
            v.add(
                field(prefix, "minimumStake"),
                "Minimum stake must be a non-negative number",
            );
        }

        Some(DiscountTier::new(name?, discount?, stake?))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRequest {
    pub cpu: Option<UnitPriceInput>,
    pub memory: Option<UnitPriceInput>,
    pub storage: Option<UnitPriceInput>,
    pub discount_tiers: Option<Vec<DiscountTierInput>>,
}

impl PricingRequest {
    fn validate(self) -> Result<PricingConfiguration> {
        let mut v = Violations::new();

        let cpu = self.cpu.unwrap_or_default().validate("cpu", &mut v);
        let memory = self.memory.unwrap_or_default().validate("memory", &mut v);
        let storage = self.storage.unwrap_or_default().validate("storage", &mut v);

        // Quotes are priced in a single currency
        if let Some(base) = &cpu {
            for (name, price) in [("memory", &memory), ("storage", &storage)] {
                if price.as_ref().is_some_and(|p| p.currency != base.currency) {
                    v.add(field(name, "currency"), "Currency must match cpu.currency");
                }
            }
        }

        let tiers = v.require(self.discount_tiers, "discountTiers").map(|tiers| {
            tiers
                .iter()
                .enumerate()
                .filter_map(|(i, tier)| tier.validate(&format!("discountTiers[{i}]"), &mut v))
                .collect::<Vec<_>>()
        });

        let (((cpu, memory), storage), discount_tiers) =
            v.finish(cpu.zip(memory).zip(storage).zip(tiers))?;

        Ok(PricingConfiguration {
            cpu,
            memory,
            storage,
            discount_tiers,
            updated_at: Some(Utc::now()),
        })
    }
}

pub async fn get_pricing_handler(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Json<Value>, ApiError> {
    let pricing = state.store.pricing.get().await?.unwrap_or_default();
    Ok(Json(json!({ "pricing": pricing })))
}

pub async fn update_pricing_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<PricingRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let pricing = state.store.pricing.put(body.validate()?).await?;

    info!("Pricing configuration updated by {}", caller.subject_id);
    Ok(Json(json!({ "pricing": pricing })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProviderRequestParams {
    pub status: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// `pending` when absent, every request for `all`
fn status_filter(status: Option<&str>) -> Result<ProviderRequestFilter> {
    match status.filter(|s| !s.is_empty()) {
        None => Ok(ProviderRequestFilter::Status(ProviderRequestStatus::Pending)),
        Some("all") => Ok(ProviderRequestFilter::All),
        Some(raw) => raw
            .parse()
            .map(ProviderRequestFilter::Status)
            .map_err(|message: String| Error::invalid("status", message)),
    }
}

pub async fn list_provider_requests_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ProviderRequestParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let request = ListParams {
        page: params.page,
        limit: params.limit,
    }
    .page_request()?;
    let filter = status_filter(params.status.as_deref())?;

    let page = state.store.provider_requests.list(&filter, &request).await?;
    Ok(listing("requests", page, &request)?)
}

pub async fn get_provider_request_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> std::result::Result<Json<Value>, ApiError> {
    let request = state
        .store
        .provider_requests
        .get_by_id(&id)
        .await?
        .ok_or_else(|| Error::not_found("Provider request", &id))?;

    Ok(Json(json!({ "request": request })))
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    pub status: Option<String>,
}

/// Approve or reject a pending request
pub async fn update_provider_request_handler(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<DecisionRequest>,
) -> std::result::Result<Json<Value>, ApiError> {
    let mut v = Violations::new();
    let status = match v.require(body.status, "status") {
        Some(raw) => match raw.parse::<ProviderRequestStatus>() {
            Ok(status) => Some(status),
            Err(message) => {
                v.add("status", message);
                None
            }
        },
        None => None,
    };
    let status = v.finish(status)?;

    let request = state
        .store
        .provider_requests
        .update_if(
            &id,
            &|current| current.status.transition_to(status).map(|_| ()),
            ProviderRequestPatch {
                status: Some(status),
            },
        )
        .await?;

    info!(
        "Provider request {} marked {} by {}",
        id, status, caller.subject_id
    );
    Ok(Json(json!({
        "request": request,
        "message": format!("Provider request {status}")
    })))
}

pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let request = params.page_request()?;
    let page = state.store.users.list(&UserFilter::All, &request).await?;
    Ok(listing("users", page, &request)?)
}

pub async fn list_deployments_handler(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> std::result::Result<Json<Value>, ApiError> {
    let request = params.page_request()?;
    let page = state
        .store
        .deployments
        .list(&DeploymentFilter::All, &request)
        .await?;
    Ok(listing("deployments", page, &request)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_colors() {
        assert!(is_hex_color("#3498db"));
        assert!(is_hex_color("#FFF"));
        assert!(!is_hex_color("3498db"));
        assert!(!is_hex_color("#3498dg"));
        assert!(!is_hex_color("#12345"));
    }

    #[test]
    fn test_settings_require_display_fields() {
        let Err(Error::Validation(list)) = SettingsRequest::default().validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(list.len(), 4);

        let settings = SettingsRequest {
            dashboard_title: Some("Marketplace".to_string()),
            logo_url: Some("https://cdn.example.com/logo.svg".to_string()),
            primary_color: Some("#112233".to_string()),
            secondary_color: Some("#abc".to_string()),
            featured_apps: None,
            maintenance_mode: Some(true),
        }
        .validate()
        .unwrap();
        assert!(settings.maintenance_mode);
        assert!(settings.featured_apps.is_empty());
        assert!(settings.updated_at.is_some());
    }

    #[test]
    fn test_pricing_violations_name_the_tier() {
        let request = PricingRequest {
            cpu: Some(UnitPriceInput {
                price_per_unit: Some(4.0),
                currency: Some("usd".to_string()),
            }),
            memory: Some(UnitPriceInput {
                price_per_unit: Some(-1.0),
                currency: Some("USD".to_string()),
            }),
            storage: Some(UnitPriceInput {
                price_per_unit: Some(0.05),
                currency: Some("USD".to_string()),
            }),
            discount_tiers: Some(vec![
                DiscountTierInput {
                    name: Some("Base".to_string()),
                    discount_percent: Some(0.0),
                    minimum_stake: Some(0.0),
                },
                DiscountTierInput {
                    name: Some(" ".to_string()),
                    discount_percent: Some(150.0),
                    minimum_stake: Some(10.0),
                },
            ]),
        };

        let Err(Error::Validation(list)) = request.validate() else {
            panic!("expected validation failure");
        };
        let fields: Vec<_> = list.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "memory.pricePerUnit",
                "discountTiers[1].name",
                "discountTiers[1].discountPercent",
            ]
        );
    }

    #[test]
    fn test_pricing_rejects_mixed_currencies() {
        let price = |amount: f64, currency: &str| {
            Some(UnitPriceInput {
                price_per_unit: Some(amount),
                currency: Some(currency.to_string()),
            })
        };
        let request = PricingRequest {
            cpu: price(4.0, "usd"),
            memory: price(0.5, "USD"),
            storage: price(0.05, "EUR"),
            discount_tiers: Some(Vec::new()),
        };

        let Err(Error::Validation(list)) = request.validate() else {
            panic!("expected validation failure");
        };
        let fields: Vec<_> = list.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["storage.currency"]);
    }

    #[test]
    fn test_status_filter() {
        assert_eq!(
            status_filter(None).unwrap(),
            ProviderRequestFilter::Status(ProviderRequestStatus::Pending)
        );
        assert_eq!(status_filter(Some("all")).unwrap(), ProviderRequestFilter::All);
        assert_eq!(
            status_filter(Some("approved")).unwrap(),
            ProviderRequestFilter::Status(ProviderRequestStatus::Approved)
        );
        assert!(matches!(
            status_filter(Some("archived")),
            Err(Error::Validation(_))
        ));
    }
}
