//! API request handlers, grouped by audience

pub mod auth;
pub mod cloud_operator;
pub mod cloud_provider;
pub mod cloud_user;
pub mod health;
pub mod payments;
pub mod profile;

use axum::{http::StatusCode, response::IntoResponse, Json};
use marketplace_common::{normalize, Page, PageRequest, PaginationMeta, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// `?page=&limit=` on list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ListParams {
    pub fn page_request(&self) -> Result<PageRequest> {
        normalize(self.page.as_deref(), self.limit.as_deref())
    }
}

/// `{<key>: [...], pagination: {...}}`
pub fn listing<T: Serialize>(key: &str, page: Page<T>, request: &PageRequest) -> Result<Json<Value>> {
    let mut body = Map::new();
    body.insert(key.to_string(), serde_json::to_value(page.items)?);
    body.insert(
        "pagination".to_string(),
        serde_json::to_value(PaginationMeta::new(request, page.total_count))?,
    );
    Ok(Json(Value::Object(body)))
}

/// Fallback for unknown routes
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" })))
}
