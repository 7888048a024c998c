//! HTTP error responses

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Request, State,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use marketplace_common::{Error, FieldViolation};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::AppState;

/// Message shown instead of internal details in production
const REDACTED_MESSAGE: &str = "An unexpected error occurred";

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,

    /// Rendered as `error`
    pub message: String,

    /// Rendered as `message` when present
    pub detail: Option<String>,

    /// Rendered as `details` when non-empty
    pub violations: Vec<FieldViolation>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
            violations: Vec::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        }

        let mut body = Map::new();
        body.insert("error".to_string(), Value::String(self.message));
        if let Some(detail) = self.detail {
            body.insert("message".to_string(), Value::String(detail));
        }
        if !self.violations.is_empty() {
            body.insert("details".to_string(), json!(self.violations));
        }

        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Unauthorized(message) => ApiError::new(StatusCode::UNAUTHORIZED, message),
            Error::Forbidden(message) => ApiError::new(StatusCode::FORBIDDEN, message),
            Error::Validation(violations) => ApiError {
                violations,
                ..ApiError::bad_request("Validation failed")
            },
            Error::InvalidPagination(message) => {
                ApiError::bad_request("Invalid pagination parameters").with_detail(message)
            }
            Error::NotFound { entity, .. } => {
                ApiError::new(StatusCode::NOT_FOUND, format!("{entity} not found"))
            }
            err @ Error::InvalidTransition { .. } => {
                ApiError::new(StatusCode::CONFLICT, err.to_string())
            }
            Error::RateLimited => ApiError::new(StatusCode::TOO_MANY_REQUESTS, "Too many requests")
                .with_detail("Please try again later"),
            err @ Error::Upstream(_) => ApiError::new(StatusCode::BAD_GATEWAY, err.to_string()),
            err @ (Error::Persistence(_) | Error::DuplicateKey { .. } | Error::Json(_)) => {
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request("Invalid request body").with_detail(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request("Invalid query parameters").with_detail(rejection.body_text())
    }
}

/// JSON body extractor whose rejections use the API error shape
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query extractor whose rejections use the API error shape
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Hide server error details from clients in production
pub async fn redact_server_errors(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    if state.production && response.status().is_server_error() {
        warn!(status = %response.status(), "Redacting server error response");
        return (
            response.status(),
            Json(json!({ "error": REDACTED_MESSAGE })),
        )
            .into_response();
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (Error::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (Error::invalid("name", "too short"), StatusCode::BAD_REQUEST),
            (Error::InvalidPagination("x".into()), StatusCode::BAD_REQUEST),
            (Error::not_found("Deployment", "d1"), StatusCode::NOT_FOUND),
            (
                Error::InvalidTransition {
                    from: "terminated".into(),
                    to: "active".into(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (Error::Persistence("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                Error::DuplicateKey {
                    collection: "users",
                    field: "email",
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (Error::Upstream("jwks".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[tokio::test]
    async fn test_validation_body_lists_every_violation() {
        let err = Error::Validation(vec![
            FieldViolation::new("name", "Name must be between 3 and 50 characters"),
            FieldViolation::new("resources.cpu", "CPU must be between 1 and 64"),
        ]);

        let json = body_json(ApiError::from(err).into_response()).await;
        assert_eq!(json["error"], "Validation failed");
        assert_eq!(json["details"].as_array().unwrap().len(), 2);
        assert_eq!(json["details"][1]["field"], "resources.cpu");
    }

    #[tokio::test]
    async fn test_pagination_body() {
        let err = Error::InvalidPagination("Limit must be between 1 and 100".into());

        let json = body_json(ApiError::from(err).into_response()).await;
        assert_eq!(json["error"], "Invalid pagination parameters");
        assert_eq!(json["message"], "Limit must be between 1 and 100");
    }
}
