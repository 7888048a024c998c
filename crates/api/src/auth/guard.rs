//! Role middleware for endpoint groups

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use marketplace_common::{identity, IdentityContext, Role};

use crate::error::ApiError;

/// Reject callers without `role`. Must run after [`super::authenticate`].
pub async fn require_role(
    State(role): State<Role>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    identity::require_role(request.extensions().get::<IdentityContext>(), role)?;
    Ok(next.run(request).await)
}
