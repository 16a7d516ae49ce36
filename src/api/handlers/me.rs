//! Gated API endpoints: liveness probe and current identity.

use crate::api::guard::{cookie_value, EMAIL_COOKIE};
use crate::auth::SessionManager;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema, Debug)]
pub struct Identity {
    email: String,
}

#[utoipa::path(
    get,
    path = "/api",
    responses(
        (status = 200, description = "Worker is serving authenticated requests")
    ),
    tag = "api"
)]
pub async fn probe() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[utoipa::path(
    get,
    path = "/api/@me",
    responses(
        (status = 200, description = "Account behind the current session", body = Identity),
        (status = 404, description = "No account matches the identity cookie"),
        (status = 500, description = "Store lookup failed")
    ),
    tag = "api"
)]
pub async fn me(sessions: Extension<Arc<SessionManager>>, headers: HeaderMap) -> Response {
    let Some(email) = cookie_value(&headers, EMAIL_COOKIE) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match sessions.store().account_email(&email).await {
        Ok(Some(email)) => (StatusCode::OK, Json(Identity { email })).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!("Failed to lookup account: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
