//! Logout endpoint: single-token revocation.

use crate::api::guard::{clear_cookie, cookie_value, EMAIL_COOKIE, SESSION_COOKIE};
use crate::auth::SessionManager;
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{error, info};

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 303, description = "Session deleted, cookies cleared, redirected to the login page")
    ),
    tag = "auth"
)]
pub async fn logout(sessions: Extension<Arc<SessionManager>>, headers: HeaderMap) -> Response {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE) {
        // Deletes by exact token: only the device presenting this cookie
        // logs out, other sessions for the account stay live.
        if let Err(err) = sessions.revoke(&token).await {
            error!("Failed to delete session: {err}");
            return Redirect::to("/login").into_response();
        }
        if let Some(email) = cookie_value(&headers, EMAIL_COOKIE) {
            info!("[LOGOUT] {email}");
        }
    }

    // Always clear both cookies, even if the session row was already gone.
    let mut response_headers = HeaderMap::new();
    for name in [SESSION_COOKIE, EMAIL_COOKIE] {
        if let Ok(cookie) = clear_cookie(name) {
            response_headers.append(SET_COOKIE, cookie);
        }
    }
    (response_headers, Redirect::to("/login")).into_response()
}
