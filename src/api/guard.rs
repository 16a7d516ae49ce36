//! Session gate for protected routes, plus the cookie helpers shared by the
//! auth handlers.

use crate::auth::{AuthError, SessionManager};
use axum::{
    extract::{Extension, Request},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::error;

pub(crate) const SESSION_COOKIE: &str = "session";
pub(crate) const EMAIL_COOKIE: &str = "email";

/// Client-side lifetime of both cookies. The server never expires sessions
/// on its own; this is the only bound on a token's exposure.
const COOKIE_MAX_AGE_SECONDS: u32 = 60 * 60 * 24;

/// Gate every request behind a valid session cookie.
///
/// Missing or invalid sessions redirect to the login page; store failures
/// do the same after logging, so a broken store never takes a worker down.
/// On success the identity cookie is refreshed on the response.
pub(crate) async fn require_session(
    Extension(sessions): Extension<Arc<SessionManager>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(token) = cookie_value(request.headers(), SESSION_COOKIE) else {
        return Redirect::to("/login").into_response();
    };

    match sessions.validate(&token).await {
        Ok(email) => {
            let mut response = next.run(request).await;
            // Logout clears this cookie itself; don't re-set it afterwards.
            let already_set = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .any(|value| value.to_str().is_ok_and(|v| v.starts_with("email=")));
            if !already_set {
                if let Ok(cookie) = set_cookie(EMAIL_COOKIE, &email) {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
            }
            response
        }
        Err(AuthError::InvalidSession) => Redirect::to("/login").into_response(),
        Err(err) => {
            error!("Failed to validate session: {err}");
            Redirect::to("/login").into_response()
        }
    }
}

/// Pull one cookie's value out of the `Cookie` header.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

/// Build an `HttpOnly` cookie with the standard 24-hour lifetime.
pub(crate) fn set_cookie(name: &str, value: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}={value}; Path=/; HttpOnly; Max-Age={COOKIE_MAX_AGE_SECONDS}"
    ))
}

/// Build a cookie that expires immediately.
pub(crate) fn clear_cookie(name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!("{name}=; Path=/; HttpOnly; Max-Age=0"))
}
