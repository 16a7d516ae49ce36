//! Login endpoint: credential check and session issuance.

use crate::api::guard::{set_cookie, SESSION_COOKIE};
use crate::auth::{AuthError, SessionManager};
use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema, Debug)]
pub struct LoginForm {
    email: String,
    #[schema(value_type = String, format = Password)]
    password: SecretString,
}

#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Redirects to the control panel on success, back to the login page on bad credentials, to the site root when a field is missing")
    ),
    tag = "auth"
)]
pub async fn login(
    sessions: Extension<Arc<SessionManager>>,
    payload: Option<Form<LoginForm>>,
) -> Response {
    // Malformed bodies and empty fields bounce to the public root, like a
    // hand-typed request would.
    let Some(Form(form)) = payload else {
        return Redirect::to("/").into_response();
    };
    let password = form.password.expose_secret();
    if form.email.is_empty() || password.is_empty() {
        return Redirect::to("/").into_response();
    }

    match sessions.login(&form.email, password).await {
        Ok((token, email)) => {
            info!("[LOGIN] {email}");
            let mut headers = HeaderMap::new();
            if let Ok(cookie) = set_cookie(SESSION_COOKIE, &token) {
                headers.insert(SET_COOKIE, cookie);
            }
            (headers, Redirect::to("/cpanel")).into_response()
        }
        // Unknown account and wrong password look identical from outside.
        Err(AuthError::InvalidCredentials) => Redirect::to("/login").into_response(),
        Err(err) => {
            error!("Login failed: {err}");
            Redirect::to("/login").into_response()
        }
    }
}
