//! HTTP surface: router assembly and per-worker serving.

pub(crate) mod guard;
pub mod handlers;
mod openapi;

pub use openapi::ApiDoc;

use crate::auth::SessionManager;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
    Router,
};
use std::{path::Path, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer,
    services::{ServeDir, ServeFile},
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

/// Build the application router.
///
/// Public: health, OpenAPI document, the login page and login POST, and the
/// static site root as fallback. Everything else sits behind the session
/// gate.
#[must_use]
pub fn app(sessions: Arc<SessionManager>, assets: &Path) -> Router {
    let protected = Router::new()
        .route("/logout", post(handlers::logout::logout))
        .route("/api", get(handlers::me::probe))
        .route("/api/@me", get(handlers::me::me))
        .nest_service("/cpanel", ServeDir::new(assets.join("cpanel")))
        .layer(middleware::from_fn(guard::require_session));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(openapi::openapi))
        .route(
            "/login",
            post(handlers::login::login)
                .get_service(ServeFile::new(assets.join("login/index.html"))),
        )
        .merge(protected)
        .fallback_service(ServeDir::new(assets.join("root")))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(sessions)),
        )
}

/// Serve the router on a listener the supervisor prepared.
///
/// # Errors
///
/// Returns an error if the listener cannot be registered with the runtime
/// or the server loop fails.
pub async fn serve(
    listener: std::net::TcpListener,
    sessions: Arc<SessionManager>,
    assets: &Path,
) -> Result<()> {
    let app = app(sessions, assets);

    let listener = TcpListener::from_std(listener)
        .context("failed to register listener with the runtime")?;

    info!("Worker {} started", std::process::id());

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
