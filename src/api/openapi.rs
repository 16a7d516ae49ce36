//! OpenAPI document for the JSON surface.

use crate::api::handlers;
use axum::response::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::login::login,
        handlers::logout::logout,
        handlers::me::probe,
        handlers::me::me,
    ),
    components(schemas(
        handlers::health::Health,
        handlers::login::LoginForm,
        handlers::me::Identity,
    )),
    tags(
        (name = "auth", description = "Login and logout"),
        (name = "api", description = "Gated control-panel API"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_all_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/login", "/logout", "/api", "/api/@me"] {
            assert!(
                doc.paths.paths.contains_key(path),
                "missing path in OpenAPI document: {path}"
            );
        }
    }
}
