//! Common routes: health and version.

use crate::config::Settings;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

/// GET /health and GET /version. Stateless; merge next to the CRUD router.
pub fn common_routes(settings: &Settings) -> Router {
    let version: Value = json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "apiVersion": settings.api_version,
        "environment": settings.environment,
    });
    Router::new()
        .route("/health", get(health))
        .route("/version", get(move || async move { Json(version) }))
}
