use crate::{
    GIT_COMMIT_HASH,
    gate::{Gate, Notice},
};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    slug: String,
    rule_found: bool,
    notices: Vec<Notice>,
}

#[utoipa::path(
    get,
    path= "/.loginveil/health",
    responses (
        (status = 200, description = "Serving; notices describe degraded routing", body = [Health]),
        (status = 503, description = "Pretty permalinks are on but no rule routes the login slug", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, gate: Extension<Arc<Gate>>) -> impl IntoResponse {
    let status = gate.status();
    // Plain permalinks degrade the login URL but are a valid configuration.
    let is_healthy = status.rule_found || !status.pretty_permalinks;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        slug: status.slug,
        rule_found: status.rule_found,
        notices: status.notices,
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(0..7).unwrap_or_default();

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_else(|err| {
            error!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    if is_healthy {
        (StatusCode::OK, headers, body)
    } else {
        debug!(notices = ?health.notices, "login route unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}
