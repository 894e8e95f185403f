use crate::gate::Gate;
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::options,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod handlers;
pub mod not_found;
mod openapi;
pub mod proxy;

pub use handlers::AdminToken;
pub use not_found::NotFoundPage;
pub use openapi::openapi;
pub use proxy::Upstream;

/// Paths below this prefix belong to the gateway itself and never reach the upstream.
pub const ADMIN_PREFIX: &str = "/.loginveil";

/// Build the admin API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// The complete application: admin API, health and the gateway fallback.
pub fn app(
    gate: Arc<Gate>,
    upstream: Arc<Upstream>,
    not_found: Arc<NotFoundPage>,
    admin_token: AdminToken,
) -> Router {
    let (router, _openapi) = router().split_for_parts();
    router
        .route(
            &format!("{ADMIN_PREFIX}/health"),
            options(handlers::health::health),
        )
        .fallback(handlers::gateway::gateway)
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
                .layer(Extension(gate))
                .layer(Extension(upstream))
                .layer(Extension(not_found))
                .layer(Extension(admin_token)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    gate: Arc<Gate>,
    upstream: Upstream,
    not_found: NotFoundPage,
    admin_token: AdminToken,
) -> Result<()> {
    let app = app(gate, Arc::new(upstream), Arc::new(not_found), admin_token);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

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
