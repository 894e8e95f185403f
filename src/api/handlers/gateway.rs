use crate::{
    api::{not_found::NotFoundPage, proxy::Upstream},
    gate::{Decision, Gate},
};
use axum::{
    body::Body,
    extract::{ConnectInfo, Extension},
    http::Request,
    response::Response,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::debug;

/// Fallback for every request the admin API does not claim.
pub async fn gateway(
    gate: Extension<Arc<Gate>>,
    upstream: Extension<Arc<Upstream>>,
    not_found: Extension<Arc<NotFoundPage>>,
    request: Request<Body>,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical());

    // Classify the path the upstream will receive, not the raw request path.
    let target = upstream.target_url(request.uri().path(), request.uri().query());
    let mut ctx = gate.request_context(target.path(), request.headers(), peer);
    let decision = gate.classify(&mut ctx);
    debug!(path = %ctx.path, area = ?ctx.area, ?decision, "request classified");

    match decision {
        Decision::NotFound => not_found.response(),
        Decision::RenderLogin => {
            let login =
                upstream.target_url(&gate.paths().legacy_login_path(), request.uri().query());
            upstream.forward(&gate, request, login, peer).await
        }
        Decision::PassThrough => upstream.forward(&gate, request, target, peer).await,
    }
}
