use super::AdminToken;
use crate::gate::{Gate, GateError, SlugError, Status};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SlugRequest {
    pub slug: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SlugResponse {
    pub slug: String,
    pub login_url: String,
    pub changed: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AdminError {
    /// Missing or wrong token; answered like any unknown path.
    #[error("not found")]
    Hidden,
    #[error(transparent)]
    Gate(#[from] GateError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        match self {
            Self::Hidden => StatusCode::NOT_FOUND.into_response(),
            Self::Gate(GateError::Slug(err @ SlugError::ReservedOrEmpty)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    message: err.to_string(),
                }),
            )
                .into_response(),
            Self::Gate(err) => {
                error!("Admin request failed: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

fn authorize(token: &AdminToken, headers: &HeaderMap) -> Result<(), AdminError> {
    if token.authorizes(headers) {
        Ok(())
    } else {
        Err(AdminError::Hidden)
    }
}

#[utoipa::path(
    get,
    path = "/.loginveil/status",
    responses(
        (status = 200, description = "Current slug, login URL and routing diagnostics.", body = Status),
        (status = 404, description = "Missing or invalid admin token."),
    ),
    tag = "admin"
)]
pub async fn status(
    headers: HeaderMap,
    token: Extension<AdminToken>,
    gate: Extension<Arc<Gate>>,
) -> Result<Json<Status>, AdminError> {
    authorize(&token, &headers)?;
    Ok(Json(gate.status()))
}

#[utoipa::path(
    put,
    path = "/.loginveil/slug",
    request_body = SlugRequest,
    responses(
        (status = 200, description = "Slug stored; rewrite rules rebuilt when it changed.", body = SlugResponse),
        (status = 404, description = "Missing or invalid admin token."),
        (status = 422, description = "Reserved or empty slug; the previous slug is kept.", body = ErrorResponse),
    ),
    tag = "admin"
)]
pub async fn update_slug(
    headers: HeaderMap,
    token: Extension<AdminToken>,
    gate: Extension<Arc<Gate>>,
    Json(payload): Json<SlugRequest>,
) -> Result<Json<SlugResponse>, AdminError> {
    authorize(&token, &headers)?;

    let update = gate.update_slug(&payload.slug)?;
    Ok(Json(SlugResponse {
        login_url: gate.login_url(),
        slug: update.slug,
        changed: update.changed,
    }))
}

#[utoipa::path(
    post,
    path = "/.loginveil/flush",
    responses(
        (status = 200, description = "Rewrite rules rebuilt for the current slug.", body = Status),
        (status = 404, description = "Missing or invalid admin token."),
    ),
    tag = "admin"
)]
pub async fn flush(
    headers: HeaderMap,
    token: Extension<AdminToken>,
    gate: Extension<Arc<Gate>>,
) -> Result<Json<Status>, AdminError> {
    authorize(&token, &headers)?;

    gate.flush()?;
    info!("Rewrite rules flushed on request");
    Ok(Json(gate.status()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gate::GateConfig, settings::Settings};
    use anyhow::Result;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{HeaderValue, Method, Request, header::AUTHORIZATION, header::CONTENT_TYPE},
        routing::{get, post, put},
    };
    use secrecy::SecretString;
    use tower::ServiceExt;
    use url::Url;

    fn app(token: Option<&str>) -> Result<(Router, Arc<Gate>)> {
        let config = GateConfig::new(Url::parse("https://example.com/")?);
        let gate = Arc::new(Gate::new(config, Arc::new(Settings::in_memory()))?);
        gate.activate()?;

        let token = AdminToken::new(token.map(|t| SecretString::from(t.to_string())));
        let router = Router::new()
            .route("/.loginveil/status", get(status))
            .route("/.loginveil/slug", put(update_slug))
            .route("/.loginveil/flush", post(flush))
            .layer(Extension(token))
            .layer(Extension(gate.clone()));
        Ok((router, gate))
    }

    fn slug_request(slug: &str, bearer: &'static str) -> Result<Request<Body>> {
        Ok(Request::builder()
            .method(Method::PUT)
            .uri("/.loginveil/slug")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, HeaderValue::from_static(bearer))
            .body(Body::from(serde_json::to_vec(&SlugRequest {
                slug: slug.to_string(),
            })?))?)
    }

    #[tokio::test]
    async fn status_hidden_without_token() -> Result<()> {
        let (router, _gate) = app(None)?;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/.loginveil/status")
                    .header(AUTHORIZATION, "Bearer ")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn status_reports_slug() -> Result<()> {
        let (router, _gate) = app(Some("t0ken"))?;
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/.loginveil/status")
                    .header(AUTHORIZATION, "Bearer t0ken")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let status: Status = serde_json::from_slice(&body)?;
        assert_eq!(status.slug, "login");
        assert!(status.rule_found);
        Ok(())
    }

    #[tokio::test]
    async fn slug_update_is_canonicalized() -> Result<()> {
        let (router, gate) = app(Some("t0ken"))?;
        let response = router
            .oneshot(slug_request("My Portal", "Bearer t0ken")?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let update: SlugResponse = serde_json::from_slice(&body)?;
        assert_eq!(update.slug, "my-portal");
        assert_eq!(update.login_url, "https://example.com/my-portal/");
        assert!(update.changed);
        assert!(gate.routes().rule_found("my-portal"));
        Ok(())
    }

    #[tokio::test]
    async fn reserved_slug_is_unprocessable() -> Result<()> {
        let (router, gate) = app(Some("t0ken"))?;
        let response = router
            .oneshot(slug_request("wp-admin", "Bearer t0ken")?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let error: ErrorResponse = serde_json::from_slice(&body)?;
        assert_eq!(
            error.message,
            "Invalid or reserved slug. Please choose a different value."
        );
        assert_eq!(gate.slug(), "login");
        Ok(())
    }

    #[tokio::test]
    async fn wrong_token_cannot_change_slug() -> Result<()> {
        let (router, gate) = app(Some("t0ken"))?;
        let response = router
            .oneshot(slug_request("portal", "Bearer guess")?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(gate.slug(), "login");
        Ok(())
    }

    #[tokio::test]
    async fn flush_restores_missing_rule() -> Result<()> {
        let (router, gate) = app(Some("t0ken"))?;
        gate.deactivate()?;
        assert!(!gate.status().rule_found);

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/.loginveil/flush")
                    .header(AUTHORIZATION, "Bearer t0ken")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(gate.status().rule_found);
        Ok(())
    }
}
