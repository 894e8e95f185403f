//! Forwarding to the upstream CMS.

use crate::{
    APP_USER_AGENT,
    gate::{Gate, rewriter::ResponseRewriter},
};
use axum::{
    body::{Body, Bytes},
    http::{
        HeaderMap, HeaderName, HeaderValue, Request, StatusCode,
        header::{
            ACCEPT_ENCODING, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST,
            LOCATION, REFRESH,
        },
    },
    response::{IntoResponse, Response},
};
use reqwest::{Client, redirect::Policy};
use std::{borrow::Cow, net::IpAddr, time::Duration};
use thiserror::Error;
use tracing::{Instrument, debug, error, info_span};
use url::Url;

pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Client(#[from] reqwest::Error),
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),
}

/// HTTP client bound to the upstream origin.
#[derive(Clone, Debug)]
pub struct Upstream {
    client: Client,
    base: Url,
    body_limit: usize,
}

impl Upstream {
    /// Redirects are never followed; they go back to the visitor after rewriting.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base: Url, timeout: Duration, body_limit: usize) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base,
            body_limit,
        })
    }

    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Upstream URL for a request path. `Url` treats `\` as a separator and resolves
    /// dot segments, so requests are classified against this URL's path, the one
    /// the upstream actually receives.
    #[must_use]
    pub fn target_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(query);
        url
    }

    /// Forward `request` to `target` and rewrite the answer.
    pub async fn forward(
        &self,
        gate: &Gate,
        request: Request<Body>,
        target: Url,
        peer: Option<IpAddr>,
    ) -> Response {
        match self.try_forward(gate, request, target, peer).await {
            Ok(response) => response,
            Err(err) => {
                error!("{err}");
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        gate: &Gate,
        request: Request<Body>,
        url: Url,
        peer: Option<IpAddr>,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, self.body_limit).await?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(HOST);
        // Bodies must arrive uncompressed so HTML can be rewritten.
        headers.remove(ACCEPT_ENCODING);
        if let Some(host) = parts.headers.get(HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
        if let Ok(proto) = HeaderValue::from_str(gate.site().scheme()) {
            headers.insert(X_FORWARDED_PROTO, proto);
        }
        if let Some(peer) = peer {
            let forwarded = match parts
                .headers
                .get(&X_FORWARDED_FOR)
                .and_then(|value| value.to_str().ok())
            {
                Some(chain) => format!("{chain}, {peer}"),
                None => peer.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        let span = info_span!(
            "upstream.request",
            http.method = %parts.method,
            url.path = url.path()
        );
        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .instrument(span)
            .await?;

        let status = upstream.status();
        let rewriter = gate.response_rewriter();
        let mut headers = strip_hop_by_hop(upstream.headers());
        rewrite_headers(&rewriter, &mut headers);

        let bytes = upstream.bytes().await?;
        let body = match rewrite_body(&rewriter, &headers, &bytes) {
            Some(rewritten) => {
                headers.remove(CONTENT_LENGTH);
                Bytes::from(rewritten)
            }
            None => bytes,
        };

        debug!(%status, "upstream responded");

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    let mut kept = headers.clone();
    for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
        kept.remove(name);
    }
    kept
}

fn rewrite_headers(rewriter: &ResponseRewriter<'_>, headers: &mut HeaderMap) {
    if let Some(location) = header_str(headers, &LOCATION).and_then(|v| rewriter.location(v))
        && let Ok(value) = HeaderValue::from_str(&location)
    {
        debug!("Location rewritten to {location}");
        headers.insert(LOCATION, value);
    }

    if let Some(refresh) = header_str(headers, &REFRESH).and_then(|v| rewriter.refresh(v))
        && let Ok(value) = HeaderValue::from_str(&refresh)
    {
        headers.insert(REFRESH, value);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn rewrite_body(
    rewriter: &ResponseRewriter<'_>,
    headers: &HeaderMap,
    bytes: &Bytes,
) -> Option<String> {
    let is_html = header_str(headers, &CONTENT_TYPE)
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("text/html"));
    if !is_html || headers.contains_key(CONTENT_ENCODING) {
        return None;
    }

    let text = std::str::from_utf8(bytes).ok()?;
    match rewriter.document(text) {
        Cow::Owned(rewritten) => Some(rewritten),
        Cow::Borrowed(_) => None,
    }
}
