use anyhow::{Context, Result};
use axum::{
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES},
    },
    response::{IntoResponse, Response},
};
use std::path::Path;

const FALLBACK_PAGE: &str =
    "<!doctype html><meta charset=\"utf-8\"><title>404 Not Found</title><h1>Not Found</h1>";

const NO_CACHE_EXPIRES: &str = "Wed, 11 Jan 1984 05:00:00 GMT";
const NO_CACHE_CONTROL: &str = "no-cache, must-revalidate, max-age=0, no-store, private";

/// The page served whenever a guard hides a path.
#[derive(Clone, Debug)]
pub struct NotFoundPage {
    body: String,
}

impl NotFoundPage {
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    /// Load the page from an HTML template on disk.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read not-found page: {}", path.display()))?;
        Ok(Self::new(body))
    }

    /// 404 with headers that keep caches from remembering it.
    #[must_use]
    pub fn response(&self) -> Response {
        (
            StatusCode::NOT_FOUND,
            [
                (
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/html; charset=utf-8"),
                ),
                (EXPIRES, HeaderValue::from_static(NO_CACHE_EXPIRES)),
                (CACHE_CONTROL, HeaderValue::from_static(NO_CACHE_CONTROL)),
            ],
            self.body.clone(),
        )
            .into_response()
    }
}

impl Default for NotFoundPage {
    fn default() -> Self {
        Self::new(FALLBACK_PAGE)
    }
}
