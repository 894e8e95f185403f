//! Login slug normalization and storage.
//!
//! Slugs are normalized to lowercase `a-z0-9-`. Whitespace, dots, underscores and
//! dashes separate words; anything else is dropped.

use crate::settings::{Settings, SettingsError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const SLUG_KEY: &str = "cdlc_login_slug";
pub const DEFAULT_SLUG: &str = "login";

/// Slugs that would collide with the CMS's own entry points.
pub const RESERVED_SLUGS: [&str; 6] = [
    "wp-admin",
    "wp-login.php",
    "wp-login",
    "admin",
    "admin-ajax.php",
    "xmlrpc.php",
];

pub const INVALID_SLUG_MESSAGE: &str = "Invalid or reserved slug. Please choose a different value.";

#[derive(Debug, Error)]
pub enum SlugError {
    #[error("Invalid or reserved slug. Please choose a different value.")]
    ReservedOrEmpty,
    #[error(transparent)]
    Storage(SettingsError),
}

/// Normalize raw input into slug form. May return an empty string.
#[must_use]
pub fn sanitize(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for ch in input.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii_whitespace() || matches!(ch, '-' | '_' | '.') {
            pending_dash = true;
        }
    }

    slug
}

/// Whether `slug` normalizes to the same value as a reserved entry.
#[must_use]
pub fn is_reserved(slug: &str) -> bool {
    let candidate = sanitize(slug);
    RESERVED_SLUGS
        .iter()
        .any(|reserved| sanitize(reserved) == candidate)
}

/// Canonical slug for `input`, or `None` when it is empty or reserved.
#[must_use]
pub fn canonicalize(input: &str) -> Option<String> {
    let slug = sanitize(input);
    if slug.is_empty() || is_reserved(&slug) {
        None
    } else {
        Some(slug)
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug)]
pub struct SlugStore {
    settings: Arc<Settings>,
}

impl SlugStore {
    /// Wrap `settings` and register the slug sanitizer on [`SLUG_KEY`].
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        settings.register_sanitizer(SLUG_KEY, |value| {
            canonicalize(&value_as_text(&value))
                .map(Value::String)
                .ok_or_else(|| INVALID_SLUG_MESSAGE.to_string())
        });
        Self { settings }
    }

    /// Current canonical slug. Never empty, never reserved.
    #[must_use]
    pub fn get_slug(&self) -> String {
        let raw = self
            .settings
            .get_str(SLUG_KEY, DEFAULT_SLUG)
            .unwrap_or_else(|err| {
                warn!("Failed to read login slug, using default: {err}");
                DEFAULT_SLUG.to_string()
            });

        canonicalize(&raw).unwrap_or_else(|| {
            debug!("stored slug {raw:?} is not usable, falling back to {DEFAULT_SLUG}");
            DEFAULT_SLUG.to_string()
        })
    }

    /// Validate and persist `candidate`, returning the canonical value stored.
    ///
    /// # Errors
    /// Returns [`SlugError::ReservedOrEmpty`] if the candidate normalizes to an empty or
    /// reserved slug (nothing is written), or [`SlugError::Storage`] if it cannot be persisted.
    pub fn set_slug(&self, candidate: &str) -> Result<String, SlugError> {
        match self
            .settings
            .set(SLUG_KEY, Value::String(candidate.to_string()))
        {
            Ok(stored) => Ok(value_as_text(&stored)),
            Err(SettingsError::Rejected(_)) => Err(SlugError::ReservedOrEmpty),
            Err(err) => Err(SlugError::Storage(err)),
        }
    }

    /// Store the default slug if none exists yet. Returns whether it was written.
    ///
    /// # Errors
    /// Returns an error if the settings backend fails.
    pub fn ensure_default(&self) -> Result<bool, SettingsError> {
        self.settings
            .add(SLUG_KEY, Value::String(DEFAULT_SLUG.to_string()))
    }
}
