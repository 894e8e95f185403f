//! Per-request facts consumed by the classifier.

use axum::http::{HeaderMap, header::COOKIE};
use percent_encoding::percent_decode_str;
use secrecy::{ExposeSecret, SecretString};
use std::net::IpAddr;
use subtle::ConstantTimeEq;
use url::Url;

pub const ADMIN_DIR: &str = "wp-admin";
pub const ASYNC_ENDPOINT: &str = "wp-admin/admin-ajax.php";
pub const LEGACY_LOGIN: &str = "wp-login.php";
pub const CRON_RUNNER: &str = "wp-cron.php";
pub const AGENT_HEADER: &str = "x-loginveil-agent";
pub const DEFAULT_AUTH_COOKIE_PREFIX: &str = "wordpress_logged_in_";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Area {
    Admin,
    AsyncData,
    LegacyLogin,
    CronRunner,
    Site,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentKind {
    ScheduledTask,
    Automation,
}

/// Decode percent escapes, collapse repeated slashes and resolve dot segments, so
/// `/%77p-login.php`, `//a/../wp-login.php` and `/a\..\wp-login.php` all classify
/// like `/wp-login.php`. Backslashes count as separators.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = format!("/{}", segments.join("/"));
    if decoded.ends_with(['/', '\\']) && !segments.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Site base path and the areas below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SitePaths {
    base: String,
}

impl SitePaths {
    /// `base` is the path component of the public site URL, e.g. `/` or `/blog/`.
    #[must_use]
    pub fn new(base: &str) -> Self {
        let trimmed = base.trim_matches('/');
        let base = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{trimmed}/")
        };
        Self { base }
    }

    #[must_use]
    pub fn from_site_url(site_url: &Url) -> Self {
        Self::new(site_url.path())
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Path below the site base, without a leading slash. `None` outside the site.
    #[must_use]
    pub fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        if let Some(rest) = path.strip_prefix(self.base.as_str()) {
            return Some(rest);
        }
        // `/blog` addresses the site root just like `/blog/`.
        (path == self.base.trim_end_matches('/')).then_some("")
    }

    #[must_use]
    pub fn area(&self, path: &str) -> Area {
        let Some(relative) = self.relative(path) else {
            return Area::Site;
        };

        if relative == ASYNC_ENDPOINT {
            Area::AsyncData
        } else if relative == ADMIN_DIR || relative.starts_with("wp-admin/") {
            Area::Admin
        } else if relative == LEGACY_LOGIN || relative.starts_with("wp-login.php/") {
            Area::LegacyLogin
        } else if relative == CRON_RUNNER {
            Area::CronRunner
        } else {
            Area::Site
        }
    }

    #[must_use]
    pub fn legacy_login_path(&self) -> String {
        format!("{}{LEGACY_LOGIN}", self.base)
    }
}

/// Decides whether the caller is authenticated.
pub trait Authenticator: Send + Sync {
    fn is_authenticated(&self, headers: &HeaderMap) -> bool;
}

/// Treats the presence of a non-empty logged-in cookie as authenticated. The
/// upstream still validates the cookie; this only decides 404 versus pass-through.
#[derive(Clone, Debug)]
pub struct CookieAuthenticator {
    prefix: String,
}

impl CookieAuthenticator {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for CookieAuthenticator {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_COOKIE_PREFIX)
    }
}

impl Authenticator for CookieAuthenticator {
    fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, value)| name.starts_with(&self.prefix) && !value.trim().is_empty())
    }
}

/// Recognizes trusted internal agents.
#[derive(Clone, Debug, Default)]
pub struct AgentPolicy {
    token: Option<SecretString>,
}

impl AgentPolicy {
    #[must_use]
    pub fn new(token: Option<SecretString>) -> Self {
        Self { token }
    }

    /// `ScheduledTask` for the cron runner called over loopback, `Automation` for
    /// requests presenting the configured agent token.
    #[must_use]
    pub fn detect(&self, area: Area, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<AgentKind> {
        if area == Area::CronRunner && peer.is_some_and(|ip| ip.is_loopback()) {
            return Some(AgentKind::ScheduledTask);
        }

        let token = self.token.as_ref()?;
        let presented = headers.get(AGENT_HEADER)?.to_str().ok()?;
        let matches: bool = presented
            .as_bytes()
            .ct_eq(token.expose_secret().as_bytes())
            .into();
        matches.then_some(AgentKind::Automation)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub path: String,
    pub area: Area,
    /// Set only when the rewrite table routed the path to the login marker.
    pub marker: bool,
    pub authenticated: bool,
    pub agent: Option<AgentKind>,
    /// One-shot permission for the delegated login render; lives and dies with the request.
    pub legacy_access_permitted: bool,
}

impl RequestContext {
    #[must_use]
    pub fn new(path: impl Into<String>, area: Area) -> Self {
        Self {
            path: path.into(),
            area,
            marker: false,
            authenticated: false,
            agent: None,
            legacy_access_permitted: false,
        }
    }

    #[must_use]
    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    #[must_use]
    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent: Option<AgentKind>) -> Self {
        self.agent = agent;
        self
    }

    #[must_use]
    pub fn is_admin_area(&self) -> bool {
        matches!(self.area, Area::Admin | Area::AsyncData)
    }

    #[must_use]
    pub fn is_async_data_call(&self) -> bool {
        self.area == Area::AsyncData
    }

    #[must_use]
    pub fn is_trusted_agent(&self) -> bool {
        self.agent.is_some()
    }
}
