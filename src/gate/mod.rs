//! The login gate: slug storage, rewrite rules, request classification and URL
//! rewriting behind a single service object.

pub mod classifier;
pub mod context;
pub mod rewriter;
pub mod routes;
pub mod slug;
pub mod status;

pub use classifier::Decision;
pub use context::{AgentKind, Area, RequestContext};
pub use slug::SlugError;
pub use status::{Notice, Status};

use crate::settings::{Settings, SettingsError};
use axum::http::HeaderMap;
use context::{AgentPolicy, Authenticator, CookieAuthenticator, SitePaths, normalize_path};
use rewriter::{ResponseRewriter, UrlRewriter};
use routes::{RewriteEngine, RouteError, RouteTable, RouteTarget};
use secrecy::SecretString;
use serde_json::Value;
use slug::SlugStore;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

pub const VERSION_KEY: &str = "cdlc_plugin_version";

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Routes(#[from] RouteError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("invalid document pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub site_url: Url,
    pub upstream_url: Option<Url>,
    pub pretty_urls: bool,
    pub auth_cookie_prefix: String,
    pub agent_token: Option<SecretString>,
}

impl GateConfig {
    #[must_use]
    pub fn new(site_url: Url) -> Self {
        Self {
            site_url,
            upstream_url: None,
            pretty_urls: true,
            auth_cookie_prefix: context::DEFAULT_AUTH_COOKIE_PREFIX.to_string(),
            agent_token: None,
        }
    }

    #[must_use]
    pub fn with_upstream_url(mut self, upstream_url: Url) -> Self {
        self.upstream_url = Some(upstream_url);
        self
    }

    #[must_use]
    pub fn with_pretty_urls(mut self, pretty_urls: bool) -> Self {
        self.pretty_urls = pretty_urls;
        self
    }

    #[must_use]
    pub fn with_auth_cookie_prefix(mut self, prefix: String) -> Self {
        self.auth_cookie_prefix = prefix;
        self
    }

    #[must_use]
    pub fn with_agent_token(mut self, token: Option<SecretString>) -> Self {
        self.agent_token = token;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlugUpdate {
    pub slug: String,
    pub changed: bool,
}

pub struct Gate {
    settings: Arc<Settings>,
    slugs: SlugStore,
    routes: RouteTable,
    rewriter: UrlRewriter,
    authenticator: Arc<dyn Authenticator>,
    agents: AgentPolicy,
}

impl Gate {
    /// Build the gate on top of `settings`, using the bundled rewrite engine.
    ///
    /// # Errors
    /// Returns an error if the URL rewriter cannot be built.
    pub fn new(config: GateConfig, settings: Arc<Settings>) -> Result<Self, GateError> {
        let engine = Arc::new(RewriteEngine::new(settings.clone(), config.pretty_urls));
        Self::with_routes(config, settings, RouteTable::new(engine))
    }

    /// Build the gate with a caller-provided route table.
    ///
    /// # Errors
    /// Returns an error if the URL rewriter cannot be built.
    pub fn with_routes(
        config: GateConfig,
        settings: Arc<Settings>,
        routes: RouteTable,
    ) -> Result<Self, GateError> {
        let rewriter = UrlRewriter::new(&config.site_url, config.upstream_url)?;
        Ok(Self {
            slugs: SlugStore::new(settings.clone()),
            settings,
            routes,
            rewriter,
            authenticator: Arc::new(CookieAuthenticator::new(config.auth_cookie_prefix)),
            agents: AgentPolicy::new(config.agent_token),
        })
    }

    #[must_use]
    pub fn slug(&self) -> String {
        self.slugs.get_slug()
    }

    /// Public URL of the login page.
    #[must_use]
    pub fn login_url(&self) -> String {
        self.rewriter.slug_url(&self.slug(), &[])
    }

    /// Public site URL, always ending in a slash.
    #[must_use]
    pub fn site(&self) -> &Url {
        self.rewriter.site()
    }

    #[must_use]
    pub fn paths(&self) -> &SitePaths {
        self.rewriter.paths()
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Store a new slug. The rewrite table is rebuilt and flushed when the canonical
    /// value changes.
    ///
    /// # Errors
    /// Returns [`SlugError::ReservedOrEmpty`] (wrapped) for an unusable slug, or a
    /// storage/routing error.
    #[instrument(skip(self))]
    pub fn update_slug(&self, candidate: &str) -> Result<SlugUpdate, GateError> {
        let previous = self.slugs.get_slug();
        let slug = self.slugs.set_slug(candidate)?;
        let changed = previous != slug;

        if changed {
            self.routes.invalidate_and_rebuild(&slug)?;
            info!("Login slug changed from {previous} to {slug}");
        }

        Ok(SlugUpdate { slug, changed })
    }

    /// Whether [`Gate::activate`] ran against these settings.
    ///
    /// # Errors
    /// Returns an error if the settings cannot be read.
    pub fn is_activated(&self) -> Result<bool, GateError> {
        Ok(self.settings.contains(VERSION_KEY)?)
    }

    /// Ensure the default slug exists, record the version and install the rewrite rule.
    ///
    /// # Errors
    /// Returns an error if settings or routing cannot be written.
    pub fn activate(&self) -> Result<(), GateError> {
        if self.slugs.ensure_default()? {
            info!("Default login slug stored");
        }
        self.settings.set(
            VERSION_KEY,
            Value::String(env!("CARGO_PKG_VERSION").to_string()),
        )?;
        self.routes.invalidate_and_rebuild(&self.slug())?;
        info!("Activated, login URL is {}", self.login_url());
        Ok(())
    }

    /// Remove the gateway's rewrite rules.
    ///
    /// # Errors
    /// Returns an error if the rewrite table cannot be flushed.
    pub fn deactivate(&self) -> Result<(), GateError> {
        self.routes.clear()?;
        info!("Deactivated, rewrite rules removed");
        Ok(())
    }

    /// Rebuild the rule for the current slug and flush.
    ///
    /// # Errors
    /// Returns an error if the rewrite table cannot be flushed.
    pub fn flush(&self) -> Result<(), GateError> {
        self.routes.invalidate_and_rebuild(&self.slug())?;
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> Status {
        let slug = self.slug();
        let rule_found = self.routes.rule_found(&slug);
        Status::new(
            slug,
            self.login_url(),
            self.routes.pretty_urls(),
            rule_found,
        )
    }

    /// Gather the per-request facts for `path`.
    #[must_use]
    pub fn request_context(
        &self,
        path: &str,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
    ) -> RequestContext {
        let path = normalize_path(path);
        let area = self.paths().area(&path);
        let marker = self
            .paths()
            .relative(&path)
            .and_then(|relative| self.routes.matched_target(relative))
            == Some(RouteTarget::LoginMarker);

        RequestContext::new(path, area)
            .with_marker(marker)
            .with_authenticated(self.authenticator.is_authenticated(headers))
            .with_agent(self.agents.detect(area, headers, peer))
    }

    #[must_use]
    pub fn classify(&self, ctx: &mut RequestContext) -> Decision {
        classifier::classify(ctx)
    }

    #[must_use]
    pub fn filter_login_url(&self, url: &str, redirect: &str, force_reauth: bool) -> String {
        self.rewriter
            .login_url(url, redirect, force_reauth, &self.slug())
    }

    #[must_use]
    pub fn filter_logout_url(&self, url: &str, redirect: &str) -> String {
        self.rewriter.logout_url(url, redirect, &self.slug())
    }

    #[must_use]
    pub fn filter_lostpassword_url(&self, url: &str, redirect: &str) -> String {
        self.rewriter.lostpassword_url(url, redirect, &self.slug())
    }

    #[must_use]
    pub fn filter_register_url(&self, url: &str) -> String {
        self.rewriter.register_url(url, &self.slug())
    }

    /// Also serves network-wide site URLs.
    #[must_use]
    pub fn filter_site_url(&self, url: &str, path: &str) -> String {
        self.rewriter.site_url(url, path, &self.slug())
    }

    /// Rewriting for one upstream response; the slug is read once.
    #[must_use]
    pub fn response_rewriter(&self) -> ResponseRewriter<'_> {
        ResponseRewriter::new(&self.rewriter, self.slug())
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("site", &self.rewriter.site().as_str())
            .field("routes", &self.routes)
            .field("agents", &self.agents)
            .finish_non_exhaustive()
    }
}
