//! Rewrite rules mapping the login slug to the login marker.
//!
//! [`RewriteEngine`] plays the host router: owners register patterns, and a flush
//! compiles the complete registered set into the active table and persists it. The
//! active table is what requests are matched against, so a registration has no
//! effect until the next flush.
//!
//! [`RouteTable`] is this gateway's view of it: it owns exactly one rule per slug and
//! always clears its previous registrations before registering the new slug.

use crate::settings::{Settings, SettingsError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Owner tag for the rules registered by the gateway.
pub const OWNER: &str = "loginveil";

/// Settings key holding the flushed rule table.
pub const RULES_KEY: &str = "rewrite_rules";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    LoginMarker,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub owner: String,
    pub pattern: String,
    pub target: RouteTarget,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid rewrite pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to persist rewrite rules: {0}")]
    Settings(#[from] SettingsError),
    #[error("failed to encode rewrite rules: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Host router seam.
pub trait RewriteHost: Send + Sync {
    /// Register a pattern. Registering the same `(owner, pattern, target)` twice is a no-op.
    fn register_pattern(&self, owner: &str, pattern: &str, target: RouteTarget);

    /// Drop every registered pattern of `owner`.
    fn remove_owner(&self, owner: &str);

    /// Recompile the active table from the registered set.
    ///
    /// # Errors
    /// Returns an error if a pattern does not compile or the table cannot be persisted.
    fn flush(&self) -> Result<(), RouteError>;

    /// Target of the first active rule matching `path` (relative to the site root,
    /// without a leading slash).
    fn matched_target(&self, path: &str) -> Option<RouteTarget>;

    /// The active (flushed) table.
    fn active_rules(&self) -> Vec<RewriteRule>;

    /// Whether pretty URLs are enabled host-wide. When they are not, nothing matches.
    fn pretty_urls(&self) -> bool;
}

#[derive(Debug, Default)]
struct Compiled {
    source: Vec<RewriteRule>,
    matchers: Vec<(Regex, RouteTarget)>,
}

fn compile(rules: &[RewriteRule]) -> Result<Vec<(Regex, RouteTarget)>, RouteError> {
    rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.pattern)
                .map(|regex| (regex, rule.target))
                .map_err(|source| RouteError::Pattern {
                    pattern: rule.pattern.clone(),
                    source,
                })
        })
        .collect()
}

/// Regex rewrite table persisted through [`Settings`].
#[derive(Debug)]
pub struct RewriteEngine {
    settings: Arc<Settings>,
    pretty_urls: bool,
    registered: RwLock<Vec<RewriteRule>>,
    compiled: RwLock<Compiled>,
}

impl RewriteEngine {
    #[must_use]
    pub fn new(settings: Arc<Settings>, pretty_urls: bool) -> Self {
        Self {
            settings,
            pretty_urls,
            registered: RwLock::new(Vec::new()),
            compiled: RwLock::new(Compiled::default()),
        }
    }

    /// Rules registered since the last flush, in registration order.
    #[must_use]
    pub fn registered_rules(&self) -> Vec<RewriteRule> {
        self.registered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn load_active(&self) -> Vec<RewriteRule> {
        let value = match self.settings.get(RULES_KEY, Value::Array(Vec::new())) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to read rewrite rules: {err}");
                return Vec::new();
            }
        };

        serde_json::from_value(value).unwrap_or_else(|err| {
            warn!("Ignoring malformed rewrite rules: {err}");
            Vec::new()
        })
    }

    fn refresh(&self, active: Vec<RewriteRule>) {
        let mut compiled = self
            .compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if compiled.source == active {
            return;
        }

        let matchers = active
            .iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(regex) => Some((regex, rule.target)),
                Err(err) => {
                    warn!("Skipping rewrite rule {}: {err}", rule.pattern);
                    None
                }
            })
            .collect();

        debug!("rewrite table reloaded with {} rules", active.len());
        *compiled = Compiled {
            source: active,
            matchers,
        };
    }
}

impl RewriteHost for RewriteEngine {
    fn register_pattern(&self, owner: &str, pattern: &str, target: RouteTarget) {
        let rule = RewriteRule {
            owner: owner.to_string(),
            pattern: pattern.to_string(),
            target,
        };
        let mut registered = self
            .registered
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !registered.contains(&rule) {
            registered.push(rule);
        }
    }

    fn remove_owner(&self, owner: &str) {
        self.registered
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|rule| rule.owner != owner);
    }

    fn flush(&self) -> Result<(), RouteError> {
        let rules = self.registered_rules();
        // Validate before persisting so a bad pattern never reaches the active table.
        let matchers = compile(&rules)?;

        self.settings
            .set(RULES_KEY, serde_json::to_value(&rules)?)?;

        let mut compiled = self
            .compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *compiled = Compiled {
            source: rules,
            matchers,
        };

        info!("Rewrite rules flushed ({} active)", compiled.source.len());
        Ok(())
    }

    fn matched_target(&self, path: &str) -> Option<RouteTarget> {
        if !self.pretty_urls {
            return None;
        }

        self.refresh(self.load_active());

        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .matchers
            .iter()
            .find(|(regex, _)| regex.is_match(path))
            .map(|(_, target)| *target)
    }

    fn active_rules(&self) -> Vec<RewriteRule> {
        self.load_active()
    }

    fn pretty_urls(&self) -> bool {
        self.pretty_urls
    }
}

/// The gateway's rules on top of a [`RewriteHost`].
#[derive(Clone)]
pub struct RouteTable {
    host: Arc<dyn RewriteHost>,
}

impl RouteTable {
    #[must_use]
    pub fn new(host: Arc<dyn RewriteHost>) -> Self {
        Self { host }
    }

    /// Pattern matching `slug` with or without a trailing slash.
    #[must_use]
    pub fn pattern_for(slug: &str) -> String {
        format!("^{}/?$", regex::escape(slug))
    }

    /// Register the rule for `slug`. Idempotent.
    pub fn rebuild(&self, slug: &str) {
        self.host
            .register_pattern(OWNER, &Self::pattern_for(slug), RouteTarget::LoginMarker);
    }

    /// Replace the gateway's rules with the one for `new_slug` and flush.
    ///
    /// # Errors
    /// Returns an error if the host fails to flush.
    pub fn invalidate_and_rebuild(&self, new_slug: &str) -> Result<(), RouteError> {
        self.host.remove_owner(OWNER);
        self.rebuild(new_slug);
        self.host.flush()
    }

    /// Remove the gateway's rules and flush.
    ///
    /// # Errors
    /// Returns an error if the host fails to flush.
    pub fn clear(&self) -> Result<(), RouteError> {
        self.host.remove_owner(OWNER);
        self.host.flush()
    }

    /// Whether the active table routes `slug` to the login marker.
    #[must_use]
    pub fn rule_found(&self, slug: &str) -> bool {
        let pattern = Self::pattern_for(slug);
        self.host.active_rules().iter().any(|rule| {
            rule.owner == OWNER && rule.pattern == pattern && rule.target == RouteTarget::LoginMarker
        })
    }

    #[must_use]
    pub fn matched_target(&self, path: &str) -> Option<RouteTarget> {
        self.host.matched_target(path)
    }

    #[must_use]
    pub fn pretty_urls(&self) -> bool {
        self.host.pretty_urls()
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("pretty_urls", &self.host.pretty_urls())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(pretty_urls: bool) -> (Arc<Settings>, Arc<RewriteEngine>) {
        let settings = Arc::new(Settings::in_memory());
        let engine = Arc::new(RewriteEngine::new(settings.clone(), pretty_urls));
        (settings, engine)
    }

    #[test]
    fn pattern_escapes_slug() {
        assert_eq!(RouteTable::pattern_for("portal"), "^portal/?$");
        assert_eq!(RouteTable::pattern_for("a.b"), r"^a\.b/?$");
    }

    #[test]
    fn rebuild_is_idempotent() -> Result<(), RouteError> {
        let (_settings, engine) = engine(true);
        let table = RouteTable::new(engine.clone());

        table.rebuild("portal");
        let once = engine.registered_rules();
        table.rebuild("portal");
        assert_eq!(engine.registered_rules(), once);
        assert_eq!(once.len(), 1);

        engine.flush()?;
        let active = engine.active_rules();
        table.rebuild("portal");
        engine.flush()?;
        assert_eq!(engine.active_rules(), active);
        Ok(())
    }

    #[test]
    fn registration_needs_flush() -> Result<(), RouteError> {
        let (_settings, engine) = engine(true);
        let table = RouteTable::new(engine.clone());

        table.rebuild("portal");
        assert!(!table.rule_found("portal"));
        assert_eq!(table.matched_target("portal/"), None);

        engine.flush()?;
        assert!(table.rule_found("portal"));
        assert_eq!(table.matched_target("portal/"), Some(RouteTarget::LoginMarker));
        Ok(())
    }

    #[test]
    fn matches_with_and_without_trailing_slash() -> Result<(), RouteError> {
        let (_settings, engine) = engine(true);
        let table = RouteTable::new(engine);
        table.invalidate_and_rebuild("portal")?;

        assert_eq!(table.matched_target("portal"), Some(RouteTarget::LoginMarker));
        assert_eq!(table.matched_target("portal/"), Some(RouteTarget::LoginMarker));
        assert_eq!(table.matched_target("portal/extra"), None);
        assert_eq!(table.matched_target("portalx"), None);
        assert_eq!(table.matched_target("xportal"), None);
        Ok(())
    }

    #[test]
    fn invalidate_drops_previous_slug() -> Result<(), RouteError> {
        let (_settings, engine) = engine(true);
        let table = RouteTable::new(engine.clone());

        table.invalidate_and_rebuild("portal")?;
        table.invalidate_and_rebuild("gate")?;

        assert_eq!(table.matched_target("portal/"), None);
        assert_eq!(table.matched_target("gate/"), Some(RouteTarget::LoginMarker));
        assert!(!table.rule_found("portal"));
        assert!(table.rule_found("gate"));
        assert_eq!(engine.active_rules().len(), 1);
        Ok(())
    }

    #[test]
    fn other_owners_survive_invalidation() -> Result<(), RouteError> {
        let (_settings, engine) = engine(true);
        engine.register_pattern("theme", "^shop/?$", RouteTarget::LoginMarker);
        let table = RouteTable::new(engine.clone());

        table.invalidate_and_rebuild("portal")?;
        let owners: Vec<String> = engine
            .active_rules()
            .into_iter()
            .map(|rule| rule.owner)
            .collect();
        assert_eq!(owners, vec!["theme".to_string(), OWNER.to_string()]);
        Ok(())
    }

    #[test]
    fn clear_removes_rules() -> Result<(), RouteError> {
        let (_settings, engine) = engine(true);
        let table = RouteTable::new(engine);
        table.invalidate_and_rebuild("portal")?;
        table.clear()?;
        assert!(!table.rule_found("portal"));
        assert_eq!(table.matched_target("portal"), None);
        Ok(())
    }

    #[test]
    fn plain_permalinks_never_match() -> Result<(), RouteError> {
        let (_settings, engine) = engine(false);
        let table = RouteTable::new(engine);
        table.invalidate_and_rebuild("portal")?;

        assert!(table.rule_found("portal"));
        assert!(!table.pretty_urls());
        assert_eq!(table.matched_target("portal/"), None);
        Ok(())
    }

    #[test]
    fn flush_from_another_engine_is_visible() -> Result<(), RouteError> {
        let settings = Arc::new(Settings::in_memory());
        let serving = RouteTable::new(Arc::new(RewriteEngine::new(settings.clone(), true)));
        let admin = RouteTable::new(Arc::new(RewriteEngine::new(settings, true)));

        admin.invalidate_and_rebuild("portal")?;
        assert_eq!(serving.matched_target("portal/"), Some(RouteTarget::LoginMarker));

        admin.invalidate_and_rebuild("gate")?;
        assert_eq!(serving.matched_target("portal/"), None);
        assert_eq!(serving.matched_target("gate"), Some(RouteTarget::LoginMarker));
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_not_persisted() {
        let (_settings, engine) = engine(true);
        engine.register_pattern("broken", "^(unclosed", RouteTarget::LoginMarker);
        assert!(matches!(engine.flush(), Err(RouteError::Pattern { .. })));
        assert!(engine.active_rules().is_empty());
    }
}
