//! Outbound URL rewriting.
//!
//! Every URL pointing at the legacy login entry point is replaced by
//! `<site>/<slug>/`, keeping all query parameters. Merging a parameter replaces an
//! existing one of the same name in place and appends it otherwise.

use super::context::{LEGACY_LOGIN, SitePaths};
use regex::{Captures, Regex};
use std::borrow::Cow;
use url::Url;

type Query = Vec<(String, String)>;

fn upsert(query: &mut Query, key: &str, value: &str) {
    if let Some(entry) = query.iter_mut().find(|(name, _)| name == key) {
        entry.1 = value.to_string();
    } else {
        query.push((key.to_string(), value.to_string()));
    }
}

fn query_of(url: &Url) -> Query {
    let mut query = Query::new();
    // Later duplicates win, like a PHP query parser.
    for (key, value) in url.query_pairs() {
        upsert(&mut query, &key, &value);
    }
    query
}

fn set_query(url: &mut Url, query: &[(String, String)]) {
    if query.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(query);
    }
}

#[derive(Clone, Debug)]
pub struct UrlRewriter {
    site: Url,
    upstream: Option<Url>,
    paths: SitePaths,
    document_pattern: Regex,
}

impl UrlRewriter {
    /// `site` is the public site URL; `upstream` is the origin the gateway proxies to,
    /// whose absolute URLs are rewritten as well.
    ///
    /// # Errors
    /// Returns an error if the document pattern fails to compile.
    pub fn new(site: &Url, upstream: Option<Url>) -> Result<Self, regex::Error> {
        let mut site = site.clone();
        if !site.path().ends_with('/') {
            let path = format!("{}/", site.path());
            site.set_path(&path);
        }
        site.set_query(None);
        site.set_fragment(None);

        let login = regex::escape(LEGACY_LOGIN);
        let document_pattern = Regex::new(&format!(
            r#""([^"<>\s]*{login}[^"<>\s]*)"|'([^'<>\s]*{login}[^'<>\s]*)'"#
        ))?;

        Ok(Self {
            paths: SitePaths::from_site_url(&site),
            site,
            upstream,
            document_pattern,
        })
    }

    #[must_use]
    pub fn site(&self) -> &Url {
        &self.site
    }

    #[must_use]
    pub fn paths(&self) -> &SitePaths {
        &self.paths
    }

    /// `<site>/<slug>/` with `query` appended.
    #[must_use]
    pub fn slug_url(&self, slug: &str, query: &[(String, String)]) -> String {
        let mut url = self.site.clone();
        url.set_path(&format!("{}{slug}/", self.paths.base()));
        set_query(&mut url, query);
        url.to_string()
    }

    fn parse(&self, url: &str) -> Option<Url> {
        self.site.join(url).ok()
    }

    fn with_query_arg(&self, url: &str, key: &str, value: &str) -> String {
        let Some(mut parsed) = self.parse(url) else {
            return url.to_string();
        };
        let mut query = query_of(&parsed);
        upsert(&mut query, key, value);
        set_query(&mut parsed, &query);
        parsed.to_string()
    }

    /// Swap the base of `url` for the slug URL, keeping its query.
    #[must_use]
    pub fn replace_base(&self, url: &str, slug: &str) -> String {
        let query = self.parse(url).map(|parsed| query_of(&parsed)).unwrap_or_default();
        self.slug_url(slug, &query)
    }

    #[must_use]
    pub fn login_url(&self, url: &str, redirect: &str, force_reauth: bool, slug: &str) -> String {
        let mut merged = url.to_string();
        if !redirect.is_empty() {
            merged = self.with_query_arg(&merged, "redirect_to", redirect);
        }
        if force_reauth {
            merged = self.with_query_arg(&merged, "reauth", "1");
        }
        self.replace_base(&merged, slug)
    }

    #[must_use]
    pub fn logout_url(&self, url: &str, redirect: &str, slug: &str) -> String {
        let replaced = self.replace_base(url, slug);
        if redirect.is_empty() {
            replaced
        } else {
            self.with_query_arg(&replaced, "redirect_to", redirect)
        }
    }

    #[must_use]
    pub fn lostpassword_url(&self, url: &str, redirect: &str, slug: &str) -> String {
        self.logout_url(url, redirect, slug)
    }

    #[must_use]
    pub fn register_url(&self, url: &str, slug: &str) -> String {
        self.replace_base(url, slug)
    }

    /// Rewrite a generated site URL when it was built for the legacy login path.
    #[must_use]
    pub fn site_url(&self, url: &str, path: &str, slug: &str) -> String {
        let legacy_query = format!("{LEGACY_LOGIN}?");
        if path == LEGACY_LOGIN || path.starts_with(&legacy_query) {
            self.replace_base(url, slug)
        } else {
            url.to_string()
        }
    }

    fn same_origin(&self, url: &Url) -> bool {
        let origin = url.origin();
        origin == self.site.origin()
            || self
                .upstream
                .as_ref()
                .is_some_and(|upstream| origin == upstream.origin())
    }

    /// Whether `url` addresses the legacy login entry point on this site.
    #[must_use]
    pub fn is_legacy_login(&self, url: &Url) -> bool {
        self.same_origin(url) && url.path() == self.paths.legacy_login_path()
    }

    /// Rewrite a `Location`-style value. `None` when it does not need rewriting.
    #[must_use]
    pub fn rewrite_location(&self, value: &str, slug: &str) -> Option<String> {
        let parsed = self.parse(value.trim())?;
        self.is_legacy_login(&parsed)
            .then(|| self.slug_url(slug, &query_of(&parsed)))
    }

    /// Rewrite a `Refresh` header value (`5; url=...`).
    #[must_use]
    pub fn rewrite_refresh(&self, value: &str, slug: &str) -> Option<String> {
        let (delay, target) = value.split_once(';')?;
        let target = target.trim_start();
        let has_prefix = target
            .get(..4)
            .is_some_and(|head| head.eq_ignore_ascii_case("url="));
        let url = if has_prefix {
            target.get(4..).unwrap_or_default()
        } else {
            target
        };

        let rewritten = self.rewrite_location(url, slug)?;
        if has_prefix {
            Some(format!("{delay}; url={rewritten}"))
        } else {
            Some(format!("{delay}; {rewritten}"))
        }
    }

    /// Rewrite every quoted legacy login URL inside an HTML document.
    #[must_use]
    pub fn rewrite_document<'a>(&self, html: &'a str, slug: &str) -> Cow<'a, str> {
        self.document_pattern.replace_all(html, |caps: &Captures<'_>| {
            let (quote, raw) = match (caps.get(1), caps.get(2)) {
                (Some(value), _) => ('"', value.as_str()),
                (None, Some(value)) => ('\'', value.as_str()),
                (None, None) => return caps[0].to_string(),
            };

            let separator = if raw.contains("&#038;") {
                "&#038;"
            } else if raw.contains("&amp;") {
                "&amp;"
            } else {
                "&"
            };
            let decoded = raw.replace("&#038;", "&").replace("&amp;", "&");

            match self.rewrite_location(&decoded, slug) {
                Some(rewritten) => format!("{quote}{}{quote}", rewritten.replace('&', separator)),
                None => caps[0].to_string(),
            }
        })
    }
}

/// [`UrlRewriter`] bound to the slug that was current when one response started.
#[derive(Clone, Debug)]
pub struct ResponseRewriter<'a> {
    rewriter: &'a UrlRewriter,
    slug: String,
}

impl<'a> ResponseRewriter<'a> {
    #[must_use]
    pub fn new(rewriter: &'a UrlRewriter, slug: String) -> Self {
        Self { rewriter, slug }
    }

    #[must_use]
    pub fn location(&self, value: &str) -> Option<String> {
        self.rewriter.rewrite_location(value, &self.slug)
    }

    #[must_use]
    pub fn refresh(&self, value: &str) -> Option<String> {
        self.rewriter.rewrite_refresh(value, &self.slug)
    }

    #[must_use]
    pub fn document<'h>(&self, html: &'h str) -> Cow<'h, str> {
        self.rewriter.rewrite_document(html, &self.slug)
    }
}
