use crate::{api::proxy, gate::context::DEFAULT_AUTH_COOKIE_PREFIX};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};
use url::Url;

pub const ARG_PORT: &str = "port";
pub const ARG_UPSTREAM: &str = "upstream";
pub const ARG_ADMIN_TOKEN: &str = "admin-token";
pub const ARG_AGENT_TOKEN: &str = "agent-token";
pub const ARG_NOT_FOUND_PAGE: &str = "not-found-page";
pub const ARG_AUTH_COOKIE_PREFIX: &str = "auth-cookie-prefix";
pub const ARG_BODY_LIMIT: &str = "body-limit";
pub const ARG_UPSTREAM_TIMEOUT: &str = "upstream-timeout";

#[derive(Clone)]
pub struct Options {
    pub port: u16,
    pub upstream: Url,
    pub admin_token: Option<SecretString>,
    pub agent_token: Option<SecretString>,
    pub not_found_page: Option<PathBuf>,
    pub auth_cookie_prefix: String,
    pub body_limit: usize,
    pub upstream_timeout: Duration,
}

impl Options {
    /// Parse gateway arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let upstream = matches
            .get_one::<String>(ARG_UPSTREAM)
            .context("missing required argument: --upstream")?;
        let upstream =
            Url::parse(upstream).with_context(|| format!("invalid upstream URL: {upstream}"))?;

        let secret = |id: &str| {
            matches
                .get_one::<String>(id)
                .filter(|value| !value.trim().is_empty())
                .map(|value| SecretString::from(value.clone()))
        };

        Ok(Self {
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
            upstream,
            admin_token: secret(ARG_ADMIN_TOKEN),
            agent_token: secret(ARG_AGENT_TOKEN),
            not_found_page: matches.get_one::<PathBuf>(ARG_NOT_FOUND_PAGE).cloned(),
            auth_cookie_prefix: matches
                .get_one::<String>(ARG_AUTH_COOKIE_PREFIX)
                .cloned()
                .unwrap_or_else(|| DEFAULT_AUTH_COOKIE_PREFIX.to_string()),
            body_limit: matches
                .get_one::<usize>(ARG_BODY_LIMIT)
                .copied()
                .unwrap_or(proxy::DEFAULT_BODY_LIMIT),
            upstream_timeout: matches
                .get_one::<u64>(ARG_UPSTREAM_TIMEOUT)
                .copied()
                .map_or(proxy::DEFAULT_TIMEOUT, Duration::from_secs),
        })
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |token: &Option<SecretString>| token.as_ref().map(|_| "***");
        f.debug_struct("Options")
            .field("port", &self.port)
            .field("upstream", &self.upstream.as_str())
            .field("admin_token", &redacted(&self.admin_token))
            .field("agent_token", &redacted(&self.agent_token))
            .field("not_found_page", &self.not_found_page)
            .field("auth_cookie_prefix", &self.auth_cookie_prefix)
            .field("body_limit", &self.body_limit)
            .field("upstream_timeout", &self.upstream_timeout)
            .finish()
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("LOGINVEIL_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_UPSTREAM)
                .short('u')
                .long(ARG_UPSTREAM)
                .help("Origin of the CMS to protect, e.g. http://127.0.0.1:8081")
                .env("LOGINVEIL_UPSTREAM")
                .required(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_TOKEN)
                .long(ARG_ADMIN_TOKEN)
                .help("Bearer token for the admin API; the API stays hidden without it")
                .env("LOGINVEIL_ADMIN_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_AGENT_TOKEN)
                .long(ARG_AGENT_TOKEN)
                .help("Token trusted automation sends in the X-Loginveil-Agent header")
                .env("LOGINVEIL_AGENT_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_NOT_FOUND_PAGE)
                .long(ARG_NOT_FOUND_PAGE)
                .help("HTML file served for hidden paths")
                .env("LOGINVEIL_NOT_FOUND_PAGE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_AUTH_COOKIE_PREFIX)
                .long(ARG_AUTH_COOKIE_PREFIX)
                .help("Name prefix of the cookie marking a signed-in visitor")
                .default_value(DEFAULT_AUTH_COOKIE_PREFIX)
                .env("LOGINVEIL_AUTH_COOKIE_PREFIX"),
        )
        .arg(
            Arg::new(ARG_BODY_LIMIT)
                .long(ARG_BODY_LIMIT)
                .help("Maximum request body forwarded upstream, in bytes")
                .env("LOGINVEIL_BODY_LIMIT")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_UPSTREAM_TIMEOUT)
                .long(ARG_UPSTREAM_TIMEOUT)
                .help("Upstream request timeout in seconds")
                .default_value("30")
                .env("LOGINVEIL_UPSTREAM_TIMEOUT")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("serve"))
    }

    #[test]
    fn upstream_required() {
        temp_env::with_vars([("LOGINVEIL_UPSTREAM", None::<&str>)], || {
            let result = command().try_get_matches_from(vec!["serve"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn parse_defaults() -> Result<()> {
        temp_env::with_vars(
            [
                ("LOGINVEIL_UPSTREAM", Some("http://127.0.0.1:8081")),
                ("LOGINVEIL_PORT", None),
                ("LOGINVEIL_ADMIN_TOKEN", None),
                ("LOGINVEIL_AGENT_TOKEN", None),
                ("LOGINVEIL_BODY_LIMIT", None),
                ("LOGINVEIL_UPSTREAM_TIMEOUT", None),
                ("LOGINVEIL_AUTH_COOKIE_PREFIX", None),
            ],
            || {
                let matches = command().try_get_matches_from(vec!["serve"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(options.port, 8080);
                assert_eq!(options.upstream.as_str(), "http://127.0.0.1:8081/");
                assert!(options.admin_token.is_none());
                assert_eq!(options.auth_cookie_prefix, DEFAULT_AUTH_COOKIE_PREFIX);
                assert_eq!(options.body_limit, proxy::DEFAULT_BODY_LIMIT);
                assert_eq!(options.upstream_timeout, Duration::from_secs(30));
                Ok(())
            },
        )
    }

    #[test]
    fn parse_from_env() -> Result<()> {
        temp_env::with_vars(
            [
                ("LOGINVEIL_UPSTREAM", Some("http://cms.internal")),
                ("LOGINVEIL_PORT", Some("9000")),
                ("LOGINVEIL_ADMIN_TOKEN", Some("s3cret")),
                ("LOGINVEIL_AGENT_TOKEN", Some("  ")),
                ("LOGINVEIL_UPSTREAM_TIMEOUT", Some("5")),
            ],
            || {
                let matches = command().try_get_matches_from(vec!["serve"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(options.port, 9000);
                assert_eq!(
                    options.admin_token.as_ref().map(|t| t.expose_secret().to_string()),
                    Some("s3cret".to_string())
                );
                assert!(options.agent_token.is_none());
                assert_eq!(options.upstream_timeout, Duration::from_secs(5));
                assert!(!format!("{options:?}").contains("s3cret"));
                Ok(())
            },
        )
    }

    #[test]
    fn invalid_upstream_rejected() {
        temp_env::with_vars([("LOGINVEIL_UPSTREAM", Some("not a url"))], || {
            let matches = command().try_get_matches_from(vec!["serve"]);
            assert!(matches.is_ok());
            if let Ok(matches) = matches {
                assert!(Options::parse(&matches).is_err());
            }
        });
    }
}
