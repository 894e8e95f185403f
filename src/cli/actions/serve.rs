use crate::{
    api::{self, AdminToken, NotFoundPage, Upstream},
    cli::{commands::gateway::Options, globals::GlobalArgs},
    gate::{Gate, Status},
    settings::{DEFAULT_REFRESH_INTERVAL, Settings},
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub options: Options,
}

/// Execute the serve action.
/// # Errors
/// Returns an error if the settings cannot be prepared or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Global args: {:?}", args.globals);

    let config = args
        .globals
        .gate_config()
        .with_upstream_url(args.options.upstream.clone())
        .with_auth_cookie_prefix(args.options.auth_cookie_prefix.clone())
        .with_agent_token(args.options.agent_token.clone());
    let backend = args.globals.file_backend();
    backend
        .clone()
        .watch(DEFAULT_REFRESH_INTERVAL)
        .await
        .context("Failed to load settings")?;
    let gate = Gate::new(config, Arc::new(Settings::new(backend)))?;

    if !gate.is_activated()? {
        gate.activate().context("Failed to activate")?;
    }

    let admin_token = AdminToken::new(args.options.admin_token.clone());
    let status = gate.status();
    log_startup(&args, &status, &admin_token);
    for notice in &status.notices {
        warn!("{}", notice.message());
    }

    let not_found = match &args.options.not_found_page {
        Some(path) => NotFoundPage::from_file(path)?,
        None => NotFoundPage::default(),
    };
    let upstream = Upstream::new(
        args.options.upstream.clone(),
        args.options.upstream_timeout,
        args.options.body_limit,
    )
    .context("Failed to build upstream client")?;

    api::new(
        args.options.port,
        Arc::new(gate),
        upstream,
        not_found,
        admin_token,
    )
    .await
}

fn log_startup(args: &Args, status: &Status, admin_token: &AdminToken) {
    let entries = [
        ("listen", format!("tcp:{}", args.options.port)),
        ("site_url", args.globals.site_url.to_string()),
        ("upstream", args.options.upstream.to_string()),
        ("settings", args.globals.settings_path.display().to_string()),
        ("login_url", status.login_url.clone()),
        ("pretty_permalinks", status.pretty_permalinks.to_string()),
        ("rule_found", status.rule_found.to_string()),
        (
            "admin_api",
            if admin_token.is_configured() {
                format!("{}/*", api::ADMIN_PREFIX)
            } else {
                "disabled".to_string()
            },
        ),
        ("agent_token_set", args.options.agent_token.is_some().to_string()),
        (
            "not_found_page",
            args.options
                .not_found_page
                .as_ref()
                .map_or_else(|| "built-in".to_string(), |path| path.display().to_string()),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

const BANNER: &str = r"
   ._________.
   |  _____  |
   | |     | |
   | |  o  | |   L O G I N V E I L {VERSION}
   | |_____| |
   |_________|";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit(" abc "), "abc");
        assert_eq!(short_commit("unknown"), "unknown");
    }

    #[test]
    fn banner_carries_version() {
        assert!(banner().contains(env!("CARGO_PKG_VERSION")));
        assert!(!banner().contains("{VERSION}"));
    }
}
