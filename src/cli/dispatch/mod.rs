//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes.

use crate::cli::{
    actions::{Action, admin, serve},
    commands::{
        self, ARG_SLUG, CMD_ACTIVATE, CMD_DEACTIVATE, CMD_FLUSH, CMD_SERVE, CMD_SLUG,
        CMD_SLUG_GET, CMD_SLUG_SET, CMD_STATUS, gateway,
    },
    globals::GlobalArgs,
};
use anyhow::{Context, Result, bail};
use clap::ArgMatches;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let Some((name, sub)) = matches.subcommand() else {
        bail!("missing subcommand");
    };

    // Global arguments are read where they were propagated to: the innermost subcommand.
    let leaf = innermost(sub);
    let globals = GlobalArgs::parse(leaf)?;

    let command = match name {
        CMD_SERVE => {
            return Ok(Action::Serve(serve::Args {
                globals,
                options: gateway::Options::parse(sub)?,
            }));
        }
        CMD_ACTIVATE => admin::Command::Activate,
        CMD_DEACTIVATE => admin::Command::Deactivate,
        CMD_FLUSH => admin::Command::Flush,
        CMD_STATUS => admin::Command::Status,
        CMD_SLUG => match sub.subcommand() {
            Some((CMD_SLUG_GET, _)) => admin::Command::SlugGet,
            Some((CMD_SLUG_SET, set)) => admin::Command::SlugSet(
                set.get_one::<String>(ARG_SLUG)
                    .cloned()
                    .context("missing required argument: <slug>")?,
            ),
            _ => bail!("missing subcommand: {CMD_SLUG} {CMD_SLUG_GET}|{CMD_SLUG_SET}"),
        },
        other => bail!("unknown subcommand: {other}"),
    };

    Ok(Action::Admin(admin::Args { globals, command }))
}

/// Innermost subcommand matches, where global arguments end up.
#[must_use]
pub fn innermost(matches: &ArgMatches) -> &ArgMatches {
    let mut current = matches;
    while let Some((_, sub)) = current.subcommand() {
        current = sub;
    }
    current
}

/// Verbosity count, wherever `-v` was given.
#[must_use]
pub fn verbosity(matches: &ArgMatches) -> u8 {
    innermost(matches)
        .get_one::<u8>(commands::logging::ARG_VERBOSITY)
        .copied()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(args: &[&str]) -> Result<Action> {
        let matches = commands::new().try_get_matches_from(args.iter().copied())?;
        handler(&matches)
    }

    #[test]
    fn serve_requires_upstream() {
        temp_env::with_vars([("LOGINVEIL_UPSTREAM", None::<&str>)], || {
            let result = dispatch(&["loginveil", "serve"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn serve_action() -> Result<()> {
        temp_env::with_vars(
            [
                ("LOGINVEIL_UPSTREAM", Some("http://127.0.0.1:8081")),
                ("LOGINVEIL_SITE_URL", None),
                ("LOGINVEIL_PORT", None),
            ],
            || {
                let action = dispatch(&["loginveil", "serve", "--port", "9090"])?;
                let Action::Serve(args) = action else {
                    bail!("expected serve action");
                };
                assert_eq!(args.options.port, 9090);
                assert_eq!(args.globals.site_url.as_str(), "http://localhost:8080/");
                Ok(())
            },
        )
    }

    #[test]
    fn admin_actions() -> Result<()> {
        let cases: [(&[&str], admin::Command); 6] = [
            (&["loginveil", "activate"], admin::Command::Activate),
            (&["loginveil", "deactivate"], admin::Command::Deactivate),
            (&["loginveil", "flush"], admin::Command::Flush),
            (&["loginveil", "status"], admin::Command::Status),
            (&["loginveil", "slug", "get"], admin::Command::SlugGet),
            (
                &["loginveil", "slug", "set", "portal"],
                admin::Command::SlugSet("portal".to_string()),
            ),
        ];

        for (args, expected) in cases {
            let Action::Admin(parsed) = dispatch(args)? else {
                bail!("expected admin action for {args:?}");
            };
            assert_eq!(parsed.command, expected);
        }
        Ok(())
    }

    #[test]
    fn globals_after_nested_subcommand() -> Result<()> {
        temp_env::with_vars([("LOGINVEIL_SETTINGS", None::<&str>)], || {
            let action = dispatch(&[
                "loginveil",
                "slug",
                "get",
                "--settings",
                "/tmp/other.json",
                "-vv",
            ])?;
            let Action::Admin(parsed) = action else {
                bail!("expected admin action");
            };
            assert_eq!(
                parsed.globals.settings_path,
                std::path::PathBuf::from("/tmp/other.json")
            );

            let matches = commands::new()
                .try_get_matches_from(["loginveil", "slug", "get", "-vv"])?;
            assert_eq!(verbosity(&matches), 2);
            Ok(())
        })
    }
}
