pub mod gateway;
pub mod logging;

use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

pub const ARG_SETTINGS: &str = "settings";
pub const ARG_SITE_URL: &str = "site-url";
pub const ARG_PLAIN_PERMALINKS: &str = "plain-permalinks";
pub const ARG_SLUG: &str = "slug";

pub const CMD_SERVE: &str = "serve";
pub const CMD_ACTIVATE: &str = "activate";
pub const CMD_DEACTIVATE: &str = "deactivate";
pub const CMD_FLUSH: &str = "flush";
pub const CMD_STATUS: &str = "status";
pub const CMD_SLUG: &str = "slug";
pub const CMD_SLUG_GET: &str = "get";
pub const CMD_SLUG_SET: &str = "set";

fn global_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SETTINGS)
                .short('s')
                .long(ARG_SETTINGS)
                .help("JSON file holding the login slug and the rewrite table")
                .default_value("loginveil.json")
                .env("LOGINVEIL_SETTINGS")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_SITE_URL)
                .long(ARG_SITE_URL)
                .help("Public URL of the site, e.g. https://example.com/blog/")
                .default_value("http://localhost:8080/")
                .env("LOGINVEIL_SITE_URL")
                .global(true),
        )
        .arg(
            Arg::new(ARG_PLAIN_PERMALINKS)
                .long(ARG_PLAIN_PERMALINKS)
                .help("The site uses plain permalinks; slug routing is unavailable")
                .env("LOGINVEIL_PLAIN_PERMALINKS")
                .global(true)
                .action(ArgAction::SetTrue),
        )
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("loginveil")
        .about("Hide the CMS login behind a custom URL")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(gateway::with_args(
            Command::new(CMD_SERVE).about("Run the login gateway in front of the CMS"),
        ))
        .subcommand(
            Command::new(CMD_ACTIVATE)
                .about("Store the default slug if missing and install the rewrite rule"),
        )
        .subcommand(Command::new(CMD_DEACTIVATE).about("Remove the rewrite rule"))
        .subcommand(
            Command::new(CMD_FLUSH).about("Rebuild the rewrite rule for the current slug"),
        )
        .subcommand(
            Command::new(CMD_STATUS).about("Show slug, login URL and routing diagnostics"),
        )
        .subcommand(
            Command::new(CMD_SLUG)
                .about("Read or change the login slug")
                .subcommand_required(true)
                .subcommand(Command::new(CMD_SLUG_GET).about("Print the current slug"))
                .subcommand(
                    Command::new(CMD_SLUG_SET).about("Store a new slug").arg(
                        Arg::new(ARG_SLUG)
                            .help("New slug, e.g. portal")
                            .required(true),
                    ),
                ),
        );

    let command = global_args(command);
    logging::with_args(command)
}
