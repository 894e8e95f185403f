use crate::{
    cli::globals::GlobalArgs,
    gate::{Gate, Status},
};
use anyhow::{Context, Result};
use std::io::Write;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Activate,
    Deactivate,
    Flush,
    Status,
    SlugGet,
    SlugSet(String),
}

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub command: Command,
}

/// Execute an administrative command against the settings file.
/// # Errors
/// Returns an error if the settings cannot be read or written, or the slug is rejected.
pub fn execute(args: &Args) -> Result<()> {
    debug!("Global args: {:?}", args.globals);
    let gate = args.globals.gate()?;
    let mut stdout = std::io::stdout().lock();
    run(&gate, &args.command, &mut stdout)
}

/// # Errors
/// Returns an error if the command fails or the output cannot be written.
pub fn run(gate: &Gate, command: &Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Activate => {
            gate.activate().context("Failed to activate")?;
            writeln!(out, "Activated. Login URL: {}", gate.login_url())?;
        }
        Command::Deactivate => {
            gate.deactivate().context("Failed to deactivate")?;
            writeln!(out, "Deactivated. Rewrite rules removed.")?;
        }
        Command::Flush => {
            gate.flush().context("Failed to flush rewrite rules")?;
            writeln!(out, "Rewrite rules flushed.")?;
        }
        Command::Status => write_status(out, &gate.status())?,
        Command::SlugGet => writeln!(out, "{}", gate.slug())?,
        Command::SlugSet(candidate) => {
            let update = gate.update_slug(candidate)?;
            if update.changed {
                writeln!(
                    out,
                    "Login slug set to {}. Login URL: {}",
                    update.slug,
                    gate.login_url()
                )?;
            } else {
                writeln!(out, "Login slug unchanged: {}", update.slug)?;
            }
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn write_status(out: &mut impl Write, status: &Status) -> Result<()> {
    let entries = [
        ("slug", status.slug.as_str()),
        ("login_url", status.login_url.as_str()),
        ("pretty_permalinks", yes_no(status.pretty_permalinks)),
        ("rule_found", yes_no(status.rule_found)),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        writeln!(out, "{key}:{padding} {value}")?;
    }
    for notice in &status.notices {
        writeln!(out, "notice: {}", notice.message())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gate::GateConfig, settings::Settings};
    use std::sync::Arc;
    use url::Url;

    fn gate() -> Result<Gate> {
        let config = GateConfig::new(Url::parse("https://example.com/")?);
        Ok(Gate::new(config, Arc::new(Settings::in_memory()))?)
    }

    fn output(gate: &Gate, command: &Command) -> Result<String> {
        let mut out = Vec::new();
        run(gate, command, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn activate_then_status() -> Result<()> {
        let gate = gate()?;
        assert_eq!(
            output(&gate, &Command::Activate)?,
            "Activated. Login URL: https://example.com/login/\n"
        );

        let status = output(&gate, &Command::Status)?;
        assert!(status.contains("slug:              login\n"));
        assert!(status.contains("rule_found:        yes\n"));
        assert!(!status.contains("notice:"));
        Ok(())
    }

    #[test]
    fn status_lists_notices() -> Result<()> {
        let gate = gate()?;
        let status = output(&gate, &Command::Status)?;
        assert!(status.contains("rule_found:        no\n"));
        assert!(status.contains("notice: No rewrite rule found."));
        Ok(())
    }

    #[test]
    fn slug_set_and_get() -> Result<()> {
        let gate = gate()?;
        gate.activate()?;

        assert_eq!(
            output(&gate, &Command::SlugSet("Portal".to_string()))?,
            "Login slug set to portal. Login URL: https://example.com/portal/\n"
        );
        assert_eq!(
            output(&gate, &Command::SlugSet("portal".to_string()))?,
            "Login slug unchanged: portal\n"
        );
        assert_eq!(output(&gate, &Command::SlugGet)?, "portal\n");
        Ok(())
    }

    #[test]
    fn reserved_slug_fails() -> Result<()> {
        let gate = gate()?;
        gate.activate()?;

        let result = output(&gate, &Command::SlugSet("wp-login.php".to_string()));
        assert!(result.is_err());
        if let Err(err) = result {
            assert_eq!(
                err.to_string(),
                "Invalid or reserved slug. Please choose a different value."
            );
        }
        assert_eq!(output(&gate, &Command::SlugGet)?, "login\n");
        Ok(())
    }

    #[test]
    fn deactivate_and_flush() -> Result<()> {
        let gate = gate()?;
        gate.activate()?;

        output(&gate, &Command::Deactivate)?;
        assert!(!gate.status().rule_found);

        assert_eq!(output(&gate, &Command::Flush)?, "Rewrite rules flushed.\n");
        assert!(gate.status().rule_found);
        Ok(())
    }
}
