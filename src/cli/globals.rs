use crate::{
    cli::commands::{ARG_PLAIN_PERMALINKS, ARG_SETTINGS, ARG_SITE_URL},
    gate::{Gate, GateConfig},
    settings::{FileBackend, Settings},
};
use anyhow::{Context, Result};
use clap::ArgMatches;
use std::{path::PathBuf, sync::Arc};
use url::Url;

/// Arguments every subcommand shares.
#[derive(Clone, Debug)]
pub struct GlobalArgs {
    pub settings_path: PathBuf,
    pub site_url: Url,
    pub pretty_urls: bool,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(settings_path: PathBuf, site_url: Url) -> Self {
        Self {
            settings_path,
            site_url,
            pretty_urls: true,
        }
    }

    /// # Errors
    /// Returns an error if the site URL is missing or invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let settings_path = matches
            .get_one::<PathBuf>(ARG_SETTINGS)
            .cloned()
            .context("missing required argument: --settings")?;
        let site_url = matches
            .get_one::<String>(ARG_SITE_URL)
            .context("missing required argument: --site-url")?;
        let site_url =
            Url::parse(site_url).with_context(|| format!("invalid site URL: {site_url}"))?;

        Ok(Self {
            settings_path,
            site_url,
            pretty_urls: !matches.get_flag(ARG_PLAIN_PERMALINKS),
        })
    }

    #[must_use]
    pub fn file_backend(&self) -> Arc<FileBackend> {
        Arc::new(FileBackend::new(self.settings_path.clone()))
    }

    #[must_use]
    pub fn settings(&self) -> Arc<Settings> {
        Arc::new(Settings::new(self.file_backend()))
    }

    #[must_use]
    pub fn gate_config(&self) -> GateConfig {
        GateConfig::new(self.site_url.clone()).with_pretty_urls(self.pretty_urls)
    }

    /// Gate over the settings file with the default configuration.
    ///
    /// # Errors
    /// Returns an error if the gate cannot be built.
    pub fn gate(&self) -> Result<Gate> {
        Ok(Gate::new(self.gate_config(), self.settings())?)
    }
}
