//! Per-invocation state shared by every command.

use anyhow::{bail, Context, Result};
use lmsft_core::{ConfigLoader, ConfigTree};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CliContext {
    pub config_dir: PathBuf,
    pub config_overrides: Vec<PathBuf>,
    pub json: bool,
}

impl CliContext {
    pub fn new(config_dir: PathBuf, config_overrides: Vec<PathBuf>, json: bool) -> Self {
        Self { config_dir, config_overrides, json }
    }

    /// Assemble the configuration tree once for this run.
    pub fn load_config(&self) -> Result<ConfigTree> {
        if !self.config_dir.is_dir() {
            bail!(
                "configuration directory not found: {} (set --config-dir or LMSFT_CONFIG_DIR)",
                self.config_dir.display()
            );
        }

        let loader = self
            .config_overrides
            .iter()
            .fold(ConfigLoader::new(&self.config_dir), |loader, path| loader.with_override(path));
        loader.load().with_context(|| format!("Failed to load configuration from {}", self.config_dir.display()))
    }
}
