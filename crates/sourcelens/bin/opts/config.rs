use std::path::{Path, PathBuf};

use clap::Parser;
use eyre::{Result, WrapErr};
use sourcelens_backend::config::PipelineConfig;

/// Configuration file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "sourcelens.toml";

#[derive(Clone, Debug, Default, Parser)]
pub struct ConfigOpts {
    /// Path to a TOML configuration file. Defaults to `./sourcelens.toml` if it exists.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seconds to wait for the explorer and the RPC node.
    #[arg(long, value_name = "SECS")]
    pub fetch_timeout: Option<u64>,

    /// Seconds to wait for the compiler.
    #[arg(long, value_name = "SECS")]
    pub compile_timeout: Option<u64>,

    /// Only accept exact matches.
    #[arg(long)]
    pub strict: bool,
}

impl ConfigOpts {
    /// Loads the configuration file, if any, and applies the command line overrides.
    pub fn load(&self) -> Result<PipelineConfig> {
        let mut config = match self.config_file() {
            Some(path) => load_file(&path)?,
            None => PipelineConfig::default(),
        };

        if let Some(secs) = self.fetch_timeout {
            config.timeouts.fetch_secs = secs;
        }
        if let Some(secs) = self.compile_timeout {
            config.timeouts.compile_secs = secs;
        }
        if self.strict {
            config.policy.accept_near_perfect = false;
        }

        debug!(?config, "loaded configuration");
        Ok(config)
    }

    fn config_file(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.is_file().then_some(default)
        })
    }
}

fn load_file(path: &Path) -> Result<PipelineConfig> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).wrap_err_with(|| format!("invalid config file {}", path.display()))
}
