//! CLI configuration.
//!
//! Configuration is layered, later sources winning:
//! - TOML configuration file (`--config`, or the first default path found)
//! - Environment variables (`NATTER_CLIENT__URL`, `NATTER_METRICS__PORT`, ...)
//! - Command line flags

use anyhow::{Context, Result};
use natter_core::ConnectOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "natter.toml",
    "~/.config/natter/natter.toml",
    "/etc/natter/natter.toml",
];

/// Environment variable prefix.
const ENV_PREFIX: &str = "NATTER";

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection options.
    #[serde(default)]
    pub client: ConnectOptions,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9091
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default path that
    /// exists, with environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or if any source
    /// cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
                builder = builder.add_source(config::File::with_name(&expanded).required(true));
            }
            None => {
                if let Some(found) = Self::default_path() {
                    tracing::debug!(path = %found, "Using configuration file");
                    builder = builder.add_source(config::File::with_name(&found).required(false));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific TOML file, without environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn default_path() -> Option<String> {
        CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists())
    }
}
