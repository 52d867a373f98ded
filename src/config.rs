//! Configuration parsing and validation for the relay server
//!
//! This module handles command-line argument parsing and validation using clap.
//! The upstream credential and payload defaults are deliberately not here: they are read from
//! the environment on every request.
use anyhow::{Context, anyhow};
use cb_relay::client::PoolSettings;
use cb_relay::upstream::{DEFAULT_UPSTREAM_URL, UpstreamConfig};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the relay will listen.
    #[arg(short = 'p', long, env = "CB_RELAY_PORT", default_value_t = 3000)]
    pub port: u16,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// Whether to enable the metrics endpoint. Pass `--metrics false` to turn it off.
    #[arg(short = 'm', long, default_value_t = true, action = clap::ArgAction::Set)]
    pub metrics: bool,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "cb_relay")]
    pub metrics_prefix: String,

    /// Directory the relay is served from. Secret files are searched for in `secure/`
    /// directories next to its ancestors, outside the public web root.
    #[arg(short = 'd', long, env = "CB_RELAY_BASE_DIR", default_value = ".")]
    pub base_dir: PathBuf,

    /// A secret file to try before the ones derived from the base directory.
    #[arg(long, env = "CB_RELAY_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,

    /// The upstream endpoint requests are forwarded to.
    #[arg(long, env = "CB_RELAY_UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: Url,

    /// How long (in seconds) to wait for the upstream response, body included.
    #[arg(long, default_value_t = 60)]
    pub upstream_timeout_secs: u64,

    /// Maximum number of idle HTTP connections to keep alive to the upstream host.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle HTTP connections alive.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,
}

impl Config {
    pub fn validate(mut self) -> Result<Self, anyhow::Error> {
        self.base_dir = self.base_dir.canonicalize().with_context(|| {
            format!("Base directory '{}' is not accessible", self.base_dir.display())
        })?;
        if !self.base_dir.is_dir() {
            return Err(anyhow!(
                "Base directory '{}' is not a directory",
                self.base_dir.display()
            ));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(anyhow!("Upstream timeout must be at least one second"));
        }
        Ok(self)
    }

    pub fn upstream(&self) -> UpstreamConfig {
        UpstreamConfig::builder()
            .url(self.upstream_url.clone())
            .timeout(Duration::from_secs(self.upstream_timeout_secs))
            .build()
    }

    pub fn pool(&self) -> PoolSettings {
        PoolSettings {
            idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
            max_idle_per_host: self.pool_max_idle_per_host,
        }
    }
}
