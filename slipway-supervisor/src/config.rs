//! Supervisor configuration
//!
//! Settings that are not part of the recipe: where the source tree lives at
//! run time, which env file to load, and whether to expose the status API.

use anyhow::Context;
use slipway_core::Recipe;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory worker and probe commands run in
    pub workdir: PathBuf,

    /// Env file whose variables are passed to workers
    pub env_file: Option<PathBuf>,

    /// Address of the status API, disabled when unset
    pub status_bind: Option<SocketAddr>,

    /// Run the recipe's database initialization before spawning workers
    pub run_init: bool,

    /// How often a starting worker's port is probed
    pub ready_poll_interval: Duration,
}

impl SupervisorConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            env_file: None,
            status_bind: None,
            run_init: false,
            ready_poll_interval: Duration::from_millis(100),
        }
    }

    /// Creates configuration for a recipe, taking the env file from it
    ///
    /// Environment variables:
    /// - SLIPWAY_WORKDIR (optional, default: current directory)
    /// - SLIPWAY_STATUS_BIND (optional, e.g. 127.0.0.1:9090)
    /// - SLIPWAY_READY_POLL_MS (optional, default: 100)
    pub fn from_env(recipe: &Recipe) -> anyhow::Result<Self> {
        let workdir = match std::env::var("SLIPWAY_WORKDIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => std::env::current_dir().context("Failed to read current directory")?,
        };

        let status_bind = std::env::var("SLIPWAY_STATUS_BIND")
            .ok()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .with_context(|| format!("SLIPWAY_STATUS_BIND '{}' is not an address", addr))
            })
            .transpose()?;

        let ready_poll_interval = std::env::var("SLIPWAY_READY_POLL_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(100));

        let env_file = recipe.env_file.as_ref().map(|f| workdir.join(f));

        Ok(Self {
            workdir,
            env_file,
            status_bind,
            run_init: false,
            ready_poll_interval,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.workdir.is_dir() {
            anyhow::bail!("working directory {} does not exist", self.workdir.display());
        }

        if self.ready_poll_interval.is_zero() {
            anyhow::bail!("ready poll interval must be greater than 0");
        }

        Ok(())
    }
}
