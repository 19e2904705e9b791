//! Serve command handler
//!
//! The image's foreground command: `slipway serve --bind <host:port>
//! --workers <N> <entry>`. Flags override the recipe's launch spec, and the
//! result is validated again, so a bind port that differs from the declared
//! port is rejected here too.

use anyhow::Result;
use clap::Args;
use slipway_core::{Endpoint, EntryReference, Recipe, RestartPolicy, WorkerCount};
use slipway_supervisor::{SupervisorConfig, spawn_status_server};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::commands::recipe;
use crate::config::Config;

/// Arguments for `slipway serve`
#[derive(Args)]
pub struct ServeArgs {
    /// Public endpoint, host:port
    #[arg(short, long)]
    pub bind: Option<Endpoint>,

    /// Number of worker processes
    #[arg(short, long)]
    pub workers: Option<WorkerCount>,

    /// Restart policy: never | on-failure[:N]
    #[arg(long)]
    pub restart: Option<RestartPolicy>,

    /// Directory holding the application source
    #[arg(long, env = "SLIPWAY_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Address for the status API (/health, /status)
    #[arg(long, env = "SLIPWAY_STATUS_BIND")]
    pub status_bind: Option<SocketAddr>,

    /// Run database initialization before starting workers
    #[arg(long)]
    pub run_init: bool,

    /// Application entry, module:attribute
    pub entry: Option<EntryReference>,
}

/// Applies command-line overrides to the recipe's launch spec
fn apply_overrides(recipe: &mut Recipe, args: &ServeArgs) {
    if let Some(bind) = &args.bind {
        recipe.launch.bind = bind.clone();
    }
    if let Some(workers) = args.workers {
        recipe.launch.workers = workers;
    }
    if let Some(entry) = &args.entry {
        recipe.launch.entry = entry.clone();
    }
    if let Some(restart) = args.restart {
        recipe.restart = restart;
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run the supervisor in the foreground
pub async fn serve(config: &Config, args: ServeArgs) -> Result<()> {
    let mut recipe = recipe::load(config)?;
    apply_overrides(&mut recipe, &args);
    recipe.validate()?;

    let mut supervisor_config = SupervisorConfig::from_env(&recipe)?;
    if let Some(workdir) = args.workdir {
        supervisor_config.env_file = recipe.env_file.as_ref().map(|f| workdir.join(f));
        supervisor_config.workdir = workdir;
    }
    if args.status_bind.is_some() {
        supervisor_config.status_bind = args.status_bind;
    }
    supervisor_config.run_init = args.run_init;

    info!(
        "Launching {} on {} with {} worker(s)",
        recipe.launch.entry, recipe.launch.bind, recipe.launch.workers
    );

    let supervisor = slipway_supervisor::from_recipe(&recipe, &supervisor_config)?;

    let status_task = match supervisor_config.status_bind {
        Some(addr) => Some(spawn_status_server(addr, supervisor.handle()).await?.1),
        None => None,
    };

    let result = supervisor.run(shutdown_signal()).await;

    if let Some(task) = status_task {
        task.abort();
    }

    result?;
    info!("Supervisor stopped");
    Ok(())
}
