//! Slipway Supervisor
//!
//! The foreground process of a built image. It resolves the application
//! entry, keeps a fixed pool of worker processes alive and exposes them
//! behind the single declared endpoint.
//!
//! Architecture:
//! - Configuration: working directory, env file, status API address
//! - Resolver: checks the entry reference before anything starts
//! - Spawner: starts workers on private loopback ports
//! - Supervisor: readiness, binding, connection relay, restart policy
//! - API: `/health` and `/status`

pub mod api;
pub mod config;
pub mod env_file;
pub mod init;
pub mod resolver;
pub mod spawner;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use api::{create_router, spawn_status_server};
pub use config::SupervisorConfig;
pub use env_file::load_env_file;
pub use resolver::{EntryResolver, ProbeResolver};
pub use spawner::{ProcessSpawner, WorkerHandle, WorkerSpawner};
pub use supervisor::{LaunchInit, Supervisor, SupervisorHandle};

use anyhow::Result;
use slipway_core::Recipe;
use std::sync::Arc;
use tracing::info;

/// Assembles a process-backed supervisor for a recipe
///
/// Env file variables are passed to the probe, the init command and every
/// worker. Initialization is only attached when `config.run_init` is set and
/// the recipe has an init command.
pub fn from_recipe(recipe: &Recipe, config: &SupervisorConfig) -> Result<Supervisor> {
    config.validate()?;
    recipe.validate()?;

    let envs = match &config.env_file {
        Some(path) => load_env_file(path)?,
        None => Vec::new(),
    };

    let resolver = ProbeResolver::new(recipe.launch.probe_command.clone(), &config.workdir)
        .with_envs(envs.clone());
    let spawner = ProcessSpawner::new(recipe.launch.clone(), &config.workdir, envs.clone());

    let mut supervisor = Supervisor::new(
        recipe.name.clone(),
        recipe.launch.clone(),
        Arc::new(resolver),
        Arc::new(spawner),
    )
    .with_restart_policy(recipe.restart)
    .with_poll_interval(config.ready_poll_interval);

    if config.run_init {
        if recipe.init.enabled {
            anyhow::bail!(
                "--run-init was requested but database initialization already ran at build time"
            );
        }
        if recipe.init.command.is_empty() {
            anyhow::bail!("--run-init was requested but the recipe has no init command");
        }
        info!("Database initialization will run before workers start");
        supervisor = supervisor.with_init(LaunchInit {
            command: recipe.init.command.clone(),
            workdir: config.workdir.clone(),
            envs,
        });
    }

    Ok(supervisor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_core::domain::launch::to_owned_args;
    use slipway_core::domain::recipe::{DEFAULT_INSTALL_COMMAND, DEFAULT_VERIFY_COMMAND};
    use slipway_core::{Endpoint, InitSpec, LaunchSpec, PipelineState, RestartPolicy, WorkDir, WorkerCount};
    use std::path::PathBuf;

    fn recipe() -> Recipe {
        Recipe {
            name: "library-api".to_string(),
            base: "python:3.11-slim".parse().unwrap(),
            workdir: WorkDir::default(),
            manifest: PathBuf::from("requirements.txt"),
            source: PathBuf::from("."),
            expose: 5000,
            launch: LaunchSpec::new(
                Endpoint::any(5000),
                WorkerCount::new(3).unwrap(),
                "app:app".parse().unwrap(),
            ),
            install_command: to_owned_args(DEFAULT_INSTALL_COMMAND),
            verify_command: to_owned_args(DEFAULT_VERIFY_COMMAND),
            init: InitSpec::default(),
            env_file: Some(".env".to_string()),
            restart: RestartPolicy::Never,
            recipe_file: "slipway.lua".to_string(),
        }
    }

    #[test]
    fn test_from_recipe_without_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SupervisorConfig::new(dir.path());
        config.env_file = Some(dir.path().join(".env"));

        let supervisor = from_recipe(&recipe(), &config).unwrap();
        assert_eq!(supervisor.handle().state(), PipelineState::SourceMaterialized);
    }

    #[test]
    fn test_run_init_requires_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SupervisorConfig::new(dir.path());
        config.run_init = true;

        assert!(from_recipe(&recipe(), &config).is_err());
    }

    #[test]
    fn test_run_init_only_when_not_run_at_build_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SupervisorConfig::new(dir.path());
        config.run_init = true;

        let mut deferred = recipe();
        deferred.init = InitSpec {
            enabled: false,
            command: vec!["python".to_string(), "init_db.py".to_string()],
        };
        assert!(from_recipe(&deferred, &config).is_ok());

        let mut built = deferred.clone();
        built.init.enabled = true;
        let err = from_recipe(&built, &config).unwrap_err();
        assert!(err.to_string().contains("already ran at build time"));
    }
}
