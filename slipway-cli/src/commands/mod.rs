//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod build;
mod init;
mod launch;
mod recipe;
mod serve;
mod status;

pub use build::BuildArgs;
pub use init::InitArgs;
pub use launch::LaunchArgs;
pub use recipe::RenderArgs;
pub use serve::ServeArgs;
pub use status::StatusArgs;

use anyhow::Result;
use clap::Subcommand;
use std::process::ExitCode;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate the recipe and its dependency manifest
    Check,
    /// Print the recipe as a Containerfile
    Render(RenderArgs),
    /// Build the runtime image with podman
    Build(BuildArgs),
    /// Run the serving supervisor in the foreground
    Serve(ServeArgs),
    /// Run a built image with its declared port published
    Launch(LaunchArgs),
    /// Query a running supervisor's status API
    Status(StatusArgs),
    /// Write a starter recipe
    Init(InitArgs),
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module and returns the
/// process exit code for a command that did not fail.
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Check => recipe::check(config).map(|_| ExitCode::SUCCESS),
        Commands::Render(args) => recipe::render(config, args).map(|_| ExitCode::SUCCESS),
        Commands::Build(args) => build::build(config, args).await.map(|_| ExitCode::SUCCESS),
        Commands::Serve(args) => serve::serve(config, args).await.map(|_| ExitCode::SUCCESS),
        Commands::Launch(args) => launch::launch(config, args).await,
        Commands::Status(args) => status::status(args).await.map(|_| ExitCode::SUCCESS),
        Commands::Init(args) => init::init(config, args).map(|_| ExitCode::SUCCESS),
    }
}
