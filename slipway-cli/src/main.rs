//! Slipway CLI
//!
//! Builds a runtime image from a `slipway.lua` recipe and runs the serving
//! supervisor, inside the image or locally.

mod commands;
mod config;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use slipway_builder::BuildError;
use slipway_core::StageError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "slipway")]
#[command(about = "Package a web application into a pinned image and serve it", long_about = None)]
struct Cli {
    /// Recipe file
    #[arg(
        short,
        long,
        global = true,
        env = "SLIPWAY_RECIPE",
        default_value = "slipway.lua"
    )]
    recipe: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so rendered output on stdout stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "slipway=info,slipway_builder=info,slipway_supervisor=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config { recipe: cli.recipe };

    match handle_command(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗ Error:".red().bold(), e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Maps an error to the process exit code
///
/// 1 for build and validation failures, 2 when the entry reference does not
/// resolve, 3 when the supervisor lost every worker.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    let code = if let Some(e) = error.downcast_ref::<StageError>() {
        e.exit_code()
    } else if let Some(e) = error.downcast_ref::<BuildError>() {
        e.exit_code()
    } else {
        1
    };

    u8::try_from(code).unwrap_or(1)
}
