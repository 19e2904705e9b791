//! Launch command handler
//!
//! Runs a built image in the foreground with the declared port published.
//! The container's exit code becomes the CLI's exit code, so a failed entry
//! resolution inside the image surfaces as exit code 2 here as well.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use slipway_builder::BuildConfig;
use slipway_core::Recipe;
use std::process::ExitCode;
use tokio::process::Command;
use tracing::info;

use crate::commands::recipe;
use crate::config::Config;

/// Arguments for `slipway launch`
#[derive(Args)]
pub struct LaunchArgs {
    /// Image to run (default: the tag `slipway build` produces)
    #[arg(short, long, env = "SLIPWAY_IMAGE_TAG")]
    pub image: Option<String>,

    /// Publish the status API on this host port
    #[arg(long)]
    pub status_port: Option<u16>,

    /// Run database initialization before starting workers
    #[arg(long)]
    pub run_init: bool,
}

/// `podman run` arguments for the image
fn run_args(recipe: &Recipe, image: &str, args: &LaunchArgs) -> Vec<String> {
    let mut argv = vec![
        "run".to_string(),
        "--rm".to_string(),
        "-p".to_string(),
        format!("{}:{}", recipe.expose, recipe.expose),
    ];

    if let Some(port) = args.status_port {
        argv.push("-p".to_string());
        argv.push(format!("{}:{}", port, port));
        argv.push("-e".to_string());
        argv.push(format!("SLIPWAY_STATUS_BIND=0.0.0.0:{}", port));
    }

    argv.push(image.to_string());

    if args.run_init {
        // Replaces the image CMD with the same serve command plus --run-init
        let mut cmd = slipway_core::directive::serve_command(recipe);
        cmd.push("--run-init".to_string());
        argv.extend(cmd);
    }

    argv
}

/// Run the image in the foreground
pub async fn launch(config: &Config, args: LaunchArgs) -> Result<ExitCode> {
    let recipe = recipe::load(config)?;
    recipe.validate()?;

    let build_config = BuildConfig::from_env()?;
    let image = args
        .image
        .clone()
        .unwrap_or_else(|| build_config.tag_for(&recipe.name));

    let argv = run_args(&recipe, &image, &args);
    info!("Running {} {}", build_config.podman, argv.join(" "));

    println!(
        "{} {} on port {}",
        "▶ Launching".cyan().bold(),
        image.bold(),
        recipe.expose
    );

    let status = Command::new(&build_config.podman)
        .args(&argv)
        .status()
        .await
        .with_context(|| format!("Failed to execute {}", build_config.podman))?;

    match status.code() {
        Some(0) => Ok(ExitCode::SUCCESS),
        Some(code) => {
            eprintln!("{} container exited with {}", "✗".red().bold(), code);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        None => {
            eprintln!("{} container was terminated by a signal", "✗".red().bold());
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe() -> Recipe {
        slipway_lua::parse_recipe(
            r#"
            return slipway.recipe {
                name = "library-api",
                base = "python:3.11-slim",
                expose = 5000,
                launch = { workers = 3, entry = "app:app" },
            }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_run_args_publish_declared_port() {
        let args = LaunchArgs {
            image: None,
            status_port: None,
            run_init: false,
        };

        let argv = run_args(&recipe(), "localhost/library-api:latest", &args);
        assert_eq!(
            argv,
            vec!["run", "--rm", "-p", "5000:5000", "localhost/library-api:latest"]
        );
    }

    #[test]
    fn test_run_args_with_status_and_init() {
        let args = LaunchArgs {
            image: None,
            status_port: Some(9090),
            run_init: true,
        };

        let argv = run_args(&recipe(), "library:1.0", &args);
        assert!(argv.contains(&"SLIPWAY_STATUS_BIND=0.0.0.0:9090".to_string()));
        assert_eq!(argv.last().map(String::as_str), Some("--run-init"));
        assert!(argv.contains(&"serve".to_string()));
    }
}
