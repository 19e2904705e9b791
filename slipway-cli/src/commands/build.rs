//! Build command handler
//!
//! Runs the staged build against podman and prints the build transcript.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use slipway_builder::{
    BuildConfig, BuildPipeline, InMemoryLogBuffer, LogBufferService, PodmanEnvironment,
};
use slipway_core::domain::log::{LogEntry, LogLevel};
use std::sync::Arc;

use crate::commands::recipe;
use crate::config::Config;

/// Arguments for `slipway build`
#[derive(Args)]
pub struct BuildArgs {
    /// Image tag (default: localhost/<recipe name>:latest)
    #[arg(short, long, env = "SLIPWAY_IMAGE_TAG")]
    pub tag: Option<String>,
}

fn print_entry(entry: &LogEntry) {
    let time = entry.timestamp.format("%H:%M:%S").to_string().dimmed();
    match entry.level {
        LogLevel::Error => println!("  {} {}", time, entry.message.red()),
        LogLevel::Warning => println!("  {} {}", time, entry.message.yellow()),
        _ => println!("  {} {}", time, entry.message),
    }
}

/// Build the runtime image
pub async fn build(config: &Config, args: BuildArgs) -> Result<()> {
    let recipe = recipe::load(config)?;
    let context_dir = config.context_dir();

    let mut build_config = BuildConfig::from_env().context("Invalid build configuration")?;
    if let Some(tag) = args.tag {
        build_config = build_config.with_image_tag(tag);
    }
    build_config.validate()?;

    println!(
        "{} {} from {}",
        "▶ Building".cyan().bold(),
        recipe.name.bold(),
        recipe.base
    );

    let log = Arc::new(InMemoryLogBuffer::new());
    let buffer: Arc<dyn LogBufferService> = log.clone();

    // Stages are blocking podman calls
    let result = tokio::task::spawn_blocking(move || {
        let mut env = PodmanEnvironment::new(&build_config);
        env.check_available()?;

        let mut pipeline = BuildPipeline::new(&recipe, context_dir, &build_config, buffer);
        pipeline.run(&mut env).map_err(anyhow::Error::from)
    })
    .await
    .context("Build task panicked")?;

    for entry in log.drain() {
        print_entry(&entry);
    }

    let outcome = result?;

    println!("{}", "✓ Image built successfully!".green().bold());
    println!("  Image:    {}", outcome.image.cyan());
    println!("  ID:       {}", outcome.image_id.dimmed());
    println!("  State:    {}", outcome.state);
    println!("  Packages: {}", outcome.installed.join(", ").dimmed());

    Ok(())
}
