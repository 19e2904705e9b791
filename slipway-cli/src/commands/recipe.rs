//! Recipe command handlers
//!
//! `check` validates a recipe without touching podman; `render` prints the
//! equivalent Containerfile.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use slipway_core::{DependencyManifest, Recipe, render_containerfile};
use std::path::PathBuf;

use crate::config::Config;

/// Arguments for `slipway render`
#[derive(Args)]
pub struct RenderArgs {
    /// Write the Containerfile here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Load and parse the configured recipe
pub fn load(config: &Config) -> Result<Recipe> {
    slipway_lua::load_recipe(&config.recipe)
}

/// Validate the recipe and parse its dependency manifest
pub fn check(config: &Config) -> Result<()> {
    let recipe = load(config)?;

    let violations = recipe.violations();
    if !violations.is_empty() {
        println!("{}", format!("✗ Recipe '{}' is invalid:", recipe.name).red().bold());
        for violation in &violations {
            println!("  - {}", violation);
        }
        recipe.validate()?;
    }

    let manifest_path = config.context_dir().join(&recipe.manifest);
    let manifest = DependencyManifest::load(&manifest_path)
        .with_context(|| format!("Invalid dependency manifest {}", manifest_path.display()))?;

    println!("{}", "✓ Recipe is valid".green().bold());
    println!("  Name:     {}", recipe.name.bold());
    println!("  Base:     {}", recipe.base.to_string().cyan());
    println!("  Workdir:  {}", recipe.workdir);
    println!("  Endpoint: {}", recipe.launch.bind.to_string().cyan());
    println!("  Workers:  {}", recipe.launch.workers);
    println!("  Entry:    {}", recipe.launch.entry);
    println!(
        "  Init:     {}",
        if recipe.init.enabled {
            recipe.init.command.join(" ").normal()
        } else {
            "disabled".dimmed()
        }
    );
    println!(
        "  Packages: {}",
        manifest
            .requirements
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
            .dimmed()
    );
    if !manifest.references.is_empty() {
        println!(
            "  Unverified: {}",
            manifest.references.join(", ").yellow()
        );
    }

    Ok(())
}

/// Print or write the Containerfile
pub fn render(config: &Config, args: RenderArgs) -> Result<()> {
    let recipe = load(config)?;
    let containerfile = render_containerfile(&recipe)?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &containerfile)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} {}",
                "✓ Containerfile written to".green().bold(),
                path.display()
            );
        }
        None => print!("{}", containerfile),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPE: &str = r#"
        return slipway.recipe {
            name = "library-api",
            base = "python:3.11-slim",
            expose = 5000,
            launch = { bind = "0.0.0.0:5000", workers = 3, entry = "app:app" },
        }
    "#;

    fn project(recipe: &str, manifest: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("slipway.lua"), recipe).unwrap();
        std::fs::write(dir.path().join("requirements.txt"), manifest).unwrap();
        let config = Config {
            recipe: dir.path().join("slipway.lua"),
        };
        (dir, config)
    }

    #[test]
    fn test_check_valid_project() {
        let (_dir, config) = project(RECIPE, "flask==3.0\n");
        assert!(check(&config).is_ok());
    }

    #[test]
    fn test_check_rejects_bad_manifest() {
        let (_dir, config) = project(RECIPE, "flask 3.0\n");
        assert!(check(&config).is_err());
    }

    #[test]
    fn test_check_rejects_port_mismatch() {
        let recipe = RECIPE.replace("0.0.0.0:5000", "0.0.0.0:8080");
        let (_dir, config) = project(&recipe, "flask==3.0\n");
        assert!(check(&config).is_err());
    }

    #[test]
    fn test_render_to_file() {
        let (dir, config) = project(RECIPE, "flask==3.0\n");
        let output = dir.path().join("Containerfile");

        render(
            &config,
            RenderArgs {
                output: Some(output.clone()),
            },
        )
        .unwrap();

        let rendered = std::fs::read_to_string(output).unwrap();
        assert!(rendered.contains("FROM python:3.11-slim"));
        assert!(rendered.contains("EXPOSE 5000"));
    }
}
