//! Init command handler
//!
//! Writes a starter `slipway.lua` next to an existing application.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use slipway_core::{EntryReference, WorkerCount};

use crate::config::Config;

/// Arguments for `slipway init`
#[derive(Args)]
pub struct InitArgs {
    /// Application name (default: the directory name)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Application entry, module:attribute
    #[arg(short, long, default_value = "app:app")]
    pub entry: EntryReference,

    /// Declared port
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Number of worker processes
    #[arg(short, long, default_value = "3")]
    pub workers: WorkerCount,

    /// Overwrite an existing recipe
    #[arg(long)]
    pub force: bool,
}

/// Quotes `value` as a Lua string literal
fn lua_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if c.is_ascii_control() => quoted.push_str(&format!("\\{:03}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn starter_recipe(name: &str, entry: &EntryReference, port: u16, workers: WorkerCount) -> String {
    let title = name.replace(['\n', '\r'], " ");
    let name = lua_string(name);
    format!(
        r#"-- Slipway recipe for {title}
return slipway.recipe {{
  name = {name},
  base = "python:3.11-slim",
  workdir = "/app",
  manifest = "requirements.txt",
  source = ".",
  expose = {port},

  launch = {{
    bind = "0.0.0.0:{port}",
    workers = {workers},
    entry = "{entry}",
  }},

  -- Runs after the source is copied, before the image is committed
  init = {{
    enabled = false,
    command = {{ "python", "init_db.py" }},
  }},

  env_file = ".env",
  restart = "never",
}}
"#
    )
}

/// Write the starter recipe
pub fn init(config: &Config, args: InitArgs) -> Result<()> {
    let path = &config.recipe;
    if path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let name = match args.name {
        Some(name) => name,
        None => std::fs::canonicalize(config.context_dir())
            .ok()
            .and_then(|dir| dir.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "app".to_string()),
    };

    let contents = starter_recipe(&name, &args.entry, args.port, args.workers);
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} {}", "✓ Created".green().bold(), path.display());
    println!("  Next: {} then {}", "slipway check".cyan(), "slipway build".cyan());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_recipe_parses_and_validates() {
        let entry: EntryReference = "run:app".parse().unwrap();
        let source = starter_recipe("library-api", &entry, 5000, WorkerCount::new(3).unwrap());

        let recipe = slipway_lua::parse_recipe(&source).unwrap();
        assert_eq!(recipe.name, "library-api");
        assert_eq!(recipe.launch.entry.to_string(), "run:app");
        assert_eq!(recipe.env_file.as_deref(), Some(".env"));
        assert!(!recipe.init.enabled);
        assert!(recipe.validate().is_ok());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            recipe: dir.path().join("slipway.lua"),
        };
        std::fs::write(&config.recipe, "return {}").unwrap();

        let args = InitArgs {
            name: Some("library-api".to_string()),
            entry: "app:app".parse().unwrap(),
            port: 5000,
            workers: WorkerCount::new(3).unwrap(),
            force: false,
        };

        assert!(init(&config, args).is_err());
    }

    #[test]
    fn test_zero_or_negative_workers_rejected() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            init: InitArgs,
        }

        assert!(TestCli::try_parse_from(["init", "--workers", "0"]).is_err());
        assert!(TestCli::try_parse_from(["init", "--workers", "-2"]).is_err());

        let args = TestCli::try_parse_from(["init"]).unwrap().init;
        assert_eq!(args.workers.get(), 3);
    }

    #[test]
    fn test_name_is_escaped() {
        let entry: EntryReference = "app:app".parse().unwrap();
        let name = "odd \"name\" \\ dir";
        let source = starter_recipe(name, &entry, 5000, WorkerCount::new(2).unwrap());

        let recipe = slipway_lua::parse_recipe(&source).unwrap();
        assert_eq!(recipe.name, name);
        assert_eq!(recipe.launch.workers.get(), 2);
    }
}
