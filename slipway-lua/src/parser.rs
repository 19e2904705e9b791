//! Recipe parser
//!
//! Evaluates a `slipway.lua` recipe in the sandbox and converts the returned
//! table into a [`Recipe`]. Parsing catches malformed fields (a worker count
//! of zero, a relative workdir, an entry without an attribute); cross-field
//! rules are checked afterwards by [`Recipe::validate`].

use anyhow::{Context, Result};
use mlua::{Table, Value};
use slipway_core::domain::launch::{
    DEFAULT_PROBE_COMMAND, DEFAULT_WORKER_COMMAND, Endpoint, EntryReference, LaunchSpec,
    RestartPolicy, WorkerCount, to_owned_args,
};
use slipway_core::domain::recipe::{DEFAULT_INSTALL_COMMAND, DEFAULT_VERIFY_COMMAND, InitSpec};
use slipway_core::{BaseImage, Recipe, WorkDir};
use std::path::{Path, PathBuf};

use crate::sandbox::create_sandbox;

/// Load and parse a recipe file
pub fn load_recipe(path: &Path) -> Result<Recipe> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read recipe {}", path.display()))?;

    let mut recipe = parse_recipe(&source)
        .with_context(|| format!("Failed to parse recipe {}", path.display()))?;

    if let Some(file_name) = path.file_name() {
        recipe.recipe_file = file_name.to_string_lossy().to_string();
    }

    Ok(recipe)
}

/// Parse a recipe from Lua source code
///
/// # Example
/// ```
/// use slipway_lua::parse_recipe;
///
/// let recipe = parse_recipe(r#"
///     return slipway.recipe {
///         name = "library-api",
///         base = "python:3.11-slim",
///         expose = 5000,
///         launch = { workers = 3, entry = "app:app" },
///     }
/// "#)?;
///
/// assert_eq!(recipe.launch.bind.to_string(), "0.0.0.0:5000");
/// assert_eq!(recipe.launch.workers.get(), 3);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_recipe(source: &str) -> Result<Recipe> {
    let lua = create_sandbox().context("Failed to create recipe sandbox")?;

    let table: Table = lua
        .load(source)
        .set_name("recipe")
        .eval()
        .context("Failed to evaluate recipe")?;

    let name: String = table
        .get::<Option<String>>("name")
        .context("Field 'name' must be a string")?
        .context("Recipe must have a 'name' field")?;

    let base: BaseImage = table
        .get::<Option<String>>("base")
        .context("Field 'base' must be a string")?
        .context("Recipe must have a 'base' field")?
        .parse()?;

    let workdir: WorkDir = match table.get::<Option<String>>("workdir")? {
        Some(dir) => dir.parse()?,
        None => WorkDir::default(),
    };

    let manifest = table
        .get::<Option<String>>("manifest")?
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("requirements.txt"));

    let source_dir = table
        .get::<Option<String>>("source")?
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let expose = get_integer(&table, "expose")?.context("Recipe must have an 'expose' port")?;
    let expose = u16::try_from(expose)
        .with_context(|| format!("Field 'expose' is not a valid port: {}", expose))?;

    let launch_table: Table = table
        .get::<Option<Table>>("launch")
        .context("Field 'launch' must be a table")?
        .context("Recipe must have a 'launch' table")?;
    let launch = parse_launch(&launch_table, expose)?;

    let install_command = parse_command(&table, "install", DEFAULT_INSTALL_COMMAND)?;
    let verify_command = parse_command(&table, "verify", DEFAULT_VERIFY_COMMAND)?;
    let init = parse_init(&table)?;
    let env_file = table.get::<Option<String>>("env_file")?;
    let restart = parse_restart(&table)?;

    Ok(Recipe {
        name,
        base,
        workdir,
        manifest,
        source: source_dir,
        expose,
        launch,
        install_command,
        verify_command,
        init,
        env_file,
        restart,
        recipe_file: "slipway.lua".to_string(),
    })
}

/// Reads an integer field, accepting integral floats
fn get_integer(table: &Table, key: &str) -> Result<Option<i64>> {
    match table.get::<Value>(key)? {
        Value::Nil => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        Value::Number(n) if n.fract() == 0.0 => Ok(Some(n as i64)),
        other => Err(anyhow::anyhow!(
            "Field '{}' must be an integer, got {}",
            key,
            other.type_name()
        )),
    }
}

/// Parse the 'launch' table
fn parse_launch(launch: &Table, expose: u16) -> Result<LaunchSpec> {
    let bind: Endpoint = match launch.get::<Option<String>>("bind")? {
        Some(bind) => bind.parse()?,
        None => Endpoint::any(expose),
    };

    let workers = match get_integer(launch, "workers")? {
        Some(count) => WorkerCount::new(count)?,
        None => WorkerCount::new(1)?,
    };

    let entry: EntryReference = launch
        .get::<Option<String>>("entry")?
        .context("Launch table must have an 'entry' field")?
        .parse()?;

    let mut spec = LaunchSpec::new(bind, workers, entry);
    spec.worker_command = parse_command(launch, "worker", DEFAULT_WORKER_COMMAND)?;
    spec.probe_command = parse_command(launch, "probe", DEFAULT_PROBE_COMMAND)?;

    Ok(spec)
}

/// Parse an argv field
///
/// A missing field takes the default, `false` disables the command, and a
/// string is split on whitespace.
fn parse_command(table: &Table, key: &str, default: &[&str]) -> Result<Vec<String>> {
    match table.get::<Value>(key)? {
        Value::Nil => Ok(to_owned_args(default)),
        Value::Boolean(false) => Ok(Vec::new()),
        Value::String(s) => Ok(s
            .to_str()?
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()),
        Value::Table(args) => {
            let mut argv = Vec::new();
            for arg in args.sequence_values::<String>() {
                argv.push(arg.with_context(|| format!("Field '{}' must contain strings", key))?);
            }
            Ok(argv)
        }
        other => Err(anyhow::anyhow!(
            "Field '{}' must be an array of strings, got {}",
            key,
            other.type_name()
        )),
    }
}

/// Parse the optional 'init' table
fn parse_init(table: &Table) -> Result<InitSpec> {
    let init: Option<Table> = table
        .get("init")
        .context("Field 'init' must be a table")?;

    let Some(init) = init else {
        return Ok(InitSpec::default());
    };

    let enabled: bool = init.get::<Option<bool>>("enabled")?.unwrap_or(false);
    let command = parse_command(&init, "command", &[])?;

    Ok(InitSpec { enabled, command })
}

/// Parse the optional 'restart' field
///
/// Accepts `"never"`, `"on-failure:N"` or `{ policy = "on_failure", max_restarts = N }`.
fn parse_restart(table: &Table) -> Result<RestartPolicy> {
    match table.get::<Value>("restart")? {
        Value::Nil => Ok(RestartPolicy::Never),
        Value::String(s) => Ok(s.to_str()?.parse::<RestartPolicy>()?),
        Value::Table(t) => {
            let policy: String = t
                .get::<Option<String>>("policy")?
                .unwrap_or_else(|| "never".to_string());

            match get_integer(&t, "max_restarts")? {
                Some(n) => {
                    let n = u32::try_from(n)
                        .with_context(|| format!("max_restarts must be non-negative, got {}", n))?;
                    Ok(format!("{}:{}", policy, n).parse::<RestartPolicy>()?)
                }
                None => Ok(policy.parse::<RestartPolicy>()?),
            }
        }
        other => Err(anyhow::anyhow!(
            "Field 'restart' must be a string or table, got {}",
            other.type_name()
        )),
    }
}
