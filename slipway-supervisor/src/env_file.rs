//! Env file loading
//!
//! Variables are handed to child processes instead of being set on the
//! supervisor's own environment.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Reads `KEY=VALUE` pairs from an env file
///
/// A missing file is not an error: it is logged and no variables are returned.
pub fn load_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    if !path.exists() {
        warn!("Env file {} not found; continuing without it", path.display());
        return Ok(Vec::new());
    }

    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open env file {}", path.display()))?;

    let vars = iter
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse env file {}", path.display()))?;

    debug!("Loaded {} variable(s) from {}", vars.len(), path.display());
    Ok(vars)
}
