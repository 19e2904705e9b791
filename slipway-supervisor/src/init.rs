//! Launch-time database initialization
//!
//! Runs the recipe's init command to completion before any worker starts.
//! Used when the image was built with initialization disabled and the
//! operator asks for it at launch instead.

use slipway_core::StageError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Runs `argv` in `workdir` and fails on a non-zero exit
pub async fn run_init(
    argv: &[String],
    workdir: &Path,
    envs: &[(String, String)],
) -> Result<(), StageError> {
    let (cmd, args) = argv
        .split_first()
        .ok_or_else(|| StageError::Initialization("init command is empty".to_string()))?;

    info!("Running database initialization: {}", argv.join(" "));

    let status = Command::new(cmd)
        .args(args)
        .current_dir(workdir)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| StageError::Initialization(format!("failed to run '{}': {}", cmd, e)))?;

    if !status.success() {
        return Err(StageError::Initialization(format!(
            "'{}' exited with {}",
            argv.join(" "),
            status
        )));
    }

    info!("Database initialization completed");
    Ok(())
}
