//! Podman-backed build environment
//!
//! Handles the build container lifecycle:
//! - Checking podman availability
//! - Pulling the base image according to the pull policy
//! - Starting a long-lived build container in the working directory
//! - Copying files in and running commands
//! - Committing the result and removing the container

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Output};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Environment, ExecOutput};
use crate::config::{BuildConfig, PullPolicy};
use slipway_core::{BaseImage, WorkDir};

/// Build environment running stages in a podman container
pub struct PodmanEnvironment {
    podman: String,
    pull: PullPolicy,
    build_id: Uuid,

    /// Name of the running build container, once provisioned
    container: Option<String>,

    workdir: Option<WorkDir>,
}

impl PodmanEnvironment {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            podman: config.podman.clone(),
            pull: config.pull,
            build_id: Uuid::new_v4(),
            container: None,
            workdir: None,
        }
    }

    /// Checks if podman is installed and available
    pub fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.podman)
            .arg("--version")
            .output()
            .with_context(|| format!("Failed to execute '{} --version'. Is podman installed?", self.podman))?;

        if !output.status.success() {
            anyhow::bail!("{} is not working correctly", self.podman);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Container engine is available: {}", version.trim());

        Ok(())
    }

    pub fn container_name(&self) -> String {
        format!("slipway-build-{}", self.build_id)
    }

    fn podman(&self) -> Command {
        Command::new(&self.podman)
    }

    fn run(&self, command: &mut Command, what: &str) -> Result<Output> {
        let output = command
            .output()
            .with_context(|| format!("Failed to execute podman {}", what))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("podman {} stdout: {}", what, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("podman {} stderr: {}", what, stderr.trim());
        }

        Ok(output)
    }

    fn run_checked(&self, command: &mut Command, what: &str) -> Result<String> {
        let output = self.run(command, what)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error_msg = format!(
                "podman {} failed: exit_code={}, stderr='{}'",
                what,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
            error!("{}", error_msg);
            anyhow::bail!("{}", error_msg);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.run(self.podman().args(["image", "exists", image]), "image exists")?;
        Ok(output.status.success())
    }

    fn ensure_image(&self, base: &BaseImage) -> Result<()> {
        let image = base.to_string();

        let pull = match self.pull {
            PullPolicy::Always => true,
            PullPolicy::Missing => !self.image_exists(&image)?,
            PullPolicy::Never => {
                if !self.image_exists(&image)? {
                    anyhow::bail!("image not found locally and pull policy is 'never'");
                }
                false
            }
        };

        if pull {
            info!("Pulling base image {}", image);
            self.run_checked(self.podman().args(["pull", image.as_str()]), "pull")
                .context("image not found")?;
        }

        Ok(())
    }

    /// Creates `dir` inside the build container
    fn make_dir(&mut self, dir: &str) -> Result<()> {
        let output = self.exec(&["mkdir".to_string(), "-p".to_string(), dir.to_string()])?;
        if !output.success() {
            anyhow::bail!("mkdir -p {} failed: {}", dir, output.summary());
        }
        Ok(())
    }

    fn active_container(&self) -> Result<&str> {
        self.container
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Build environment has not been provisioned"))
    }
}

impl Environment for PodmanEnvironment {
    fn provision(&mut self, base: &BaseImage, workdir: &WorkDir) -> Result<()> {
        self.ensure_image(base)?;

        let name = self.container_name();
        info!("Creating build container {} from {}", name, base);

        // Keep the container alive so stages can exec into it; the entrypoint
        // is overridden so images with custom entrypoints still idle.
        let container_id = self.run_checked(
            self.podman()
                .arg("run")
                .arg("-d")
                .arg("--name")
                .arg(&name)
                .arg("--entrypoint")
                .arg("/bin/sh")
                .arg("-w")
                .arg(workdir.as_str())
                .arg(base.to_string())
                .arg("-c")
                .arg("sleep infinity"),
            "run",
        )?;

        info!("Build container {} started with ID: {}", name, container_id);

        self.container = Some(name);
        self.workdir = Some(workdir.clone());

        // The working directory exists as a side effect of declaring it
        self.make_dir(workdir.as_str())?;

        Ok(())
    }

    fn copy_in(&mut self, src: &Path, dest: &str) -> Result<()> {
        let container = self.active_container()?.to_string();

        if !src.exists() {
            anyhow::bail!("{} does not exist", src.display());
        }

        // `dir/.` copies the directory contents rather than the directory itself
        let source = if src.is_dir() {
            format!("{}/.", src.display())
        } else {
            src.display().to_string()
        };

        if let Some(parent) = Path::new(dest).parent() {
            let parent = parent.to_string_lossy().to_string();
            if !parent.is_empty() && parent != "/" {
                self.make_dir(&parent)?;
            }
        }

        debug!("Copying {} to {}:{}", source, container, dest);
        self.run_checked(
            self.podman()
                .arg("cp")
                .arg(&source)
                .arg(format!("{}:{}", container, dest)),
            "cp",
        )?;

        Ok(())
    }

    fn exec(&mut self, argv: &[String]) -> Result<ExecOutput> {
        let container = self.active_container()?;
        let (cmd, args) = argv
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("Cannot execute an empty command"))?;

        let workdir = self
            .workdir
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "/".to_string());

        debug!("Executing in container {}: {} {:?}", container, cmd, args);

        let output = self.run(
            self.podman()
                .arg("exec")
                .arg("-w")
                .arg(&workdir)
                .arg(container)
                .arg(cmd)
                .args(args),
            "exec",
        )?;

        let result = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(1),
        };

        if !result.success() {
            debug!(
                "Command failed in container {}: cmd={} exit_code={}",
                container, cmd, result.exit_code
            );
        }

        Ok(result)
    }

    fn commit(&mut self, tag: &str, changes: &[String]) -> Result<String> {
        let container = self.active_container()?;

        let mut command = self.podman();
        command.arg("commit");
        for change in changes {
            command.arg("--change").arg(change);
        }
        command.arg(container).arg(tag);

        let image_id = self.run_checked(&mut command, "commit")?;
        info!("Committed {} as {} ({})", container, tag, image_id);

        Ok(image_id)
    }

    fn cleanup(&mut self) -> Result<()> {
        let Some(container) = self.container.take() else {
            return Ok(());
        };

        debug!("Removing build container {}", container);

        let output = self.run(self.podman().args(["rm", "-f", container.as_str()]), "rm")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Failed to remove container {}: {}", container, stderr.trim());
        }

        Ok(())
    }
}

impl Drop for PodmanEnvironment {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to clean up build container on drop: {}", e);
        }
    }
}
