//! Build environments
//!
//! An environment is where pipeline stages run. Each call blocks until the
//! underlying operation has finished and either fully succeeds or fails.

mod podman;

pub use podman::PodmanEnvironment;

use anyhow::Result;
use std::path::Path;

use slipway_core::{BaseImage, WorkDir};

/// Output of a command run inside the environment
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty stderr line, falling back to stdout
    pub fn summary(&self) -> String {
        let pick = |text: &str| {
            text.lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
        };
        pick(&self.stderr)
            .or_else(|| pick(&self.stdout))
            .unwrap_or_else(|| format!("exit code {}", self.exit_code))
    }
}

/// Where build stages execute
pub trait Environment {
    /// Acquires the base runtime image and starts a build container in `workdir`
    fn provision(&mut self, base: &BaseImage, workdir: &WorkDir) -> Result<()>;

    /// Copies a host file or directory to `dest` inside the environment
    ///
    /// For directories, the directory contents land in `dest`.
    fn copy_in(&mut self, src: &Path, dest: &str) -> Result<()>;

    /// Runs a command in the working directory
    ///
    /// A non-zero exit is reported through `ExecOutput`, not as an error.
    fn exec(&mut self, argv: &[String]) -> Result<ExecOutput>;

    /// Commits the environment as an image and returns its id
    ///
    /// `changes` are Containerfile instructions (`CMD [...]`, `EXPOSE 5000`).
    fn commit(&mut self, tag: &str, changes: &[String]) -> Result<String>;

    /// Releases everything the environment holds
    fn cleanup(&mut self) -> Result<()>;
}
