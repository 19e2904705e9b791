//! Entry resolution
//!
//! Before any worker starts, the entry reference must name an application
//! object that actually exists. A reference that does not resolve fails the
//! launch; nothing is retried.

use async_trait::async_trait;
use slipway_core::{EntryReference, StageError};
use slipway_core::domain::launch::expand_template;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Checks that an entry reference resolves to a loadable object
#[async_trait]
pub trait EntryResolver: Send + Sync {
    async fn resolve(&self, entry: &EntryReference) -> Result<(), StageError>;
}

/// Resolves the entry by running a probe command in the source directory
///
/// The probe template accepts `{entry}`, `{module}` and `{attr}`. A zero exit
/// means the object was found.
pub struct ProbeResolver {
    probe: Vec<String>,
    workdir: PathBuf,
    envs: Vec<(String, String)>,
}

impl ProbeResolver {
    pub fn new(probe: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            workdir: workdir.into(),
            envs: Vec::new(),
        }
    }

    pub fn with_envs(mut self, envs: Vec<(String, String)>) -> Self {
        self.envs = envs;
        self
    }
}

#[async_trait]
impl EntryResolver for ProbeResolver {
    async fn resolve(&self, entry: &EntryReference) -> Result<(), StageError> {
        let failed = |reason: String| StageError::EntryResolution {
            entry: entry.to_string(),
            reason,
        };

        let argv = expand_template(&self.probe, &entry.placeholders());
        let (cmd, args) = argv
            .split_first()
            .ok_or_else(|| failed("probe command is empty".to_string()))?;

        debug!("Probing entry {} with {:?}", entry, argv);

        let output = Command::new(cmd)
            .args(args)
            .current_dir(&self.workdir)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| failed(format!("failed to run probe '{}': {}", cmd, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("probe exited with a failure status")
                .trim()
                .to_string();
            return Err(failed(reason));
        }

        info!("Entry {} resolved", entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_successful_probe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "app = object()\n").unwrap();

        let resolver = ProbeResolver::new(sh("test -f {module}.py"), dir.path());
        let entry: EntryReference = "app:app".parse().unwrap();

        assert!(resolver.resolve(&entry).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_probe_reports_last_stderr_line() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProbeResolver::new(
            sh("echo 'Traceback' >&2; echo \"AttributeError: no attribute '{attr}'\" >&2; exit 1"),
            dir.path(),
        );
        let entry: EntryReference = "app:missing".parse().unwrap();

        let err = resolver.resolve(&entry).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("AttributeError: no attribute 'missing'"));
    }

    #[tokio::test]
    async fn test_probe_sees_env_file_variables() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProbeResolver::new(sh("test \"$LIBRARY_MODE\" = test"), dir.path())
            .with_envs(vec![("LIBRARY_MODE".to_string(), "test".to_string())]);
        let entry: EntryReference = "app:app".parse().unwrap();

        assert!(resolver.resolve(&entry).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_probe_binary() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ProbeResolver::new(vec!["/nonexistent/python".to_string()], dir.path());
        let entry: EntryReference = "app:app".parse().unwrap();

        assert!(matches!(
            resolver.resolve(&entry).await,
            Err(StageError::EntryResolution { .. })
        ));
    }
}
