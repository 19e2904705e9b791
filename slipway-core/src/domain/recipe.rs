//! Recipe domain types
//!
//! A recipe is the full build/launch contract for one application: the
//! pinned base image, the working directory, the dependency manifest, the
//! source tree and the launch spec.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::launch::{LaunchSpec, RestartPolicy};
use crate::error::{RecipeError, Violation};

/// Default command for installing the dependency manifest
pub const DEFAULT_INSTALL_COMMAND: &[&str] = &["pip", "install", "--no-cache-dir", "-r", "{manifest}"];

/// Default command for checking that declared packages are loadable
pub const DEFAULT_VERIFY_COMMAND: &[&str] = &["pip", "show", "--quiet", "{package}"];

/// Pinned runtime image reference (e.g. `python:3.11-slim`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BaseImage {
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl BaseImage {
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Runtime version encoded in the tag (`3.11` for `3.11-slim`)
    pub fn version(&self) -> Option<&str> {
        let tag = self.tag.as_deref()?;
        let version = tag.split('-').next()?;
        version
            .starts_with(|c: char| c.is_ascii_digit())
            .then_some(version)
    }

    /// Whether the reference names one exact runtime version
    ///
    /// A digest is always pinned. A tag is pinned when it carries at least a
    /// `major.minor` version; `latest` or a bare major version is not.
    pub fn is_pinned(&self) -> bool {
        if self.digest.is_some() {
            return true;
        }

        match self.version() {
            Some(version) => {
                let parts: Vec<&str> = version.split('.').collect();
                parts.len() >= 2 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            }
            None => false,
        }
    }
}

impl FromStr for BaseImage {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(RecipeError::invalid(
                "base",
                format!("'{}' is not an image reference", s),
            ));
        }

        let (name, digest) = match s.split_once('@') {
            Some((n, d)) => (n, Some(d.to_string())),
            None => (s, None),
        };

        // The tag separator is the last ':' after the last '/', so registry
        // ports (`registry:5000/python`) are not mistaken for tags.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name[last_slash..].rfind(':') {
            Some(i) => (
                &name[..last_slash + i],
                Some(name[last_slash + i + 1..].to_string()),
            ),
            None => (name, None),
        };

        if repository.is_empty() || tag.as_deref() == Some("") {
            return Err(RecipeError::invalid(
                "base",
                format!("'{}' is not an image reference", s),
            ));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}

impl TryFrom<String> for BaseImage {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BaseImage> for String {
    fn from(value: BaseImage) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for BaseImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Absolute path inside the runtime environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkDir(String);

impl WorkDir {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves a relative path against the working directory
    pub fn join(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches("./");
        if relative.is_empty() || relative == "." {
            return self.0.clone();
        }
        format!("{}/{}", self.0.trim_end_matches('/'), relative)
    }
}

impl Default for WorkDir {
    fn default() -> Self {
        Self("/app".to_string())
    }
}

impl FromStr for WorkDir {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('/') {
            return Err(RecipeError::invalid(
                "workdir",
                format!("'{}' must be an absolute path", s),
            ));
        }
        let trimmed = s.trim_end_matches('/');
        Ok(Self(if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() }))
    }
}

impl TryFrom<String> for WorkDir {
    type Error = RecipeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkDir> for String {
    fn from(value: WorkDir) -> Self {
        value.0
    }
}

impl std::fmt::Display for WorkDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional database initialization stage
///
/// Runs to completion before the serving process starts. Disabled unless
/// explicitly enabled; a disabled stage is never assumed to have run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitSpec {
    pub enabled: bool,
    pub command: Vec<String>,
}

/// Full build/launch recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub base: BaseImage,
    pub workdir: WorkDir,
    /// Manifest path, relative to the build context
    pub manifest: PathBuf,
    /// Source tree root, relative to the build context
    pub source: PathBuf,
    /// Port announced as the service's reachable port
    pub expose: u16,
    pub launch: LaunchSpec,
    pub install_command: Vec<String>,
    pub verify_command: Vec<String>,
    pub init: InitSpec,
    /// Env file loaded into worker environments, relative to the workdir
    pub env_file: Option<String>,
    pub restart: RestartPolicy,
    /// Recipe file name inside the build context
    pub recipe_file: String,
}

impl Recipe {
    /// Checks every cross-field rule and reports all violations at once
    pub fn validate(&self) -> Result<(), RecipeError> {
        let violations = self.violations();
        if violations.is_empty() {
            return Ok(());
        }

        Err(RecipeError::Validation {
            name: self.name.clone(),
            violations,
        })
    }

    /// Lists every rule this recipe breaks
    pub fn violations(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        if !self.base.is_pinned() {
            violations.push(Violation::UnpinnedBase(self.base.to_string()));
        }

        if self.expose == 0 {
            violations.push(Violation::ZeroPort);
        }

        if self.launch.bind.port != self.expose {
            violations.push(Violation::PortMismatch {
                bind: self.launch.bind.port,
                declared: self.expose,
            });
        }

        if self.manifest.as_os_str().is_empty() {
            violations.push(Violation::EmptyManifest);
        } else if self.manifest.is_absolute() {
            violations.push(Violation::AbsoluteManifest(
                self.manifest.display().to_string(),
            ));
        }

        if self.launch.worker_command.is_empty() {
            violations.push(Violation::EmptyWorkerCommand);
        } else if !self
            .launch
            .worker_command
            .iter()
            .any(|arg| arg.contains("{port}"))
        {
            violations.push(Violation::MissingPortPlaceholder);
        }

        if self.launch.probe_command.is_empty() {
            violations.push(Violation::EmptyProbeCommand);
        }

        if self.install_command.is_empty() {
            violations.push(Violation::EmptyInstallCommand);
        }

        if self.init.enabled && self.init.command.is_empty() {
            violations.push(Violation::EmptyInitCommand);
        }

        violations
    }

    /// Manifest path inside the runtime environment
    pub fn manifest_target(&self) -> String {
        let file_name = self
            .manifest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "requirements.txt".to_string());
        self.workdir.join(&file_name)
    }

    /// Install command with `{manifest}` filled in
    pub fn install_argv(&self) -> Vec<String> {
        let target = self.manifest_target();
        self.install_command
            .iter()
            .map(|arg| arg.replace("{manifest}", &target))
            .collect()
    }

    /// Verification command for one declared package
    ///
    /// Returns `None` when verification is disabled.
    pub fn verify_argv(&self, package: &str) -> Option<Vec<String>> {
        if self.verify_command.is_empty() {
            return None;
        }

        Some(
            self.verify_command
                .iter()
                .map(|arg| arg.replace("{package}", package))
                .collect(),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::launch::{Endpoint, LaunchSpec, WorkerCount, to_owned_args};

    pub(crate) fn sample_recipe() -> Recipe {
        Recipe {
            name: "library-api".to_string(),
            base: "python:3.11-slim".parse().unwrap(),
            workdir: WorkDir::default(),
            manifest: PathBuf::from("requirements.txt"),
            source: PathBuf::from("."),
            expose: 5000,
            launch: LaunchSpec::new(
                Endpoint::any(5000),
                WorkerCount::new(3).unwrap(),
                "app:app".parse().unwrap(),
            ),
            install_command: to_owned_args(DEFAULT_INSTALL_COMMAND),
            verify_command: to_owned_args(DEFAULT_VERIFY_COMMAND),
            init: InitSpec::default(),
            env_file: None,
            restart: RestartPolicy::Never,
            recipe_file: "slipway.lua".to_string(),
        }
    }

    #[test]
    fn test_base_image_parsing() {
        let image: BaseImage = "python:3.11-slim".parse().unwrap();
        assert_eq!(image.repository(), "python");
        assert_eq!(image.tag(), Some("3.11-slim"));
        assert_eq!(image.version(), Some("3.11"));
        assert!(image.is_pinned());

        let registry: BaseImage = "registry.local:5000/runtimes/python:3.12.4".parse().unwrap();
        assert_eq!(registry.repository(), "registry.local:5000/runtimes/python");
        assert_eq!(registry.version(), Some("3.12.4"));
        assert!(registry.is_pinned());
    }

    #[test]
    fn test_unpinned_images() {
        for reference in ["python", "python:latest", "python:3", "python:slim"] {
            let image: BaseImage = reference.parse().unwrap();
            assert!(!image.is_pinned(), "{} should not be pinned", reference);
        }

        let digest: BaseImage = "python@sha256:abcdef".parse().unwrap();
        assert!(digest.is_pinned());
    }

    #[test]
    fn test_workdir_must_be_absolute() {
        assert!("app".parse::<WorkDir>().is_err());
        let dir: WorkDir = "/srv/app/".parse().unwrap();
        assert_eq!(dir.as_str(), "/srv/app");
        assert_eq!(dir.join("requirements.txt"), "/srv/app/requirements.txt");
        assert_eq!(dir.join("."), "/srv/app");
    }

    #[test]
    fn test_valid_recipe() {
        assert!(sample_recipe().validate().is_ok());
    }

    #[test]
    fn test_bind_port_must_match_declared_port() {
        let mut recipe = sample_recipe();
        recipe.launch.bind = Endpoint::any(8000);

        let violations = recipe.violations();
        assert_eq!(
            violations,
            vec![Violation::PortMismatch {
                bind: 8000,
                declared: 5000
            }]
        );
    }

    #[test]
    fn test_manifest_path_must_be_relative_and_non_empty() {
        let mut recipe = sample_recipe();
        recipe.manifest = PathBuf::new();
        assert_eq!(recipe.violations(), vec![Violation::EmptyManifest]);

        recipe.manifest = PathBuf::from("/srv/requirements.txt");
        assert_eq!(
            recipe.violations(),
            vec![Violation::AbsoluteManifest("/srv/requirements.txt".to_string())]
        );
    }

    #[test]
    fn test_all_violations_reported() {
        let mut recipe = sample_recipe();
        recipe.base = "python:latest".parse().unwrap();
        recipe.launch.worker_command = vec!["gunicorn".to_string(), "{entry}".to_string()];
        recipe.init = InitSpec {
            enabled: true,
            command: vec![],
        };

        let violations = recipe.violations();
        assert_eq!(violations.len(), 3);
        assert!(violations.contains(&Violation::MissingPortPlaceholder));
        assert!(violations.contains(&Violation::EmptyInitCommand));
        assert!(matches!(recipe.validate(), Err(RecipeError::Validation { .. })));
    }

    #[test]
    fn test_install_and_verify_commands() {
        let recipe = sample_recipe();
        assert_eq!(
            recipe.install_argv(),
            vec!["pip", "install", "--no-cache-dir", "-r", "/app/requirements.txt"]
        );

        let verify = recipe.verify_argv("python-dotenv").unwrap();
        assert_eq!(verify, vec!["pip", "show", "--quiet", "python-dotenv"]);

        let mut unverified = recipe.clone();
        unverified.verify_command.clear();
        assert!(unverified.verify_argv("flask").is_none());
    }
}
