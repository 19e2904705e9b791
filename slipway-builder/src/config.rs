//! Builder configuration
//!
//! Host-side settings for a build: which container engine binary to call,
//! when to pull the base image, how to tag the result, and which launcher
//! binary to install into the image.

use std::path::PathBuf;
use std::str::FromStr;

/// When the base image is pulled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Pull only when the image is not present locally
    #[default]
    Missing,
    Always,
    /// Never pull; a missing image is a provisioning error
    Never,
}

impl FromStr for PullPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "missing" => Ok(PullPolicy::Missing),
            "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            other => anyhow::bail!("unknown pull policy '{}'", other),
        }
    }
}

/// Builder configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Container engine binary (podman-compatible CLI)
    pub podman: String,

    pub pull: PullPolicy,

    /// Tag for the committed image; defaults to `localhost/<recipe name>:latest`
    pub image_tag: Option<String>,

    /// Launcher binary copied into the image; defaults to the running executable
    pub launcher: Option<PathBuf>,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self {
            podman: "podman".to_string(),
            pull: PullPolicy::Missing,
            image_tag: None,
            launcher: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Environment variables:
    /// - SLIPWAY_PODMAN (optional, default: podman)
    /// - SLIPWAY_PULL (optional, missing | always | never, default: missing)
    /// - SLIPWAY_IMAGE_TAG (optional)
    /// - SLIPWAY_LAUNCHER (optional, path to the slipway binary for the image)
    pub fn from_env() -> anyhow::Result<Self> {
        let podman = std::env::var("SLIPWAY_PODMAN").unwrap_or_else(|_| "podman".to_string());

        let pull = match std::env::var("SLIPWAY_PULL") {
            Ok(value) => value.parse()?,
            Err(_) => PullPolicy::Missing,
        };

        let image_tag = std::env::var("SLIPWAY_IMAGE_TAG").ok();
        let launcher = std::env::var("SLIPWAY_LAUNCHER").ok().map(PathBuf::from);

        Ok(Self {
            podman,
            pull,
            image_tag,
            launcher,
        })
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = Some(tag.into());
        self
    }

    /// Image tag for a recipe
    pub fn tag_for(&self, recipe_name: &str) -> String {
        match &self.image_tag {
            Some(tag) => tag.clone(),
            None => format!("localhost/{}:latest", sanitize_image_name(recipe_name)),
        }
    }

    /// Path of the launcher binary to install
    pub fn launcher_path(&self) -> anyhow::Result<PathBuf> {
        match &self.launcher {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.podman.trim().is_empty() {
            anyhow::bail!("podman binary cannot be empty");
        }

        if let Some(tag) = &self.image_tag {
            if tag.trim().is_empty() || tag.contains(char::is_whitespace) {
                anyhow::bail!("image tag '{}' is not valid", tag);
            }
        }

        if let Some(launcher) = &self.launcher {
            if !launcher.is_file() {
                anyhow::bail!("launcher binary {} does not exist", launcher.display());
            }
        }

        Ok(())
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases and replaces characters image names do not allow
fn sanitize_image_name(name: &str) -> String {
    let sanitized: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "slipway-app".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BuildConfig::default();
        assert_eq!(config.podman, "podman");
        assert_eq!(config.pull, PullPolicy::Missing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tag_for_recipe() {
        let config = BuildConfig::default();
        assert_eq!(config.tag_for("Library API"), "localhost/library-api:latest");

        let tagged = BuildConfig::default().with_image_tag("registry.local/library:1.0");
        assert_eq!(tagged.tag_for("ignored"), "registry.local/library:1.0");
    }

    #[test]
    fn test_config_validation() {
        let mut config = BuildConfig::default();

        config.podman = String::new();
        assert!(config.validate().is_err());

        config.podman = "podman".to_string();
        config.image_tag = Some("bad tag".to_string());
        assert!(config.validate().is_err());

        config.image_tag = None;
        config.launcher = Some(PathBuf::from("/definitely/not/here/slipway"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pull_policy_parsing() {
        assert_eq!("Always".parse::<PullPolicy>().unwrap(), PullPolicy::Always);
        assert_eq!("never".parse::<PullPolicy>().unwrap(), PullPolicy::Never);
        assert!("sometimes".parse::<PullPolicy>().is_err());
    }
}
