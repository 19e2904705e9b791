//! Dependency manifest
//!
//! A requirements-style file: one requirement per line, `#` comments,
//! blank lines ignored. Lines starting with `-` are installer options
//! (`-r other.txt`, `--index-url ...`) and are kept verbatim. So are bare
//! archive URLs and local paths, which name no package until installed.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ManifestError;

/// A single declared dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Package name as written
    pub name: String,
    /// Extras requested with `name[extra]`
    pub extras: Vec<String>,
    /// Version constraint (`==3.0`, `>=1,<2`) or direct reference
    /// (` @ https://...`); empty when unconstrained
    pub constraint: String,
}

impl Requirement {
    /// Normalized package name used when checking what got installed
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.constraint)
    }
}

/// Lowercases and folds `_` and `.` into `-`
pub fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase().replace(['_', '.'], "-")
}

/// Parsed dependency manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    pub requirements: Vec<Requirement>,
    pub options: Vec<String>,
    /// URL and path lines; installed as written, not verified by name
    pub references: Vec<String>,
}

impl DependencyManifest {
    /// Reads and parses a manifest file
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses manifest text
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let mut manifest = DependencyManifest::default();

        for (idx, raw) in content.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('-') {
                manifest.options.push(line.to_string());
                continue;
            }

            if is_reference(line) {
                manifest.references.push(line.to_string());
                continue;
            }

            let requirement = parse_requirement(line).ok_or_else(|| ManifestError::InvalidLine {
                line: idx + 1,
                content: raw.trim().to_string(),
            })?;
            manifest.requirements.push(requirement);
        }

        Ok(manifest)
    }

    /// Normalized names of every declared package
    pub fn package_names(&self) -> Vec<String> {
        self.requirements.iter().map(|r| r.normalized_name()).collect()
    }
}

fn strip_comment(line: &str) -> &str {
    // A `#` only starts a comment at line start or after whitespace
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

/// Bare URL, VCS or filesystem path line
fn is_reference(line: &str) -> bool {
    let first = line.split_whitespace().next().unwrap_or(line);
    first.contains("://")
        || first.starts_with(['.', '/', '~'])
        || (first.contains('/') && !first.contains('@'))
}

fn parse_requirement(line: &str) -> Option<Requirement> {
    // Environment markers are passed through to the installer untouched
    let spec = line.split(';').next()?.trim();

    let name_end = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        .unwrap_or(spec.len());
    let name = &spec[..name_end];

    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return None;
    }

    let mut rest = spec[name_end..].trim_start();
    let mut extras = Vec::new();

    if let Some(after) = rest.strip_prefix('[') {
        let close = after.find(']')?;
        extras = after[..close]
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        rest = after[close + 1..].trim_start();
    }

    let constraint = match rest.strip_prefix('@') {
        // Direct reference: `name @ https://host/name-1.0.whl`
        Some(url) => {
            let url = url.trim();
            if url.is_empty() || url.contains(char::is_whitespace) {
                return None;
            }
            format!(" @ {}", url)
        }
        None => {
            let constraint: String = rest.chars().filter(|c| !c.is_whitespace()).collect();
            if !constraint.is_empty() && !constraint.starts_with(['=', '<', '>', '!', '~']) {
                return None;
            }
            constraint
        }
    };

    Some(Requirement {
        name: name.to_string(),
        extras,
        constraint,
    })
}
