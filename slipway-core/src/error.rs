//! Error types for recipes, manifests and pipeline stages
//!
//! Every stage error is fatal. Nothing in the pipeline retries; errors are
//! surfaced to whoever invoked the build or the supervisor.

use thiserror::Error;

use crate::domain::pipeline::{PipelineState, Stage};

/// A single recipe rule that does not hold
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("base image '{0}' is not pinned to an exact version")]
    UnpinnedBase(String),

    #[error("bind port {bind} does not match declared port {declared}")]
    PortMismatch { bind: u16, declared: u16 },

    #[error("declared port must be greater than 0")]
    ZeroPort,

    #[error("manifest path is empty")]
    EmptyManifest,

    #[error("manifest path '{0}' must be relative to the recipe directory")]
    AbsoluteManifest(String),

    #[error("worker command is empty")]
    EmptyWorkerCommand,

    #[error("worker command never references the {{port}} placeholder")]
    MissingPortPlaceholder,

    #[error("probe command is empty")]
    EmptyProbeCommand,

    #[error("install command is empty")]
    EmptyInstallCommand,

    #[error("database initialization is enabled but has no command")]
    EmptyInitCommand,
}

/// Errors raised while reading or validating a recipe
#[derive(Debug, Error)]
pub enum RecipeError {
    /// A field could not be parsed into its domain type
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The recipe parsed but breaks one or more rules
    #[error("recipe '{name}' is invalid: {}", format_violations(.violations))]
    Validation {
        name: String,
        violations: Vec<Violation>,
    },

    /// Build directives are not in the required order
    #[error("directive order violated: {0}")]
    DirectiveOrder(String),
}

impl RecipeError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while parsing a requirements-style dependency manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("line {line}: '{content}' is not a valid requirement")]
    InvalidLine { line: usize, content: String },

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal failure of a pipeline stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("provisioning failed: base image '{image}' unavailable: {reason}")]
    Provisioning { image: String, reason: String },

    #[error("dependency resolution failed: {0}")]
    DependencyResolution(String),

    #[error("source materialization failed: {0}")]
    Materialization(String),

    #[error("database initialization failed: {0}")]
    Initialization(String),

    #[error("image commit failed: {0}")]
    Commit(String),

    #[error("entry reference '{entry}' did not resolve: {reason}")]
    EntryResolution { entry: String, reason: String },

    #[error("serving process failed: {0}")]
    Launch(String),

    #[error("invalid pipeline transition from {from} to {to}")]
    InvalidTransition { from: PipelineState, to: PipelineState },
}

impl StageError {
    /// The stage this error belongs to
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Provisioning { .. } => Stage::Provision,
            StageError::DependencyResolution(_) => Stage::InstallDependencies,
            StageError::Materialization(_) => Stage::MaterializeSource,
            StageError::Initialization(_) => Stage::InitializeDatabase,
            StageError::Commit(_) => Stage::Commit,
            StageError::EntryResolution { .. } | StageError::Launch(_) => Stage::Launch,
            StageError::InvalidTransition { to, .. } => to.stage().unwrap_or(Stage::Launch),
        }
    }

    /// Process exit code reported for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            StageError::EntryResolution { .. } => 2,
            StageError::Launch(_) => 3,
            _ => 1,
        }
    }
}
