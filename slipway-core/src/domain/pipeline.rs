//! Pipeline state machine
//!
//! The pipeline is strictly linear:
//! `Pending -> Provisioned -> DependenciesInstalled -> SourceMaterialized -> [Initialized] -> Serving`.
//! Any stage may fail, which moves the pipeline to the terminal `Failed` state.
//! A serving pipeline fails too once it loses every worker. There is no
//! transition back to an earlier state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// A unit of work in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Provision,
    InstallDependencies,
    MaterializeSource,
    InitializeDatabase,
    Commit,
    Launch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Provision => write!(f, "provision"),
            Stage::InstallDependencies => write!(f, "install-dependencies"),
            Stage::MaterializeSource => write!(f, "materialize-source"),
            Stage::InitializeDatabase => write!(f, "initialize-database"),
            Stage::Commit => write!(f, "commit"),
            Stage::Launch => write!(f, "launch"),
        }
    }
}

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Provisioned,
    DependenciesInstalled,
    SourceMaterialized,
    /// Database initialization ran to completion
    Initialized,
    Serving,
    Failed { stage: Stage },
}

impl PipelineState {
    /// Whether the state has no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Failed { .. })
    }

    /// The stage whose completion produces this state
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Pending => None,
            PipelineState::Provisioned => Some(Stage::Provision),
            PipelineState::DependenciesInstalled => Some(Stage::InstallDependencies),
            PipelineState::SourceMaterialized => Some(Stage::MaterializeSource),
            PipelineState::Initialized => Some(Stage::InitializeDatabase),
            PipelineState::Serving => Some(Stage::Launch),
            PipelineState::Failed { stage } => Some(*stage),
        }
    }

    /// Checks whether `next` directly follows this state
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;

        match (self, next) {
            (Failed { .. }, _) => false,
            (_, Failed { .. }) => true,
            (Pending, Provisioned) => true,
            (Provisioned, DependenciesInstalled) => true,
            (DependenciesInstalled, SourceMaterialized) => true,
            (SourceMaterialized, Initialized) => true,
            (SourceMaterialized, Serving) | (Initialized, Serving) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Pending => write!(f, "PENDING"),
            PipelineState::Provisioned => write!(f, "PROVISIONED"),
            PipelineState::DependenciesInstalled => write!(f, "DEPENDENCIES_INSTALLED"),
            PipelineState::SourceMaterialized => write!(f, "SOURCE_MATERIALIZED"),
            PipelineState::Initialized => write!(f, "INITIALIZED"),
            PipelineState::Serving => write!(f, "SERVING"),
            PipelineState::Failed { stage } => write!(f, "FAILED({})", stage),
        }
    }
}

/// A recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub state: PipelineState,
    pub at: DateTime<Utc>,
}

/// Tracks the pipeline state and its history
///
/// The tracker refuses any transition the state machine does not allow, so
/// callers cannot, for example, materialize source before dependencies are
/// installed.
#[derive(Debug, Clone)]
pub struct PipelineTracker {
    state: PipelineState,
    history: Vec<Transition>,
}

impl PipelineTracker {
    /// Creates a tracker at `Pending`
    pub fn new() -> Self {
        Self::starting_at(PipelineState::Pending)
    }

    /// Creates a tracker at an arbitrary starting point
    ///
    /// The supervisor starts at `SourceMaterialized`, since a built image
    /// already carries the provisioned runtime, dependencies and source.
    pub fn starting_at(state: PipelineState) -> Self {
        Self {
            state,
            history: vec![Transition {
                state,
                at: Utc::now(),
            }],
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Moves to `next`, or returns an error if the move is not allowed
    pub fn advance(&mut self, next: PipelineState) -> Result<PipelineState, StageError> {
        if !self.state.can_advance_to(next) {
            return Err(StageError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        self.history.push(Transition {
            state: next,
            at: Utc::now(),
        });
        Ok(next)
    }

    /// Moves to `Failed` for the stage that raised `error`
    ///
    /// A pipeline that already failed keeps its first failure.
    pub fn fail(&mut self, error: &StageError) -> PipelineState {
        let failed = PipelineState::Failed {
            stage: error.stage(),
        };
        if self.advance(failed).is_err() {
            return self.state;
        }
        failed
    }
}

impl Default for PipelineTracker {
    fn default() -> Self {
        Self::new()
    }
}
