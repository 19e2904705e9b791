//! Slipway Core
//!
//! Core types and abstractions for the Slipway build-and-launch pipeline.
//!
//! This crate contains:
//! - Domain types: recipe entities (base image, manifest, endpoint, workers, entry reference)
//! - Pipeline state machine and the build directive sequence
//! - Error taxonomy shared by the builder and the supervisor
//! - DTOs: status payloads exchanged with the supervisor API

pub mod directive;
pub mod domain;
pub mod dto;
pub mod error;

pub use directive::{Directive, render_containerfile, validate_directive_order};
pub use domain::launch::{Endpoint, EntryReference, LaunchSpec, RestartPolicy, WorkerCount};
pub use domain::manifest::{DependencyManifest, Requirement};
pub use domain::pipeline::{PipelineState, PipelineTracker, Stage};
pub use domain::recipe::{BaseImage, InitSpec, Recipe, WorkDir};
pub use error::{ManifestError, RecipeError, StageError, Violation};
