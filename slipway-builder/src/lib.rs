//! Slipway Builder
//!
//! Turns a recipe into a runtime image, one stage at a time.
//!
//! Architecture:
//! - Configuration: podman binary, pull policy, image tag, launcher path
//! - Environment: where stages run (`PodmanEnvironment` in production)
//! - Pipeline: the ordered stages and their state transitions
//! - Log buffer: build transcript shown by the CLI
//!
//! Every stage is blocking and all-or-nothing. The first failure moves the
//! pipeline to `Failed`, removes the build container and tags no image.

pub mod config;
pub mod environment;
pub mod error;
pub mod log_buffer;
pub mod pipeline;

pub use config::{BuildConfig, PullPolicy};
pub use environment::{Environment, ExecOutput, PodmanEnvironment};
pub use error::BuildError;
pub use log_buffer::{InMemoryLogBuffer, LogBufferService};
pub use pipeline::{BuildOutcome, BuildPipeline};
