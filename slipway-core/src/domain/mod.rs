//! Core domain types
//!
//! These types describe what gets built and how it gets launched. They are
//! fixed at authoring time and shared between the builder (which constructs
//! the runtime image) and the supervisor (which serves from it).

pub mod launch;
pub mod log;
pub mod manifest;
pub mod pipeline;
pub mod recipe;
