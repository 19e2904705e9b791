//! Slipway Lua recipes
//!
//! Recipes are written in Lua (`slipway.lua`) and evaluated in a restricted
//! sandbox. This crate provides:
//! - The sandbox, with the `slipway` helper table
//! - Parsing of the returned table into a [`Recipe`]

pub mod parser;
pub mod sandbox;

pub use parser::{load_recipe, parse_recipe};
pub use sandbox::create_sandbox;

pub use slipway_core::Recipe;
