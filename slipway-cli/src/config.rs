//! Configuration module
//!
//! Settings shared by every command.

use std::path::{Path, PathBuf};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the `slipway.lua` recipe
    pub recipe: PathBuf,
}

impl Config {
    /// Directory the recipe's relative paths are resolved against
    pub fn context_dir(&self) -> PathBuf {
        match self.recipe.parent() {
            Some(dir) if dir != Path::new("") => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_dir() {
        let bare = Config {
            recipe: PathBuf::from("slipway.lua"),
        };
        assert_eq!(bare.context_dir(), PathBuf::from("."));

        let nested = Config {
            recipe: PathBuf::from("services/library/slipway.lua"),
        };
        assert_eq!(nested.context_dir(), PathBuf::from("services/library"));
    }
}
