//! Build pipeline
//!
//! Runs the build stages strictly in order:
//! 1. Provision the pinned base image
//! 2. Copy the manifest, install dependencies and verify each one
//! 3. Copy the source tree
//! 4. Run database initialization, when enabled
//! 5. Install the launcher and commit the image
//!
//! The pipeline never starts a stage before the previous one completed, and
//! the first failure is final.

use slipway_core::directive::{
    LAUNCHER_BINARY_PATH, LAUNCHER_RECIPE_PATH, serve_command,
    validate_directive_order,
};
use slipway_core::domain::pipeline::Transition;
use slipway_core::{DependencyManifest, PipelineState, PipelineTracker, Recipe, StageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::BuildConfig;
use crate::environment::Environment;
use crate::error::BuildError;
use crate::log_buffer::LogBufferService;

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Tag of the committed image
    pub image: String,
    pub image_id: String,
    /// Final build state (`SourceMaterialized`, or `Initialized` when init ran)
    pub state: PipelineState,
    /// Normalized names of the installed packages
    pub installed: Vec<String>,
    pub history: Vec<Transition>,
}

/// Staged build of one recipe
pub struct BuildPipeline<'a> {
    recipe: &'a Recipe,
    /// Directory the recipe's relative paths are resolved against
    context_dir: PathBuf,
    config: &'a BuildConfig,
    log: Arc<dyn LogBufferService>,
    tracker: PipelineTracker,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(
        recipe: &'a Recipe,
        context_dir: impl Into<PathBuf>,
        config: &'a BuildConfig,
        log: Arc<dyn LogBufferService>,
    ) -> Self {
        Self {
            recipe,
            context_dir: context_dir.into(),
            config,
            log,
            tracker: PipelineTracker::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.tracker.state()
    }

    /// Runs every stage against `env`
    ///
    /// The environment is cleaned up whether the build succeeds or fails.
    pub fn run(&mut self, env: &mut dyn Environment) -> Result<BuildOutcome, BuildError> {
        self.recipe.validate()?;
        validate_directive_order(&self.recipe.directives())?;

        info!("Starting build of '{}'", self.recipe.name);
        self.log
            .info(format!("Building {} from {}", self.recipe.name, self.recipe.base));

        let result = self.run_stages(env);

        if let Err(e) = env.cleanup() {
            error!("Failed to clean up build environment: {:#}", e);
        }

        match result {
            Ok(outcome) => {
                info!("Build of '{}' completed: {}", self.recipe.name, outcome.image);
                self.log.info(format!("Built image {}", outcome.image));
                Ok(outcome)
            }
            Err(e) => {
                let state = self.tracker.fail(&e);
                error!("Build of '{}' failed: {}", self.recipe.name, e);
                self.log.error(format!("{} ({})", e, state));
                Err(e.into())
            }
        }
    }

    fn run_stages(&mut self, env: &mut dyn Environment) -> Result<BuildOutcome, StageError> {
        self.provision(env)?;
        let installed = self.install_dependencies(env)?;
        self.materialize_source(env)?;
        self.initialize_database(env)?;
        let (image, image_id) = self.commit(env)?;

        Ok(BuildOutcome {
            image,
            image_id,
            state: self.tracker.state(),
            installed,
            history: self.tracker.history().to_vec(),
        })
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), StageError> {
        self.tracker.advance(next)?;
        info!("Pipeline state: {}", next);
        self.log.info(format!("State: {}", next));
        Ok(())
    }

    fn context_path(&self, relative: &Path) -> PathBuf {
        self.context_dir.join(relative)
    }

    /// Stage 1: base environment provisioning
    fn provision(&mut self, env: &mut dyn Environment) -> Result<(), StageError> {
        let base = &self.recipe.base;
        self.log.info(format!("Provisioning {}", base));

        env.provision(base, &self.recipe.workdir)
            .map_err(|e| StageError::Provisioning {
                image: base.to_string(),
                reason: format!("{:#}", e),
            })?;

        self.advance(PipelineState::Provisioned)
    }

    /// Stage 2: dependency installation
    fn install_dependencies(&mut self, env: &mut dyn Environment) -> Result<Vec<String>, StageError> {
        let manifest_path = self.context_path(&self.recipe.manifest);
        let manifest = DependencyManifest::load(&manifest_path).map_err(|e| {
            StageError::DependencyResolution(format!("{}: {}", manifest_path.display(), e))
        })?;

        self.log.info(format!(
            "Installing {} declared dependencies",
            manifest.requirements.len()
        ));
        for reference in &manifest.references {
            self.log
                .info(format!("Installing '{}' without a name check", reference));
        }

        env.copy_in(&manifest_path, &self.recipe.manifest_target())
            .map_err(|e| StageError::DependencyResolution(format!("copying manifest: {:#}", e)))?;

        let argv = self.recipe.install_argv();
        let output = env
            .exec(&argv)
            .map_err(|e| StageError::DependencyResolution(format!("{:#}", e)))?;
        if !output.success() {
            return Err(StageError::DependencyResolution(output.summary()));
        }

        // Every declared package must be loadable; one missing package fails the stage
        let packages = manifest.package_names();
        for package in &packages {
            let Some(verify) = self.recipe.verify_argv(package) else {
                break;
            };

            let output = env
                .exec(&verify)
                .map_err(|e| StageError::DependencyResolution(format!("{:#}", e)))?;
            if !output.success() {
                return Err(StageError::DependencyResolution(format!(
                    "package '{}' is not installed: {}",
                    package,
                    output.summary()
                )));
            }
        }

        self.advance(PipelineState::DependenciesInstalled)?;
        Ok(packages)
    }

    /// Stage 3: source materialization
    fn materialize_source(&mut self, env: &mut dyn Environment) -> Result<(), StageError> {
        let source = self.context_path(&self.recipe.source);
        self.log.info(format!("Copying source tree {}", source.display()));

        env.copy_in(&source, self.recipe.workdir.as_str())
            .map_err(|e| StageError::Materialization(format!("{:#}", e)))?;

        self.advance(PipelineState::SourceMaterialized)
    }

    /// Optional stage: database initialization
    fn initialize_database(&mut self, env: &mut dyn Environment) -> Result<(), StageError> {
        if !self.recipe.init.enabled {
            self.log
                .info("Database initialization disabled; skipping".to_string());
            return Ok(());
        }

        self.log.info(format!(
            "Initializing database: {}",
            self.recipe.init.command.join(" ")
        ));

        let output = env
            .exec(&self.recipe.init.command)
            .map_err(|e| StageError::Initialization(format!("{:#}", e)))?;
        if !output.success() {
            return Err(StageError::Initialization(output.summary()));
        }

        self.advance(PipelineState::Initialized)
    }

    /// Final step: install the launcher and commit the image
    fn commit(&mut self, env: &mut dyn Environment) -> Result<(String, String), StageError> {
        let launcher = self
            .config
            .launcher_path()
            .map_err(|e| StageError::Commit(format!("locating launcher: {:#}", e)))?;

        env.copy_in(&launcher, LAUNCHER_BINARY_PATH)
            .map_err(|e| StageError::Commit(format!("installing launcher: {:#}", e)))?;

        let recipe_path = self.context_dir.join(&self.recipe.recipe_file);
        env.copy_in(&recipe_path, LAUNCHER_RECIPE_PATH)
            .map_err(|e| StageError::Commit(format!("installing recipe: {:#}", e)))?;

        let tag = self.config.tag_for(&self.recipe.name);
        let changes = self.image_changes();

        let image_id = env
            .commit(&tag, &changes)
            .map_err(|e| StageError::Commit(format!("{:#}", e)))?;

        Ok((tag, image_id))
    }

    /// Containerfile instructions applied at commit time
    fn image_changes(&self) -> Vec<String> {
        let cmd = serde_json::to_string(&serve_command(self.recipe))
            .unwrap_or_else(|_| "[]".to_string());

        vec![
            format!("WORKDIR {}", self.recipe.workdir),
            format!("EXPOSE {}", self.recipe.expose),
            "ENTRYPOINT []".to_string(),
            format!("CMD {}", cmd),
            format!("LABEL io.slipway.recipe={}", self.recipe.name.replace(' ', "-")),
        ]
    }
}
