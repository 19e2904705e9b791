//! Build directives
//!
//! The ordered list of steps that turns a recipe into a runtime image. The
//! order matters for layer caching: the manifest is copied and installed
//! before the source tree, so a source-only change never invalidates the
//! dependency layer.

use crate::domain::recipe::{BaseImage, Recipe, WorkDir};
use crate::error::RecipeError;

/// Where the launcher binary lives inside the image
pub const LAUNCHER_BINARY_PATH: &str = "/usr/local/bin/slipway";

/// Where the recipe is stored inside the image
pub const LAUNCHER_RECIPE_PATH: &str = "/etc/slipway/recipe.lua";

/// A single build or launch directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    From(BaseImage),
    Workdir(WorkDir),
    CopyManifest { src: String, dest: String },
    InstallDependencies { argv: Vec<String> },
    CopySource { src: String, dest: String },
    InstallLauncher { recipe_src: String },
    InitDatabase { argv: Vec<String>, enabled: bool },
    Expose(u16),
    Cmd(Vec<String>),
}

impl Directive {
    fn label(&self) -> &'static str {
        match self {
            Directive::From(_) => "FROM",
            Directive::Workdir(_) => "WORKDIR",
            Directive::CopyManifest { .. } => "copy manifest",
            Directive::InstallDependencies { .. } => "install dependencies",
            Directive::CopySource { .. } => "copy source",
            Directive::InstallLauncher { .. } => "install launcher",
            Directive::InitDatabase { .. } => "initialize database",
            Directive::Expose(_) => "EXPOSE",
            Directive::Cmd(_) => "CMD",
        }
    }
}

/// Command the image runs in the foreground
pub fn serve_command(recipe: &Recipe) -> Vec<String> {
    vec![
        "slipway".to_string(),
        "serve".to_string(),
        "--recipe".to_string(),
        LAUNCHER_RECIPE_PATH.to_string(),
        "--bind".to_string(),
        recipe.launch.bind.to_string(),
        "--workers".to_string(),
        recipe.launch.workers.to_string(),
        recipe.launch.entry.to_string(),
    ]
}

impl Recipe {
    /// Ordered directives for this recipe
    pub fn directives(&self) -> Vec<Directive> {
        directives(self)
    }
}

/// Ordered directives for a recipe
pub fn directives(recipe: &Recipe) -> Vec<Directive> {
    let source = recipe.source.display().to_string();

    vec![
        Directive::From(recipe.base.clone()),
        Directive::Workdir(recipe.workdir.clone()),
        Directive::CopyManifest {
            src: recipe.manifest.display().to_string(),
            dest: recipe.manifest_target(),
        },
        Directive::InstallDependencies {
            argv: recipe.install_argv(),
        },
        Directive::CopySource {
            src: if source.is_empty() { ".".to_string() } else { source },
            dest: recipe.workdir.to_string(),
        },
        Directive::InstallLauncher {
            recipe_src: recipe.recipe_file.clone(),
        },
        Directive::InitDatabase {
            argv: recipe.init.command.clone(),
            enabled: recipe.init.enabled,
        },
        Directive::Expose(recipe.expose),
        Directive::Cmd(serve_command(recipe)),
    ]
}

fn position(directives: &[Directive], pred: impl Fn(&Directive) -> bool) -> Option<usize> {
    directives.iter().position(pred)
}

fn require_before(
    directives: &[Directive],
    first: impl Fn(&Directive) -> bool,
    second: impl Fn(&Directive) -> bool,
) -> Result<(), RecipeError> {
    let (Some(a), Some(b)) = (position(directives, &first), position(directives, &second)) else {
        return Ok(());
    };

    if a > b {
        return Err(RecipeError::DirectiveOrder(format!(
            "{} must come before {}",
            directives[a].label(),
            directives[b].label()
        )));
    }
    Ok(())
}

/// Rejects any directive sequence that breaks the build order
///
/// Rules:
/// - exactly one `FROM`, and it comes first
/// - `WORKDIR` comes before any copy
/// - the manifest is copied before dependencies are installed
/// - dependencies are installed before the source tree is copied
/// - an enabled database initialization runs after the source tree is copied
pub fn validate_directive_order(directives: &[Directive]) -> Result<(), RecipeError> {
    let from_count = directives
        .iter()
        .filter(|d| matches!(d, Directive::From(_)))
        .count();
    if from_count != 1 || !matches!(directives.first(), Some(Directive::From(_))) {
        return Err(RecipeError::DirectiveOrder(
            "a single FROM must be the first directive".to_string(),
        ));
    }

    let is_manifest = |d: &Directive| matches!(d, Directive::CopyManifest { .. });
    let is_install = |d: &Directive| matches!(d, Directive::InstallDependencies { .. });
    let is_source = |d: &Directive| matches!(d, Directive::CopySource { .. });

    if position(directives, is_source).is_some() && position(directives, is_install).is_none() {
        return Err(RecipeError::DirectiveOrder(
            "source is copied but dependencies are never installed".to_string(),
        ));
    }

    if position(directives, is_install).is_some() && position(directives, is_manifest).is_none() {
        return Err(RecipeError::DirectiveOrder(
            "dependencies are installed but the manifest is never copied".to_string(),
        ));
    }

    require_before(directives, |d| matches!(d, Directive::Workdir(_)), is_manifest)?;
    require_before(directives, |d| matches!(d, Directive::Workdir(_)), is_source)?;
    require_before(directives, is_manifest, is_install)?;
    require_before(directives, is_install, is_source)?;
    require_before(directives, is_source, |d| {
        matches!(d, Directive::InitDatabase { enabled: true, .. })
    })?;

    Ok(())
}

fn exec_form(argv: &[String]) -> String {
    serde_json::to_string(argv).unwrap_or_else(|_| format!("{:?}", argv))
}

/// Renders the recipe as a Containerfile
///
/// A disabled database initialization is rendered as a comment so readers
/// can see it exists but never runs.
pub fn render_containerfile(recipe: &Recipe) -> Result<String, RecipeError> {
    recipe.validate()?;

    let directives = directives(recipe);
    validate_directive_order(&directives)?;

    let mut out = format!("# {} (generated by slipway)\n", recipe.name);

    for directive in &directives {
        let line = match directive {
            Directive::From(base) => format!("FROM {}", base),
            Directive::Workdir(dir) => format!("WORKDIR {}", dir),
            Directive::CopyManifest { src, dest } => format!("COPY {} {}", src, dest),
            Directive::InstallDependencies { argv } => format!("RUN {}", exec_form(argv)),
            Directive::CopySource { src, dest } => format!("COPY {} {}", src, dest),
            Directive::InstallLauncher { recipe_src } => format!(
                "COPY slipway {}\nCOPY {} {}",
                LAUNCHER_BINARY_PATH, recipe_src, LAUNCHER_RECIPE_PATH
            ),
            Directive::InitDatabase { argv, enabled: true } => format!("RUN {}", exec_form(argv)),
            Directive::InitDatabase { argv, enabled: false } => {
                if argv.is_empty() {
                    continue;
                }
                format!("# database initialization disabled: RUN {}", exec_form(argv))
            }
            Directive::Expose(port) => format!("EXPOSE {}", port),
            Directive::Cmd(argv) => format!("CMD {}", exec_form(argv)),
        };
        out.push_str(&line);
        out.push('\n');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recipe::InitSpec;
    use crate::domain::recipe::tests::sample_recipe;

    #[test]
    fn test_generated_directives_are_ordered() {
        let recipe = sample_recipe();
        assert!(validate_directive_order(&directives(&recipe)).is_ok());
    }

    #[test]
    fn test_source_before_install_is_rejected() {
        let mut list = directives(&sample_recipe());
        // Move the source copy ahead of the dependency install
        let source = list.remove(4);
        list.insert(3, source);

        let err = validate_directive_order(&list).unwrap_err();
        assert!(err.to_string().contains("install dependencies must come before copy source"));
    }

    #[test]
    fn test_source_without_install_is_rejected() {
        let list: Vec<Directive> = directives(&sample_recipe())
            .into_iter()
            .filter(|d| !matches!(d, Directive::InstallDependencies { .. }))
            .collect();

        assert!(validate_directive_order(&list).is_err());
    }

    #[test]
    fn test_from_must_be_first() {
        let mut list = directives(&sample_recipe());
        list.swap(0, 1);
        assert!(validate_directive_order(&list).is_err());
    }

    #[test]
    fn test_render_containerfile() {
        let mut recipe = sample_recipe();
        recipe.init = InitSpec {
            enabled: false,
            command: vec!["python".to_string(), "init_db.py".to_string()],
        };

        let rendered = render_containerfile(&recipe).unwrap();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines[1], "FROM python:3.11-slim");
        assert_eq!(lines[2], "WORKDIR /app");
        assert_eq!(lines[3], "COPY requirements.txt /app/requirements.txt");
        assert_eq!(
            lines[4],
            r#"RUN ["pip","install","--no-cache-dir","-r","/app/requirements.txt"]"#
        );
        assert_eq!(lines[5], "COPY . /app");
        assert!(rendered.contains(r#"# database initialization disabled: RUN ["python","init_db.py"]"#));
        assert!(rendered.contains("EXPOSE 5000"));
        assert!(rendered.contains(
            r#"CMD ["slipway","serve","--recipe","/etc/slipway/recipe.lua","--bind","0.0.0.0:5000","--workers","3","app:app"]"#
        ));
    }

    #[test]
    fn test_render_rejects_invalid_recipe() {
        let mut recipe = sample_recipe();
        recipe.expose = 8080;
        assert!(render_containerfile(&recipe).is_err());
    }
}
