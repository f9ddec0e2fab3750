//! Subcommand handlers
//!
//! Each handler returns the process exit code. Failures are reported on
//! stderr and map to 1, except for `run`, whose code is the container's.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use super::commands::{BuildArgs, ImagesArgs, InitArgs, RenderArgs, RunArgs, ValidateArgs};
use super::output::{OutputFormatter, ValidationSummary};
use crate::build::{BuildOptions, Builder, ImageStore, LocalExecutor};
use crate::config::LayerpackConfig;
use crate::context::BuildContext;
use crate::dockerfile;
use crate::launch::{LaunchOptions, Launcher};
use crate::spec::ImageSpec;
use crate::validation::Validator;

/// Spec file names tried, in order, when no `-f` is given
pub const SPEC_FILE_NAMES: [&str; 2] = ["layerpack.yaml", "Dockerfile"];

/// Finds the spec file for a context directory
pub fn locate_spec(context: &Path, file: Option<&Path>) -> Result<PathBuf> {
    if let Some(file) = file {
        return Ok(file.to_path_buf());
    }

    SPEC_FILE_NAMES
        .iter()
        .map(|name| context.join(name))
        .find(|path| path.is_file())
        .with_context(|| {
            format!(
                "No {} in {}; pass one with -f",
                SPEC_FILE_NAMES.join(" or "),
                context.display()
            )
        })
}

fn load_config() -> Result<LayerpackConfig> {
    let config = LayerpackConfig::default();
    config.validate()?;
    debug!("{}", config);
    Ok(config)
}

fn context_dir(context: Option<&PathBuf>) -> PathBuf {
    context.cloned().unwrap_or_else(|| PathBuf::from("."))
}

fn report_failure(command: &str, e: &anyhow::Error) -> i32 {
    error!("{} failed: {:#}", command, e);
    eprintln!("Error: {:#}", e);
    1
}

pub async fn handle_render(args: &RenderArgs) -> i32 {
    match render(args) {
        Ok(dockerfile) => {
            print!("{}", dockerfile);
            0
        }
        Err(e) => report_failure("render", &e),
    }
}

fn render(args: &RenderArgs) -> Result<String> {
    let spec_path = locate_spec(Path::new("."), args.file.as_deref())?;
    let spec = ImageSpec::load(&spec_path)?;
    Ok(dockerfile::render(&spec))
}

pub async fn handle_validate(args: &ValidateArgs) -> i32 {
    match validate(args) {
        Ok((summary, output)) => {
            println!("{}", output);
            if summary.valid {
                0
            } else {
                1
            }
        }
        Err(e) => report_failure("validate", &e),
    }
}

fn validate(args: &ValidateArgs) -> Result<(ValidationSummary, String)> {
    let context_root = context_dir(args.context.as_ref());
    let spec_path = locate_spec(&context_root, args.file.as_deref())?;
    let spec = ImageSpec::load(&spec_path)?;
    let context = BuildContext::scan(&context_root)?;

    let validator = Validator::new();
    let result = validator.validate(&spec, Some(&context));
    let summary = ValidationSummary {
        spec: spec_path.display().to_string(),
        context: context_root.display().to_string(),
        valid: result.is_ok(),
        error: result.err().map(|e| format!("{:#}", e)),
        rules: validator.rule_names(),
    };

    let output = OutputFormatter::new(args.format.into()).format_validation(&summary)?;
    Ok((summary, output))
}

pub async fn handle_build(args: &BuildArgs) -> i32 {
    match build(args).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => report_failure("build", &e),
    }
}

async fn build(args: &BuildArgs) -> Result<String> {
    let config = load_config()?;
    let context_root = context_dir(args.context.as_ref());
    let spec_path = locate_spec(&context_root, args.file.as_deref())?;
    let spec = ImageSpec::load(&spec_path)?;

    info!(spec = %spec_path.display(), context = %context_root.display(), "Scanning build context");
    let context = BuildContext::scan(&context_root)?;
    debug!(files = context.len(), "Build context scanned");

    let builder = Builder::with_cache_dir(LocalExecutor::new(), &config.cache_dir)?;
    let options = BuildOptions {
        no_cache: args.no_cache || config.no_cache,
    };
    let report = builder.build(&spec, &context, &args.tag, &options).await?;

    OutputFormatter::new(args.format.into()).format_build(&report)
}

pub async fn handle_run(args: &RunArgs) -> i32 {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => return report_failure("run", &e),
    };

    let launcher = match Launcher::with_cache_dir(&config.cache_dir) {
        Ok(launcher) => launcher,
        Err(e) => return report_failure("run", &anyhow::Error::from(e)),
    };

    let options = LaunchOptions {
        keep: args.keep || config.keep_containers,
    };

    match launcher.launch(&args.tag, &options).await {
        Ok(code) => code,
        Err(e) => report_failure("run", &anyhow::Error::from(e)),
    }
}

pub async fn handle_images(args: &ImagesArgs) -> i32 {
    match images(args) {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => report_failure("images", &e),
    }
}

fn images(args: &ImagesArgs) -> Result<String> {
    let config = load_config()?;
    let images = ImageStore::open(&config.cache_dir).list()?;
    OutputFormatter::new(args.format.into()).format_images(&images)
}

pub async fn handle_init(args: &InitArgs) -> i32 {
    match init(args) {
        Ok(()) => 0,
        Err(e) => report_failure("init", &e),
    }
}

fn init(args: &InitArgs) -> Result<()> {
    let spec = ImageSpec::python_app(&args.base, &args.entry);
    Validator::new()
        .validate(&spec, None)
        .context("Generated spec is invalid")?;
    let yaml = spec.to_yaml()?;

    match &args.output {
        Some(path) => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            std::fs::write(path, yaml)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote spec");
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_locate_spec_prefers_yaml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM python:3.11-slim\n").unwrap();
        assert_eq!(
            locate_spec(dir.path(), None).unwrap(),
            dir.path().join("Dockerfile")
        );

        std::fs::write(dir.path().join("layerpack.yaml"), "base: python\n").unwrap();
        assert_eq!(
            locate_spec(dir.path(), None).unwrap(),
            dir.path().join("layerpack.yaml")
        );
    }

    #[test]
    fn test_locate_spec_explicit_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("custom.yaml");
        assert_eq!(locate_spec(dir.path(), Some(file.as_path())).unwrap(), file);
    }

    #[test]
    fn test_locate_spec_missing() {
        let dir = TempDir::new().unwrap();
        let err = locate_spec(dir.path(), None).unwrap_err();
        assert!(err.to_string().contains("layerpack.yaml or Dockerfile"));
    }

    #[test]
    fn test_init_writes_loadable_spec() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layerpack.yaml");
        let args = InitArgs {
            base: "python:3.12-slim".to_string(),
            entry: "main.py".to_string(),
            output: Some(path.clone()),
        };
        init(&args).unwrap();

        let spec = ImageSpec::load(&path).unwrap();
        assert_eq!(spec, ImageSpec::python_app("python:3.12-slim", "main.py"));

        assert!(init(&args).is_err(), "existing file must not be overwritten");
    }
}
