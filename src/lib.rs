//! layerpack - layered container image builds with a content-addressed cache
//!
//! An image is described by an [`ImageSpec`]: a base image, a working
//! directory, ordered build steps, environment and a start command. The
//! builder executes the steps one layer at a time and keys every layer on
//! its parent plus its own inputs, so an unchanged dependency manifest keeps
//! the dependency install cached while application files change freely.
//!
//! # Example Usage
//!
//! ```ignore
//! use layerpack::{BuildContext, BuildOptions, Builder, ImageSpec, LocalExecutor};
//! use std::path::Path;
//!
//! async fn build(root: &Path, cache_dir: &Path) -> anyhow::Result<()> {
//!     let spec = ImageSpec::python_app("python:3.11-slim", "app.py");
//!     let context = BuildContext::scan(root)?;
//!     let builder = Builder::with_cache_dir(LocalExecutor::new(), cache_dir)?;
//!     let report = builder
//!         .build(&spec, &context, "demo", &BuildOptions::default())
//!         .await?;
//!     println!("{} ({} cached)", report.image_digest, report.cached_steps());
//!     Ok(())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`spec`]: image specification and image references
//! - [`dockerfile`]: Dockerfile parsing and rendering
//! - [`validation`]: rules a spec must satisfy before building
//! - [`context`]: build context scanning and COPY placement
//! - [`build`]: layer cache, image store and the step builder
//! - [`launch`]: running a built image as one foreground process

pub mod build;
pub mod cli;
pub mod config;
pub mod context;
pub mod dockerfile;
pub mod launch;
pub mod spec;
pub mod util;
pub mod validation;

pub use build::{
    BuildError, BuildOptions, BuildReport, Builder, Digest, ImageRecord, ImageStore, LayerCache,
    LocalExecutor, StepExecutor,
};
pub use config::{ConfigError, LayerpackConfig};
pub use context::{BuildContext, ContextError};
pub use dockerfile::DockerfileError;
pub use launch::{LaunchError, LaunchOptions, Launcher};
pub use spec::{BuildStep, CommandLine, ImageReference, ImageSpec};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};
pub use validation::Validator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
