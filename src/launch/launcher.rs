//! Runs a built image as a single foreground process
//!
//! Each launch gets a private copy of the image's final filesystem, so
//! instances started from the same image never share mutable state. The
//! declared environment is applied to the command before it is spawned,
//! and the process's exit status becomes the launch result.

use super::exit::exit_code;
use crate::build::executor::host_path;
use crate::build::{Digest, ImageRecord, ImageStore, LayerCache};
use crate::util::fs::{copy_tree, remove_dir_if_exists};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("No image tagged '{0}'")]
    ImageNotFound(String),

    #[error("Layer {0} of the image is missing from the cache; rebuild the image")]
    MissingLayer(Digest),

    #[error("Image has an empty start command")]
    EmptyCommand,

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for the container process: {0}")]
    Wait(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Keep the instance directory after the process exits
    pub keep: bool,
}

/// A container instance's private filesystem
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub root: PathBuf,
}

pub struct Launcher {
    cache: LayerCache,
    store: ImageStore,
    containers_dir: PathBuf,
}

impl Launcher {
    pub fn new(cache: LayerCache, store: ImageStore, containers_dir: PathBuf) -> Self {
        Self {
            cache,
            store,
            containers_dir,
        }
    }

    /// Opens the layer cache and image store under `cache_dir`
    pub fn with_cache_dir(cache_dir: &Path) -> Result<Self, LaunchError> {
        Ok(Self::new(
            LayerCache::open(cache_dir)?,
            ImageStore::open(cache_dir),
            cache_dir.join("containers"),
        ))
    }

    pub fn resolve(&self, tag: &str) -> Result<ImageRecord, LaunchError> {
        self.store
            .get(tag)?
            .ok_or_else(|| LaunchError::ImageNotFound(tag.to_string()))
    }

    /// Creates the writable filesystem of a new instance
    pub fn prepare(&self, image: &ImageRecord) -> Result<Instance, LaunchError> {
        let snapshot = self.cache.snapshot_path(&image.top_layer);
        if !snapshot.is_dir() {
            return Err(LaunchError::MissingLayer(image.top_layer.clone()));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let root = self.containers_dir.join(&id);
        copy_tree(&snapshot, &root)?;
        debug!(container = %id, root = %root.display(), "Prepared instance filesystem");
        Ok(Instance { id, root })
    }

    /// The start command of `image`, configured for `instance`
    pub fn command(&self, image: &ImageRecord, instance: &Instance) -> Result<Command, LaunchError> {
        let config = &image.manifest.config;
        let (program, args) = config.cmd.split_first().ok_or(LaunchError::EmptyCommand)?;
        let workdir = host_path(&instance.root, &config.workdir);

        let mut command = Command::new(resolve_program(program, &instance.root, &workdir));
        command
            .args(args)
            .current_dir(&workdir)
            .envs(&config.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        Ok(command)
    }

    /// Starts the image tagged `tag` and waits for its process to exit
    ///
    /// Returns the process's exit code unchanged (signals as `128 + n`).
    pub async fn launch(&self, tag: &str, options: &LaunchOptions) -> Result<i32, LaunchError> {
        let image = self.resolve(tag)?;
        let instance = self.prepare(&image)?;
        let result = self.run_instance(&image, &instance).await;

        if options.keep {
            info!(container = %instance.id, root = %instance.root.display(), "Keeping container filesystem");
        } else if let Err(e) = remove_dir_if_exists(&instance.root) {
            warn!(container = %instance.id, error = %e, "Failed to remove container filesystem");
        }

        result
    }

    async fn run_instance(
        &self,
        image: &ImageRecord,
        instance: &Instance,
    ) -> Result<i32, LaunchError> {
        let mut command = self.command(image, instance)?;
        let program = image.manifest.config.cmd.join(" ");

        info!(
            container = %instance.id,
            image = image.digest.short(),
            command = %program,
            "Starting container"
        );

        let mut child = command
            .spawn()
            .map_err(|source| LaunchError::Spawn { program, source })?;

        let finished = tokio::select! {
            status = child.wait() => Some(status.map_err(LaunchError::Wait)?),
            _ = tokio::signal::ctrl_c() => None,
        };

        let status = match finished {
            Some(status) => status,
            None => {
                warn!(container = %instance.id, "Interrupted, stopping container");
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Container process already gone");
                }
                child.wait().await.map_err(LaunchError::Wait)?
            }
        };

        let code = exit_code(status);
        info!(container = %instance.id, code, "Container exited");
        Ok(code)
    }
}

/// Locates the program to execute
///
/// Relative paths with a slash resolve against the workdir; absolute paths
/// prefer a file inside the instance; bare names are looked up on `PATH`.
fn resolve_program(program: &str, root: &Path, workdir: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.is_absolute() {
        let inside = host_path(root, program);
        if inside.is_file() {
            return inside;
        }
        return path.to_path_buf();
    }
    if program.contains('/') {
        return workdir.join(path);
    }
    path.to_path_buf()
}
