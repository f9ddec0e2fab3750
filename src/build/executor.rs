//! Step executors: the part of a build that touches a filesystem
//!
//! The [`Builder`](super::Builder) decides *whether* a step runs; an executor
//! decides *how*. [`LocalExecutor`] materialises each layer as a plain
//! directory on the host.

use super::digest::{Digest, DigestBuilder};
use super::error::BuildError;
use crate::context::{BuildContext, Placement};
use crate::launch::exit_code;
use crate::spec::{ImageReference, RunStep};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Env var pointing RUN steps at the root of the filesystem being built
pub const ROOTFS_ENV: &str = "LAYERPACK_ROOTFS";

/// Lines of stderr kept in a failed step's error
const STDERR_TAIL_LINES: usize = 20;

#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolves the base reference to the digest the root layer is keyed on
    async fn resolve_base(&self, base: &ImageReference) -> Result<Digest, BuildError>;

    /// Fills an empty directory with the base filesystem and the workdir
    async fn prepare_base(
        &self,
        base: &ImageReference,
        workdir: &str,
        rootfs: &Path,
    ) -> Result<(), BuildError>;

    async fn apply_copy(
        &self,
        placements: &[Placement],
        context: &BuildContext,
        rootfs: &Path,
    ) -> Result<(), BuildError>;

    async fn apply_run(
        &self,
        index: usize,
        run: &RunStep,
        workdir: &str,
        rootfs: &Path,
    ) -> Result<(), BuildError>;
}

/// Maps an absolute image path to its location under `rootfs`
pub fn host_path(rootfs: &Path, image_path: &str) -> PathBuf {
    rootfs.join(image_path.trim_start_matches('/'))
}

/// Builds layers as directories and runs RUN steps as host processes
///
/// The base image is not pulled: the root layer starts empty and is keyed on
/// the reference (or its pinned digest).
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepExecutor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn resolve_base(&self, base: &ImageReference) -> Result<Digest, BuildError> {
        if let Some(ref pinned) = base.digest {
            return Ok(Digest::parse(pinned)?);
        }
        debug!(base = %base, "Base is not pinned, keying on the reference");
        Ok(DigestBuilder::new()
            .part("reference")
            .part(base.to_string())
            .finish())
    }

    async fn prepare_base(
        &self,
        base: &ImageReference,
        workdir: &str,
        rootfs: &Path,
    ) -> Result<(), BuildError> {
        let dir = host_path(rootfs, workdir);
        fs::create_dir_all(&dir).map_err(|e| {
            anyhow::anyhow!("Failed to create workdir {}: {}", dir.display(), e)
        })?;
        info!(base = %base, workdir, "Prepared base layer");
        Ok(())
    }

    async fn apply_copy(
        &self,
        placements: &[Placement],
        context: &BuildContext,
        rootfs: &Path,
    ) -> Result<(), BuildError> {
        for placement in placements {
            let source = context.host_path(&placement.source);
            let content = fs::read(&source)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", source.display(), e))?;

            if Digest::sha256(&content) != placement.entry.digest {
                return Err(BuildError::ContextChanged(placement.source.clone()));
            }

            let target = host_path(rootfs, &placement.target);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("Failed to create {}: {}", parent.display(), e)
                })?;
            }
            fs::write(&target, &content)
                .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", target.display(), e))?;
            set_executable(&target, placement.entry.executable)?;
        }
        debug!(files = placements.len(), "Copied files into layer");
        Ok(())
    }

    async fn apply_run(
        &self,
        index: usize,
        run: &RunStep,
        workdir: &str,
        rootfs: &Path,
    ) -> Result<(), BuildError> {
        let instruction = format!("RUN {}", run.command);
        let argv = run.command.argv();
        let (program, args) = argv.split_first().ok_or_else(|| BuildError::StepFailed {
            index,
            instruction: instruction.clone(),
            detail: "empty command".to_string(),
        })?;

        let output = Command::new(program)
            .args(args)
            .current_dir(host_path(rootfs, workdir))
            .env(ROOTFS_ENV, rootfs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| BuildError::Spawn {
                index,
                instruction: instruction.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().chain(stderr.lines()) {
            info!(step = index, "{}", line);
        }

        if !output.status.success() {
            let code = exit_code(output.status);
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            let mut detail = format!("command exited with status {}", code);
            if !tail.is_empty() {
                detail.push_str(": ");
                detail.push_str(&tail.into_iter().rev().collect::<Vec<_>>().join("\n"));
            }
            warn!(step = index, code, "Build step failed");
            return Err(BuildError::StepFailed {
                index,
                instruction,
                detail,
            });
        }

        Ok(())
    }
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<(), BuildError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| anyhow::anyhow!("Failed to set mode on {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<(), BuildError> {
    Ok(())
}
