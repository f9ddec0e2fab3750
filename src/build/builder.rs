use super::cache::{diff_id, tree_digests, LayerCache, LayerRecord};
use super::digest::{Digest, DigestBuilder};
use super::error::BuildError;
use super::executor::StepExecutor;
use super::store::{ImageConfig, ImageManifest, ImageRecord, ImageStore, LayerDescriptor};
use crate::context::{BuildContext, Placement};
use crate::spec::{BuildStep, ImageReference, ImageSpec, StepRole};
use crate::validation::Validator;
use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Execute every step even when a cached layer exists
    pub no_cache: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// 1-based position in the spec's step list
    pub index: usize,
    pub instruction: String,
    pub role: StepRole,
    pub cache_key: Digest,
    pub diff_id: Digest,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub tag: String,
    pub image_digest: Digest,
    pub base: String,
    pub base_digest: Digest,
    pub steps: Vec<StepReport>,
    pub duration_ms: u128,
}

impl BuildReport {
    pub fn cached_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.cached).count()
    }
}

/// Key of the root layer: the resolved base plus the working directory
pub fn root_cache_key(base_digest: &Digest, workdir: &str) -> Digest {
    DigestBuilder::new()
        .part("root")
        .part(base_digest.to_string())
        .part(workdir)
        .finish()
}

/// Key of a build step
///
/// Only the parent key, the step itself, the workdir and (for copies) the
/// placed files' digests go in, so a step is reused exactly when all of
/// those are unchanged.
pub fn step_cache_key(
    parent: &Digest,
    step: &BuildStep,
    workdir: &str,
    placements: &[Placement],
) -> Result<Digest, BuildError> {
    let step_json = serde_json::to_string(step).context("Failed to serialize build step")?;
    let mut builder = DigestBuilder::new()
        .part(parent.to_string())
        .part(step_json)
        .part(workdir);
    for placement in placements {
        builder = builder
            .part(&placement.target)
            .part(placement.entry.digest.to_string())
            .part(if placement.entry.executable { "x" } else { "-" });
    }
    Ok(builder.finish())
}

/// Applies an [`ImageSpec`] step by step, reusing cached layers
pub struct Builder<E: StepExecutor> {
    executor: E,
    cache: LayerCache,
    store: ImageStore,
    validator: Validator,
}

impl<E: StepExecutor> Builder<E> {
    pub fn new(executor: E, cache: LayerCache, store: ImageStore) -> Self {
        Self {
            executor,
            cache,
            store,
            validator: Validator::default(),
        }
    }

    /// Opens the cache and image store under `cache_dir`
    pub fn with_cache_dir(executor: E, cache_dir: &Path) -> Result<Self, BuildError> {
        Ok(Self::new(
            executor,
            LayerCache::open(cache_dir)?,
            ImageStore::open(cache_dir),
        ))
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn cache(&self) -> &LayerCache {
        &self.cache
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Builds `spec` from `context` and tags the result
    ///
    /// The tag is written only after every step succeeded; a failing step
    /// leaves the image store exactly as it was.
    pub async fn build(
        &self,
        spec: &ImageSpec,
        context: &BuildContext,
        tag: &str,
        options: &BuildOptions,
    ) -> Result<BuildReport, BuildError> {
        let started = Instant::now();

        self.validator
            .validate(spec, Some(context))
            .map_err(|e| BuildError::InvalidSpec(format!("{:#}", e)))?;
        let tag = super::store::normalize_tag(tag)?;

        let base = ImageReference::parse(&spec.base)?;
        let base_digest = self.executor.resolve_base(&base).await?;
        info!(
            executor = self.executor.name(),
            base = %base,
            base_digest = base_digest.short(),
            steps = spec.steps.len(),
            "Starting build"
        );

        let root_key = root_cache_key(&base_digest, &spec.workdir);
        if options.no_cache || self.cache.lookup(&root_key)?.is_none() {
            let staged = self.cache.stage(None)?;
            let result = self
                .executor
                .prepare_base(&base, &spec.workdir, &staged)
                .await;
            self.finish_layer(
                staged,
                result,
                &root_key,
                None,
                format!("FROM {} / WORKDIR {}", base, spec.workdir),
            )?;
        }

        let total = spec.steps.len();
        let mut parent = root_key;
        let mut reports = Vec::with_capacity(total);

        for (i, step) in spec.steps.iter().enumerate() {
            let index = i + 1;
            let instruction = step.instruction();
            let placements = match step {
                BuildStep::Copy(copy) => context.place(copy, &spec.workdir)?,
                BuildStep::Run(_) => Vec::new(),
            };
            let key = step_cache_key(&parent, step, &spec.workdir, &placements)?;

            let cached = if options.no_cache {
                None
            } else {
                self.cache.lookup(&key)?
            };

            let record = match cached {
                Some(record) => {
                    info!("CACHED [{}/{}] {}", index, total, instruction);
                    reports.push(StepReport {
                        index,
                        instruction,
                        role: step.role(),
                        cache_key: key.clone(),
                        diff_id: record.diff_id.clone(),
                        cached: true,
                    });
                    parent = key;
                    continue;
                }
                None => {
                    info!("[{}/{}] {}", index, total, instruction);
                    let staged = self.cache.stage(Some(&parent))?;
                    let result = match step {
                        BuildStep::Copy(_) => {
                            self.executor
                                .apply_copy(&placements, context, &staged)
                                .await
                        }
                        BuildStep::Run(run) => {
                            self.executor
                                .apply_run(index, run, &spec.workdir, &staged)
                                .await
                        }
                    };
                    self.finish_layer(staged, result, &key, Some(&parent), instruction.clone())?
                }
            };

            reports.push(StepReport {
                index,
                instruction,
                role: step.role(),
                cache_key: key.clone(),
                diff_id: record.diff_id,
                cached: false,
            });
            parent = key;
        }

        let manifest = ImageManifest {
            base: base.to_string(),
            base_digest: base_digest.clone(),
            layers: reports
                .iter()
                .map(|r| LayerDescriptor {
                    diff_id: r.diff_id.clone(),
                    cache_key: r.cache_key.clone(),
                    created_by: r.instruction.clone(),
                })
                .collect(),
            config: ImageConfig {
                workdir: spec.workdir.clone(),
                env: spec.env.clone(),
                cmd: spec.command.argv(),
            },
        };
        let image_digest = manifest.digest()?;

        self.store.tag(
            &tag,
            ImageRecord {
                digest: image_digest.clone(),
                manifest,
                top_layer: parent,
                created_at: Utc::now(),
            },
        )?;

        let report = BuildReport {
            tag,
            image_digest,
            base: base.to_string(),
            base_digest,
            steps: reports,
            duration_ms: started.elapsed().as_millis(),
        };
        info!(
            tag = %report.tag,
            digest = %report.image_digest,
            cached = report.cached_steps(),
            total,
            "Build complete"
        );
        Ok(report)
    }

    /// Commits a staged layer, or discards it when its step failed
    fn finish_layer(
        &self,
        staged: std::path::PathBuf,
        result: Result<(), BuildError>,
        key: &Digest,
        parent: Option<&Digest>,
        created_by: String,
    ) -> Result<LayerRecord, BuildError> {
        if let Err(e) = result {
            self.cache.discard(&staged);
            return Err(e);
        }

        let parent_tree = match parent {
            Some(p) => tree_digests(&self.cache.snapshot_path(p))?,
            None => BTreeMap::new(),
        };
        let child_tree = match tree_digests(&staged) {
            Ok(tree) => tree,
            Err(e) => {
                self.cache.discard(&staged);
                return Err(e.into());
            }
        };
        let diff = diff_id(&parent_tree, &child_tree);
        debug!(layer = key.short(), diff = diff.short(), "Computed layer diff");

        let record = LayerRecord {
            cache_key: key.clone(),
            parent: parent.cloned(),
            diff_id: diff,
            created_by,
            created_at: Utc::now(),
        };
        match self.cache.commit(&staged, record) {
            Ok(record) => Ok(record),
            Err(e) => {
                self.cache.discard(&staged);
                Err(e.into())
            }
        }
    }
}
