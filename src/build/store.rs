//! Tagged images produced by successful builds

use super::digest::Digest;
use super::index;
use crate::spec::ImageReference;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// One build step's layer as recorded in an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub diff_id: Digest,
    pub cache_key: Digest,
    pub created_by: String,
}

/// Runtime configuration carried by an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub workdir: String,
    pub env: BTreeMap<String, String>,
    pub cmd: Vec<String>,
}

/// Everything that identifies an image; hashed to form its digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub base: String,
    pub base_digest: Digest,
    pub layers: Vec<LayerDescriptor>,
    pub config: ImageConfig,
}

impl ImageManifest {
    /// sha256 of the manifest's canonical JSON
    ///
    /// The manifest holds no timestamps and its maps are ordered, so equal
    /// inputs always give the same digest.
    pub fn digest(&self) -> Result<Digest> {
        let bytes = serde_json::to_vec(self).context("Failed to serialize image manifest")?;
        Ok(Digest::sha256(&bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub digest: Digest,
    pub manifest: ImageManifest,
    /// Cache key of the layer holding the final filesystem
    pub top_layer: Digest,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImageIndex {
    images: BTreeMap<String, ImageRecord>,
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    index_path: PathBuf,
}

/// Canonical tag form, e.g. `demo` becomes `demo:latest`
pub fn normalize_tag(tag: &str) -> Result<String> {
    let reference =
        ImageReference::parse(tag).with_context(|| format!("Invalid image tag '{}'", tag))?;
    Ok(reference.to_string())
}

impl ImageStore {
    pub fn open(cache_dir: &Path) -> Self {
        Self {
            index_path: cache_dir.join("images").join("index.json"),
        }
    }

    /// Points `tag` at `record`, replacing any previous image with that tag
    pub fn tag(&self, tag: &str, record: ImageRecord) -> Result<Option<ImageRecord>> {
        let tag = normalize_tag(tag)?;
        let digest = record.digest.clone();
        let key = tag.clone();
        let previous = index::update_with_lock(&self.index_path, move |index: &mut ImageIndex| {
            index.images.insert(key, record)
        })?;
        info!(tag = %tag, digest = %digest, "Tagged image");
        Ok(previous)
    }

    pub fn get(&self, tag: &str) -> Result<Option<ImageRecord>> {
        let tag = normalize_tag(tag)?;
        let index: ImageIndex = index::read_with_lock(&self.index_path)?;
        Ok(index.images.get(&tag).cloned())
    }

    /// All tags with their images, ordered by tag
    pub fn list(&self) -> Result<Vec<(String, ImageRecord)>> {
        let index: ImageIndex = index::read_with_lock(&self.index_path)?;
        Ok(index.images.into_iter().collect())
    }
}
