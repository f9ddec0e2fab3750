//! Content-addressed layer cache
//!
//! Every committed layer is stored as a full snapshot directory named by its
//! cache key, next to an index of [`LayerRecord`]s. A later step starts from
//! a copy of its parent's snapshot, so snapshots are never mutated once
//! committed.

use super::digest::{Digest, DigestBuilder};
use super::index;
use crate::util::fs::{copy_tree, is_executable, remove_dir_if_exists};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const INDEX_FILE: &str = "index.json";
const SNAPSHOT_DIR: &str = "snapshots";
const STAGING_DIR: &str = "staging";

/// Metadata of a committed layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    /// Key derived from the parent layer and the step's own inputs
    pub cache_key: Digest,
    /// Parent layer key; `None` for a root (base + workdir) layer
    pub parent: Option<Digest>,
    /// Digest of the filesystem changes this layer made to its parent
    pub diff_id: Digest,
    /// Instruction that produced the layer
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LayerIndex {
    layers: BTreeMap<String, LayerRecord>,
}

#[derive(Debug, Clone)]
pub struct LayerCache {
    root: PathBuf,
}

impl LayerCache {
    /// Opens (creating if needed) the cache rooted at `<cache_dir>/layers`
    pub fn open(cache_dir: &Path) -> Result<Self> {
        let root = cache_dir.join("layers");
        fs::create_dir_all(root.join(SNAPSHOT_DIR))
            .with_context(|| format!("Failed to create layer cache at {}", root.display()))?;
        fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Directory holding the committed filesystem of a layer
    pub fn snapshot_path(&self, key: &Digest) -> PathBuf {
        key.to_blob_path(&self.root.join(SNAPSHOT_DIR))
    }

    /// Returns the record for `key` if both the record and its snapshot exist
    pub fn lookup(&self, key: &Digest) -> Result<Option<LayerRecord>> {
        let index: LayerIndex = index::read_with_lock(&self.index_path())?;
        Ok(index
            .layers
            .get(&key.to_string())
            .filter(|_| self.snapshot_path(key).is_dir())
            .cloned())
    }

    /// All committed layers, ordered by cache key
    pub fn records(&self) -> Result<Vec<LayerRecord>> {
        let index: LayerIndex = index::read_with_lock(&self.index_path())?;
        Ok(index.layers.into_values().collect())
    }

    /// Creates a fresh staging directory, seeded from `parent` if given
    pub fn stage(&self, parent: Option<&Digest>) -> Result<PathBuf> {
        let staged = self
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        match parent {
            Some(key) => copy_tree(&self.snapshot_path(key), &staged)
                .with_context(|| format!("Failed to stage from layer {}", key.short()))?,
            None => fs::create_dir_all(&staged)
                .with_context(|| format!("Failed to create {}", staged.display()))?,
        }
        Ok(staged)
    }

    /// Throws a staging directory away
    pub fn discard(&self, staged: &Path) {
        if let Err(e) = remove_dir_if_exists(staged) {
            debug!(error = %e, "Failed to remove staging directory");
        }
    }

    /// Moves a staged filesystem into place and records it
    ///
    /// A key that is already committed keeps its snapshot and record: the
    /// staged directory is discarded and the existing record returned, so
    /// images referencing the layer never see its filesystem change.
    pub fn commit(&self, staged: &Path, record: LayerRecord) -> Result<LayerRecord> {
        if let Some(existing) = self.lookup(&record.cache_key)? {
            debug!(
                layer = existing.cache_key.short(),
                "Layer already committed, keeping existing snapshot"
            );
            self.discard(staged);
            return Ok(existing);
        }

        let target = self.snapshot_path(&record.cache_key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        // a snapshot without a record is left over from an interrupted commit
        remove_dir_if_exists(&target)?;
        fs::rename(staged, &target).with_context(|| {
            format!(
                "Failed to move {} to {}",
                staged.display(),
                target.display()
            )
        })?;

        let key = record.cache_key.to_string();
        let stored = record.clone();
        index::update_with_lock(&self.index_path(), move |index: &mut LayerIndex| {
            index.layers.insert(key, stored);
        })?;

        info!(
            layer = record.cache_key.short(),
            diff = record.diff_id.short(),
            "Committed layer"
        );
        Ok(record)
    }
}

/// Per-path digests of a filesystem tree (content plus executable bit)
pub fn tree_digests(root: &Path) -> Result<BTreeMap<String, Digest>> {
    let mut entries = BTreeMap::new();

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let digest = if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            DigestBuilder::new()
                .part("symlink")
                .part(link.to_string_lossy().as_bytes())
                .finish()
        } else {
            let content = fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            let metadata = entry.metadata()?;
            DigestBuilder::new()
                .part(&content)
                .part(if is_executable(&metadata) { "x" } else { "-" })
                .finish()
        };
        entries.insert(relative, digest);
    }

    Ok(entries)
}

/// Digest of what changed between two tree listings
///
/// Added or modified paths contribute `(A, path, digest)`, removed paths
/// `(D, path)`, in path order.
pub fn diff_id(
    parent: &BTreeMap<String, Digest>,
    child: &BTreeMap<String, Digest>,
) -> Digest {
    let mut builder = DigestBuilder::new();

    let mut paths: Vec<&String> = parent.keys().chain(child.keys()).collect();
    paths.sort();
    paths.dedup();

    for path in paths {
        match (parent.get(path), child.get(path)) {
            (Some(before), Some(after)) if before == after => {}
            (_, Some(after)) => {
                builder = builder.part("A").part(path).part(after.to_string());
            }
            (Some(_), None) => {
                builder = builder.part("D").part(path);
            }
            (None, None) => {}
        }
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &Digest) -> LayerRecord {
        LayerRecord {
            cache_key: key.clone(),
            parent: None,
            diff_id: Digest::sha256(b"diff"),
            created_by: "COPY a .".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = LayerCache::open(dir.path()).unwrap();
        let key = Digest::sha256(b"layer-1");

        assert!(cache.lookup(&key).unwrap().is_none());

        let staged = cache.stage(None).unwrap();
        fs::write(staged.join("file.txt"), "content").unwrap();
        cache.commit(&staged, record(&key)).unwrap();

        let found = cache.lookup(&key).unwrap().unwrap();
        assert_eq!(found.cache_key, key);
        assert!(cache.snapshot_path(&key).join("file.txt").is_file());
        assert!(!staged.exists());
        assert_eq!(cache.records().unwrap().len(), 1);
    }

    #[test]
    fn test_stage_copies_parent_snapshot() {
        let dir = TempDir::new().unwrap();
        let cache = LayerCache::open(dir.path()).unwrap();
        let key = Digest::sha256(b"parent");

        let staged = cache.stage(None).unwrap();
        fs::create_dir_all(staged.join("app")).unwrap();
        fs::write(staged.join("app/a.txt"), "a").unwrap();
        cache.commit(&staged, record(&key)).unwrap();

        let child = cache.stage(Some(&key)).unwrap();
        assert_eq!(fs::read_to_string(child.join("app/a.txt")).unwrap(), "a");

        fs::write(child.join("app/a.txt"), "changed").unwrap();
        assert_eq!(
            fs::read_to_string(cache.snapshot_path(&key).join("app/a.txt")).unwrap(),
            "a"
        );
        cache.discard(&child);
        assert!(!child.exists());
    }

    #[test]
    fn test_commit_never_replaces_committed_snapshot() {
        let dir = TempDir::new().unwrap();
        let cache = LayerCache::open(dir.path()).unwrap();
        let key = Digest::sha256(b"layer");

        let first = cache.stage(None).unwrap();
        fs::write(first.join("stamp.txt"), "first").unwrap();
        let committed = cache.commit(&first, record(&key)).unwrap();

        let second = cache.stage(None).unwrap();
        fs::write(second.join("stamp.txt"), "second").unwrap();
        let mut other = record(&key);
        other.diff_id = Digest::sha256(b"other diff");
        let kept = cache.commit(&second, other).unwrap();

        assert_eq!(kept, committed);
        assert!(!second.exists());
        assert_eq!(
            fs::read_to_string(cache.snapshot_path(&key).join("stamp.txt")).unwrap(),
            "first"
        );
    }

    #[test]
    fn test_lookup_ignores_record_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let cache = LayerCache::open(dir.path()).unwrap();
        let key = Digest::sha256(b"gone");

        let staged = cache.stage(None).unwrap();
        cache.commit(&staged, record(&key)).unwrap();
        fs::remove_dir_all(cache.snapshot_path(&key)).unwrap();

        assert!(cache.lookup(&key).unwrap().is_none());
    }

    #[test]
    fn test_diff_id_tracks_changes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), "1").unwrap();
        let before = tree_digests(dir.path()).unwrap();

        assert_eq!(diff_id(&before, &before), DigestBuilder::new().finish());

        fs::write(dir.path().join("b"), "2").unwrap();
        let added = tree_digests(dir.path()).unwrap();
        let first = diff_id(&before, &added);
        assert_eq!(first, diff_id(&before, &added));

        fs::remove_file(dir.path().join("a")).unwrap();
        let removed = tree_digests(dir.path()).unwrap();
        assert_ne!(diff_id(&added, &removed), first);
    }
}
