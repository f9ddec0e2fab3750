//! Build context: the local directory whose files COPY steps read
//!
//! The context is scanned once per build. Every regular file is hashed so
//! that copy steps can be keyed on the bytes they would place in the image.

use crate::build::digest::Digest;
use crate::spec::{schema::is_tree_source, CopyStep};
use crate::util::fs::is_executable;
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const IGNORE_FILE: &str = ".dockerignore";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Build context {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("COPY source '{0}' not found in build context")]
    MissingSource(String),

    #[error("COPY source '{0}' escapes the build context")]
    OutsideContext(String),

    #[error("Failed to scan build context: {0}")]
    Walk(#[from] ignore::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A hashed regular file of the build context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub digest: Digest,
    pub size: u64,
    pub executable: bool,
}

/// A file placed into the image by a COPY step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Context-relative source path
    pub source: String,
    /// Absolute destination path inside the image
    pub target: String,
    pub entry: FileEntry,
}

#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
    files: BTreeMap<String, FileEntry>,
}

fn to_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalises a context-relative source, rejecting paths that climb out
fn normalize_source(source: &str) -> Result<String, ContextError> {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(source.trim()).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(ContextError::OutsideContext(source.to_string()));
                }
            }
            _ => {}
        }
    }
    Ok(parts.join("/"))
}

/// Lexically joins an image path onto `base`, resolving `.` and `..`
pub fn join_image_path(base: &str, path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let combined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", base, path)
    };
    for component in Path::new(&combined).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => {}
        }
    }
    format!("/{}", parts.join("/"))
}

impl BuildContext {
    /// Scans `root`, honouring `.dockerignore` and skipping `.git`
    pub fn scan(root: &Path) -> Result<Self, ContextError> {
        if !root.is_dir() {
            return Err(ContextError::NotADirectory(root.to_path_buf()));
        }

        let mut files = BTreeMap::new();
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .hidden(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        for entry in walker {
            let entry = entry?;
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_symlink() {
                debug!(path = %entry.path().display(), "Skipping symlink in build context");
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let content = fs::read(path).map_err(|source| ContextError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let metadata = entry.metadata()?;

            files.insert(
                to_key(relative),
                FileEntry {
                    digest: Digest::sha256(&content),
                    size: content.len() as u64,
                    executable: is_executable(&metadata),
                },
            );
        }

        debug!(root = %root.display(), files = files.len(), "Scanned build context");

        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// An in-memory context, used where no directory is at hand
    pub fn from_entries(root: impl Into<PathBuf>, files: BTreeMap<String, FileEntry>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &BTreeMap<String, FileEntry> {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Absolute host path of a context-relative file
    pub fn host_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Resolves one COPY source to the files it selects
    ///
    /// Returns `(path relative to the source, context key, entry)` triples.
    /// For a file source the relative part is its file name.
    pub fn select(&self, source: &str) -> Result<Vec<(String, String, &FileEntry)>, ContextError> {
        let normalized = normalize_source(source)?;

        if normalized.is_empty() {
            return Ok(self
                .files
                .iter()
                .map(|(key, entry)| (key.clone(), key.clone(), entry))
                .collect());
        }

        if let Some(entry) = self.files.get(&normalized) {
            let name = normalized
                .rsplit('/')
                .next()
                .unwrap_or(normalized.as_str())
                .to_string();
            return Ok(vec![(name, normalized, entry)]);
        }

        let prefix = format!("{}/", normalized);
        let selected: Vec<_> = self
            .files
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, entry)| (key[prefix.len()..].to_string(), key.clone(), entry))
            .collect();

        if selected.is_empty() {
            return Err(ContextError::MissingSource(source.to_string()));
        }
        Ok(selected)
    }

    /// Maps the files of a COPY step to their absolute paths in the image
    ///
    /// The destination resolves against `workdir`. It names a directory when
    /// it ends in `/`, is `.`, or receives several sources or a directory;
    /// otherwise a single file source is copied to exactly that path.
    pub fn place(&self, copy: &CopyStep, workdir: &str) -> Result<Vec<Placement>, ContextError> {
        let dest_root = join_image_path(workdir, &copy.dest);
        let dest_is_dir = copy.dest.ends_with('/')
            || copy.dest.trim() == "."
            || copy.sources.len() > 1
            || copy.sources.iter().any(|s| is_tree_source(s));

        let mut placements = Vec::new();
        for source in &copy.sources {
            let selected = self.select(source)?;
            let is_single_file = selected.len() == 1
                && normalize_source(source)? == selected[0].1;

            for (relative, key, entry) in selected {
                let target = if is_single_file && !dest_is_dir {
                    dest_root.clone()
                } else {
                    join_image_path(&dest_root, &relative)
                };
                placements.push(Placement {
                    source: key,
                    target,
                    entry: entry.clone(),
                });
            }
        }

        placements.sort_by(|a, b| a.target.cmp(&b.target));
        // later sources win on the same target
        placements.dedup_by(|later, earlier| {
            if later.target == earlier.target {
                *earlier = later.clone();
                true
            } else {
                false
            }
        });
        Ok(placements)
    }
}
