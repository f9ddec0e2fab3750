//! JSON index files shared between concurrent layerpack processes
//!
//! Writers hold an exclusive `fs2` lock for the whole read-modify-write;
//! readers take a shared lock. An empty or missing file reads as the
//! default value.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Applies `update_fn` to the index at `path` under an exclusive lock
pub fn update_with_lock<T, F, R>(path: &Path, update_fn: F) -> Result<R>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T) -> R,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open index file {}", path.display()))?;

    file.lock_exclusive()
        .with_context(|| format!("Failed to lock {}", path.display()))?;

    let mut index: T = read_index(&mut file, path)?;

    let result = update_fn(&mut index);

    let content = serde_json::to_string_pretty(&index).context("Failed to serialize index")?;
    file.set_len(0).context("Failed to truncate index file")?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write index to {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync index file {}", path.display()))?;

    // dropping the file releases the lock
    debug!(path = %path.display(), "Updated index");
    Ok(result)
}

/// Reads the index at `path` under a shared lock
pub fn read_with_lock<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }

    let mut file = fs::File::open(path)
        .with_context(|| format!("Failed to open index file {}", path.display()))?;

    file.lock_shared()
        .with_context(|| format!("Failed to share-lock {}", path.display()))?;

    read_index(&mut file, path)
}

fn read_index<T>(file: &mut fs::File, path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let mut content = String::new();
    file.read_to_string(&mut content)
        .with_context(|| format!("Failed to read index file {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse index from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_index_reads_default() {
        let dir = TempDir::new().unwrap();
        let index: BTreeMap<String, u32> = read_with_lock(&dir.path().join("index.json")).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_update_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/index.json");

        let previous = update_with_lock(&path, |index: &mut BTreeMap<String, u32>| {
            index.insert("a".to_string(), 1)
        })
        .unwrap();
        assert_eq!(previous, None);

        update_with_lock(&path, |index: &mut BTreeMap<String, u32>| {
            index.insert("b".to_string(), 2);
        })
        .unwrap();

        let index: BTreeMap<String, u32> = read_with_lock(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("a"), Some(&1));
    }

    #[test]
    fn test_unreadable_index_is_an_error_and_left_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let read: Result<BTreeMap<String, u32>> = read_with_lock(&path);
        assert!(read.is_err());

        let updated = update_with_lock(&path, |index: &mut BTreeMap<String, u32>| {
            index.insert("a".to_string(), 1);
        });
        assert!(updated.is_err());
        assert_eq!(fs::read(&path).unwrap(), vec![0xff, 0xfe, 0x00]);
    }
}
