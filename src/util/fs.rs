//! Directory helpers shared by the layer cache and the launcher

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Recursively copies `src` into `dst`, preserving permissions and symlinks.
///
/// `dst` is created if missing. Existing files in `dst` are overwritten.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).with_context(|| format!("Failed to read {}", src.display()))?;
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(&link, dst)
        .with_context(|| format!("Failed to create symlink {}", dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).with_context(|| format!("Failed to copy {}", src.display()))?;
    Ok(())
}

/// Removes a directory tree, treating an already-missing directory as success
pub fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Whether the file at `path` has any executable bit set
#[cfg(unix)]
pub fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_nested() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/c.txt"), "hello").unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();

        copy_tree(src.path(), &dst.path().join("out")).unwrap();

        assert_eq!(
            fs::read_to_string(dst.path().join("out/a/b/c.txt")).unwrap(),
            "hello"
        );
        assert_eq!(fs::read_to_string(dst.path().join("out/top.txt")).unwrap(), "top");
    }

    #[test]
    fn test_remove_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(remove_dir_if_exists(&dir.path().join("missing")).is_ok());
    }
}
