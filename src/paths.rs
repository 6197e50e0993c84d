//! Path algebra for working-tree entries
//!
//! All index paths are stored as forward-slash relative paths from the
//! working root. Depth is the count of `/` separators. Helpers here also
//! cover mtime reads/writes and safe removal of build artifacts.

use crate::error::{GeodexError, Result};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Lexically normalize a path to an absolute form without touching the
/// filesystem. `.` components are dropped and `..` pops the previous one.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir()?
    };

    let mut normalized = PathBuf::new();
    for component in base.components().chain(path.components()) {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            c => normalized.push(c.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Check whether `child` is `parent` itself or contained within it,
/// comparing lexically normalized absolute paths.
pub fn is_parent_of(parent: &Path, child: &Path) -> Result<bool> {
    let parent = absolute(parent)?;
    let child = absolute(child)?;
    Ok(child.starts_with(&parent))
}

/// Compute the forward-slash relative path of `path` under `root`.
///
/// The root itself maps to `"."`. Paths outside the root are rejected.
pub fn to_relative(path: &Path, root: &Path) -> Result<String> {
    let abs = absolute(path)?;
    let root = absolute(root)?;

    let rel = abs.strip_prefix(&root).map_err(|_| {
        GeodexError::Filesystem(format!(
            "path is not contained within {}: {}",
            root.display(),
            abs.display()
        ))
    })?;

    let generic = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if generic.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(generic)
    }
}

/// Depth of a relative path: the count of `/` separators.
pub fn depth(rel_path: &str) -> i64 {
    rel_path.matches('/').count() as i64
}

/// True when any path segment is `.` or `..`.
pub fn has_dot_notation(path: &str) -> bool {
    path.split(['/', '\\'])
        .any(|segment| segment == "." || segment == "..")
}

/// True when the final name component contains a backslash. These show up
/// when archives written on a foreign OS are extracted and are skipped
/// during indexing.
pub fn name_has_backslash(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains('\\'))
        .unwrap_or(false)
}

/// Filesystem modification time in seconds since the epoch.
pub fn modified_time(path: &Path) -> Result<i64> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_err(|_| GeodexError::Filesystem(format!("mtime before epoch: {}", path.display())))?;
    Ok(mtime.as_secs() as i64)
}

/// Set the filesystem modification time from epoch seconds.
pub fn set_modified_time(path: &Path, mtime: i64) -> Result<()> {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(mtime, 0))?;
    Ok(())
}

/// Remove a file or directory tree, tolerating its absence.
pub fn assure_is_removed(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_counts_separators() {
        assert_eq!(depth("file.txt"), 0);
        assert_eq!(depth("a/b/file.txt"), 2);
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/data/tree");
        let rel = to_relative(Path::new("/data/tree/a/b/img.jpg"), root).unwrap();
        assert_eq!(rel, "a/b/img.jpg");
        assert_eq!(to_relative(root, root).unwrap(), ".");
    }

    #[test]
    fn outside_root_is_rejected() {
        let root = Path::new("/data/tree");
        assert!(to_relative(Path::new("/data/other/file"), root).is_err());
    }

    #[test]
    fn normalization_folds_dot_segments() {
        let abs = absolute(Path::new("/data/tree/a/../b/./c")).unwrap();
        assert_eq!(abs, PathBuf::from("/data/tree/b/c"));
    }

    #[test]
    fn dot_notation_detection() {
        assert!(has_dot_notation("a/../b"));
        assert!(has_dot_notation("./a"));
        assert!(!has_dot_notation("a/b.c/d"));
    }
}
