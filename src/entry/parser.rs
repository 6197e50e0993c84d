//! Entry parsing
//!
//! Orchestrates stat, classification, hashing and metadata extraction into
//! a populated `Entry`, plus the recursive path expansion used by hosts
//! when parsing outside an index.

use crate::entry::{Entry, EntryType};
use crate::error::{GeodexError, Result};
use crate::extract;
use crate::paths;
use crate::storage::DDB_FOLDER;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Host-facing parse options; the camel-cased form is what language
/// bindings hand over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParseFilesOpts {
    pub with_hash: bool,
    pub stop_on_error: bool,
    pub recursive: bool,
    /// 0 means unbounded.
    pub max_recursion_depth: i32,
}

impl Default for ParseFilesOpts {
    fn default() -> Self {
        Self {
            with_hash: false,
            stop_on_error: false,
            recursive: false,
            max_recursion_depth: 0,
        }
    }
}

/// Parse a single path into an entry relative to `root`.
///
/// Directories produce bare entries (empty hash, null meta, zero size);
/// the root itself produces the `DroneDB` marker when it holds a `.ddb`
/// child. Files with a backslash in their name component are rejected
/// here and filtered silently by the index `add` operation.
pub fn parse_entry(path: &Path, root: &Path, with_hash: bool) -> Result<Entry> {
    if paths::name_has_backslash(path) {
        return Err(GeodexError::Filesystem(format!(
            "name component contains a backslash: {}",
            path.display()
        )));
    }

    let rel_path = paths::to_relative(path, root)?;
    let metadata = std::fs::metadata(path)?;
    let mtime = paths::modified_time(path)?;

    if metadata.is_dir() {
        let entry_type = if rel_path == "." && path.join(DDB_FOLDER).exists() {
            EntryType::DroneDB
        } else {
            EntryType::Directory
        };
        return Ok(Entry {
            path: rel_path.clone(),
            hash: String::new(),
            entry_type,
            meta: None,
            mtime,
            size: 0,
            depth: paths::depth(&rel_path),
            point_geom: None,
            polygon_geom: None,
        });
    }

    let hash = if with_hash {
        crate::hash::file_sha256(path)?
    } else {
        String::new()
    };

    let (entry_type, extracted) = extract::extract_file(path);

    Ok(Entry {
        depth: paths::depth(&rel_path),
        path: rel_path,
        hash,
        entry_type,
        meta: extracted.meta.filter(|m| *m != Value::Null),
        mtime,
        size: metadata.len() as i64,
        point_geom: extracted.point_geom,
        polygon_geom: extracted.polygon_geom,
    })
}

/// Parse a set of paths for a host, expanding directories when asked.
///
/// Entries are made relative to the current working directory when the
/// path is contained in it, falling back to the path's parent. Per-entry
/// failures are logged and skipped unless `stop_on_error` is set.
pub fn parse_files<P: AsRef<Path>>(paths: &[P], opts: &ParseFilesOpts) -> Result<Vec<Entry>> {
    let expanded = expand_path_list(paths, opts.recursive, opts.max_recursion_depth)?;
    let cwd = std::env::current_dir()?;

    let mut entries = Vec::with_capacity(expanded.len());
    for path in expanded {
        let root = if paths::is_parent_of(&cwd, &path)? {
            cwd.clone()
        } else {
            paths::absolute(&path)?
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone())
        };

        match parse_entry(&path, &root, opts.with_hash) {
            Ok(entry) => entries.push(entry),
            Err(e) if !opts.stop_on_error => {
                tracing::warn!("skipping {}: {}", path.display(), e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(entries)
}

/// Expand directory inputs into their contents via a pruned depth-first
/// walk. `.ddb` subtrees are always skipped, hidden and system files are
/// skipped on Windows, and recursion stops at `max_depth` levels below
/// each input (0 = unbounded).
pub fn expand_path_list<P: AsRef<Path>>(
    paths: &[P],
    recursive: bool,
    max_depth: i32,
) -> Result<Vec<PathBuf>> {
    if max_depth < 0 {
        return Err(GeodexError::InvalidArgument(
            "max recursion depth cannot be negative".to_string(),
        ));
    }
    if !recursive {
        return Ok(paths.iter().map(|p| p.as_ref().to_path_buf()).collect());
    }

    let mut result = Vec::new();
    for path in paths {
        let path = path.as_ref();
        if path.file_name().map(|n| n == DDB_FOLDER).unwrap_or(false) {
            continue;
        }

        if path.is_dir() {
            let mut walker = WalkDir::new(path).min_depth(1).sort_by_file_name();
            if max_depth > 0 {
                walker = walker.max_depth(max_depth as usize);
            }
            for item in walker
                .into_iter()
                .filter_entry(|e| e.file_name() != DDB_FOLDER && !is_hidden_or_system(e.path()))
            {
                let item =
                    item.map_err(|e| GeodexError::Filesystem(e.to_string()))?;
                result.push(item.into_path());
            }
        } else if path.exists() {
            result.push(path.to_path_buf());
        } else {
            return Err(GeodexError::Filesystem(format!(
                "path does not exist: {}",
                path.display()
            )));
        }
    }
    Ok(result)
}

#[cfg(windows)]
pub(crate) fn is_hidden_or_system(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    std::fs::metadata(path)
        .map(|m| m.file_attributes() & (FILE_ATTRIBUTE_HIDDEN | FILE_ATTRIBUTE_SYSTEM) != 0)
        .unwrap_or(false)
}

#[cfg(not(windows))]
pub(crate) fn is_hidden_or_system(_path: &Path) -> bool {
    false
}
