//! Derived artifacts - thumbnails, tile pyramids and their cache keys
//!
//! Derived outputs live in two places: a user-wide cache keyed by the
//! source file's content hash plus size parameters (thumbnails, tiles),
//! and the working tree's `.ddb/build/<hash>/` subtree for build outputs.
//! Both are content-addressed, so invalidation is the removal of a
//! hash-keyed directory.

pub mod thumbs;
pub mod tiles;

pub use thumbs::get_thumbnail;
pub use tiles::get_tile;

use crate::error::Result;
use crate::paths;
use crate::storage::{BUILD_FOLDER, DDB_FOLDER};
use std::path::Path;

// Grown past this, decoding for derived artifacts is declined.
pub(crate) const MAX_SOURCE_SIZE: u64 = 64 * 1024 * 1024;

/// Remove the build subtree keyed by a retired hash. Called before the
/// row that carried the hash is updated or deleted.
pub fn invalidate_build_artifacts(root: &Path, entry_hash: &str) -> Result<()> {
    if entry_hash.is_empty() {
        return Ok(());
    }
    let build_folder = root.join(DDB_FOLDER).join(BUILD_FOLDER).join(entry_hash);
    if build_folder.exists() {
        tracing::debug!("removing {}", build_folder.display());
        paths::assure_is_removed(&build_folder)?;
    }
    Ok(())
}

/// Cache key for derived artifacts: the content hash folded with the
/// parameters that shape the output.
pub(crate) fn cache_key(content_hash: &str, params: &str) -> String {
    crate::hash::string_sha256(&format!("{content_hash}:{params}"))[..32].to_string()
}
