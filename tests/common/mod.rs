//! Shared helpers for the integration suites.

use geodex::{init_index, open_index, Database, Entry, Profile};
use std::path::{Path, PathBuf};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A temporary working tree with its own profile held outside the tree,
/// so cache and template files never leak into the index.
pub struct Tree {
    pub dir: tempfile::TempDir,
    _profile_dir: tempfile::TempDir,
    pub profile: Profile,
}

impl Tree {
    pub fn new() -> (Self, Database) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let profile_dir = tempfile::tempdir().unwrap();
        let profile = Profile::rooted(profile_dir.path());
        init_index(dir.path(), true, &profile).unwrap();
        let db = open_index(dir.path(), false).unwrap();
        (
            Self {
                dir,
                _profile_dir: profile_dir,
                profile,
            },
            db,
        )
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file under the root, creating parents.
    pub fn write(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

/// Every entry in the index, ordered by path.
pub fn all_entries(db: &Database) -> Vec<Entry> {
    geodex::get_matching_entries(db, "", 0, false).unwrap()
}

/// Row identity for comparisons, ignoring geometry.
pub fn row_key(e: &Entry) -> (String, String, i64, i64, i64, i64) {
    (
        e.path.clone(),
        e.hash.clone(),
        e.entry_type.tag(),
        e.mtime,
        e.size,
        e.depth,
    )
}
