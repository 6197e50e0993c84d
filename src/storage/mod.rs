//! Storage module - the index store colocated with the working tree
//!
//! A directory is a working tree iff it contains a `.ddb` child holding
//! `dbase.sqlite`. This module opens and initializes that store:
//! - Database facade with pragmas, schema checks and migrations
//! - Working-tree discovery (optionally walking up ancestors)
//! - Initialization from a per-revision template database or from scratch

pub mod database;

pub use database::Database;

use crate::error::{GeodexError, Result};
use crate::paths;
use crate::profile::Profile;
use std::path::{Path, PathBuf};

pub const DDB_FOLDER: &str = ".ddb";
pub const DBASE_NAME: &str = "dbase.sqlite";
pub const BUILD_FOLDER: &str = "build";

/// Open the working tree containing `directory`. With `traverse_up`,
/// ancestors are searched until a `.ddb` marker is found or the
/// filesystem root is reached.
pub fn open_index(directory: &Path, traverse_up: bool) -> Result<Database> {
    let dir = paths::absolute(directory)?;
    let dbase_path = dir.join(DDB_FOLDER).join(DBASE_NAME);

    if dbase_path.exists() {
        tracing::debug!("{} exists", dbase_path.display());
        return Database::open(&dbase_path);
    }

    if traverse_up {
        if let Some(parent) = dir.parent() {
            if parent != dir {
                return open_index(parent, true);
            }
        }
    }

    Err(GeodexError::NotAWorkingTree(dir))
}

/// Initialize a new working tree at `directory` and return the created
/// `.ddb` path.
///
/// Unless `from_scratch` is set, the schema is copied from a template
/// database keyed by the crate revision (created on first use), skipping
/// table generation on every init. Both paths produce identical schemas.
pub fn init_index(directory: &Path, from_scratch: bool, profile: &Profile) -> Result<PathBuf> {
    if !directory.exists() {
        return Err(GeodexError::Filesystem(format!(
            "invalid directory: {} (does not exist)",
            directory.display()
        )));
    }

    let ddb_dir = directory.join(DDB_FOLDER);
    if ddb_dir.exists() {
        return Err(GeodexError::Filesystem(format!(
            "cannot initialize index: {} already exists",
            ddb_dir.display()
        )));
    }
    std::fs::create_dir(&ddb_dir)?;
    tracing::debug!("{} created", ddb_dir.display());

    let dbase_path = ddb_dir.join(DBASE_NAME);
    let mut built = false;

    if !from_scratch {
        match template_database(profile) {
            Ok(template) => {
                std::fs::copy(&template, &dbase_path)?;
                tracing::debug!(
                    "copied {} to {}",
                    template.display(),
                    dbase_path.display()
                );
                built = true;
            }
            Err(e) => {
                tracing::warn!("template database unavailable ({e}), building from scratch");
            }
        }
    }

    if !built {
        tracing::debug!("creating {}", dbase_path.display());
        let db = Database::open_file(&dbase_path)?;
        db.create_tables()?;
    }

    let db = open_index(directory, false)?;
    db.set_last_update()?;

    Ok(ddb_dir)
}

/// The pre-built empty database for this crate revision, created on first
/// use under the profile's templates directory.
fn template_database(profile: &Profile) -> Result<PathBuf> {
    let templates = Profile::ensure_dir(profile.templates_dir())?;
    let template = templates.join(format!("empty-dbase-{}.sqlite", env!("CARGO_PKG_VERSION")));

    if !template.exists() {
        tracing::debug!("creating template {}", template.display());
        let db = Database::open_file(&template)?;
        db.create_tables()?;
    }
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_profile(dir: &Path) -> Profile {
        Profile::rooted(dir.join("profile"))
    }

    #[test]
    fn init_creates_marker_and_database() {
        let dir = tempfile::tempdir().unwrap();
        let ddb = init_index(dir.path(), true, &test_profile(dir.path())).unwrap();
        assert_eq!(ddb, dir.path().join(DDB_FOLDER));
        assert!(ddb.join(DBASE_NAME).exists());

        let db = open_index(dir.path(), false).unwrap();
        assert!(db.last_update().unwrap().is_some());
    }

    #[test]
    fn init_rejects_existing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let profile = test_profile(dir.path());
        init_index(dir.path(), true, &profile).unwrap();
        assert!(init_index(dir.path(), true, &profile).is_err());
    }

    #[test]
    fn template_and_scratch_schemas_match() {
        let dir = tempfile::tempdir().unwrap();
        let profile = test_profile(dir.path());

        let scratch_root = dir.path().join("scratch");
        let template_root = dir.path().join("templated");
        std::fs::create_dir_all(&scratch_root).unwrap();
        std::fs::create_dir_all(&template_root).unwrap();

        init_index(&scratch_root, true, &profile).unwrap();
        init_index(&template_root, false, &profile).unwrap();

        let schema = |root: &Path| -> Vec<String> {
            let db = open_index(root, false).unwrap();
            let mut stmt = db
                .conn()
                .prepare(
                    "SELECT name, sql FROM sqlite_master WHERE type IN ('table', 'index')
                     AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .unwrap();
            let rows = stmt
                .query_map([], |r| {
                    Ok(format!(
                        "{}: {}",
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?.unwrap_or_default()
                    ))
                })
                .unwrap();
            rows.map(|r| r.unwrap()).collect()
        };

        assert_eq!(schema(&scratch_root), schema(&template_root));
    }

    #[test]
    fn traverse_up_finds_the_root() {
        let dir = tempfile::tempdir().unwrap();
        init_index(dir.path(), true, &test_profile(dir.path())).unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert!(open_index(&nested, false).is_err());
        let db = open_index(&nested, true).unwrap();
        assert_eq!(
            paths::absolute(&db.root_directory()).unwrap(),
            paths::absolute(dir.path()).unwrap()
        );
    }

    #[test]
    fn missing_marker_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            open_index(dir.path(), false),
            Err(GeodexError::NotAWorkingTree(_))
        ));
    }
}
