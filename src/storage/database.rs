//! Database facade over the index store
//!
//! Wraps the rusqlite connection colocated with the working tree at
//! `.ddb/dbase.sqlite`: pragmas, schema creation and verification,
//! registered migrations and the manifest table holding the last-edit
//! timestamp and schema revision.

use crate::entry::{Entry, EntryType};
use crate::error::{GeodexError, Result};
use crate::geo::{Point, Polygon};
use crate::storage::{BUILD_FOLDER, DDB_FOLDER};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const CURRENT_SCHEMA_VERSION: i64 = 2;

// Version 1 shipped entries + manifest; version 2 added keyed entry
// metadata.
const MIGRATIONS: &[(i64, &str)] = &[(
    2,
    r#"
    CREATE TABLE IF NOT EXISTS entries_meta (
        id TEXT PRIMARY KEY,
        path TEXT NOT NULL DEFAULT '',
        key TEXT NOT NULL,
        data TEXT NOT NULL,
        mtime INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS ix_entries_meta_path_key ON entries_meta (path, key);
    "#,
)];

pub struct Database {
    conn: Connection,
    dbase_path: PathBuf,
}

impl Database {
    /// Open an existing index database, verifying the schema and running
    /// any pending migrations.
    pub fn open(dbase_path: &Path) -> Result<Self> {
        let mut db = Self::open_file(dbase_path)?;

        if !db.table_exists("entries")? {
            return Err(GeodexError::Schema(format!(
                "table 'entries' not found (not a valid database: {})",
                dbase_path.display()
            )));
        }
        db.ensure_schema_consistency()?;
        Ok(db)
    }

    /// Open or create the database file without schema verification. Used
    /// by init and template creation before the tables exist.
    pub(crate) fn open_file(dbase_path: &Path) -> Result<Self> {
        let conn = Connection::open(dbase_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Self {
            conn,
            dbase_path: dbase_path.to_path_buf(),
        })
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Build the full current schema. Both init paths (template copy and
    /// from-scratch) go through here, so they are identical by
    /// construction.
    pub(crate) fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL DEFAULT '',
                type INTEGER NOT NULL,
                meta TEXT,
                mtime INTEGER NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                depth INTEGER NOT NULL DEFAULT 0,
                point_geom GEOMETRY,
                polygon_geom GEOMETRY
            );
            CREATE TABLE IF NOT EXISTS manifest (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        for (_, sql) in MIGRATIONS {
            self.conn.execute_batch(sql)?;
        }
        self.manifest_set("schema_version", &CURRENT_SCHEMA_VERSION.to_string())?;
        tracing::debug!("created schema at {}", self.dbase_path.display());
        Ok(())
    }

    /// Bring a lagging schema up to the current revision.
    fn ensure_schema_consistency(&mut self) -> Result<()> {
        if !self.table_exists("manifest")? {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS manifest (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            )?;
        }
        let mut version = self.schema_version()?;
        if version > CURRENT_SCHEMA_VERSION {
            return Err(GeodexError::Schema(format!(
                "database schema revision {version} is newer than this build supports ({CURRENT_SCHEMA_VERSION})"
            )));
        }

        for (target, sql) in MIGRATIONS {
            if *target > version {
                tracing::info!("migrating index schema to revision {target}");
                self.conn.execute_batch(sql)?;
                self.manifest_set("schema_version", &target.to_string())?;
                version = *target;
            }
        }
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        Ok(self
            .manifest_get("schema_version")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(1))
    }

    fn manifest_get(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn.query_row(
            "SELECT value FROM manifest WHERE key = ?1",
            [key],
            |row| row.get(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn manifest_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO manifest (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Record the time of the last index mutation.
    pub fn set_last_update(&self) -> Result<()> {
        self.manifest_set("last_update", &now_epoch().to_string())
    }

    pub fn last_update(&self) -> Result<Option<i64>> {
        Ok(self
            .manifest_get("last_update")?
            .and_then(|v| v.parse().ok()))
    }

    /// The working root: the parent of the `.ddb` directory holding the
    /// database file.
    pub fn root_directory(&self) -> PathBuf {
        self.dbase_path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn ddb_directory(&self) -> PathBuf {
        self.dbase_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DDB_FOLDER))
    }

    pub fn build_directory(&self) -> PathBuf {
        self.ddb_directory().join(BUILD_FOLDER)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

pub(crate) fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Map a full entry row (path, hash, type, meta, mtime, size, depth,
/// point_geom, polygon_geom) back into an `Entry`.
pub(crate) fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let path: String = row.get(0)?;
    let hash: Option<String> = row.get(1)?;
    let type_tag: i64 = row.get(2)?;
    let meta: Option<String> = row.get(3)?;
    let mtime: i64 = row.get(4)?;
    let size: i64 = row.get(5)?;
    let depth: i64 = row.get(6)?;
    let point_wkt: Option<String> = row.get(7)?;
    let polygon_wkt: Option<String> = row.get(8)?;

    let entry_type = EntryType::try_from(type_tag).map_err(|e| conversion_error(2, e))?;
    let meta = meta
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| conversion_error(3, e))?;
    let point_geom = point_wkt
        .map(|wkt| Point::from_wkt(&wkt))
        .transpose()
        .map_err(|e| conversion_error(7, e))?;
    let polygon_geom = polygon_wkt
        .map(|wkt| Polygon::from_wkt(&wkt))
        .transpose()
        .map_err(|e| conversion_error(8, e))?;

    Ok(Entry {
        path,
        hash: hash.unwrap_or_default(),
        entry_type,
        meta,
        mtime,
        size,
        depth,
        point_geom,
        polygon_geom,
    })
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_db(dir: &Path) -> Database {
        let db = Database::open_file(&dir.join("dbase.sqlite")).unwrap();
        db.create_tables().unwrap();
        db
    }

    #[test]
    fn schema_is_current_after_create() {
        let dir = tempfile::tempdir().unwrap();
        let db = scratch_db(dir.path());
        assert!(db.table_exists("entries").unwrap());
        assert!(db.table_exists("manifest").unwrap());
        assert!(db.table_exists("entries_meta").unwrap());
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn opening_without_entries_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbase.sqlite");
        drop(Database::open_file(&path).unwrap());
        assert!(matches!(
            Database::open(&path),
            Err(GeodexError::Schema(_))
        ));
    }

    #[test]
    fn legacy_database_is_migrated_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbase.sqlite");
        {
            let db = Database::open_file(&path).unwrap();
            // simulate a revision-1 store: entries only, no entries_meta
            db.conn()
                .execute_batch(
                    "CREATE TABLE entries (
                        path TEXT PRIMARY KEY, hash TEXT NOT NULL DEFAULT '',
                        type INTEGER NOT NULL, meta TEXT, mtime INTEGER NOT NULL,
                        size INTEGER NOT NULL DEFAULT 0, depth INTEGER NOT NULL DEFAULT 0,
                        point_geom GEOMETRY, polygon_geom GEOMETRY
                    )",
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert!(db.table_exists("entries_meta").unwrap());
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn last_update_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = scratch_db(dir.path());
        assert_eq!(db.last_update().unwrap(), None);
        db.set_last_update().unwrap();
        assert!(db.last_update().unwrap().unwrap() > 0);
    }
}
