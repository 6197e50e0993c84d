//! Add, remove, sync, move and query operations over the entry store.
//!
//! Every mutating operation runs inside a single exclusive transaction;
//! a callback returning `false` drops the transaction without committing
//! and the operation exits cleanly. Build artifacts keyed by a retired
//! hash are invalidated inside the same operation.

use crate::entry::parser::parse_entry;
use crate::entry::{Entry, EntryType};
use crate::error::{GeodexError, Result};
use crate::hash;
use crate::paths;
use crate::storage::database::{entry_from_row, now_epoch};
use crate::storage::{Database, DDB_FOLDER};
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const ENTRY_COLUMNS: &str = "path, hash, type, meta, mtime, size, depth, point_geom, polygon_geom";

const INSERT_QUERY: &str = "INSERT INTO entries (path, hash, type, meta, mtime, size, depth, \
                            point_geom, polygon_geom) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const UPDATE_QUERY: &str = "UPDATE entries SET hash = ?1, type = ?2, meta = ?3, mtime = ?4, \
                            size = ?5, depth = ?6, point_geom = ?7, polygon_geom = ?8 WHERE path = ?9";

/// Outcome of comparing a stored entry against the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    NotModified,
    Modified,
    Deleted,
}

/// Compare a stored entry against the file on disk.
///
/// The check is mtime-first: matching mtimes skip hashing entirely, which
/// means content rewritten without touching mtime goes undetected. That is
/// a deliberate cost trade-off. A differing mtime triggers a hash
/// comparison, and an identical hash still reports `NotModified`.
pub fn check_update(path: &Path, db_mtime: i64, db_hash: &str) -> Result<FileStatus> {
    if !path.exists() {
        return Ok(FileStatus::Deleted);
    }
    if path.is_dir() {
        return Ok(FileStatus::NotModified);
    }

    let mtime = paths::modified_time(path)?;
    if mtime != db_mtime {
        tracing::debug!(
            "{} modified time ({}) differs from file value: {}",
            path.display(),
            db_mtime,
            mtime
        );
        let file_hash = hash::file_sha256(path)?;
        if file_hash != db_hash {
            tracing::debug!(
                "{} hash differs (old: {} | new: {})",
                path.display(),
                db_hash,
                file_hash
            );
            return Ok(FileStatus::Modified);
        }
    }
    Ok(FileStatus::NotModified)
}

/// Expand input paths into the list to index: files in depth-first walk
/// order, then every ancestor directory up to (but excluding) the root,
/// appended in sorted order. `.ddb` subtrees are pruned and every input
/// must be contained in the root.
fn get_index_path_list<P: AsRef<Path>>(
    root: &Path,
    input_paths: &[P],
    include_dirs: bool,
) -> Result<Vec<PathBuf>> {
    let root = paths::absolute(root)?;

    for p in input_paths {
        if p.as_ref().as_os_str().is_empty() {
            return Err(GeodexError::Filesystem("some paths are empty".to_string()));
        }
        if !paths::is_parent_of(&root, p.as_ref())? {
            return Err(GeodexError::Filesystem(format!(
                "some paths are not contained within: {}. Did you run init?",
                root.display()
            )));
        }
    }

    let mut result = Vec::new();
    let mut directories = BTreeSet::new();

    let mut collect_ancestors = |directories: &mut BTreeSet<PathBuf>, p: &Path| {
        let mut current = p.to_path_buf();
        while let Some(parent) = current.parent() {
            if parent == root.as_path() || !parent.starts_with(&root) {
                break;
            }
            directories.insert(parent.to_path_buf());
            current = parent.to_path_buf();
        }
    };

    for p in input_paths {
        let p = paths::absolute(p.as_ref())?;
        if p.file_name().map(|n| n == DDB_FOLDER).unwrap_or(false) {
            continue;
        }

        if p.is_dir() {
            let walker = WalkDir::new(&p).min_depth(1).sort_by_file_name();
            for item in walker.into_iter().filter_entry(|e| {
                e.file_name() != DDB_FOLDER && !crate::entry::parser::is_hidden_or_system(e.path())
            }) {
                let item = item.map_err(|e| GeodexError::Filesystem(e.to_string()))?;
                let rp = item.into_path();
                if rp.is_dir() {
                    if include_dirs {
                        directories.insert(rp.clone());
                    }
                } else {
                    result.push(rp.clone());
                }
                if include_dirs {
                    collect_ancestors(&mut directories, &rp);
                }
            }
            if p != root {
                directories.insert(p);
            }
        } else if p.exists() {
            if include_dirs {
                collect_ancestors(&mut directories, &p);
            }
            result.push(p);
        } else {
            return Err(GeodexError::Filesystem(format!(
                "path does not exist: {}",
                p.display()
            )));
        }
    }

    result.extend(directories);
    Ok(result)
}

/// Add paths to the index, upserting entries whose content changed.
///
/// The progress callback receives `(entry, was_update)` for every written
/// entry; returning `false` rolls the whole transaction back. Files whose
/// name component contains a backslash are skipped silently.
pub fn add_to_index<P: AsRef<Path>>(
    db: &mut Database,
    input_paths: &[P],
    mut callback: Option<&mut dyn FnMut(&Entry, bool) -> bool>,
) -> Result<()> {
    if input_paths.is_empty() {
        return Ok(());
    }

    let root = db.root_directory();
    let path_list = get_index_path_list(&root, input_paths, true)?;

    let tx = db
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Exclusive)?;
    let mut cancelled = false;

    {
        let mut lookup = tx.prepare("SELECT mtime, hash FROM entries WHERE path = ?1")?;
        let mut insert = tx.prepare(INSERT_QUERY)?;
        let mut update = tx.prepare(UPDATE_QUERY)?;

        for p in &path_list {
            if paths::name_has_backslash(p) {
                tracing::debug!("skipping '{}'", p.display());
                continue;
            }
            let rel_path = paths::to_relative(p, &root)?;

            let existing: Option<(i64, String)> = match lookup
                .query_row(params![rel_path], |row| Ok((row.get(0)?, row.get(1)?)))
            {
                Ok(row) => Some(row),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };

            let (is_add, old_hash) = match &existing {
                None => (true, String::new()),
                Some((db_mtime, db_hash)) => match check_update(p, *db_mtime, db_hash)? {
                    // A vanished file is sync's business, not add's.
                    FileStatus::Deleted | FileStatus::NotModified => continue,
                    FileStatus::Modified => (false, db_hash.clone()),
                },
            };

            let entry = match parse_entry(p, &root, true) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("skipping {}: {}", p.display(), e);
                    continue;
                }
            };

            let values = EntryParams::from_entry(&entry);
            if is_add {
                values.insert(&mut insert)?;
            } else {
                values.update(&mut update)?;
                if entry.hash != old_hash {
                    check_delete_build(&root, &old_hash)?;
                }
            }

            if let Some(cb) = callback.as_mut() {
                if !cb(&entry, !is_add) {
                    cancelled = true;
                    break;
                }
            }
        }
    }

    if cancelled {
        // Dropping the transaction rolls back everything written so far.
        return Ok(());
    }

    tx.commit()?;
    db.set_last_update()?;
    Ok(())
}

/// Owned column values of an entry, ready for binding. Insert binds the
/// path first; update moves it to the WHERE slot.
struct EntryParams {
    path: String,
    hash: String,
    type_tag: i64,
    meta: Option<String>,
    mtime: i64,
    size: i64,
    depth: i64,
    point_wkt: Option<String>,
    polygon_wkt: Option<String>,
}

impl EntryParams {
    fn from_entry(entry: &Entry) -> Self {
        Self {
            path: entry.path.clone(),
            hash: entry.hash.clone(),
            type_tag: entry.entry_type.tag(),
            meta: entry.meta.as_ref().map(|m| m.to_string()),
            mtime: entry.mtime,
            size: entry.size,
            depth: entry.depth,
            point_wkt: entry.point_geom.as_ref().map(|p| p.to_wkt()),
            polygon_wkt: entry.polygon_geom.as_ref().map(|p| p.to_wkt()),
        }
    }

    fn insert(&self, stmt: &mut rusqlite::Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.path,
            self.hash,
            self.type_tag,
            self.meta,
            self.mtime,
            self.size,
            self.depth,
            self.point_wkt,
            self.polygon_wkt,
        ])
    }

    fn update(&self, stmt: &mut rusqlite::Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.hash,
            self.type_tag,
            self.meta,
            self.mtime,
            self.size,
            self.depth,
            self.point_wkt,
            self.polygon_wkt,
            self.path,
        ])
    }
}

/// Remove entries matching the given paths or glob patterns.
///
/// Directory matches also remove their descendants. Fails when nothing
/// matched across all inputs. The callback receives each removed path;
/// returning `false` rolls the transaction back.
pub fn remove_from_index<P: AsRef<Path>>(
    db: &mut Database,
    input_paths: &[P],
    mut callback: Option<&mut dyn FnMut(&str) -> bool>,
) -> Result<()> {
    if input_paths.is_empty() {
        tracing::debug!("no paths provided");
        return Ok(());
    }

    let root = db.root_directory();
    let tx = db
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Exclusive)?;

    let mut total = 0;
    for p in input_paths {
        let rel_path = relative_or_raw(p.as_ref(), &root)?;
        tracing::debug!("deleting path: {}", rel_path);

        let matches = query_matching_entries(&tx, &rel_path, 0, false)?;
        for entry in matches {
            match delete_from_index(&tx, &root, &entry.path, false, &mut callback)? {
                Some(count) => total += count,
                None => return Ok(()), // cancelled, transaction dropped
            }
            if entry.is_directory() {
                match delete_from_index(&tx, &root, &entry.path, true, &mut callback)? {
                    Some(count) => total += count,
                    None => return Ok(()),
                }
            }
        }
    }

    if total == 0 {
        return Err(GeodexError::Filesystem("no matching entries".to_string()));
    }

    tx.commit()?;
    db.set_last_update()?;
    Ok(())
}

/// Sanitize a path or glob for SQL LIKE with `/` as the escape character:
/// `/` -> `//`, `%` -> `/%`, `_` -> `/_`, then glob `*` -> LIKE `%`.
pub fn sanitize_query_param(query: &str) -> String {
    query
        .replace('/', "//")
        .replace('%', "/%")
        .replace('_', "/_")
        .replace('*', "%")
}

/// Delete every entry matching the sanitized pattern, invalidating build
/// artifacts keyed by their hashes. `Ok(None)` signals a callback
/// cancellation; the caller must drop the transaction.
fn delete_from_index(
    conn: &Connection,
    root: &Path,
    query: &str,
    is_folder: bool,
    callback: &mut Option<&mut dyn FnMut(&str) -> bool>,
) -> Result<Option<usize>> {
    let mut pattern = sanitize_query_param(query);
    if is_folder {
        pattern.push_str("//%");
    }
    tracing::debug!("delete pattern: {}", pattern);

    let mut stmt =
        conn.prepare("SELECT path, hash FROM entries WHERE path LIKE ?1 ESCAPE '/'")?;
    let rows = stmt
        .query_map(params![pattern], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (path, entry_hash) in &rows {
        if let Some(cb) = callback.as_mut() {
            if !cb(path) {
                return Ok(None);
            }
        }
        check_delete_build(root, entry_hash)?;
    }

    if !rows.is_empty() {
        conn.execute(
            "DELETE FROM entries WHERE path LIKE ?1 ESCAPE '/'",
            params![pattern],
        )?;
    }
    Ok(Some(rows.len()))
}

/// Invalidate any build artifacts keyed by a hash that is about to be
/// retired.
fn check_delete_build(root: &Path, entry_hash: &str) -> Result<()> {
    crate::build::invalidate_build_artifacts(root, entry_hash)
}

/// Entries matching a sanitized LIKE pattern, optionally limited by depth
/// and extended to folder descendants.
pub fn get_matching_entries(
    db: &Database,
    path: &str,
    max_recursion_depth: i32,
    is_folder: bool,
) -> Result<Vec<Entry>> {
    query_matching_entries(db.conn(), path, max_recursion_depth, is_folder)
}

fn query_matching_entries(
    conn: &Connection,
    path: &str,
    max_recursion_depth: i32,
    is_folder: bool,
) -> Result<Vec<Entry>> {
    if max_recursion_depth < 0 {
        return Err(GeodexError::InvalidArgument(
            "max recursion depth cannot be negative".to_string(),
        ));
    }

    let mut pattern = sanitize_query_param(path);
    if pattern.is_empty() {
        pattern = "%".to_string();
    }
    if is_folder {
        pattern.push_str("//%");
    }
    tracing::debug!("match pattern: {}", pattern);

    let mut sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE path LIKE ?1 ESCAPE '/'"
    );
    if max_recursion_depth > 0 {
        sql.push_str(&format!(" AND depth <= {}", max_recursion_depth - 1));
    }
    sql.push_str(" ORDER BY path");

    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![pattern], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// All entries at `path` or below it.
pub fn list_entries(db: &Database, path: &str) -> Result<Vec<Entry>> {
    let descendants = format!("{}//%", sanitize_query_param(path));
    let mut stmt = db.conn().prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE path = ?1 OR path LIKE ?2 ESCAPE '/' ORDER BY path"
    ))?;
    let entries = stmt
        .query_map(params![path, descendants], entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

pub fn entry_exists(db: &Database, path: &str) -> Result<bool> {
    let count: i64 = db.conn().query_row(
        "SELECT COUNT(path) FROM entries WHERE path = ?1",
        params![path],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn get_entry(db: &Database, path: &str) -> Result<Option<Entry>> {
    query_entry(db.conn(), path)
}

fn query_entry(conn: &Connection, path: &str) -> Result<Option<Entry>> {
    let result = conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE path = ?1 LIMIT 1"),
        params![path],
        entry_from_row,
    );
    match result {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reconcile every stored entry against the filesystem.
///
/// Vanished files drop their row and build artifacts (`D\t<path>`),
/// modified files are re-parsed in place (`U\t<path>`). The last-edit
/// timestamp advances only when something changed.
pub fn sync_index(db: &mut Database, out: &mut dyn Write) -> Result<()> {
    let root = db.root_directory();
    let tx = db
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Exclusive)?;

    let rows = {
        let mut stmt = tx.prepare("SELECT path, mtime, hash FROM entries")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    let mut changed = false;
    {
        let mut delete = tx.prepare("DELETE FROM entries WHERE path = ?1")?;
        let mut update = tx.prepare(UPDATE_QUERY)?;

        for (rel_path, db_mtime, db_hash) in rows {
            let full_path = root.join(&rel_path);
            let status = match check_update(&full_path, db_mtime, &db_hash) {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!("skipping {}: {}", rel_path, e);
                    continue;
                }
            };

            match status {
                FileStatus::Deleted => {
                    delete.execute(params![rel_path])?;
                    check_delete_build(&root, &db_hash)?;
                    writeln!(out, "D\t{rel_path}")?;
                    changed = true;
                }
                FileStatus::Modified => {
                    let entry = match parse_entry(&full_path, &root, true) {
                        Ok(entry) => entry,
                        Err(e) => {
                            tracing::warn!("skipping {}: {}", rel_path, e);
                            continue;
                        }
                    };
                    EntryParams::from_entry(&entry).update(&mut update)?;
                    if entry.hash != db_hash {
                        check_delete_build(&root, &db_hash)?;
                    }
                    writeln!(out, "U\t{}", entry.path)?;
                    changed = true;
                }
                FileStatus::NotModified => {}
            }
        }
    }

    tx.commit()?;
    if changed {
        db.set_last_update()?;
    }
    Ok(())
}

/// Push stored mtimes back onto the filesystem. An empty whitelist means
/// every non-directory entry.
pub fn sync_local_mtimes(db: &Database, files: &[String]) -> Result<()> {
    let root = db.root_directory();

    let mut sql = format!(
        "SELECT path, mtime FROM entries WHERE type != {} AND type != {}",
        EntryType::Directory.tag(),
        EntryType::DroneDB.tag()
    );
    if !files.is_empty() {
        let placeholders = vec!["?"; files.len()].join(",");
        sql.push_str(&format!(" AND path IN ({placeholders})"));
    }

    let mut stmt = db.conn().prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(files.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (rel_path, mtime) in rows {
        let full_path = root.join(&rel_path);
        match paths::set_modified_time(&full_path, mtime) {
            Ok(()) => tracing::debug!("updated mtime for {}", full_path.display()),
            Err(e) => tracing::warn!("cannot set mtime for {}: {}", full_path.display(), e),
        }
    }
    Ok(())
}

/// Rewrite an entry's path, and for directories every descendant's path,
/// restoring folder consistency afterwards.
pub fn move_entry(db: &mut Database, source: &str, dest: &str) -> Result<()> {
    for endpoint in [source, dest] {
        if endpoint.is_empty() {
            return Err(GeodexError::InvalidArgument(
                "move endpoints cannot be empty".to_string(),
            ));
        }
        if endpoint.ends_with('/') || endpoint.ends_with('\\') {
            return Err(GeodexError::InvalidArgument(format!(
                "'{endpoint}' cannot end with a path separator"
            )));
        }
        if paths::has_dot_notation(endpoint) {
            return Err(GeodexError::InvalidArgument(format!(
                "'{endpoint}' cannot contain any dot notations"
            )));
        }
    }

    if source == dest {
        return Ok(());
    }

    let source_entry = get_entry(db, source)?
        .ok_or_else(|| GeodexError::InvalidArgument("source path not found".to_string()))?;
    let dest_entry = get_entry(db, dest)?;

    if let Some(dest_entry) = &dest_entry {
        if source_entry.is_directory() {
            if !dest_entry.is_directory() {
                return Err(GeodexError::InvalidArgument(
                    "cannot move a folder on a file".to_string(),
                ));
            }
            return Err(GeodexError::InvalidArgument(
                "cannot move a directory on another directory".to_string(),
            ));
        }
        if dest_entry.is_directory() {
            return Err(GeodexError::InvalidArgument(
                "cannot move a file on a directory".to_string(),
            ));
        }
    }

    let tx = db
        .conn_mut()
        .transaction_with_behavior(TransactionBehavior::Exclusive)?;

    if !source_entry.is_directory() {
        if dest_entry.is_some() {
            delete_entry(&tx, dest)?;
        }
        replace_path(&tx, source, dest)?;
    } else {
        let folder_paths = list_folder_paths(&tx, source)?;
        for path in folder_paths {
            let new_path = format!("{dest}{}", &path[source.len()..]);
            delete_entry(&tx, &new_path)?;
            replace_path(&tx, &path, &new_path)?;
        }
        create_missing_folders(&tx)?;
    }

    tx.commit()?;
    db.set_last_update()?;
    Ok(())
}

fn delete_entry(conn: &Connection, path: &str) -> Result<()> {
    conn.execute("DELETE FROM entries WHERE path = ?1", params![path])?;
    Ok(())
}

fn replace_path(conn: &Connection, source: &str, dest: &str) -> Result<()> {
    tracing::debug!("replacing '{}' with '{}'", source, dest);
    conn.execute(
        "UPDATE entries SET path = ?1, depth = ?2 WHERE path = ?3",
        params![dest, paths::depth(dest), source],
    )?;
    Ok(())
}

/// The paths of a folder entry and everything below it.
fn list_folder_paths(conn: &Connection, path: &str) -> Result<Vec<String>> {
    let descendants = format!("{}//%", sanitize_query_param(path));
    let mut stmt =
        conn.prepare("SELECT path FROM entries WHERE path = ?1 OR path LIKE ?2 ESCAPE '/'")?;
    let rows = stmt
        .query_map(params![path, descendants], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

/// Insert a synthetic directory entry for every missing ancestor, so that
/// each `/`-separated proper prefix of every path is represented.
pub fn create_missing_folders(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("SELECT path, type FROM entries")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let existing_folders: HashSet<&str> = rows
        .iter()
        .filter(|(_, tag)| *tag == EntryType::Directory.tag())
        .map(|(path, _)| path.as_str())
        .collect();

    let mut missing = BTreeSet::new();
    for (path, _) in &rows {
        let mut prefix = path.as_str();
        while let Some(idx) = prefix.rfind('/') {
            prefix = &prefix[..idx];
            if !existing_folders.contains(prefix) {
                missing.insert(prefix.to_string());
            }
        }
    }

    let now = now_epoch();
    for folder in missing {
        tracing::debug!("creating missing folder '{}'", folder);
        add_folder(conn, &folder, now)?;
    }
    Ok(())
}

fn add_folder(conn: &Connection, path: &str, mtime: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO entries (path, type, meta, mtime, size, depth) \
         VALUES (?1, ?2, NULL, ?3, 0, ?4)",
        params![path, EntryType::Directory.tag(), mtime, paths::depth(path)],
    )?;
    Ok(())
}

/// Inputs to remove/match may be filesystem paths or root-relative
/// patterns; anything not resolvable under the root is taken verbatim.
/// The root itself maps to the match-everything pattern.
fn relative_or_raw(input: &Path, root: &Path) -> Result<String> {
    match paths::to_relative(input, root) {
        Ok(rel) if rel == "." => Ok(String::new()),
        Ok(rel) => Ok(rel),
        Err(_) => Ok(input.to_string_lossy().replace('\\', "/")),
    }
}
