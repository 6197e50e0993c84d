//! Keyed entry metadata
//!
//! Arbitrary JSON metadata attached to an entry path (or to the working
//! tree root under the empty path), stored in the `entries_meta` companion
//! table. A key is list-valued iff it ends in `s`: list keys accumulate
//! records via `add`, singular keys hold exactly one record via `set`.

use crate::error::{GeodexError, Result};
use crate::hash;
use crate::index;
use crate::storage::database::now_epoch;
use crate::storage::Database;
use rusqlite::params;
use serde_json::{json, Map, Value};

pub struct MetaManager<'a> {
    db: &'a Database,
}

impl<'a> MetaManager<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// List-valued keys end in `s` (`annotations`, `tags`); everything
    /// else is singular.
    pub fn is_list(key: &str) -> bool {
        key.ends_with('s')
    }

    /// Append a record to a list key.
    pub fn add(&self, key: &str, data: &str, path: &str) -> Result<Value> {
        if !Self::is_list(key) {
            return Err(GeodexError::InvalidArgument(format!(
                "cannot add to non-list metadata key: {key}"
            )));
        }
        let path = self.entry_path(path)?;
        let record = self.insert(key, data, &path)?;
        self.db.set_last_update()?;
        Ok(record)
    }

    /// Replace the record of a singular key.
    pub fn set(&self, key: &str, data: &str, path: &str) -> Result<Value> {
        if Self::is_list(key) {
            return Err(GeodexError::InvalidArgument(format!(
                "cannot set list metadata key: {key} (use add)"
            )));
        }
        let path = self.entry_path(path)?;

        let tx = self.db.conn().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM entries_meta WHERE path = ?1 AND key = ?2",
            params![path, key],
        )?;
        let record = self.insert(key, data, &path)?;
        tx.commit()?;

        self.db.set_last_update()?;
        Ok(record)
    }

    /// The record of a singular key, or every record of a list key.
    pub fn get(&self, key: &str, path: &str) -> Result<Value> {
        let path = self.entry_path(path)?;

        let mut stmt = self.db.conn().prepare(
            "SELECT id, data, mtime FROM entries_meta WHERE path = ?1 AND key = ?2 ORDER BY mtime, id",
        )?;
        let records = stmt
            .query_map(params![path, key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if records.is_empty() {
            return Err(GeodexError::App(format!("metadata key not found: {key}")));
        }

        let to_json = |(id, data, mtime): &(String, String, i64)| -> Value {
            json!({
                "id": id,
                "data": parse_data(data),
                "mtime": mtime,
            })
        };

        if Self::is_list(key) {
            Ok(Value::Array(records.iter().map(to_json).collect()))
        } else {
            Ok(to_json(&records[0]))
        }
    }

    /// Remove a key (all of its records) from a path.
    pub fn unset(&self, key: &str, path: &str) -> Result<Value> {
        let path = self.entry_path(path)?;
        let removed = self.db.conn().execute(
            "DELETE FROM entries_meta WHERE path = ?1 AND key = ?2",
            params![path, key],
        )?;
        if removed > 0 {
            self.db.set_last_update()?;
        }
        Ok(json!({ "removed": removed }))
    }

    /// Remove a single list record by id.
    pub fn remove(&self, id: &str) -> Result<Value> {
        let removed = self
            .db
            .conn()
            .execute("DELETE FROM entries_meta WHERE id = ?1", params![id])?;
        if removed > 0 {
            self.db.set_last_update()?;
        }
        Ok(json!({ "removed": removed }))
    }

    /// Map of key to record count at a path.
    pub fn list(&self, path: &str) -> Result<Value> {
        let path = self.entry_path(path)?;
        let mut stmt = self.db.conn().prepare(
            "SELECT key, COUNT(*) FROM entries_meta WHERE path = ?1 GROUP BY key ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![path], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut keys = Map::new();
        for (key, count) in rows {
            keys.insert(key, count.into());
        }
        Ok(Value::Object(keys))
    }

    /// Metadata attaches to the working tree root (empty path) or to an
    /// existing entry.
    fn entry_path(&self, path: &str) -> Result<String> {
        let normalized = path.trim_end_matches('/');
        if normalized.is_empty() {
            return Ok(String::new());
        }
        if !index::entry_exists(self.db, normalized)? {
            return Err(GeodexError::InvalidArgument(format!(
                "path not indexed: {normalized}"
            )));
        }
        Ok(normalized.to_string())
    }

    fn insert(&self, key: &str, data: &str, path: &str) -> Result<Value> {
        let data = parse_data(data);
        let stored = data.to_string();
        let mtime = now_epoch();
        let id = record_id(path, key, &stored, mtime);

        self.db.conn().execute(
            "INSERT INTO entries_meta (id, path, key, data, mtime) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, path, key, stored, mtime],
        )?;

        Ok(json!({
            "id": id,
            "data": data,
            "mtime": mtime,
        }))
    }
}

/// Metadata is JSON; input that does not parse is stored as a JSON
/// string.
fn parse_data(data: &str) -> Value {
    serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()))
}

/// Record ids hash the record content plus a process-wide sequence, so
/// identical payloads written in the same second stay distinct.
fn record_id(path: &str, key: &str, data: &str, mtime: i64) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    hash::string_sha256(&format!("{path}:{key}:{data}:{mtime}:{seq}"))[..32].to_string()
}
