//! Entry model - the unit of the index
//!
//! An entry describes one file or directory under the working root: its
//! forward-slash relative path, content hash, semantic type, extracted
//! metadata and derived geometries.

pub mod classifier;
pub mod parser;

use crate::error::{GeodexError, Result};
use crate::geo::{Point, Polygon};
use serde_json::{json, Value};

/// Semantic entry types. The integer tags are stable and stored in the
/// `type` column; the folder-consistency SQL relies on `Directory = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum EntryType {
    Undefined = 0,
    Directory = 1,
    Generic = 2,
    GeoImage = 3,
    GeoRaster = 4,
    PointCloud = 5,
    Image = 6,
    /// Root marker of a working tree; never produced by classifying
    /// ordinary files.
    DroneDB = 7,
    Vector = 8,
}

impl EntryType {
    pub fn tag(self) -> i64 {
        self as i64
    }

    pub fn human(self) -> &'static str {
        match self {
            EntryType::Undefined => "Undefined",
            EntryType::Directory => "Directory",
            EntryType::Generic => "Generic",
            EntryType::GeoImage => "GeoImage",
            EntryType::GeoRaster => "GeoRaster",
            EntryType::PointCloud => "PointCloud",
            EntryType::Image => "Image",
            EntryType::DroneDB => "DroneDB",
            EntryType::Vector => "Vector",
        }
    }
}

impl TryFrom<i64> for EntryType {
    type Error = GeodexError;

    fn try_from(tag: i64) -> Result<Self> {
        Ok(match tag {
            0 => EntryType::Undefined,
            1 => EntryType::Directory,
            2 => EntryType::Generic,
            3 => EntryType::GeoImage,
            4 => EntryType::GeoRaster,
            5 => EntryType::PointCloud,
            6 => EntryType::Image,
            7 => EntryType::DroneDB,
            8 => EntryType::Vector,
            other => {
                return Err(GeodexError::Schema(format!("unknown entry type tag: {other}")))
            }
        })
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.human())
    }
}

/// A single row of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Forward-slash relative path from the working root.
    pub path: String,
    /// Lowercase hex SHA-256 of the file bytes; empty for directories and
    /// the root marker.
    pub hash: String,
    pub entry_type: EntryType,
    /// Extracted metadata document; `None` for directories.
    pub meta: Option<Value>,
    /// Seconds since epoch.
    pub mtime: i64,
    /// Bytes; 0 for directories.
    pub size: i64,
    /// Count of `/` separators in `path`.
    pub depth: i64,
    pub point_geom: Option<Point>,
    pub polygon_geom: Option<Polygon>,
}

impl Entry {
    /// A synthetic directory entry.
    pub fn directory(path: String, mtime: i64) -> Self {
        let depth = crate::paths::depth(&path);
        Self {
            path,
            hash: String::new(),
            entry_type: EntryType::Directory,
            meta: None,
            mtime,
            size: 0,
            depth,
            point_geom: None,
            polygon_geom: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// Host-facing JSON with GeoJSON geometry members.
    pub fn to_json(&self) -> Value {
        json!({
            "path": self.path,
            "hash": self.hash,
            "type": self.entry_type.tag(),
            "typeHuman": self.entry_type.human(),
            "meta": self.meta.clone().unwrap_or(Value::Null),
            "mtime": self.mtime,
            "size": self.size,
            "depth": self.depth,
            "pointGeometry": self.point_geom.as_ref().map(Point::to_geojson).unwrap_or(Value::Null),
            "polygonGeometry": self.polygon_geom.as_ref().map(Polygon::to_geojson).unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_are_stable() {
        assert_eq!(EntryType::Directory.tag(), 1);
        assert_eq!(EntryType::Vector.tag(), 8);
        assert_eq!(EntryType::try_from(5).unwrap(), EntryType::PointCloud);
        assert!(EntryType::try_from(42).is_err());
    }

    #[test]
    fn directory_entries_are_bare() {
        let e = Entry::directory("a/b".to_string(), 1000);
        assert_eq!(e.depth, 1);
        assert_eq!(e.size, 0);
        assert!(e.hash.is_empty());
        assert!(e.meta.is_none());
        assert!(e.point_geom.is_none());
    }

    #[test]
    fn json_shape() {
        let e = Entry::directory("a".to_string(), 0);
        let v = e.to_json();
        assert_eq!(v["type"], 1);
        assert_eq!(v["typeHuman"], "Directory");
        assert_eq!(v["meta"], Value::Null);
    }
}
