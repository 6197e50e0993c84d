//! Type classification
//!
//! Files are matched by case-folded extension against static tables, then
//! escalated by sniffing: image extensions become `GeoImage` when EXIF GPS
//! is present, raster extensions become `GeoRaster` when a geotransform and
//! spatial reference are found. Classification never errors; decode
//! failures degrade toward `Generic`.

use crate::entry::EntryType;
use std::path::Path;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];
// Raster containers other than TIFF (img, vrt) have no in-tree reader
// and fall through to Generic.
const RASTER_EXTENSIONS: [&str; 2] = ["tif", "tiff"];
const POINTCLOUD_EXTENSIONS: [&str; 3] = ["las", "laz", "ply"];
const VECTOR_EXTENSIONS: [&str; 7] = ["geojson", "shp", "gpkg", "kml", "kmz", "dxf", "fgb"];

/// Extension family of a file, before sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    ImageLike,
    RasterLike,
    PointCloudLike,
    VectorLike,
    Other,
}

pub fn class_for(path: &Path) -> FileClass {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileClass::ImageLike
    } else if RASTER_EXTENSIONS.contains(&ext.as_str()) {
        FileClass::RasterLike
    } else if POINTCLOUD_EXTENSIONS.contains(&ext.as_str()) {
        FileClass::PointCloudLike
    } else if VECTOR_EXTENSIONS.contains(&ext.as_str()) {
        FileClass::VectorLike
    } else {
        FileClass::Other
    }
}

/// Classify a filesystem path that exists into an entry type.
///
/// Directories classify directly; files go through extension match plus
/// sniff escalation. This runs the extractors and discards their output,
/// so callers that also need metadata should use the parser instead.
pub fn classify(path: &Path) -> EntryType {
    if path.is_dir() {
        return EntryType::Directory;
    }
    crate::extract::extract_file(path).0
}
