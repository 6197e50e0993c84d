//! Metadata extraction
//!
//! One extractor per entry family. Extractors are side-effect free, never
//! mutate the file and never propagate decoder errors past the entry they
//! describe: a failed decode degrades the type and the extraction result
//! instead of failing the parse.

pub mod exif;
pub mod geotiff;
pub mod pointcloud;
pub mod vector;

use crate::entry::classifier::{class_for, FileClass};
use crate::entry::EntryType;
use crate::geo::{Point, Polygon};
use serde_json::{json, Value};
use std::path::Path;

/// The output of an extractor: a metadata document and optional derived
/// geometries in EPSG:4326.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub meta: Option<Value>,
    pub point_geom: Option<Point>,
    pub polygon_geom: Option<Polygon>,
}

/// Classify a file by extension plus sniffing and extract its metadata in
/// a single pass.
pub fn extract_file(path: &Path) -> (EntryType, Extracted) {
    match class_for(path) {
        FileClass::ImageLike => extract_image_like(path),
        FileClass::RasterLike => extract_raster_like(path),
        FileClass::PointCloudLike => (EntryType::PointCloud, pointcloud::extract(path)),
        FileClass::VectorLike => (EntryType::Vector, vector::extract(path)),
        FileClass::Other => (EntryType::Generic, Extracted::default()),
    }
}

/// Image extensions escalate to `GeoImage` when EXIF GPS is present and
/// parseable; an image that cannot be decoded at all degrades to `Generic`.
fn extract_image_like(path: &Path) -> (EntryType, Extracted) {
    match exif::extract(path) {
        Some(extracted) if extracted.point_geom.is_some() => (EntryType::GeoImage, extracted),
        Some(extracted) => (EntryType::Image, extracted),
        None => match image_dimensions(path) {
            Some(meta) => (
                EntryType::Image,
                Extracted {
                    meta: Some(meta),
                    ..Default::default()
                },
            ),
            None => (EntryType::Generic, Extracted::default()),
        },
    }
}

/// Raster extensions escalate to `GeoRaster` when a geotransform and
/// spatial reference are found, then fall back through `GeoImage` and
/// `Image` before degrading to `Generic`.
fn extract_raster_like(path: &Path) -> (EntryType, Extracted) {
    if let Some(extracted) = geotiff::extract(path) {
        return (EntryType::GeoRaster, extracted);
    }
    extract_image_like(path)
}

/// Header-only image dimensions via the `image` crate.
fn image_dimensions(path: &Path) -> Option<Value> {
    let (width, height) = image::image_dimensions(path).ok()?;
    Some(json!({ "width": width, "height": height }))
}
