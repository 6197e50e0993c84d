//! Vector dataset extraction
//!
//! GeoJSON is parsed in full: feature count, geometry-type histogram and
//! the combined bounds of every coordinate. GeoJSON coordinates are
//! geographic by definition, so no reprojection applies. Other vector
//! containers classify as `Vector` but carry no metadata - decoding them
//! is out of scope for the in-tree readers.

use crate::extract::Extracted;
use crate::geo::Polygon;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

// Parsing loads the document; anything bigger is left unparsed rather
// than ballooning memory.
const MAX_GEOJSON_SIZE: u64 = 32 * 1024 * 1024;

pub fn extract(path: &Path) -> Extracted {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext != "geojson" {
        return Extracted::default();
    }
    geojson_extract(path).unwrap_or_default()
}

fn geojson_extract(path: &Path) -> Option<Extracted> {
    let size = std::fs::metadata(path).ok()?.len();
    if size > MAX_GEOJSON_SIZE {
        tracing::warn!("skipping oversized geojson ({} bytes): {}", size, path.display());
        return None;
    }

    let raw = std::fs::read(path).ok()?;
    let document: Value = serde_json::from_slice(&raw).ok()?;

    let mut stats = GeometryStats::default();
    match document.get("type").and_then(Value::as_str)? {
        "FeatureCollection" => {
            for feature in document.get("features")?.as_array()? {
                stats.add_feature(feature);
            }
        }
        "Feature" => stats.add_feature(&document),
        _ => stats.add_geometry(&document),
    }

    let mut meta = Map::new();
    meta.insert("featureCount".into(), stats.feature_count.into());
    meta.insert(
        "geometryTypes".into(),
        json!(stats.histogram),
    );

    let polygon_geom = stats
        .bounds
        .map(|[min_x, min_y, max_x, max_y]| Polygon::from_bounds(min_x, min_y, max_x, max_y))
        .filter(Polygon::is_geographic);
    let point_geom = polygon_geom.as_ref().and_then(Polygon::centroid);

    Some(Extracted {
        meta: Some(Value::Object(meta)),
        point_geom,
        polygon_geom,
    })
}

#[derive(Default)]
struct GeometryStats {
    feature_count: u64,
    histogram: BTreeMap<String, u64>,
    bounds: Option<[f64; 4]>,
}

impl GeometryStats {
    fn add_feature(&mut self, feature: &Value) {
        self.feature_count += 1;
        if let Some(geometry) = feature.get("geometry") {
            self.add_geometry(geometry);
        }
    }

    fn add_geometry(&mut self, geometry: &Value) {
        let Some(geometry_type) = geometry.get("type").and_then(Value::as_str) else {
            return;
        };

        if geometry_type == "GeometryCollection" {
            if let Some(members) = geometry.get("geometries").and_then(Value::as_array) {
                for member in members {
                    self.add_geometry(member);
                }
            }
            return;
        }

        *self.histogram.entry(geometry_type.to_string()).or_insert(0) += 1;
        if let Some(coordinates) = geometry.get("coordinates") {
            self.visit_positions(coordinates);
        }
    }

    /// Coordinates nest arbitrarily; a position is the innermost array of
    /// numbers.
    fn visit_positions(&mut self, node: &Value) {
        let Some(items) = node.as_array() else {
            return;
        };
        if let (Some(x), Some(y)) = (
            items.first().and_then(Value::as_f64),
            items.get(1).and_then(Value::as_f64),
        ) {
            self.grow(x, y);
            return;
        }
        for item in items {
            self.visit_positions(item);
        }
    }

    fn grow(&mut self, x: f64, y: f64) {
        let bounds = self.bounds.get_or_insert([x, y, x, y]);
        bounds[0] = bounds[0].min(x);
        bounds[1] = bounds[1].min(y);
        bounds[2] = bounds[2].max(x);
        bounds[3] = bounds[3].max(y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Point;

    fn write_geojson(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("data.geojson");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn feature_collection_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_geojson(
            dir.path(),
            r#"{
                "type": "FeatureCollection",
                "features": [
                    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [9.0, 45.0]}},
                    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [9.5, 45.5]}},
                    {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[9.2, 45.2], [9.4, 45.1]]}}
                ]
            }"#,
        );

        let extracted = extract(&path);
        let meta = extracted.meta.unwrap();
        assert_eq!(meta["featureCount"], 3);
        assert_eq!(meta["geometryTypes"]["Point"], 2);
        assert_eq!(meta["geometryTypes"]["LineString"], 1);

        let polygon = extracted.polygon_geom.unwrap();
        assert_eq!(polygon.ring[0], Point::new(9.0, 45.0));
        assert_eq!(polygon.ring[2], Point::new(9.5, 45.5));
        let centroid = extracted.point_geom.unwrap();
        assert!((centroid.x - 9.25).abs() < 1e-9);
    }

    #[test]
    fn bare_geometry_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_geojson(
            dir.path(),
            r#"{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#,
        );
        let extracted = extract(&path);
        let meta = extracted.meta.unwrap();
        assert_eq!(meta["featureCount"], 0);
        assert_eq!(meta["geometryTypes"]["Polygon"], 1);
        assert!(extracted.polygon_geom.is_some());
    }

    #[test]
    fn malformed_json_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_geojson(dir.path(), "{not json");
        let extracted = extract(&path);
        assert!(extracted.meta.is_none());
        assert!(extracted.polygon_geom.is_none());
    }

    #[test]
    fn undecodable_container_has_no_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parcels.shp");
        std::fs::write(&path, b"\x00\x00\x27\x0a").unwrap();
        let extracted = extract(&path);
        assert!(extracted.meta.is_none());
    }
}
