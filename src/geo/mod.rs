//! Geometry model - points and polygons in EPSG:4326
//!
//! All stored geometries are geographic (longitude, latitude, optional
//! altitude). The store facade binds the WKT produced here and hosts read
//! the GeoJSON emitted here.

pub mod proj;

use crate::error::{GeodexError, Result};
use serde_json::{json, Value};

/// A 2D or 3D point in EPSG:4326. `x` is longitude, `y` is latitude.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    pub fn with_altitude(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// True when the coordinates lie within geographic bounds.
    pub fn is_geographic(&self) -> bool {
        (-180.0..=180.0).contains(&self.x) && (-90.0..=90.0).contains(&self.y)
    }

    pub fn to_wkt(&self) -> String {
        match self.z {
            Some(z) => format!("POINT Z ({} {} {})", self.x, self.y, z),
            None => format!("POINT ({} {})", self.x, self.y),
        }
    }

    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Point",
            "coordinates": coordinates(self),
        })
    }

    /// Parse the WKT stored in a geometry column back into a point.
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let numbers = wkt_numbers(wkt, "POINT")?;
        match numbers.as_slice() {
            [x, y] => Ok(Point::new(*x, *y)),
            [x, y, z] => Ok(Point::with_altitude(*x, *y, *z)),
            _ => Err(GeodexError::Parse(format!("malformed point WKT: {wkt}"))),
        }
    }
}

/// A closed ring of points in EPSG:4326. The first vertex is repeated as
/// the last one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    pub ring: Vec<Point>,
}

impl Polygon {
    /// Build a closed ring from vertices; the closing vertex is appended
    /// when missing.
    pub fn from_ring(mut vertices: Vec<Point>) -> Self {
        if let (Some(first), Some(last)) = (vertices.first(), vertices.last()) {
            if first != last {
                let first = first.clone();
                vertices.push(first);
            }
        }
        Self { ring: vertices }
    }

    /// Axis-aligned ring from 2D bounds.
    pub fn from_bounds(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::from_ring(vec![
            Point::new(min_x, min_y),
            Point::new(max_x, min_y),
            Point::new(max_x, max_y),
            Point::new(min_x, max_y),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_geographic(&self) -> bool {
        self.ring.iter().all(Point::is_geographic)
    }

    /// Average of the distinct vertices.
    pub fn centroid(&self) -> Option<Point> {
        let open = self.ring.len().checked_sub(1)?;
        if open == 0 {
            return None;
        }
        let vertices = &self.ring[..open];
        let n = vertices.len() as f64;
        let x = vertices.iter().map(|p| p.x).sum::<f64>() / n;
        let y = vertices.iter().map(|p| p.y).sum::<f64>() / n;
        Some(Point::new(x, y))
    }

    pub fn to_wkt(&self) -> String {
        let has_z = self.ring.iter().any(|p| p.z.is_some());
        let vertices = self
            .ring
            .iter()
            .map(|p| {
                if has_z {
                    format!("{} {} {}", p.x, p.y, p.z.unwrap_or(0.0))
                } else {
                    format!("{} {}", p.x, p.y)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        if has_z {
            format!("POLYGON Z (({vertices}))")
        } else {
            format!("POLYGON (({vertices}))")
        }
    }

    pub fn to_geojson(&self) -> Value {
        let ring: Vec<Value> = self.ring.iter().map(coordinates).collect();
        json!({
            "type": "Polygon",
            "coordinates": [ring],
        })
    }

    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let numbers = wkt_numbers(wkt, "POLYGON")?;
        let has_z = wkt.trim_start()["POLYGON".len()..]
            .trim_start()
            .starts_with('Z');
        let stride = if has_z { 3 } else { 2 };
        if numbers.len() % stride != 0 {
            return Err(GeodexError::Parse(format!("malformed polygon WKT: {wkt}")));
        }
        let ring = numbers
            .chunks(stride)
            .map(|c| {
                if has_z {
                    Point::with_altitude(c[0], c[1], c[2])
                } else {
                    Point::new(c[0], c[1])
                }
            })
            .collect();
        Ok(Self { ring })
    }
}

fn coordinates(p: &Point) -> Value {
    match p.z {
        Some(z) => json!([p.x, p.y, z]),
        None => json!([p.x, p.y]),
    }
}

fn wkt_numbers(wkt: &str, expected: &str) -> Result<Vec<f64>> {
    let trimmed = wkt.trim();
    if !trimmed.starts_with(expected) {
        return Err(GeodexError::Parse(format!(
            "expected {expected} WKT, got: {wkt}"
        )));
    }
    trimmed[expected.len()..]
        .chars()
        .map(|c| {
            if c.is_ascii_digit() || c == '.' || c == '-' || c == '+' || c == 'e' || c == 'E' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| GeodexError::Parse(format!("bad WKT number: {token}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_wkt_round_trip() {
        let p = Point::with_altitude(12.4923, 41.8902, 87.5);
        assert_eq!(p.to_wkt(), "POINT Z (12.4923 41.8902 87.5)");
        assert_eq!(Point::from_wkt(&p.to_wkt()).unwrap(), p);

        let flat = Point::new(-122.084, 37.422);
        assert_eq!(Point::from_wkt(&flat.to_wkt()).unwrap(), flat);
    }

    #[test]
    fn polygon_closes_ring() {
        let poly = Polygon::from_bounds(-1.0, -2.0, 1.0, 2.0);
        assert_eq!(poly.ring.len(), 5);
        assert_eq!(poly.ring.first(), poly.ring.last());
    }

    #[test]
    fn polygon_wkt_round_trip() {
        let poly = Polygon::from_bounds(9.0, 45.0, 9.5, 45.5);
        let parsed = Polygon::from_wkt(&poly.to_wkt()).unwrap();
        assert_eq!(parsed, poly);
    }

    #[test]
    fn centroid_of_bounds() {
        let poly = Polygon::from_bounds(0.0, 0.0, 2.0, 2.0);
        let c = poly.centroid().unwrap();
        assert!((c.x - 1.0).abs() < 1e-9);
        assert!((c.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn geographic_bounds_check() {
        assert!(Point::new(180.0, -90.0).is_geographic());
        assert!(!Point::new(181.0, 0.0).is_geographic());
        assert!(!Point::new(0.0, 90.5).is_geographic());
    }
}
