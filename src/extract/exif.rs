//! EXIF extraction for camera imagery
//!
//! Reads GPS position (degree-minute-second rationals with N/S/E/W
//! reference tags), altitude with its above/below sea-level reference,
//! camera make/model, capture time and the focal geometry needed for an
//! approximate ground footprint.

use crate::extract::Extracted;
use crate::geo::{Point, Polygon};
use exif::{In, Tag, Value};
use serde_json::{Map, Value as Json};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// Meters per degree of latitude, used for the small-offset footprint.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Extract EXIF metadata from an image. `None` when the container carries
/// no EXIF block at all; `Some` with `point_geom` unset when EXIF exists
/// but has no parseable GPS position.
pub fn extract(path: &Path) -> Option<Extracted> {
    let file = File::open(path).ok()?;
    let exif = exif::Reader::new()
        .read_from_container(&mut BufReader::new(file))
        .ok()?;

    let (width, height) = dimensions(&exif, path);

    let mut meta = Map::new();
    if let Some(w) = width {
        meta.insert("width".into(), w.into());
    }
    if let Some(h) = height {
        meta.insert("height".into(), h.into());
    }
    if let Some(make) = ascii(&exif, Tag::Make) {
        meta.insert("make".into(), make.into());
    }
    if let Some(model) = ascii(&exif, Tag::Model) {
        meta.insert("model".into(), model.into());
    }
    if let Some(orientation) = uint(&exif, Tag::Orientation) {
        meta.insert("orientation".into(), orientation.into());
    }
    if let Some(ts) = capture_time(&exif) {
        meta.insert("captureTime".into(), ts.into());
    }

    let focal = rational(&exif, Tag::FocalLength);
    if let Some(f) = focal {
        meta.insert("focalLength".into(), f.into());
    }
    let sensor_width = sensor_width_mm(&exif, width);
    if let Some(sw) = sensor_width {
        meta.insert("sensorWidth".into(), sw.into());
    }

    let point_geom = gps_point(&exif);
    let polygon_geom = point_geom.as_ref().and_then(|point| {
        footprint(
            point,
            focal,
            sensor_width,
            rational(&exif, Tag::GPSImgDirection),
            width,
            height,
        )
    });

    Some(Extracted {
        meta: Some(Json::Object(meta)),
        point_geom,
        polygon_geom,
    })
}

/// The GPS position as a signed decimal point, altitude included when the
/// altitude tags are present. `None` unless both angle and reference tags
/// parse.
fn gps_point(exif: &exif::Exif) -> Option<Point> {
    let lat = dms_to_decimal(
        rationals(exif, Tag::GPSLatitude)?,
        &ascii(exif, Tag::GPSLatitudeRef)?,
    )?;
    let lon = dms_to_decimal(
        rationals(exif, Tag::GPSLongitude)?,
        &ascii(exif, Tag::GPSLongitudeRef)?,
    )?;

    let point = match altitude(exif) {
        Some(alt) => Point::with_altitude(lon, lat, alt),
        None => Point::new(lon, lat),
    };
    point.is_geographic().then_some(point)
}

fn dms_to_decimal(dms: Vec<f64>, reference: &str) -> Option<f64> {
    if dms.len() != 3 {
        return None;
    }
    let decimal = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    match reference {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

/// GPSAltitude with GPSAltitudeRef: 0 above sea level, 1 below.
fn altitude(exif: &exif::Exif) -> Option<f64> {
    let alt = rational(exif, Tag::GPSAltitude)?;
    let below_sea_level = matches!(
        exif.get_field(Tag::GPSAltitudeRef, In::PRIMARY).map(|f| &f.value),
        Some(Value::Byte(v)) if v.first() == Some(&1)
    );
    Some(if below_sea_level { -alt } else { alt })
}

fn capture_time(exif: &exif::Exif) -> Option<i64> {
    let raw = ascii(exif, Tag::DateTimeOriginal).or_else(|| ascii(exif, Tag::DateTime))?;
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

fn dimensions(exif: &exif::Exif, path: &Path) -> (Option<u32>, Option<u32>) {
    let w = uint(exif, Tag::PixelXDimension);
    let h = uint(exif, Tag::PixelYDimension);
    if let (Some(w), Some(h)) = (w, h) {
        return (Some(w), Some(h));
    }
    match image::image_dimensions(path) {
        Ok((w, h)) => (Some(w), Some(h)),
        Err(_) => (w, h),
    }
}

/// Physical sensor width derived from the focal-plane resolution tags.
fn sensor_width_mm(exif: &exif::Exif, width: Option<u32>) -> Option<f64> {
    let width = f64::from(width?);
    let resolution = rational(exif, Tag::FocalPlaneXResolution)?;
    if resolution <= 0.0 {
        return None;
    }
    let unit_mm = match uint(exif, Tag::FocalPlaneResolutionUnit) {
        Some(3) => 10.0,         // centimeters
        Some(2) | None => 25.4,  // inches (default)
        _ => return None,
    };
    Some(width / resolution * unit_mm)
}

/// Approximate ground footprint: the rectangle covered from `altitude`
/// meters with the given focal geometry, rotated by the image direction
/// bearing and centered on the GPS point. Omitted unless every input is
/// present.
fn footprint(
    center: &Point,
    focal_mm: Option<f64>,
    sensor_width_mm: Option<f64>,
    direction_deg: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
) -> Option<Polygon> {
    let focal = focal_mm?;
    let sensor_w = sensor_width_mm?;
    let bearing = direction_deg?.to_radians();
    let altitude = center.z?;
    let (width, height) = (f64::from(width?), f64::from(height?));
    if focal <= 0.0 || altitude <= 0.0 || width <= 0.0 {
        return None;
    }

    let ground_w = altitude * sensor_w / focal;
    let ground_h = ground_w * height / width;

    let cos_lat = center.y.to_radians().cos().max(1e-12);
    let vertices = [
        (-ground_w / 2.0, -ground_h / 2.0),
        (ground_w / 2.0, -ground_h / 2.0),
        (ground_w / 2.0, ground_h / 2.0),
        (-ground_w / 2.0, ground_h / 2.0),
    ]
    .into_iter()
    .map(|(dx, dy)| {
        // Rotate the camera-frame offset by the bearing (clockwise from
        // north), then convert meters to degrees.
        let east = dx * bearing.cos() + dy * bearing.sin();
        let north = -dx * bearing.sin() + dy * bearing.cos();
        Point::new(
            center.x + east / (METERS_PER_DEGREE * cos_lat),
            center.y + north / METERS_PER_DEGREE,
        )
    })
    .collect();

    let polygon = Polygon::from_ring(vertices);
    polygon.is_geographic().then_some(polygon)
}

fn rationals(exif: &exif::Exif, tag: Tag) -> Option<Vec<f64>> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(v) if !v.is_empty() => Some(v.iter().map(|r| r.to_f64()).collect()),
        _ => None,
    }
}

fn rational(exif: &exif::Exif, tag: Tag) -> Option<f64> {
    rationals(exif, tag).and_then(|v| v.first().copied())
}

fn ascii(exif: &exif::Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(v) => v
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string()),
        _ => None,
    }
}

fn uint(exif: &exif::Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dms_conversion() {
        // 41° 53' 24.72" N
        let decimal = dms_to_decimal(vec![41.0, 53.0, 24.72], "N").unwrap();
        assert!((decimal - 41.8902).abs() < 1e-6);
        let negated = dms_to_decimal(vec![12.0, 29.0, 32.4], "W").unwrap();
        assert!((negated + 12.4923).abs() < 1e-4);
        assert!(dms_to_decimal(vec![1.0, 2.0], "N").is_none());
        assert!(dms_to_decimal(vec![1.0, 2.0, 3.0], "X").is_none());
    }

    #[test]
    fn footprint_requires_full_geometry() {
        let center = Point::with_altitude(12.0, 41.0, 100.0);
        assert!(footprint(&center, None, Some(13.2), Some(0.0), Some(4000), Some(3000)).is_none());

        let poly = footprint(
            &center,
            Some(8.8),
            Some(13.2),
            Some(0.0),
            Some(4000),
            Some(3000),
        )
        .unwrap();
        assert_eq!(poly.ring.len(), 5);
        // 100m up with a 13.2mm sensor behind an 8.8mm lens covers
        // 150m x 112.5m on the ground.
        let c = poly.centroid().unwrap();
        assert!((c.x - 12.0).abs() < 1e-9);
        assert!((c.y - 41.0).abs() < 1e-9);
    }

    #[test]
    fn plain_png_has_no_exif() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        image::RgbImage::new(4, 4).save(&path).unwrap();
        assert!(extract(&path).is_none());
    }
}
