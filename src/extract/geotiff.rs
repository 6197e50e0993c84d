//! GeoTIFF georeferencing reader
//!
//! A classic-TIFF IFD walk that pulls out what the index needs: raster
//! size, band count, the geotransform (ModelPixelScale/ModelTiepoint or
//! ModelTransformation) and the EPSG code from the GeoKey directory.
//! Pixel data is left to the `image` crate; BigTIFF is not handled and
//! degrades like any other unreadable raster.

use crate::extract::Extracted;
use crate::geo::proj::Srs;
use crate::geo::{Point, Polygon};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;

const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
const KEY_USER_DEFINED: u16 = 32767;

/// Georeferencing of a raster. `transform` maps pixel (col, row) to native
/// coordinates: `x = t[0] + col*t[1] + row*t[2]`, `y = t[3] + col*t[4] + row*t[5]`.
#[derive(Debug, Clone)]
pub struct Georef {
    pub width: u32,
    pub height: u32,
    pub bands: u32,
    pub transform: [f64; 6],
    pub epsg: u32,
}

impl Georef {
    pub fn srs(&self) -> Srs {
        Srs::from_epsg(self.epsg)
    }

    pub fn pixel_to_native(&self, col: f64, row: f64) -> (f64, f64) {
        let t = &self.transform;
        (t[0] + col * t[1] + row * t[2], t[3] + col * t[4] + row * t[5])
    }

    /// Inverse of the geotransform: native coordinates to (col, row).
    /// `None` for a degenerate transform.
    pub fn native_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let t = &self.transform;
        let det = t[1] * t[5] - t[2] * t[4];
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - t[0];
        let dy = y - t[3];
        let col = (t[5] * dx - t[2] * dy) / det;
        let row = (-t[4] * dx + t[1] * dy) / det;
        Some((col, row))
    }

    /// The four corners in pixel space, clockwise from the origin.
    fn corners(&self) -> [(f64, f64); 4] {
        let (w, h) = (f64::from(self.width), f64::from(self.height));
        [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
    }
}

/// Extract raster metadata and geometries. `None` when the file carries no
/// valid geotransform or spatial reference, letting the caller degrade.
pub fn extract(path: &Path) -> Option<Extracted> {
    let georef = read_georef(path)?;
    let srs = georef.srs();

    let meta = json!({
        "width": georef.width,
        "height": georef.height,
        "bands": georef.bands,
        "srs": srs.name(),
        "pixelResX": georef.transform[1].abs(),
        "pixelResY": georef.transform[5].abs(),
    });

    // Corner reprojection only works for spatial references the geo module
    // understands; otherwise the metadata stands alone.
    let polygon_geom = georef
        .corners()
        .iter()
        .map(|&(col, row)| {
            let (x, y) = georef.pixel_to_native(col, row);
            srs.to_wgs84(x, y).map(|(lon, lat)| Point::new(lon, lat))
        })
        .collect::<Option<Vec<_>>>()
        .map(Polygon::from_ring)
        .filter(Polygon::is_geographic);
    let point_geom = polygon_geom.as_ref().and_then(Polygon::centroid);

    Some(Extracted {
        meta: Some(meta),
        point_geom,
        polygon_geom,
    })
}

/// Read the georeferencing of a TIFF. `None` on any structural problem:
/// not a TIFF, BigTIFF, missing transform, missing spatial reference.
pub fn read_georef(path: &Path) -> Option<Georef> {
    let mut file = File::open(path).ok()?;

    let mut header = [0u8; 8];
    file.read_exact(&mut header).ok()?;
    let big_endian = match &header[0..2] {
        b"II" => false,
        b"MM" => true,
        _ => return None,
    };
    let reader = TiffReader { big_endian };
    if reader.u16(&header[2..4]) != 42 {
        return None;
    }

    let ifd_offset = reader.u32(&header[4..8]) as u64;
    file.seek(SeekFrom::Start(ifd_offset)).ok()?;
    let mut count_buf = [0u8; 2];
    file.read_exact(&mut count_buf).ok()?;
    let entry_count = reader.u16(&count_buf) as usize;

    let mut entries = vec![0u8; entry_count * 12];
    file.read_exact(&mut entries).ok()?;

    let mut width = None;
    let mut height = None;
    let mut bands = 1u32;
    let mut pixel_scale: Option<Vec<f64>> = None;
    let mut tiepoint: Option<Vec<f64>> = None;
    let mut transformation: Option<Vec<f64>> = None;
    let mut geo_keys: Option<Vec<u16>> = None;

    for raw in entries.chunks_exact(12) {
        let tag = reader.u16(&raw[0..2]);
        match tag {
            TAG_IMAGE_WIDTH => width = reader.scalar(raw),
            TAG_IMAGE_LENGTH => height = reader.scalar(raw),
            TAG_SAMPLES_PER_PIXEL => bands = reader.scalar(raw).unwrap_or(1),
            TAG_MODEL_PIXEL_SCALE => pixel_scale = reader.doubles(&mut file, raw),
            TAG_MODEL_TIEPOINT => tiepoint = reader.doubles(&mut file, raw),
            TAG_MODEL_TRANSFORMATION => transformation = reader.doubles(&mut file, raw),
            TAG_GEO_KEY_DIRECTORY => geo_keys = reader.shorts(&mut file, raw),
            _ => {}
        }
    }

    let width = width.filter(|w| *w > 0)?;
    let height = height.filter(|h| *h > 0)?;
    let transform = geotransform(pixel_scale, tiepoint, transformation)?;
    let epsg = epsg_from_geo_keys(geo_keys.as_deref()?)?;

    Some(Georef {
        width,
        height,
        bands,
        transform,
        epsg,
    })
}

fn geotransform(
    pixel_scale: Option<Vec<f64>>,
    tiepoint: Option<Vec<f64>>,
    transformation: Option<Vec<f64>>,
) -> Option<[f64; 6]> {
    if let Some(m) = transformation {
        if m.len() >= 16 {
            let t = [m[3], m[0], m[1], m[7], m[4], m[5]];
            return valid_transform(t);
        }
    }

    let scale = pixel_scale?;
    let tie = tiepoint?;
    if scale.len() < 2 || tie.len() < 6 {
        return None;
    }
    let (sx, sy) = (scale[0], scale[1]);
    let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
    valid_transform([x - i * sx, sx, 0.0, y + j * sy, 0.0, -sy])
}

fn valid_transform(t: [f64; 6]) -> Option<[f64; 6]> {
    let det = t[1] * t[5] - t[2] * t[4];
    (det.abs() > f64::EPSILON && t.iter().all(|v| v.is_finite())).then_some(t)
}

/// The EPSG code from a GeoKey directory: ProjectedCSType when present,
/// GeographicType otherwise. User-defined codes are not a usable
/// reference. Point-cloud headers embed the same key directory in their
/// variable-length records.
pub(crate) fn epsg_from_geo_keys(keys: &[u16]) -> Option<u32> {
    if keys.len() < 4 {
        return None;
    }
    let number_of_keys = keys[3] as usize;
    let mut geographic = None;
    let mut projected = None;

    for entry in keys[4..].chunks_exact(4).take(number_of_keys) {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == KEY_USER_DEFINED || value == 0 {
            continue;
        }
        match key_id {
            KEY_GEOGRAPHIC_TYPE => geographic = Some(u32::from(value)),
            KEY_PROJECTED_CS_TYPE => projected = Some(u32::from(value)),
            _ => {}
        }
    }
    projected.or(geographic)
}

struct TiffReader {
    big_endian: bool,
}

impl TiffReader {
    fn u16(&self, bytes: &[u8]) -> u16 {
        let b: [u8; 2] = bytes[0..2].try_into().unwrap();
        if self.big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        }
    }

    fn u32(&self, bytes: &[u8]) -> u32 {
        let b: [u8; 4] = bytes[0..4].try_into().unwrap();
        if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        }
    }

    fn f64_at(&self, bytes: &[u8]) -> f64 {
        let b: [u8; 8] = bytes[0..8].try_into().unwrap();
        if self.big_endian {
            f64::from_be_bytes(b)
        } else {
            f64::from_le_bytes(b)
        }
    }

    /// A single SHORT or LONG value from an IFD entry.
    fn scalar(&self, raw: &[u8]) -> Option<u32> {
        match self.u16(&raw[2..4]) {
            3 => Some(u32::from(self.u16(&raw[8..10]))),
            4 => Some(self.u32(&raw[8..12])),
            _ => None,
        }
    }

    /// A DOUBLE array, always stored out of line.
    fn doubles(&self, file: &mut File, raw: &[u8]) -> Option<Vec<f64>> {
        if self.u16(&raw[2..4]) != 12 {
            return None;
        }
        let count = self.u32(&raw[4..8]) as usize;
        let payload = self.out_of_line(file, raw, count * 8)?;
        Some(payload.chunks_exact(8).map(|c| self.f64_at(c)).collect())
    }

    /// A SHORT array, inline when it fits in the value slot.
    fn shorts(&self, file: &mut File, raw: &[u8]) -> Option<Vec<u16>> {
        if self.u16(&raw[2..4]) != 3 {
            return None;
        }
        let count = self.u32(&raw[4..8]) as usize;
        let bytes = if count * 2 <= 4 {
            raw[8..8 + count * 2].to_vec()
        } else {
            self.out_of_line(file, raw, count * 2)?
        };
        Some(bytes.chunks_exact(2).map(|c| self.u16(c)).collect())
    }

    fn out_of_line(&self, file: &mut File, raw: &[u8], len: usize) -> Option<Vec<u8>> {
        let offset = self.u32(&raw[8..12]) as u64;
        file.seek(SeekFrom::Start(offset)).ok()?;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload).ok()?;
        Some(payload)
    }
}
