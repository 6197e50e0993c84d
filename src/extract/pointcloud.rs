//! Point-cloud header extraction
//!
//! LAS and LAZ keep their header uncompressed, so extents, point count and
//! the CRS variable-length records are readable without touching point
//! data. PLY exposes only a vertex count in its ASCII header; computing
//! extents would mean reading every point, which extractors do not do.

use crate::extract::{geotiff, Extracted};
use crate::geo::proj::Srs;
use crate::geo::{Point, Polygon};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const LAS_SIGNATURE: &[u8; 4] = b"LASF";
const VLR_HEADER_SIZE: usize = 54;
const VLR_GEOTIFF_KEYS: u16 = 34735;
const VLR_OGC_WKT: u16 = 2112;

pub fn extract(path: &Path) -> Extracted {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let result = match ext.as_str() {
        "las" | "laz" => las_extract(path),
        "ply" => ply_extract(path),
        _ => None,
    };
    result.unwrap_or_default()
}

struct LasHeader {
    version: String,
    point_count: u64,
    bounds: [f64; 4], // min_x, min_y, max_x, max_y
    epsg: Option<u32>,
}

fn las_extract(path: &Path) -> Option<Extracted> {
    let header = read_las_header(path)?;

    let mut meta = Map::new();
    meta.insert("pointCount".into(), header.point_count.into());
    meta.insert("version".into(), header.version.clone().into());

    let srs = header.epsg.map(Srs::from_epsg);
    if let Some(srs) = &srs {
        meta.insert("srs".into(), srs.name().into());
    }

    // Axis-aligned bounding rectangle reprojected corner by corner.
    let polygon_geom = srs.and_then(|srs| {
        let [min_x, min_y, max_x, max_y] = header.bounds;
        [
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
        ]
        .iter()
        .map(|&(x, y)| srs.to_wgs84(x, y).map(|(lon, lat)| Point::new(lon, lat)))
        .collect::<Option<Vec<_>>>()
        .map(Polygon::from_ring)
        .filter(Polygon::is_geographic)
    });
    let point_geom = polygon_geom.as_ref().and_then(Polygon::centroid);

    Some(Extracted {
        meta: Some(Value::Object(meta)),
        point_geom,
        polygon_geom,
    })
}

fn read_las_header(path: &Path) -> Option<LasHeader> {
    let mut file = File::open(path).ok()?;
    let mut header = Vec::with_capacity(375);
    file.by_ref().take(375).read_to_end(&mut header).ok()?;
    let read = header.len();
    header.resize(375, 0);
    if read < 227 || header[0..4] != *LAS_SIGNATURE {
        return None;
    }

    let version = format!("{}.{}", header[24], header[25]);
    let header_size = u16::from_le_bytes(header[94..96].try_into().ok()?) as u64;
    let vlr_count = u32::from_le_bytes(header[100..104].try_into().ok()?);

    // Legacy 32-bit count; LAS 1.4 moves the authoritative count to the
    // extended field and may zero the legacy one.
    let mut point_count =
        u64::from(u32::from_le_bytes(header[107..111].try_into().ok()?));
    if point_count == 0 && read >= 255 && header[25] >= 4 {
        point_count = u64::from_le_bytes(header[247..255].try_into().ok()?);
    }

    let f64_at = |offset: usize| -> Option<f64> {
        Some(f64::from_le_bytes(header[offset..offset + 8].try_into().ok()?))
    };
    let max_x = f64_at(179)?;
    let min_x = f64_at(187)?;
    let max_y = f64_at(195)?;
    let min_y = f64_at(203)?;

    let epsg = read_crs_vlrs(&mut file, header_size, vlr_count);

    Some(LasHeader {
        version,
        point_count,
        bounds: [min_x, min_y, max_x, max_y],
        epsg,
    })
}

/// Scan the variable-length records for a CRS: OGC WKT (record 2112) or a
/// GeoTIFF key directory (record 34735).
fn read_crs_vlrs(file: &mut File, header_size: u64, vlr_count: u32) -> Option<u32> {
    file.seek(SeekFrom::Start(header_size)).ok()?;

    let mut epsg = None;
    for _ in 0..vlr_count.min(64) {
        let mut vlr = [0u8; VLR_HEADER_SIZE];
        file.read_exact(&mut vlr).ok()?;
        let record_id = u16::from_le_bytes(vlr[18..20].try_into().ok()?);
        let length = u16::from_le_bytes(vlr[20..22].try_into().ok()?) as usize;

        let mut payload = vec![0u8; length];
        file.read_exact(&mut payload).ok()?;

        match record_id {
            VLR_GEOTIFF_KEYS => {
                let keys: Vec<u16> = payload
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                epsg = geotiff::epsg_from_geo_keys(&keys).or(epsg);
            }
            VLR_OGC_WKT => {
                epsg = epsg_from_wkt(&String::from_utf8_lossy(&payload)).or(epsg);
            }
            _ => {}
        }
    }
    epsg
}

/// Last EPSG authority code mentioned in a CRS WKT string; the outermost
/// authority comes last in both WKT1 and WKT2.
fn epsg_from_wkt(wkt: &str) -> Option<u32> {
    let mut result = None;
    let mut rest = wkt;
    while let Some(at) = rest.find("EPSG") {
        let tail = &rest[at + 4..];
        let digits: String = tail
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        if let Ok(code) = digits.parse::<u32>() {
            result = Some(code);
        }
        rest = tail;
    }
    result
}

fn ply_extract(path: &Path) -> Option<Extracted> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);

    let mut lines = reader.lines();
    if lines.next()?.ok()?.trim() != "ply" {
        return None;
    }

    let mut vertex_count: Option<u64> = None;
    for line in lines.take(256) {
        let line = line.ok()?;
        let line = line.trim();
        if line == "end_header" {
            break;
        }
        if let Some(rest) = line.strip_prefix("element vertex ") {
            vertex_count = rest.trim().parse().ok();
        }
    }

    Some(Extracted {
        meta: Some(json!({ "pointCount": vertex_count? })),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_las(path: &Path, minor: u8, point_count: u32, bounds: [f64; 4]) {
        // header only, no VLRs
        let mut header = vec![0u8; 227];
        header[0..4].copy_from_slice(LAS_SIGNATURE);
        header[24] = 1;
        header[25] = minor;
        header[94..96].copy_from_slice(&227u16.to_le_bytes());
        header[107..111].copy_from_slice(&point_count.to_le_bytes());
        let [min_x, min_y, max_x, max_y] = bounds;
        header[179..187].copy_from_slice(&max_x.to_le_bytes());
        header[187..195].copy_from_slice(&min_x.to_le_bytes());
        header[195..203].copy_from_slice(&max_y.to_le_bytes());
        header[203..211].copy_from_slice(&min_y.to_le_bytes());
        std::fs::write(path, header).unwrap();
    }

    #[test]
    fn las_header_extents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.las");
        write_las(&path, 2, 12345, [9.0, 45.0, 9.1, 45.1]);

        let header = read_las_header(&path).unwrap();
        assert_eq!(header.version, "1.2");
        assert_eq!(header.point_count, 12345);
        assert_eq!(header.bounds, [9.0, 45.0, 9.1, 45.1]);
        assert_eq!(header.epsg, None);
    }

    #[test]
    fn truncated_las_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.las");
        std::fs::write(&path, b"LASF").unwrap();
        assert!(read_las_header(&path).is_none());
    }

    #[test]
    fn wkt_epsg_scan() {
        let wkt = r#"PROJCS["WGS 84 / UTM 32N",GEOGCS["WGS 84",AUTHORITY["EPSG","4326"]],AUTHORITY["EPSG","32632"]]"#;
        assert_eq!(epsg_from_wkt(wkt), Some(32632));
        assert_eq!(epsg_from_wkt("no authority here"), None);
    }

    #[test]
    fn ply_vertex_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.ply");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "ply").unwrap();
        writeln!(f, "format ascii 1.0").unwrap();
        writeln!(f, "element vertex 42").unwrap();
        writeln!(f, "property float x").unwrap();
        writeln!(f, "end_header").unwrap();
        drop(f);

        let extracted = ply_extract(&path).unwrap();
        assert_eq!(extracted.meta.unwrap()["pointCount"], 42);
        assert!(extracted.point_geom.is_none());
    }
}
