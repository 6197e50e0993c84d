//! Tile pyramid cache
//!
//! XYZ/TMS tiles cut from georeferenced rasters, cached user-wide under
//! `<cache>/tiles/<key>/<z>/<x>/<y>.png` where the key folds the content
//! hash with the tile size and addressing scheme. Tile pixels are sampled
//! nearest-neighbor by projecting each Web-Mercator tile cell through
//! EPSG:4326 into the raster's own reference and inverse geotransform.

use crate::build::{cache_key, MAX_SOURCE_SIZE};
use crate::error::{GeodexError, Result};
use crate::extract::geotiff;
use crate::hash;
use crate::profile::Profile;
use std::path::{Path, PathBuf};

// Half the extent of the Web-Mercator world in meters.
const ORIGIN_SHIFT: f64 = 20_037_508.342_789_244;

const MAX_ZOOM: i32 = 24;

/// Return the cached tile path for a georeferenced raster, producing it
/// on miss (or always, with `force_recreate`). `tms` flips the y index.
#[allow(clippy::too_many_arguments)]
pub fn get_tile(
    profile: &Profile,
    geotiff_path: &Path,
    z: i32,
    x: i32,
    y: i32,
    tile_size: u32,
    tms: bool,
    force_recreate: bool,
) -> Result<PathBuf> {
    if !(0..=MAX_ZOOM).contains(&z) {
        return Err(GeodexError::InvalidArgument(format!(
            "zoom level out of range: {z}"
        )));
    }
    if !(1..=4096).contains(&tile_size) {
        return Err(GeodexError::InvalidArgument(format!(
            "invalid tile size: {tile_size}"
        )));
    }
    let tiles_per_edge = 1i64 << z;
    if !(0..tiles_per_edge).contains(&i64::from(x)) || !(0..tiles_per_edge).contains(&i64::from(y))
    {
        return Err(GeodexError::InvalidArgument(format!(
            "tile ({x}, {y}) out of range at zoom {z}"
        )));
    }

    let georef = geotiff::read_georef(geotiff_path).ok_or_else(|| {
        GeodexError::Parse(format!(
            "not a georeferenced raster: {}",
            geotiff_path.display()
        ))
    })?;
    let srs = georef.srs();
    if srs.from_wgs84(0.0, 0.0).is_none() {
        return Err(GeodexError::Parse(format!(
            "unsupported spatial reference {} in {}",
            srs.name(),
            geotiff_path.display()
        )));
    }

    let source_size = std::fs::metadata(geotiff_path)?.len();
    if source_size > MAX_SOURCE_SIZE {
        return Err(GeodexError::Parse(format!(
            "source too large for tiling ({source_size} bytes): {}",
            geotiff_path.display()
        )));
    }

    let content_hash = hash::file_sha256(geotiff_path)?;
    let key = cache_key(&content_hash, &format!("{tile_size}:{tms}"));
    let tile_dir = Profile::ensure_dir(
        profile
            .tiles_dir()
            .join(key)
            .join(z.to_string())
            .join(x.to_string()),
    )?;
    let output = tile_dir.join(format!("{y}.png"));

    if output.exists() && !force_recreate {
        tracing::debug!("tile cache hit: {}", output.display());
        return Ok(output);
    }

    // TMS counts rows from the south; XYZ from the north.
    let y_xyz = if tms { tiles_per_edge - 1 - i64::from(y) } else { i64::from(y) };

    let raster = image::open(geotiff_path)
        .map_err(|e| GeodexError::Parse(format!("cannot decode {}: {e}", geotiff_path.display())))?
        .to_rgba8();

    // The decoder and the georeferencing must agree on the grid before
    // pixel coordinates mean anything.
    let (decoded_w, decoded_h) = raster.dimensions();
    let col_scale = f64::from(decoded_w) / f64::from(georef.width);
    let row_scale = f64::from(decoded_h) / f64::from(georef.height);

    let span = 2.0 * ORIGIN_SHIFT / tiles_per_edge as f64;
    let tile_min_x = -ORIGIN_SHIFT + f64::from(x) * span;
    let tile_max_y = ORIGIN_SHIFT - y_xyz as f64 * span;

    let mut tile = image::RgbaImage::new(tile_size, tile_size);
    for py in 0..tile_size {
        for px in 0..tile_size {
            let mx = tile_min_x + (f64::from(px) + 0.5) / f64::from(tile_size) * span;
            let my = tile_max_y - (f64::from(py) + 0.5) / f64::from(tile_size) * span;
            let (lon, lat) = mercator_to_lonlat(mx, my);

            let Some((nx, ny)) = srs.from_wgs84(lon, lat) else {
                continue;
            };
            let Some((col, row)) = georef.native_to_pixel(nx, ny) else {
                continue;
            };

            let col = (col * col_scale).floor();
            let row = (row * row_scale).floor();
            if col >= 0.0 && row >= 0.0 && col < f64::from(decoded_w) && row < f64::from(decoded_h)
            {
                tile.put_pixel(px, py, *raster.get_pixel(col as u32, row as u32));
            }
        }
    }

    tile.save_with_format(&output, image::ImageFormat::Png)
        .map_err(|e| GeodexError::Parse(format!("cannot encode tile: {e}")))?;

    tracing::debug!("generated tile {}", output.display());
    Ok(output)
}

/// Web-Mercator meters to (longitude, latitude).
fn mercator_to_lonlat(mx: f64, my: f64) -> (f64, f64) {
    let lon = mx / ORIGIN_SHIFT * 180.0;
    let lat = (my / ORIGIN_SHIFT * std::f64::consts::PI).sinh().atan().to_degrees();
    (lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mercator_inverse_known_points() {
        let (lon, lat) = mercator_to_lonlat(0.0, 0.0);
        assert!(lon.abs() < 1e-9 && lat.abs() < 1e-9);

        let (lon, _) = mercator_to_lonlat(ORIGIN_SHIFT, 0.0);
        assert!((lon - 180.0).abs() < 1e-9);

        // top of the web-mercator world
        let (_, lat) = mercator_to_lonlat(0.0, ORIGIN_SHIFT);
        assert!((lat - 85.051_128).abs() < 1e-3);
    }

    #[test]
    fn parameter_validation() {
        let dir = tempfile::tempdir().unwrap();
        let profile = Profile::rooted(dir.path().join("cache"));
        let raster = dir.path().join("r.tif");
        std::fs::write(&raster, b"irrelevant").unwrap();

        assert!(matches!(
            get_tile(&profile, &raster, -1, 0, 0, 256, false, false),
            Err(GeodexError::InvalidArgument(_))
        ));
        assert!(matches!(
            get_tile(&profile, &raster, 2, 4, 0, 256, false, false),
            Err(GeodexError::InvalidArgument(_))
        ));
        assert!(matches!(
            get_tile(&profile, &raster, 2, 0, 0, 0, false, false),
            Err(GeodexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn ungeoreferenced_raster_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let profile = Profile::rooted(dir.path().join("cache"));
        let plain = dir.path().join("plain.tif");
        image::RgbImage::new(8, 8).save(&plain).unwrap();

        assert!(matches!(
            get_tile(&profile, &plain, 0, 0, 0, 256, false, false),
            Err(GeodexError::Parse(_))
        ));
    }
}
