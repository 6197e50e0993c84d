//! Coordinate normalization to EPSG:4326
//!
//! Only what the index needs: identity for geographic systems and the
//! Transverse Mercator math for the UTM zones that captured rasters and
//! point clouds typically carry. Anything else leaves geometries unset.

// WGS84 ellipsoid
const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A spatial reference recognized by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Srs {
    /// EPSG:4326 / EPSG:4979
    Wgs84,
    /// EPSG:326xx (north) / EPSG:327xx (south)
    Utm { zone: u8, north: bool },
    /// Carried through to metadata but not projectable.
    Unknown(u32),
}

impl Srs {
    pub fn from_epsg(code: u32) -> Self {
        match code {
            4326 | 4979 => Srs::Wgs84,
            32601..=32660 => Srs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            },
            32701..=32760 => Srs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            },
            other => Srs::Unknown(other),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            Srs::Wgs84 => 4326,
            Srs::Utm { zone, north: true } => 32600 + u32::from(*zone),
            Srs::Utm { zone, north: false } => 32700 + u32::from(*zone),
            Srs::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> String {
        format!("EPSG:{}", self.epsg())
    }

    /// Project native coordinates to (longitude, latitude). `None` when the
    /// system is not supported.
    pub fn to_wgs84(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            Srs::Wgs84 => Some((x, y)),
            Srs::Utm { zone, north } => Some(utm_inverse(x, y, *zone, *north)),
            Srs::Unknown(_) => None,
        }
    }

    /// Project (longitude, latitude) into native coordinates.
    pub fn from_wgs84(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        match self {
            Srs::Wgs84 => Some((lon, lat)),
            Srs::Utm { zone, north } => Some(utm_forward(lon, lat, *zone, *north)),
            Srs::Unknown(_) => None,
        }
    }
}

fn central_meridian(zone: u8) -> f64 {
    (f64::from(zone) * 6.0 - 183.0).to_radians()
}

/// Transverse Mercator forward projection (Snyder's series).
fn utm_forward(lon: f64, lat: f64, zone: u8, north: bool) -> (f64, f64) {
    let e2 = F * (2.0 - F);
    let ep2 = e2 / (1.0 - e2);
    let phi = lat.to_radians();
    let lam = lon.to_radians();
    let lam0 = central_meridian(zone);

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let n = A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos_phi * cos_phi;
    let a_ = (lam - lam0) * cos_phi;
    let m = meridian_arc(phi, e2);

    let easting = K0
        * n
        * (a_
            + (1.0 - t + c) * a_.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a_.powi(5) / 120.0)
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * phi.tan()
            * (a_ * a_ / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a_.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a_.powi(6) / 720.0));
    if !north {
        northing += FALSE_NORTHING_SOUTH;
    }

    (easting, northing)
}

/// Transverse Mercator inverse projection. Returns (longitude, latitude).
fn utm_inverse(easting: f64, northing: f64, zone: u8, north: bool) -> (f64, f64) {
    let e2 = F * (2.0 - F);
    let ep2 = e2 / (1.0 - e2);
    let lam0 = central_meridian(zone);

    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };
    let m = y / K0;
    let mu = m / (A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = phi1.tan().powi(2);
    let n1 = A / (1.0 - e2 * sin_phi1 * sin_phi1).sqrt();
    let r1 = A * (1.0 - e2) / (1.0 - e2 * sin_phi1 * sin_phi1).powf(1.5);
    let d = (easting - FALSE_EASTING) / (n1 * K0);

    let phi = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * ep2
                    - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lam = lam0
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    (lam.to_degrees(), phi.to_degrees())
}

fn meridian_arc(phi: f64, e2: f64) -> f64 {
    A * ((1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e2 * e2 / 32.0 + 45.0 * e2.powi(3) / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e2 * e2 / 256.0 + 45.0 * e2.powi(3) / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e2.powi(3) / 3072.0) * (6.0 * phi).sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsg_parsing() {
        assert_eq!(Srs::from_epsg(4326), Srs::Wgs84);
        assert_eq!(
            Srs::from_epsg(32632),
            Srs::Utm {
                zone: 32,
                north: true
            }
        );
        assert_eq!(
            Srs::from_epsg(32733),
            Srs::Utm {
                zone: 33,
                north: false
            }
        );
        assert_eq!(Srs::from_epsg(3857), Srs::Unknown(3857));
        assert_eq!(Srs::from_epsg(32632).name(), "EPSG:32632");
    }

    #[test]
    fn utm_zone_origin() {
        // The central meridian of zone 32N at the equator maps to the
        // false easting.
        let srs = Srs::Utm {
            zone: 32,
            north: true,
        };
        let (e, n) = srs.from_wgs84(9.0, 0.0).unwrap();
        assert!((e - 500_000.0).abs() < 1e-3);
        assert!(n.abs() < 1e-3);
    }

    #[test]
    fn utm_round_trip() {
        let srs = Srs::Utm {
            zone: 33,
            north: true,
        };
        let (e, n) = srs.from_wgs84(13.404954, 52.520008).unwrap();
        let (lon, lat) = srs.to_wgs84(e, n).unwrap();
        assert!((lon - 13.404954).abs() < 1e-7);
        assert!((lat - 52.520008).abs() < 1e-7);
    }

    #[test]
    fn southern_hemisphere_round_trip() {
        let srs = Srs::Utm {
            zone: 34,
            north: false,
        };
        let (e, n) = srs.from_wgs84(18.423889, -33.925278).unwrap();
        assert!(n > 0.0);
        let (lon, lat) = srs.to_wgs84(e, n).unwrap();
        assert!((lon - 18.423889).abs() < 1e-7);
        assert!((lat + 33.925278).abs() < 1e-7);
    }

    #[test]
    fn unknown_srs_does_not_project() {
        assert!(Srs::Unknown(3857).to_wgs84(0.0, 0.0).is_none());
    }
}
