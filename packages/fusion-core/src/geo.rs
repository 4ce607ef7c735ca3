//! # geo
//!
//! Geodetic → planar projection around a fixed site, plus the small
//! geometric utilities the matching pipeline needs (bearing, angle
//! folding, bounding boxes, point-in-polygon).
//!
//! ## Coordinate conventions
//! - Geodetic input is WGS84 degrees, `(lat, lon)` order in signatures.
//! - Planar output is meters. UTM yields absolute zone coordinates;
//!   the equirectangular fallback yields site-relative coordinates.
//!   Scoring only ever consumes *differences*, so both frames are valid.
//! - Bearings are degrees clockwise from true north, in [0, 360).

use proj4rs::Proj;
use serde::Serialize;

use crate::FusionError;

/// GeoJSON-style polygon coordinates: rings of `[lon, lat]` positions.
/// Only the first (outer) ring is ever evaluated.
pub type PolygonCoords = Vec<Vec<Vec<f64>>>;

const WGS84_PROJ: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// Meters per degree of latitude (and of longitude at the equator).
const M_PER_DEG_LAT: f64 = 111_320.0;

// ── Projection method ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMethod {
    /// Transverse Mercator in the UTM zone derived from the site longitude.
    Utm { zone: u8, south: bool },
    /// Equirectangular approximation around the site (< ~100 km scales).
    Equirect,
}

impl ProjectionMethod {
    /// EPSG code for the UTM variant (`32600+zone` north, `32700+zone` south).
    pub fn epsg(&self) -> Option<u32> {
        match self {
            Self::Utm { zone, south: false } => Some(32600 + *zone as u32),
            Self::Utm { zone, south: true } => Some(32700 + *zone as u32),
            Self::Equirect => None,
        }
    }
}

impl std::fmt::Display for ProjectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Utm { zone, south } => {
                write!(f, "UTM zone {}{}", zone, if *south { 'S' } else { 'N' })
            }
            Self::Equirect => write!(f, "equirect"),
        }
    }
}

// ── Site projector ────────────────────────────────────────────────────────────

/// Projects geodetic coordinates into the planar metric frame used for
/// scoring. Built once at startup from the configured site; immutable and
/// freely shared afterwards.
pub struct SiteProjector {
    site_lat: f64,
    site_lon: f64,
    method: ProjectionMethod,
    // Present only for the UTM method.
    wgs84: Option<Proj>,
    utm: Option<Proj>,
    site_xy: (f64, f64),
}

impl SiteProjector {
    /// Build a projector for `projection`: `"utm"` (zone auto-derived from
    /// the site longitude), an explicit `"EPSG:326xx"`/`"EPSG:327xx"` UTM
    /// code, or `"equirect"`.
    ///
    /// Fails for out-of-range site coordinates or an unrecognized
    /// identifier; callers treat this as a fatal startup error.
    pub fn new(site_lat: f64, site_lon: f64, projection: &str) -> Result<Self, FusionError> {
        if !(-90.0..=90.0).contains(&site_lat) || !(-180.0..=180.0).contains(&site_lon) {
            return Err(FusionError::SiteOutOfRange {
                lat: site_lat,
                lon: site_lon,
            });
        }

        let method = Self::parse_method(site_lat, site_lon, projection)?;

        let (wgs84, utm) = match method {
            ProjectionMethod::Utm { zone, south } => {
                let south_flag = if south { " +south" } else { "" };
                let utm_def = format!(
                    "+proj=utm +zone={zone}{south_flag} +ellps=WGS84 +datum=WGS84 +units=m +no_defs"
                );
                (
                    Some(Proj::from_proj_string(WGS84_PROJ)?),
                    Some(Proj::from_proj_string(&utm_def)?),
                )
            }
            ProjectionMethod::Equirect => (None, None),
        };

        let mut projector = Self {
            site_lat,
            site_lon,
            method,
            wgs84,
            utm,
            site_xy: (0.0, 0.0),
        };
        projector.site_xy = projector.project(site_lat, site_lon)?;
        Ok(projector)
    }

    fn parse_method(
        site_lat: f64,
        site_lon: f64,
        projection: &str,
    ) -> Result<ProjectionMethod, FusionError> {
        let id = projection.trim();
        if id.eq_ignore_ascii_case("utm") || id.is_empty() {
            let zone = utm_zone(site_lon);
            return Ok(ProjectionMethod::Utm {
                zone,
                south: site_lat < 0.0,
            });
        }
        if id.eq_ignore_ascii_case("equirect") {
            return Ok(ProjectionMethod::Equirect);
        }
        if let Some(code) = id
            .to_ascii_uppercase()
            .strip_prefix("EPSG:")
            .and_then(|c| c.parse::<u32>().ok())
        {
            if (32601..=32660).contains(&code) {
                return Ok(ProjectionMethod::Utm {
                    zone: (code - 32600) as u8,
                    south: false,
                });
            }
            if (32701..=32760).contains(&code) {
                return Ok(ProjectionMethod::Utm {
                    zone: (code - 32700) as u8,
                    south: true,
                });
            }
        }
        Err(FusionError::UnknownProjection(projection.to_string()))
    }

    pub fn method(&self) -> ProjectionMethod {
        self.method
    }

    pub fn site(&self) -> (f64, f64) {
        (self.site_lat, self.site_lon)
    }

    /// Planar coordinates of the site itself, in the same frame `project`
    /// returns. Used to derive radial range/bearing features.
    pub fn site_xy(&self) -> (f64, f64) {
        self.site_xy
    }

    /// Geodetic degrees → planar meters.
    pub fn project(&self, lat_deg: f64, lon_deg: f64) -> Result<(f64, f64), FusionError> {
        match (&self.wgs84, &self.utm) {
            (Some(wgs84), Some(utm)) => {
                // proj4rs works in radians for geographic CRS, (lon, lat) order.
                let mut p = (lon_deg.to_radians(), lat_deg.to_radians(), 0.0);
                proj4rs::transform::transform(wgs84, utm, &mut p)?;
                Ok((p.0, p.1))
            }
            _ => {
                let m_per_deg_lon = M_PER_DEG_LAT * self.site_lat.to_radians().cos();
                Ok((
                    (lon_deg - self.site_lon) * m_per_deg_lon,
                    (lat_deg - self.site_lat) * M_PER_DEG_LAT,
                ))
            }
        }
    }

    /// Planar meters → geodetic degrees. Inverse of [`Self::project`].
    pub fn unproject(&self, x_m: f64, y_m: f64) -> Result<(f64, f64), FusionError> {
        match (&self.wgs84, &self.utm) {
            (Some(wgs84), Some(utm)) => {
                let mut p = (x_m, y_m, 0.0);
                proj4rs::transform::transform(utm, wgs84, &mut p)?;
                Ok((p.1.to_degrees(), p.0.to_degrees()))
            }
            _ => {
                let m_per_deg_lon = M_PER_DEG_LAT * self.site_lat.to_radians().cos();
                Ok((
                    self.site_lat + y_m / M_PER_DEG_LAT,
                    self.site_lon + x_m / m_per_deg_lon,
                ))
            }
        }
    }

    /// Radial distance from the site in the planar frame.
    pub fn range_from_site_m(&self, x_m: f64, y_m: f64) -> f64 {
        let (sx, sy) = self.site_xy;
        ((x_m - sx).powi(2) + (y_m - sy).powi(2)).sqrt()
    }

    /// Spherical initial bearing from the site to a geodetic point.
    pub fn bearing_from_site_deg(&self, lat_deg: f64, lon_deg: f64) -> f64 {
        azimuth_deg(self.site_lat, self.site_lon, lat_deg, lon_deg)
    }
}

/// UTM zone number for a longitude: `⌊(lon+180)/6⌋+1`, clamped to [1, 60].
pub fn utm_zone(lon_deg: f64) -> u8 {
    let zone = ((lon_deg + 180.0) / 6.0).floor() as i32 + 1;
    zone.clamp(1, 60) as u8
}

// ── Bearings & angles ─────────────────────────────────────────────────────────

/// Spherical initial bearing from point 1 to point 2, degrees in [0, 360).
pub fn azimuth_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    let theta = y.atan2(x).to_degrees();
    (theta + 360.0) % 360.0
}

/// Minimal absolute angular difference, degrees folded to [0, 180].
pub fn angle_diff_deg(a: f64, b: f64) -> f64 {
    let d = ((a - b) % 360.0).abs();
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

// ── Units & time ──────────────────────────────────────────────────────────────

/// Knots → meters per second. Non-finite input becomes 0.
pub fn knots_to_mps(knots: f64) -> f64 {
    if knots.is_finite() {
        knots * 0.514444
    } else {
        0.0
    }
}

/// Parse a timestamp value into epoch seconds.
///
/// Accepts ISO-8601 strings (trailing `Z` or explicit offset), the
/// `YYYY-MM-DD HH:MM:SS` form columnar stores emit (taken as UTC), epoch
/// numbers, and numeric strings. Anything else yields 0.0 — a sentinel the
/// time gate then rejects, rather than an error.
pub fn parse_time_s(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => parse_time_str_s(s),
        _ => 0.0,
    }
}

fn parse_time_str_s(s: &str) -> f64 {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return dt.timestamp() as f64 + dt.timestamp_subsec_micros() as f64 * 1e-6;
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc().timestamp() as f64;
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return naive.and_utc().timestamp() as f64;
    }
    s.parse::<f64>().unwrap_or(0.0)
}

// ── Bounding box & polygon filter ─────────────────────────────────────────────

/// Axis-aligned geodetic bounding box.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Bbox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Bbox {
    /// Bbox of a polygon's outer ring. `None` for an empty polygon.
    pub fn of_polygon(polygon: &PolygonCoords) -> Option<Self> {
        let ring = polygon.first()?;
        let mut bbox: Option<Bbox> = None;
        for pos in ring {
            if pos.len() < 2 {
                continue;
            }
            let (lon, lat) = (pos[0], pos[1]);
            bbox = Some(match bbox {
                None => Bbox {
                    min_lat: lat,
                    max_lat: lat,
                    min_lon: lon,
                    max_lon: lon,
                },
                Some(b) => Bbox {
                    min_lat: b.min_lat.min(lat),
                    max_lat: b.max_lat.max(lat),
                    min_lon: b.min_lon.min(lon),
                    max_lon: b.max_lon.max(lon),
                },
            });
        }
        bbox
    }

    /// Bbox covering `radius_km` around a site, using the ~111 km/deg
    /// approximation (longitude scaled by cos of latitude).
    pub fn around_site(site_lat: f64, site_lon: f64, radius_km: f64) -> Self {
        let lat_delta = radius_km / 111.0;
        let lon_delta = radius_km / (111.0 * site_lat.to_radians().cos());
        Bbox {
            min_lat: site_lat - lat_delta,
            max_lat: site_lat + lat_delta,
            min_lon: site_lon - lon_delta,
            max_lon: site_lon + lon_delta,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// Ray-casting point-in-polygon test against the outer ring.
/// An empty polygon accepts everything (no filter).
pub fn point_in_polygon(lon: f64, lat: f64, polygon: &PolygonCoords) -> bool {
    let ring = match polygon.first() {
        Some(r) if !r.is_empty() => r,
        _ => return true,
    };

    let n = ring.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        if ring[i].len() < 2 || ring[j].len() < 2 {
            j = i;
            continue;
        }
        let (xi, yi) = (ring[i][0], ring[i][1]);
        let (xj, yj) = (ring[j][0], ring[j][1]);
        if ((yi > lat) != (yj > lat)) && (lon < (xj - xi) * (lat - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SITE_LAT: f64 = -1.279656;
    const SITE_LON: f64 = 116.809655;

    #[test]
    fn utm_zone_derivation() {
        assert_eq!(utm_zone(116.809655), 50);
        assert_eq!(utm_zone(-180.0), 1);
        assert_eq!(utm_zone(179.999), 60);
        assert_eq!(utm_zone(0.0), 31);
    }

    #[test]
    fn auto_utm_picks_southern_zone_for_southern_site() {
        let proj = SiteProjector::new(SITE_LAT, SITE_LON, "utm").unwrap();
        assert_eq!(
            proj.method(),
            ProjectionMethod::Utm {
                zone: 50,
                south: true
            }
        );
        assert_eq!(proj.method().epsg(), Some(32750));
    }

    #[test]
    fn explicit_epsg_code_is_honored() {
        let proj = SiteProjector::new(SITE_LAT, SITE_LON, "EPSG:32650").unwrap();
        assert_eq!(
            proj.method(),
            ProjectionMethod::Utm {
                zone: 50,
                south: false
            }
        );
    }

    #[test]
    fn out_of_range_site_is_rejected() {
        assert!(SiteProjector::new(95.0, 0.0, "utm").is_err());
        assert!(SiteProjector::new(0.0, 200.0, "utm").is_err());
    }

    #[test]
    fn unknown_projection_is_rejected() {
        assert!(SiteProjector::new(SITE_LAT, SITE_LON, "EPSG:2180").is_err());
        assert!(SiteProjector::new(SITE_LAT, SITE_LON, "mercator").is_err());
    }

    #[test]
    fn utm_round_trip_recovers_latlon() {
        let proj = SiteProjector::new(SITE_LAT, SITE_LON, "utm").unwrap();
        // ~50 km north-east of the site.
        let (lat, lon) = (SITE_LAT + 0.3, SITE_LON + 0.3);
        let (x, y) = proj.project(lat, lon).unwrap();
        let (lat2, lon2) = proj.unproject(x, y).unwrap();
        // < 1 m tolerance at this distance: ~1e-5 degrees.
        assert!((lat - lat2).abs() < 1e-5, "lat drift {}", (lat - lat2).abs());
        assert!((lon - lon2).abs() < 1e-5, "lon drift {}", (lon - lon2).abs());
    }

    #[test]
    fn equirect_round_trip_is_exact() {
        let proj = SiteProjector::new(SITE_LAT, SITE_LON, "equirect").unwrap();
        let (x, y) = proj.project(SITE_LAT + 0.1, SITE_LON - 0.2).unwrap();
        let (lat, lon) = proj.unproject(x, y).unwrap();
        assert!((lat - (SITE_LAT + 0.1)).abs() < 1e-9);
        assert!((lon - (SITE_LON - 0.2)).abs() < 1e-9);
    }

    #[test]
    fn equirect_site_is_origin() {
        let proj = SiteProjector::new(SITE_LAT, SITE_LON, "equirect").unwrap();
        let (x, y) = proj.site_xy();
        assert_eq!((x, y), (0.0, 0.0));
    }

    #[test]
    fn projected_distance_matches_small_offset() {
        let proj = SiteProjector::new(SITE_LAT, SITE_LON, "utm").unwrap();
        let (x1, y1) = proj.project(-1.280, 116.810).unwrap();
        let (x2, y2) = proj.project(-1.2801, 116.8101).unwrap();
        let d = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
        // 0.0001 deg in both axes near the equator ≈ 15.7 m.
        assert!((10.0..25.0).contains(&d), "d = {d}");
    }

    #[test]
    fn knots_conversion_is_exact() {
        assert_eq!(knots_to_mps(1.0), 0.514444);
        assert_eq!(knots_to_mps(0.0), 0.0);
        assert_eq!(knots_to_mps(f64::NAN), 0.0);
    }

    #[test]
    fn angle_diff_is_symmetric_and_folded() {
        assert_eq!(angle_diff_deg(10.0, 350.0), 20.0);
        assert_eq!(angle_diff_deg(350.0, 10.0), 20.0);
        assert_eq!(angle_diff_deg(0.0, 180.0), 180.0);
        assert_eq!(angle_diff_deg(45.0, 44.0), 1.0);
        for (a, b) in [(33.0, 287.0), (-0.0f64, 359.0), (720.0, 90.0)] {
            let d = angle_diff_deg(a, b);
            assert!((0.0..=180.0).contains(&d));
            assert_eq!(d, angle_diff_deg(b, a));
        }
    }

    #[test]
    fn azimuth_cardinal_directions() {
        // Due north and due east from the equator.
        assert!((azimuth_deg(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-6);
        assert!((azimuth_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-6);
        assert!((azimuth_deg(1.0, 0.0, 0.0, 0.0) - 180.0).abs() < 1e-6);
        assert!((azimuth_deg(0.0, 1.0, 0.0, 0.0) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn parse_time_variants() {
        assert_eq!(parse_time_s(&json!(1_700_000_000)), 1_700_000_000.0);
        assert_eq!(parse_time_s(&json!(1_700_000_000.5)), 1_700_000_000.5);
        assert_eq!(
            parse_time_s(&json!("2023-11-14T22:13:20Z")),
            1_700_000_000.0
        );
        assert_eq!(
            parse_time_s(&json!("2023-11-14T22:13:20+00:00")),
            1_700_000_000.0
        );
        assert_eq!(
            parse_time_s(&json!("2023-11-14 22:13:20")),
            1_700_000_000.0
        );
        assert_eq!(parse_time_s(&json!("1700000000")), 1_700_000_000.0);
        assert_eq!(parse_time_s(&json!("not a time")), 0.0);
        assert_eq!(parse_time_s(&json!(null)), 0.0);
    }

    #[test]
    fn polygon_bbox_and_site_bbox() {
        let polygon: PolygonCoords = vec![vec![
            vec![116.78, -1.25],
            vec![116.78, -1.32],
            vec![116.85, -1.32],
            vec![116.85, -1.25],
            vec![116.78, -1.25],
        ]];
        let bbox = Bbox::of_polygon(&polygon).unwrap();
        assert_eq!(bbox.min_lon, 116.78);
        assert_eq!(bbox.max_lat, -1.25);
        assert!(bbox.contains(-1.28, 116.81));
        assert!(!bbox.contains(-1.28, 116.90));

        let site_bbox = Bbox::around_site(SITE_LAT, SITE_LON, 60.0);
        assert!(site_bbox.contains(SITE_LAT, SITE_LON));
        assert!((site_bbox.max_lat - SITE_LAT - 60.0 / 111.0).abs() < 1e-9);
    }

    #[test]
    fn point_in_polygon_ray_casting() {
        let polygon: PolygonCoords = vec![vec![
            vec![0.0, 0.0],
            vec![10.0, 0.0],
            vec![10.0, 10.0],
            vec![0.0, 10.0],
            vec![0.0, 0.0],
        ]];
        assert!(point_in_polygon(5.0, 5.0, &polygon));
        assert!(!point_in_polygon(15.0, 5.0, &polygon));
        assert!(!point_in_polygon(-1.0, -1.0, &polygon));
        // Empty polygon means no filter.
        assert!(point_in_polygon(123.0, 45.0, &vec![]));
    }
}
