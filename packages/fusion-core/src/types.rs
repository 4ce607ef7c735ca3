//! # types
//!
//! Planar observation form shared by the scorer, candidate builder and
//! assigner. The orchestration layer projects raw AIS/ARPA records into
//! this shape; everything below it is unit-consistent (meters, m/s,
//! degrees, epoch seconds) and carries no geodetic coordinates.

/// One observation in the planar metric frame.
///
/// Produced for both sides of the match: AIS (id = MMSI) and ARPA
/// (id = radar target). The optional site geometry means *measured from
/// the site* for ARPA and *radial relative to the site* for AIS; the
/// scorer compares the two directly.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarTrack {
    pub id: String,
    pub x_m: f64,
    pub y_m: f64,
    pub speed_ms: f64,
    pub heading_deg: f64,
    pub timestamp_s: f64,
    pub range_m: Option<f64>,
    pub bearing_deg: Option<f64>,
}

impl PlanarTrack {
    pub fn new(
        id: impl Into<String>,
        x_m: f64,
        y_m: f64,
        speed_ms: f64,
        heading_deg: f64,
        timestamp_s: f64,
    ) -> Self {
        Self {
            id: id.into(),
            x_m,
            y_m,
            speed_ms,
            heading_deg,
            timestamp_s,
            range_m: None,
            bearing_deg: None,
        }
    }

    pub fn with_site_geometry(mut self, range_m: Option<f64>, bearing_deg: Option<f64>) -> Self {
        self.range_m = range_m;
        self.bearing_deg = bearing_deg;
        self
    }
}
