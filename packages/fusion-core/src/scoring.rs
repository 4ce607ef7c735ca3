//! # scoring
//!
//! Feature extraction and probabilistic similarity scoring for one
//! ARPA↔AIS pair.
//!
//! Each feature difference Δ is pushed through a Gaussian kernel
//! `exp(−(Δ/σ)²)` and the sub-scores are combined as a convex sum. The
//! kernel deliberately uses `exp(−x²)`, not `exp(−x²/2)` — downstream
//! thresholds are calibrated against this exact form.

use serde::Serialize;

use crate::geo::angle_diff_deg;
use crate::types::PlanarTrack;

// ── Parameters ────────────────────────────────────────────────────────────────

/// Standard deviations and channel weights for the scorer.
///
/// The four base weights sum to 1.0. The two optional geometry channels
/// (ARPA measured range/bearing vs. AIS site-relative range/bearing) only
/// participate when their σ is positive *and* the source actually carries
/// the measurement; [`ScoringParams::for_source`] folds them in by scaling
/// the base weights so that every enabled weight set still sums to 1.0.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoringParams {
    pub pos_sigma_m: f64,
    pub spd_sigma_ms: f64,
    pub hdg_sigma_deg: f64,
    pub time_sigma_s: f64,
    pub range_sigma_m: f64,
    pub brg_geo_sigma_deg: f64,
    pub w_pos: f64,
    pub w_spd: f64,
    pub w_hdg: f64,
    pub w_time: f64,
    pub w_range: f64,
    pub w_brg_geo: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            pos_sigma_m: 500.0,
            spd_sigma_ms: 3.0,
            hdg_sigma_deg: 40.0,
            time_sigma_s: 60.0,
            range_sigma_m: 1500.0,
            brg_geo_sigma_deg: 15.0,
            w_pos: 0.5,
            w_spd: 0.15,
            w_hdg: 0.15,
            w_time: 0.2,
            w_range: 0.0,
            w_brg_geo: 0.0,
        }
    }
}

impl ScoringParams {
    /// Effective parameters for one matching cycle, given which optional
    /// measurements the ARPA source carries. A channel with σ ≤ 0 stays
    /// disabled regardless.
    pub fn for_source(&self, has_range: bool, has_bearing: bool) -> Self {
        let w_range = if has_range && self.range_sigma_m > 0.0 {
            self.w_range
        } else {
            0.0
        };
        let w_brg_geo = if has_bearing && self.brg_geo_sigma_deg > 0.0 {
            self.w_brg_geo
        } else {
            0.0
        };
        let scale = 1.0 - w_range - w_brg_geo;
        Self {
            w_pos: self.w_pos * scale,
            w_spd: self.w_spd * scale,
            w_hdg: self.w_hdg * scale,
            w_time: self.w_time * scale,
            w_range,
            w_brg_geo,
            ..*self
        }
    }
}

// ── Features ──────────────────────────────────────────────────────────────────

/// Raw feature differences for a candidate pair.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct FeatureVector {
    /// Euclidean positional distance in the planar frame, meters.
    pub d_m: f64,
    /// Absolute speed difference, m/s.
    pub dv_ms: f64,
    /// Minimal heading difference, degrees in [0, 180].
    pub dtheta_deg: f64,
    /// Absolute timestamp difference, seconds.
    pub dt_s: f64,
    /// |ARPA measured range − AIS radial range|, when both are present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_error_m: Option<f64>,
    /// Minimal difference between measured and site-relative bearing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing_error_deg: Option<f64>,
}

/// Per-channel Gaussian sub-scores and their convex combination.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct SubScores {
    pub s_pos: f64,
    pub s_spd: f64,
    pub s_hdg: f64,
    pub s_time: f64,
    pub s_range: f64,
    pub s_brg_geo: f64,
    pub s_total: f64,
}

/// `exp(−(Δ/σ)²)`; 0 when the channel has no spread to score against.
fn gaussian(delta: f64, sigma: f64) -> f64 {
    if sigma > 0.0 {
        (-(delta / sigma).powi(2)).exp()
    } else {
        0.0
    }
}

/// Compute the feature differences between an AIS and an ARPA observation,
/// both already in the planar frame.
pub fn extract_features(ais: &PlanarTrack, arpa: &PlanarTrack) -> FeatureVector {
    let dx = arpa.x_m - ais.x_m;
    let dy = arpa.y_m - ais.y_m;
    FeatureVector {
        d_m: (dx * dx + dy * dy).sqrt(),
        dv_ms: (arpa.speed_ms - ais.speed_ms).abs(),
        dtheta_deg: angle_diff_deg(arpa.heading_deg, ais.heading_deg),
        dt_s: (arpa.timestamp_s - ais.timestamp_s).abs(),
        range_error_m: match (arpa.range_m, ais.range_m) {
            (Some(meas), Some(site)) => Some((meas - site).abs()),
            _ => None,
        },
        bearing_error_deg: match (arpa.bearing_deg, ais.bearing_deg) {
            (Some(meas), Some(site)) => Some(angle_diff_deg(meas, site)),
            _ => None,
        },
    }
}

/// Score a feature vector. Missing optional features contribute 0 under an
/// active channel: unreliable geometry degrades the pair, it never drops it.
pub fn score_features(features: &FeatureVector, params: &ScoringParams) -> SubScores {
    let s_pos = gaussian(features.d_m, params.pos_sigma_m);
    let s_spd = gaussian(features.dv_ms, params.spd_sigma_ms);
    let s_hdg = gaussian(features.dtheta_deg, params.hdg_sigma_deg);
    let s_time = gaussian(features.dt_s, params.time_sigma_s);
    let s_range = features
        .range_error_m
        .map(|e| gaussian(e, params.range_sigma_m))
        .unwrap_or(0.0);
    let s_brg_geo = features
        .bearing_error_deg
        .map(|e| gaussian(e, params.brg_geo_sigma_deg))
        .unwrap_or(0.0);

    let s_total = params.w_pos * s_pos
        + params.w_spd * s_spd
        + params.w_hdg * s_hdg
        + params.w_time * s_time
        + params.w_range * s_range
        + params.w_brg_geo * s_brg_geo;

    SubScores {
        s_pos,
        s_spd,
        s_hdg,
        s_time,
        s_range,
        s_brg_geo,
        s_total,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
