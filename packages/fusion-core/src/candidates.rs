//! # candidates
//!
//! Enumeration and gating of ARPA×AIS candidate pairs.
//!
//! Every pair inside both gates gets a full feature vector and score;
//! everything else is discarded before assignment ever sees it. The
//! emission order is unspecified — the assigner does not depend on it.

use serde::Serialize;

use crate::scoring::{extract_features, score_features, FeatureVector, ScoringParams, SubScores};
use crate::types::PlanarTrack;

/// Physical-plausibility gates applied before scoring is kept.
/// Both bounds are inclusive.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Gates {
    pub gating_distance_m: f64,
    pub time_gate_s: f64,
}

impl Default for Gates {
    fn default() -> Self {
        Self {
            gating_distance_m: 8000.0,
            time_gate_s: 1800.0,
        }
    }
}

/// An admissible ARPA↔AIS pairing with its features and scores.
/// Exists only within a single matching cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub arpa_id: String,
    pub ais_id: String,
    #[serde(flatten)]
    pub features: FeatureVector,
    #[serde(flatten)]
    pub scores: SubScores,
}

/// Build all candidates for one cycle. O(|ARPA|·|AIS|); the caller bounds
/// input sizes via its fetch limits.
///
/// The optional range/bearing channels are enabled for the whole cycle
/// when any ARPA track carries the measurement (and σ permits); see
/// [`ScoringParams::for_source`].
pub fn build_candidates(
    arpa: &[PlanarTrack],
    ais: &[PlanarTrack],
    gates: Gates,
    params: &ScoringParams,
) -> Vec<Candidate> {
    let has_range = arpa.iter().any(|t| t.range_m.is_some());
    let has_bearing = arpa.iter().any(|t| t.bearing_deg.is_some());
    let effective = params.for_source(has_range, has_bearing);

    let mut candidates = Vec::new();
    for a in arpa {
        for i in ais {
            let features = extract_features(i, a);
            if features.d_m <= gates.gating_distance_m && features.dt_s <= gates.time_gate_s {
                let scores = score_features(&features, &effective);
                candidates.push(Candidate {
                    arpa_id: a.id.clone(),
                    ais_id: i.id.clone(),
                    features,
                    scores,
                });
            }
        }
    }
    candidates
}

// ── Tests ─────────────────────────────────────────────────────────────────────
