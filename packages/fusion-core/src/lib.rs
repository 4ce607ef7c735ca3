//! # fusion-core
//!
//! Platform-independent AIS↔ARPA matching engine.
//!
//! The pipeline, in dependency order:
//!   1. [`geo`] — geodetic → planar projection around a fixed site, plus
//!      bearings, angle folding, bounding boxes and point-in-polygon.
//!   2. [`scoring`] — per-pair feature extraction and Gaussian-kernel
//!      similarity scoring.
//!   3. [`candidates`] — gated enumeration of all admissible pairs.
//!   4. [`assign`] — minimum-cost one-to-one assignment with an
//!      acceptance threshold (greedy fallback available).
//!
//! No I/O, no async, no global state: the orchestration layer owns the
//! clocks, stores and sockets and feeds this crate plain observations.

pub mod assign;
pub mod candidates;
pub mod geo;
pub mod scoring;
pub mod types;

pub use assign::{assign_one_to_one, AssignStrategy, Assignment};
pub use candidates::{build_candidates, Candidate, Gates};
pub use geo::{Bbox, PolygonCoords, SiteProjector};
pub use scoring::{FeatureVector, ScoringParams, SubScores};
pub use types::PlanarTrack;

/// Errors from the matching engine. Construction-time failures are fatal
/// to callers; everything after startup is infallible by design.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    #[error("site coordinates out of range: lat {lat}, lon {lon}")]
    SiteOutOfRange { lat: f64, lon: f64 },

    #[error("unrecognized projection identifier `{0}`")]
    UnknownProjection(String),

    #[error("projection setup failed: {0}")]
    Projection(#[from] proj4rs::errors::Error),
}
