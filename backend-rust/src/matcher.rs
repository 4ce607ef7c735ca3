//! # matcher
//!
//! The matching orchestrator. One call = one cycle: resolve the spatial
//! filter, fetch recent observations, sanitize and project them, build
//! gated candidates, solve the one-to-one assignment and assemble the
//! result bundle (pairs + features, unmatched lists, statistics,
//! parameters, GeoJSON).
//!
//! Cycles are stateless — nothing carries over between invocations — and
//! serialized: the API path and the upstream-listener path share one
//! cycle mutex so a trigger storm can never overlap CPU-bound work.
//! Every failure inside a cycle is converted into a `success=false`
//! response at this boundary; it must never kill the caller's task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fusion_core::{
    assign_one_to_one, build_candidates, geo::point_in_polygon, geo::PolygonCoords, AssignStrategy,
    Bbox, Candidate, FeatureVector, Gates, PlanarTrack, ScoringParams, SiteProjector, SubScores,
};

use crate::config::Settings;
use crate::store::{AisRecord, ArpaRecord, StoreError, TrackStore};

// ── Result bundle ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PairFeatures {
    #[serde(flatten)]
    pub features: FeatureVector,
    #[serde(flatten)]
    pub scores: SubScores,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedPair {
    pub arpa_id: String,
    pub ais_id: String,
    pub score: f64,
    pub distance_m: f64,
    pub speed_diff_ms: f64,
    pub heading_diff_deg: f64,
    pub time_diff_s: f64,
    pub ais: AisRecord,
    pub arpa: ArpaRecord,
    pub features: PairFeatures,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchStatistics {
    pub total_ais: usize,
    pub total_arpa: usize,
    pub matched: usize,
    pub unmatched_ais: usize,
    pub unmatched_arpa: usize,
    pub candidates_generated: usize,
    pub processing_time_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchParameters {
    pub since_minutes: i64,
    pub gating_distance_m: f64,
    pub time_gate_s: f64,
    pub match_threshold: f64,
    pub filter_radius_km: f64,
    pub polygon_provided: bool,
    pub bbox: Bbox,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchData {
    pub matched_pairs: Vec<MatchedPair>,
    pub unmatched_ais: Vec<AisRecord>,
    pub unmatched_arpa: Vec<ArpaRecord>,
    pub statistics: MatchStatistics,
    pub parameters: MatchParameters,
    pub geojson: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<MatchData>,
    pub timestamp: String,
}

impl MatchResponse {
    fn ok(message: String, data: MatchData) -> Self {
        Self {
            success: true,
            message,
            data: Some(data),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            data: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct MatchController {
    settings: Arc<Settings>,
    projector: SiteProjector,
    store: Arc<dyn TrackStore>,
    scoring: ScoringParams,
    gates: Gates,
    strategy: AssignStrategy,
    cycle_lock: Mutex<()>,
}

impl MatchController {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<dyn TrackStore>,
    ) -> Result<Self, fusion_core::FusionError> {
        let projector =
            SiteProjector::new(settings.site_lat, settings.site_lon, &settings.projection)?;
        info!(
            "matcher: site ({:.6}, {:.6}), projection {}, radius {} km",
            settings.site_lat,
            settings.site_lon,
            projector.method(),
            settings.filter_radius_km
        );
        Ok(Self {
            scoring: settings.scoring_params(),
            gates: settings.gates(),
            strategy: AssignStrategy::Optimal,
            settings,
            projector,
            store,
            cycle_lock: Mutex::new(()),
        })
    }

    /// Run one matching cycle. Serialized against every other cycle in
    /// the process, whichever path triggered it.
    pub async fn match_cycle(
        &self,
        polygon: Option<&PolygonCoords>,
        since_minutes: i64,
        ais_limit: usize,
        arpa_limit: usize,
    ) -> MatchResponse {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();

        match self
            .run_cycle(polygon, since_minutes, ais_limit, arpa_limit, started)
            .await
        {
            Ok((message, data)) => MatchResponse::ok(message, data),
            Err(e) => {
                warn!("matcher: cycle failed: {e}");
                MatchResponse::failure(format!("Matching failed: {e}"))
            }
        }
    }

    fn resolve_bbox(&self, polygon: Option<&PolygonCoords>) -> Bbox {
        polygon
            .and_then(Bbox::of_polygon)
            .unwrap_or_else(|| {
                Bbox::around_site(
                    self.settings.site_lat,
                    self.settings.site_lon,
                    self.settings.filter_radius_km,
                )
            })
    }

    async fn run_cycle(
        &self,
        polygon: Option<&PolygonCoords>,
        since_minutes: i64,
        ais_limit: usize,
        arpa_limit: usize,
        started: Instant,
    ) -> Result<(String, MatchData), StoreError> {
        let bbox = self.resolve_bbox(polygon);
        debug!(
            "matcher: fetching last {since_minutes} min, bbox [{:.4},{:.4}]x[{:.4},{:.4}]",
            bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon
        );

        let ais_rows = self.store.fetch_ais(&bbox, since_minutes, ais_limit).await?;
        let arpa_rows = self
            .store
            .fetch_arpa(&bbox, since_minutes, arpa_limit)
            .await?;

        let (ais_records, ais_tracks) = self.sanitize_ais(ais_rows, polygon);
        let (arpa_records, arpa_tracks) = self.sanitize_arpa(arpa_rows, polygon);
        info!(
            "matcher: {} AIS / {} ARPA observations after sanitize",
            ais_records.len(),
            arpa_records.len()
        );

        let parameters = MatchParameters {
            since_minutes,
            gating_distance_m: self.gates.gating_distance_m,
            time_gate_s: self.gates.time_gate_s,
            match_threshold: self.settings.match_threshold,
            filter_radius_km: self.settings.filter_radius_km,
            polygon_provided: polygon.is_some(),
            bbox,
        };

        if ais_records.is_empty() || arpa_records.is_empty() {
            let data = Self::empty_data(ais_records, arpa_records, 0, parameters, started);
            return Ok(("Insufficient data for matching".into(), data));
        }

        let candidates = build_candidates(&arpa_tracks, &ais_tracks, self.gates, &self.scoring);
        debug!("matcher: {} candidates generated", candidates.len());

        if candidates.is_empty() {
            let data = Self::empty_data(ais_records, arpa_records, 0, parameters, started);
            return Ok((
                "No matching candidates found within gating parameters".into(),
                data,
            ));
        }

        let arpa_ids: Vec<String> = arpa_tracks.iter().map(|t| t.id.clone()).collect();
        let ais_ids: Vec<String> = ais_tracks.iter().map(|t| t.id.clone()).collect();
        let candidates_generated = candidates.len();

        let assignment = assign_one_to_one(
            &candidates,
            &arpa_ids,
            &ais_ids,
            self.settings.match_threshold,
            self.strategy,
        );

        let ais_by_id: HashMap<&str, &AisRecord> = ais_records
            .iter()
            .map(|r| (r.mmsi.as_str(), r))
            .collect();
        let arpa_by_id: HashMap<&str, &ArpaRecord> = arpa_records
            .iter()
            .map(|r| (r.target.as_str(), r))
            .collect();

        let matched_pairs: Vec<MatchedPair> = assignment
            .matches
            .iter()
            .filter_map(|c| Self::to_pair(c, &ais_by_id, &arpa_by_id))
            .collect();

        let unmatched_arpa_set: HashSet<&str> =
            assignment.unmatched_arpa.iter().map(String::as_str).collect();
        let unmatched_ais_set: HashSet<&str> =
            assignment.unmatched_ais.iter().map(String::as_str).collect();
        let unmatched_ais: Vec<AisRecord> = ais_records
            .iter()
            .filter(|r| unmatched_ais_set.contains(r.mmsi.as_str()))
            .cloned()
            .collect();
        let unmatched_arpa: Vec<ArpaRecord> = arpa_records
            .iter()
            .filter(|r| unmatched_arpa_set.contains(r.target.as_str()))
            .cloned()
            .collect();

        info!(
            "matcher: {} matched, {} unmatched ARPA, {} unmatched AIS",
            matched_pairs.len(),
            unmatched_arpa.len(),
            unmatched_ais.len()
        );

        let elapsed = started.elapsed().as_secs_f64();
        let geojson = build_geojson(&matched_pairs);
        let data = MatchData {
            statistics: MatchStatistics {
                total_ais: ais_records.len(),
                total_arpa: arpa_records.len(),
                matched: matched_pairs.len(),
                unmatched_ais: unmatched_ais.len(),
                unmatched_arpa: unmatched_arpa.len(),
                candidates_generated,
                processing_time_s: elapsed,
            },
            matched_pairs,
            unmatched_ais,
            unmatched_arpa,
            parameters,
            geojson,
        };
        Ok((
            format!("Matching completed successfully in {elapsed:.2}s"),
            data,
        ))
    }

    fn empty_data(
        ais_records: Vec<AisRecord>,
        arpa_records: Vec<ArpaRecord>,
        candidates_generated: usize,
        parameters: MatchParameters,
        started: Instant,
    ) -> MatchData {
        MatchData {
            statistics: MatchStatistics {
                total_ais: ais_records.len(),
                total_arpa: arpa_records.len(),
                matched: 0,
                unmatched_ais: ais_records.len(),
                unmatched_arpa: arpa_records.len(),
                candidates_generated,
                processing_time_s: started.elapsed().as_secs_f64(),
            },
            matched_pairs: Vec::new(),
            unmatched_ais: ais_records,
            unmatched_arpa: arpa_records,
            parameters,
            geojson: json!({ "type": "FeatureCollection", "features": [] }),
        }
    }

    fn to_pair(
        c: &Candidate,
        ais_by_id: &HashMap<&str, &AisRecord>,
        arpa_by_id: &HashMap<&str, &ArpaRecord>,
    ) -> Option<MatchedPair> {
        let ais = ais_by_id.get(c.ais_id.as_str())?;
        let arpa = arpa_by_id.get(c.arpa_id.as_str())?;
        Some(MatchedPair {
            arpa_id: c.arpa_id.clone(),
            ais_id: c.ais_id.clone(),
            score: c.scores.s_total,
            distance_m: c.features.d_m,
            speed_diff_ms: c.features.dv_ms,
            heading_diff_deg: c.features.dtheta_deg,
            time_diff_s: c.features.dt_s,
            ais: (*ais).clone(),
            arpa: (*arpa).clone(),
            features: PairFeatures {
                features: c.features,
                scores: c.scores,
            },
        })
    }

    /// Drop no-fix records (lat and lon both literally zero), apply the
    /// exact polygon filter, project into the planar frame. Records with
    /// invalid fields are skipped with a warning and the cycle proceeds.
    fn sanitize_ais(
        &self,
        rows: Vec<AisRecord>,
        polygon: Option<&PolygonCoords>,
    ) -> (Vec<AisRecord>, Vec<PlanarTrack>) {
        let mut records = Vec::with_capacity(rows.len());
        let mut tracks = Vec::with_capacity(rows.len());
        for row in rows {
            if row.lat == 0.0 && row.lng == 0.0 {
                continue;
            }
            if let Some(poly) = polygon {
                if !point_in_polygon(row.lng, row.lat, poly) {
                    continue;
                }
            }
            let (x, y) = match self.projector.project(row.lat, row.lng) {
                Ok(xy) => xy,
                Err(e) => {
                    warn!("matcher: skipping AIS {}: projection failed: {e}", row.mmsi);
                    continue;
                }
            };
            // Prefer heading when finite and non-zero; otherwise course
            // over ground.
            let hdg = if row.heading.is_finite() && row.heading != 0.0 {
                row.heading
            } else {
                row.cog
            };
            let track = PlanarTrack::new(
                row.mmsi.clone(),
                x,
                y,
                fusion_core::geo::knots_to_mps(row.sog),
                hdg,
                fusion_core::geo::parse_time_s(&row.ts),
            )
            .with_site_geometry(
                Some(self.projector.range_from_site_m(x, y)),
                Some(self.projector.bearing_from_site_deg(row.lat, row.lng)),
            );
            records.push(row.normalized());
            tracks.push(track);
        }
        (records, tracks)
    }

    fn sanitize_arpa(
        &self,
        rows: Vec<ArpaRecord>,
        polygon: Option<&PolygonCoords>,
    ) -> (Vec<ArpaRecord>, Vec<PlanarTrack>) {
        let mut records = Vec::with_capacity(rows.len());
        let mut tracks = Vec::with_capacity(rows.len());
        for row in rows {
            if row.lat == 0.0 && row.lng == 0.0 {
                continue;
            }
            if let Some(poly) = polygon {
                if !point_in_polygon(row.lng, row.lat, poly) {
                    continue;
                }
            }
            let (x, y) = match self.projector.project(row.lat, row.lng) {
                Ok(xy) => xy,
                Err(e) => {
                    warn!(
                        "matcher: skipping ARPA {}: projection failed: {e}",
                        row.target
                    );
                    continue;
                }
            };
            let track = PlanarTrack::new(
                row.target.clone(),
                x,
                y,
                fusion_core::geo::knots_to_mps(row.speed),
                row.course,
                fusion_core::geo::parse_time_s(&row.recv_at),
            )
            .with_site_geometry(row.range_meas_m(), row.bearing);
            records.push(row.normalized());
            tracks.push(track);
        }
        (records, tracks)
    }
}

// ── GeoJSON rendering ─────────────────────────────────────────────────────────

/// FeatureCollection with, per matched pair, a Point for the AIS fix, a
/// Point for the ARPA fix, and a LineString connecting them.
fn build_geojson(pairs: &[MatchedPair]) -> Value {
    let mut features = Vec::with_capacity(pairs.len() * 3);
    for pair in pairs {
        let ais_pos = json!([pair.ais.lng, pair.ais.lat]);
        let arpa_pos = json!([pair.arpa.lng, pair.arpa.lat]);

        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": ais_pos },
            "properties": {
                "type": "ais",
                "mmsi": pair.ais.mmsi,
                "ship_name": pair.ais.ship_name,
                "score": pair.score,
            }
        }));
        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": arpa_pos },
            "properties": {
                "type": "arpa",
                "target": pair.arpa.target,
                "score": pair.score,
            }
        }));
        features.push(json!({
            "type": "Feature",
            "geometry": { "type": "LineString", "coordinates": [ais_pos, arpa_pos] },
            "properties": {
                "type": "match",
                "ais_id": pair.ais.mmsi,
                "arpa_id": pair.arpa.target,
                "score": pair.score,
                "distance_m": pair.distance_m,
                "ship_name": pair.ais.ship_name,
                "target": pair.arpa.target,
            }
        }));
    }
    json!({ "type": "FeatureCollection", "features": features })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn ais(mmsi: &str, lat: f64, lng: f64, sog: f64, cog: f64, ts: i64) -> AisRecord {
        AisRecord {
            mmsi: mmsi.into(),
            ship_name: String::new(),
            lat,
            lng,
            lon: None,
            sog,
            cog,
            heading: 0.0,
            ts: json!(ts),
            received_at: json!(ts),
        }
    }

    fn arpa(target: &str, lat: f64, lng: f64, speed: f64, course: f64, ts: i64) -> ArpaRecord {
        ArpaRecord {
            target: target.into(),
            lat,
            lng,
            lon: None,
            speed,
            course,
            distance_nm: None,
            bearing: None,
            recv_at: json!(ts),
            received_at: json!(ts),
        }
    }

    fn controller(settings: Settings, store: MemoryStore) -> MatchController {
        MatchController::new(Arc::new(settings), Arc::new(store)).unwrap()
    }

    #[tokio::test]
    async fn one_clean_match() {
        let store = MemoryStore {
            ais: vec![ais("525100123", -1.280, 116.810, 10.5, 45.0, 1_700_000_000)],
            arpa: vec![arpa("T1", -1.2801, 116.8101, 10.4, 44.0, 1_700_000_001)],
        };
        let ctl = controller(Settings::default(), store);
        let resp = ctl.match_cycle(None, 60, 1000, 1000).await;

        assert!(resp.success);
        let data = resp.data.unwrap();
        assert_eq!(data.statistics.matched, 1);
        let pair = &data.matched_pairs[0];
        assert_eq!(pair.arpa_id, "T1");
        assert_eq!(pair.ais_id, "525100123");
        assert!((10.0..25.0).contains(&pair.distance_m), "d = {}", pair.distance_m);
        assert!((pair.heading_diff_deg - 1.0).abs() < 1e-9);
        assert!((pair.time_diff_s - 1.0).abs() < 1e-9);
        assert!(pair.score > 0.9, "score = {}", pair.score);
        // Records mirror lon alongside lng.
        assert_eq!(pair.ais.lon, Some(pair.ais.lng));
        assert_eq!(pair.arpa.lon, Some(pair.arpa.lng));
        // Three GeoJSON features per pair.
        assert_eq!(data.geojson["features"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gate_rejection_leaves_both_unmatched() {
        let store = MemoryStore {
            ais: vec![ais("525100123", -1.280, 116.810, 10.5, 45.0, 1_700_000_000)],
            arpa: vec![arpa("T1", -1.350, 116.900, 20.0, 180.0, 1_700_003_600)],
        };
        let ctl = controller(Settings::default(), store);
        let resp = ctl.match_cycle(None, 60, 1000, 1000).await;

        assert!(resp.success);
        let data = resp.data.unwrap();
        assert_eq!(data.statistics.candidates_generated, 0);
        assert_eq!(data.statistics.matched, 0);
        assert_eq!(data.unmatched_ais.len(), 1);
        assert_eq!(data.unmatched_arpa.len(), 1);
    }

    #[tokio::test]
    async fn polygon_filter_excludes_otherwise_matching_pair() {
        let store = MemoryStore {
            ais: vec![ais("525100123", -1.280, 116.810, 10.5, 45.0, 1_700_000_000)],
            arpa: vec![arpa("T1", -1.2801, 116.8101, 10.4, 44.0, 1_700_000_001)],
        };
        let ctl = controller(Settings::default(), store);
        // A polygon well away from the observations.
        let polygon: PolygonCoords = vec![vec![
            vec![117.5, -2.0],
            vec![117.5, -2.1],
            vec![117.6, -2.1],
            vec![117.6, -2.0],
            vec![117.5, -2.0],
        ]];
        let resp = ctl.match_cycle(Some(&polygon), 60, 1000, 1000).await;

        assert!(resp.success);
        assert_eq!(resp.message, "Insufficient data for matching");
        let data = resp.data.unwrap();
        assert_eq!(data.statistics.total_ais, 0);
        assert_eq!(data.statistics.total_arpa, 0);
        assert!(data.parameters.polygon_provided);
    }

    #[tokio::test]
    async fn polygon_bbox_contains_all_surviving_records() {
        let polygon: PolygonCoords = vec![vec![
            vec![116.78, -1.25],
            vec![116.78, -1.32],
            vec![116.85, -1.32],
            vec![116.85, -1.25],
            vec![116.78, -1.25],
        ]];
        let store = MemoryStore {
            ais: vec![
                ais("IN", -1.280, 116.810, 10.0, 45.0, 1_700_000_000),
                ais("OUT", -1.280, 116.90, 10.0, 45.0, 1_700_000_000),
            ],
            arpa: vec![arpa("T1", -1.2801, 116.8101, 10.0, 44.0, 1_700_000_001)],
        };
        let ctl = controller(Settings::default(), store);
        let resp = ctl.match_cycle(Some(&polygon), 60, 1000, 1000).await;
        let data = resp.data.unwrap();
        let bbox = data.parameters.bbox;

        assert_eq!(data.statistics.total_ais, 1);
        for r in data
            .matched_pairs
            .iter()
            .map(|p| &p.ais)
            .chain(data.unmatched_ais.iter())
        {
            assert!(bbox.contains(r.lat, r.lng));
        }
    }

    #[tokio::test]
    async fn zero_coordinate_records_are_dropped() {
        let store = MemoryStore {
            ais: vec![
                ais("NOFIX", 0.0, 0.0, 3.0, 10.0, 1_700_000_000),
                ais("525100123", -1.280, 116.810, 10.5, 45.0, 1_700_000_000),
            ],
            arpa: vec![arpa("T1", -1.2801, 116.8101, 10.4, 44.0, 1_700_000_001)],
        };
        // The polygon's bbox spans (0, 0), so the no-fix record reaches
        // the sanitize step and is dropped there, not by the bbox.
        let polygon: PolygonCoords = vec![vec![
            vec![-1.0, -2.0],
            vec![-1.0, 1.0],
            vec![117.0, 1.0],
            vec![117.0, -2.0],
            vec![-1.0, -2.0],
        ]];
        let ctl = controller(Settings::default(), store);
        let resp = ctl.match_cycle(Some(&polygon), 60, 1000, 1000).await;

        assert!(resp.success);
        let data = resp.data.unwrap();
        assert_eq!(data.statistics.total_ais, 1);
        assert_eq!(data.statistics.matched, 1);
        assert!(data
            .matched_pairs
            .iter()
            .all(|p| p.ais_id != "NOFIX"));
    }

    #[tokio::test]
    async fn threshold_sensitivity_on_a_mid_score_pair() {
        // Equirect projection for an exact 500 m offset (s_pos = exp(-1))
        // and a 40° heading split (s_hdg = exp(-1)): s_total ≈ 0.589.
        let dlat = 500.0 / 111_320.0;
        let mk_store = || MemoryStore {
            ais: vec![ais("525100123", -1.280, 116.810, 10.0, 45.0, 1_700_000_000)],
            arpa: vec![arpa("T1", -1.280 + dlat, 116.810, 10.0, 85.0, 1_700_000_000)],
        };

        let accept = Settings {
            projection: "equirect".into(),
            match_threshold: 0.5,
            ..Default::default()
        };
        let resp = controller(accept, mk_store()).match_cycle(None, 60, 1000, 1000).await;
        let data = resp.data.unwrap();
        assert_eq!(data.statistics.matched, 1);
        let score = data.matched_pairs[0].score;
        assert!((0.55..0.6).contains(&score), "score = {score}");

        let reject = Settings {
            projection: "equirect".into(),
            match_threshold: 0.6,
            ..Default::default()
        };
        let resp = controller(reject, mk_store()).match_cycle(None, 60, 1000, 1000).await;
        let data = resp.data.unwrap();
        assert_eq!(data.statistics.matched, 0);
        assert_eq!(data.unmatched_ais.len(), 1);
        assert_eq!(data.unmatched_arpa.len(), 1);
    }

    #[tokio::test]
    async fn matched_and_unmatched_partition_the_inputs() {
        let store = MemoryStore {
            ais: vec![
                ais("A1", -1.280, 116.810, 10.0, 45.0, 1_700_000_000),
                ais("A2", -1.285, 116.815, 8.0, 90.0, 1_700_000_000),
                ais("A3", -1.290, 116.820, 12.0, 180.0, 1_700_000_000),
            ],
            arpa: vec![
                arpa("T1", -1.2801, 116.8101, 10.0, 45.0, 1_700_000_001),
                arpa("T2", -1.2851, 116.8151, 8.0, 89.0, 1_700_000_001),
            ],
        };
        let ctl = controller(Settings::default(), store);
        let resp = ctl.match_cycle(None, 60, 1000, 1000).await;
        let data = resp.data.unwrap();

        let matched_ais: HashSet<String> =
            data.matched_pairs.iter().map(|p| p.ais_id.clone()).collect();
        let matched_arpa: HashSet<String> =
            data.matched_pairs.iter().map(|p| p.arpa_id.clone()).collect();
        assert_eq!(matched_ais.len(), data.matched_pairs.len());
        assert_eq!(matched_arpa.len(), data.matched_pairs.len());

        assert_eq!(
            data.matched_pairs.len() + data.unmatched_ais.len(),
            data.statistics.total_ais
        );
        assert_eq!(
            data.matched_pairs.len() + data.unmatched_arpa.len(),
            data.statistics.total_arpa
        );
        // Every accepted pair satisfies threshold and gates.
        for p in &data.matched_pairs {
            assert!(p.score >= 0.8);
            assert!(p.distance_m <= 8000.0);
            assert!(p.time_diff_s <= 1800.0);
        }
    }

    #[tokio::test]
    async fn empty_store_is_a_normal_outcome() {
        let ctl = controller(Settings::default(), MemoryStore::default());
        let resp = ctl.match_cycle(None, 60, 1000, 1000).await;
        assert!(resp.success);
        assert_eq!(resp.message, "Insufficient data for matching");
        let data = resp.data.unwrap();
        assert_eq!(data.statistics.total_ais, 0);
        assert_eq!(data.statistics.matched, 0);
    }
}
