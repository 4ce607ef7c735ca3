//! # store
//!
//! Observation store seam. The matching orchestrator only ever talks to
//! the [`TrackStore`] trait; the production implementation speaks the
//! columnar store's HTTP interface (`FORMAT JSONEachRow`, one JSON object
//! per line) so fetches are plain async requests with a deadline and
//! nothing ever blocks the runtime.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use fusion_core::Bbox;

use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("data store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("data store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("data store returned an undecodable row: {0}")]
    Decode(#[from] serde_json::Error),
}

// ── Row types ─────────────────────────────────────────────────────────────────

/// Accept identifiers as either strings or bare numbers; MMSIs in
/// particular arrive both ways.
fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// One AIS row as served by the store. `lon` mirrors `lng` once the
/// record passes through [`Self::normalized`]; downstream consumers read
/// either spelling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AisRecord {
    #[serde(deserialize_with = "de_id")]
    pub mmsi: String,
    #[serde(default)]
    pub ship_name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default)]
    pub sog: f64,
    #[serde(default)]
    pub cog: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub ts: serde_json::Value,
    #[serde(default)]
    pub received_at: serde_json::Value,
}

impl AisRecord {
    pub fn normalized(mut self) -> Self {
        self.lon = Some(self.lng);
        self
    }
}

/// One ARPA row as served by the store. `distance_nm` and `bearing` are
/// the radar's own measurements from the site and may be absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArpaRecord {
    #[serde(deserialize_with = "de_id")]
    pub target: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub course: f64,
    #[serde(default)]
    pub distance_nm: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub recv_at: serde_json::Value,
    #[serde(default)]
    pub received_at: serde_json::Value,
}

impl ArpaRecord {
    pub fn normalized(mut self) -> Self {
        self.lon = Some(self.lng);
        self
    }

    /// Measured range in meters (`distance_nm · 1852`).
    pub fn range_meas_m(&self) -> Option<f64> {
        self.distance_nm.map(|nm| nm * 1852.0)
    }
}

// ── Store trait ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn fetch_ais(
        &self,
        bbox: &Bbox,
        since_minutes: i64,
        limit: usize,
    ) -> Result<Vec<AisRecord>, StoreError>;

    async fn fetch_arpa(
        &self,
        bbox: &Bbox,
        since_minutes: i64,
        limit: usize,
    ) -> Result<Vec<ArpaRecord>, StoreError>;

    /// Reachability probe for the health endpoint.
    async fn ping(&self) -> bool;
}

// ── ClickHouse-backed implementation ──────────────────────────────────────────

pub struct ClickHouseStore {
    client: reqwest::Client,
    url: String,
    database: String,
    user: String,
    password: String,
}

impl ClickHouseStore {
    pub fn new(settings: &Settings) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.fetch_timeout_s))
            .build()?;
        Ok(Self {
            client,
            url: settings.clickhouse_url.clone(),
            database: settings.clickhouse_database.clone(),
            user: settings.clickhouse_user.clone(),
            password: settings.clickhouse_password.clone(),
        })
    }

    async fn query_rows<T: serde::de::DeserializeOwned>(
        &self,
        sql: String,
    ) -> Result<Vec<T>, StoreError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("X-ClickHouse-User", &self.user)
            .body(sql);
        if !self.password.is_empty() {
            req = req.header("X-ClickHouse-Key", &self.password);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }
}

fn since_iso(since_minutes: i64) -> String {
    (Utc::now() - ChronoDuration::minutes(since_minutes))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

fn ais_query(database: &str, bbox: &Bbox, since: &str, limit: usize) -> String {
    format!(
        "SELECT mmsi, name AS ship_name, \
                toFloat64(lat) AS lat, toFloat64(lng) AS lng, \
                toFloat64(sog) AS sog, toFloat64(cog) AS cog, \
                toFloat64(heading) AS heading, ts, received_at \
         FROM {database}.ais_current FINAL \
         WHERE ts > parseDateTimeBestEffort('{since}') \
           AND lat BETWEEN {min_lat} AND {max_lat} \
           AND lng BETWEEN {min_lon} AND {max_lon} \
         ORDER BY ts DESC \
         LIMIT {limit} \
         FORMAT JSONEachRow",
        min_lat = bbox.min_lat,
        max_lat = bbox.max_lat,
        min_lon = bbox.min_lon,
        max_lon = bbox.max_lon,
    )
}

fn arpa_query(database: &str, bbox: &Bbox, since: &str, limit: usize) -> String {
    format!(
        "SELECT target, \
                toFloat64(lat) AS lat, toFloat64(lng) AS lng, \
                toFloat64(speed) AS speed, toFloat64(course) AS course, \
                toFloat64(distanceNM) AS distance_nm, toFloat64(bearing) AS bearing, \
                recv_at, received_at \
         FROM {database}.arpa_current FINAL \
         WHERE recv_at > parseDateTimeBestEffort('{since}') \
           AND lat BETWEEN {min_lat} AND {max_lat} \
           AND lng BETWEEN {min_lon} AND {max_lon} \
         ORDER BY recv_at DESC \
         LIMIT {limit} \
         FORMAT JSONEachRow",
        min_lat = bbox.min_lat,
        max_lat = bbox.max_lat,
        min_lon = bbox.min_lon,
        max_lon = bbox.max_lon,
    )
}

#[async_trait]
impl TrackStore for ClickHouseStore {
    async fn fetch_ais(
        &self,
        bbox: &Bbox,
        since_minutes: i64,
        limit: usize,
    ) -> Result<Vec<AisRecord>, StoreError> {
        let sql = ais_query(&self.database, bbox, &since_iso(since_minutes), limit);
        self.query_rows(sql).await
    }

    async fn fetch_arpa(
        &self,
        bbox: &Bbox,
        since_minutes: i64,
        limit: usize,
    ) -> Result<Vec<ArpaRecord>, StoreError> {
        let sql = arpa_query(&self.database, bbox, &since_iso(since_minutes), limit);
        self.query_rows(sql).await
    }

    async fn ping(&self) -> bool {
        match self.client.post(&self.url).body("SELECT 1").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

// ── In-memory test double ─────────────────────────────────────────────────────

/// Fixture store for tests: applies the bbox filter and limits, leaving
/// time-window behavior to the fixture data itself.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    pub ais: Vec<AisRecord>,
    pub arpa: Vec<ArpaRecord>,
}

#[cfg(test)]
#[async_trait]
impl TrackStore for MemoryStore {
    async fn fetch_ais(
        &self,
        bbox: &Bbox,
        _since_minutes: i64,
        limit: usize,
    ) -> Result<Vec<AisRecord>, StoreError> {
        Ok(self
            .ais
            .iter()
            .filter(|r| bbox.contains(r.lat, r.lng))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_arpa(
        &self,
        bbox: &Bbox,
        _since_minutes: i64,
        limit: usize,
    ) -> Result<Vec<ArpaRecord>, StoreError> {
        Ok(self
            .arpa
            .iter()
            .filter(|r| bbox.contains(r.lat, r.lng))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
