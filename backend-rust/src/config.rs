//! # config
//!
//! Environment-driven settings, read once at startup and immutable
//! afterwards. A value that is present but unparsable is a fatal
//! configuration error — the binary exits non-zero rather than running
//! with a half-applied config.

use std::str::FromStr;

use fusion_core::{Gates, ScoringParams};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid value for {key}: `{value}`")]
    Invalid { key: &'static str, value: String },
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, SettingsError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SettingsError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &'static str, default: bool) -> Result<bool, SettingsError> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(SettingsError::Invalid { key, value: raw }),
        },
        Err(_) => Ok(default),
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    // Server
    pub host: String,
    pub port: u16,

    // Site & projection
    pub site_lat: f64,
    pub site_lon: f64,
    pub filter_radius_km: f64,
    pub projection: String,

    // Gating & acceptance
    pub gating_distance_m: f64,
    pub time_gate_s: f64,
    pub match_threshold: f64,

    // Scoring
    pub pos_sigma_m: f64,
    pub spd_sigma_ms: f64,
    pub hdg_sigma_deg: f64,
    pub time_sigma_s: f64,
    pub range_sigma_m: f64,
    pub brg_geo_sigma_deg: f64,
    pub w_range: f64,
    pub w_brg_geo: f64,

    // Fetch defaults
    pub since_minutes: i64,
    pub ais_limit: usize,
    pub arpa_limit: usize,
    pub fetch_timeout_s: u64,

    // ClickHouse
    pub clickhouse_url: String,
    pub clickhouse_database: String,
    pub clickhouse_user: String,
    pub clickhouse_password: String,

    // Redis (cache backend); empty URL disables redis entirely
    pub redis_url: Option<String>,
    pub redis_prefix: String,
    pub cache_ttl_s: u64,
    pub cache_max_size: usize,

    // Upstream subscription
    pub websocket_url: String,
    pub reconnect_delay_s: u64,
    pub auto_start: bool,
    pub debug_replay: bool,
    pub debug_replay_interval_s: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            site_lat: -1.279656,
            site_lon: 116.809655,
            filter_radius_km: 60.0,
            projection: "utm".into(),
            gating_distance_m: 8000.0,
            time_gate_s: 1800.0,
            match_threshold: 0.8,
            pos_sigma_m: 500.0,
            spd_sigma_ms: 3.0,
            hdg_sigma_deg: 40.0,
            time_sigma_s: 60.0,
            range_sigma_m: 1500.0,
            brg_geo_sigma_deg: 15.0,
            w_range: 0.15,
            w_brg_geo: 0.15,
            since_minutes: 60,
            ais_limit: 1000,
            arpa_limit: 1000,
            fetch_timeout_s: 30,
            clickhouse_url: "http://localhost:8123".into(),
            clickhouse_database: "css".into(),
            clickhouse_user: "default".into(),
            clickhouse_password: String::new(),
            redis_url: Some("redis://127.0.0.1:6379/0".into()),
            redis_prefix: "track_fusion_".into(),
            cache_ttl_s: 3600,
            cache_max_size: 1000,
            websocket_url: "ws://localhost:1880/ws/viewshed".into(),
            reconnect_delay_s: 5,
            auto_start: true,
            debug_replay: false,
            debug_replay_interval_s: 30,
        }
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults per
    /// field. Present-but-invalid values abort startup.
    pub fn from_env() -> Result<Self, SettingsError> {
        let d = Self::default();
        let redis_url = {
            let raw = env_string("REDIS_URL", d.redis_url.as_deref().unwrap_or(""));
            if raw.trim().is_empty() {
                None
            } else {
                Some(raw)
            }
        };
        Ok(Self {
            host: env_string("HOST", &d.host),
            port: env_parse("PORT", d.port)?,
            site_lat: env_parse("SITE_LAT", d.site_lat)?,
            site_lon: env_parse("SITE_LON", d.site_lon)?,
            filter_radius_km: env_parse("FILTER_RADIUS_KM", d.filter_radius_km)?,
            projection: env_string("PROJECTION", &d.projection),
            gating_distance_m: env_parse("GATING_DISTANCE_M", d.gating_distance_m)?,
            time_gate_s: env_parse("TIME_GATE_S", d.time_gate_s)?,
            match_threshold: env_parse("MATCH_THRESHOLD", d.match_threshold)?,
            pos_sigma_m: env_parse("POS_SIGMA_M", d.pos_sigma_m)?,
            spd_sigma_ms: env_parse("SPD_SIGMA_MS", d.spd_sigma_ms)?,
            hdg_sigma_deg: env_parse("HDG_SIGMA_DEG", d.hdg_sigma_deg)?,
            time_sigma_s: env_parse("TIME_SIGMA_S", d.time_sigma_s)?,
            range_sigma_m: env_parse("RANGE_SIGMA_M", d.range_sigma_m)?,
            brg_geo_sigma_deg: env_parse("BEARING_GEO_SIGMA_DEG", d.brg_geo_sigma_deg)?,
            w_range: env_parse("W_RANGE", d.w_range)?,
            w_brg_geo: env_parse("W_BRG_GEO", d.w_brg_geo)?,
            since_minutes: env_parse("SINCE_MINUTES", d.since_minutes)?,
            ais_limit: env_parse("AIS_LIMIT", d.ais_limit)?,
            arpa_limit: env_parse("ARPA_LIMIT", d.arpa_limit)?,
            fetch_timeout_s: env_parse("FETCH_TIMEOUT_S", d.fetch_timeout_s)?,
            clickhouse_url: env_string("CLICKHOUSE_URL", &d.clickhouse_url),
            clickhouse_database: env_string("CLICKHOUSE_DATABASE", &d.clickhouse_database),
            clickhouse_user: env_string("CLICKHOUSE_USER", &d.clickhouse_user),
            clickhouse_password: env_string("CLICKHOUSE_PASSWORD", &d.clickhouse_password),
            redis_url,
            redis_prefix: env_string("REDIS_PREFIX", &d.redis_prefix),
            cache_ttl_s: env_parse("REDIS_TTL", d.cache_ttl_s)?,
            cache_max_size: env_parse("CACHE_MAX_SIZE", d.cache_max_size)?,
            websocket_url: env_string("WEBSOCKET_URL", &d.websocket_url),
            reconnect_delay_s: env_parse("WEBSOCKET_RECONNECT_DELAY", d.reconnect_delay_s)?,
            auto_start: env_bool("WEBSOCKET_AUTO_START", d.auto_start)?,
            debug_replay: env_bool("DEBUG_REPLAY", d.debug_replay)?,
            debug_replay_interval_s: env_parse("DEBUG_REPLAY_INTERVAL_S", d.debug_replay_interval_s)?,
        })
    }

    pub fn gates(&self) -> Gates {
        Gates {
            gating_distance_m: self.gating_distance_m,
            time_gate_s: self.time_gate_s,
        }
    }

    pub fn scoring_params(&self) -> ScoringParams {
        ScoringParams {
            pos_sigma_m: self.pos_sigma_m,
            spd_sigma_ms: self.spd_sigma_ms,
            hdg_sigma_deg: self.hdg_sigma_deg,
            time_sigma_s: self.time_sigma_s,
            range_sigma_m: self.range_sigma_m,
            brg_geo_sigma_deg: self.brg_geo_sigma_deg,
            w_range: self.w_range,
            w_brg_geo: self.w_brg_geo,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let s = Settings::default();
        assert_eq!(s.gates().gating_distance_m, 8000.0);
        let p = s.scoring_params();
        assert!((p.w_pos + p.w_spd + p.w_hdg + p.w_time - 1.0).abs() < 1e-12);
        assert_eq!(p.w_range, 0.15);
    }

    #[test]
    fn invalid_numeric_value_is_fatal() {
        // A present-but-garbage value must error, not silently default.
        std::env::set_var("GATING_DISTANCE_M_TEST_PROBE", "not-a-number");
        let r: Result<f64, _> = env_parse("GATING_DISTANCE_M_TEST_PROBE", 1.0);
        assert!(r.is_err());
        std::env::remove_var("GATING_DISTANCE_M_TEST_PROBE");
    }

    #[test]
    fn bool_parsing_accepts_common_forms() {
        std::env::set_var("AUTO_START_TEST_PROBE", "True");
        assert!(env_bool("AUTO_START_TEST_PROBE", false).unwrap());
        std::env::set_var("AUTO_START_TEST_PROBE", "0");
        assert!(!env_bool("AUTO_START_TEST_PROBE", true).unwrap());
        std::env::set_var("AUTO_START_TEST_PROBE", "maybe");
        assert!(env_bool("AUTO_START_TEST_PROBE", true).is_err());
        std::env::remove_var("AUTO_START_TEST_PROBE");
    }
}
