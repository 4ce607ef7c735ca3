//! # listener
//!
//! Upstream viewshed subscription — the push-side trigger for matching
//! cycles.
//!
//! One long-running task holds a WebSocket subscription to the upstream
//! channel. A text frame is a trigger when it is a GeoJSON
//! FeatureCollection containing a `visible_sea_area` polygon; its outer
//! ring becomes the spatial filter for one matching cycle, and the
//! resulting `assignments_weighted` envelope is broadcast to subscribers
//! and written back upstream. Everything else on the channel is ignored.
//!
//! Connection errors never kill the task: while the listener is active it
//! reconnects after the configured delay; a stop request flips
//! `is_active`, wakes the loop, closes the connection and exits without
//! reconnecting. A debug mode replays a synthetic viewshed on a timer
//! instead of connecting, for offline testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use fusion_core::{Bbox, PolygonCoords};

use crate::broadcast::Broadcaster;
use crate::cache::RecentTrackCache;
use crate::config::Settings;
use crate::matcher::{MatchController, MatchResponse};

pub struct UpstreamListener {
    settings: Arc<Settings>,
    controller: Arc<MatchController>,
    cache: Arc<RecentTrackCache>,
    broadcaster: Arc<Broadcaster>,
    is_active: AtomicBool,
    is_connected: AtomicBool,
    stop_notify: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UpstreamListener {
    pub fn new(
        settings: Arc<Settings>,
        controller: Arc<MatchController>,
        cache: Arc<RecentTrackCache>,
        broadcaster: Arc<Broadcaster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            controller,
            cache,
            broadcaster,
            is_active: AtomicBool::new(false),
            is_connected: AtomicBool::new(false),
            stop_notify: Notify::new(),
            task: Mutex::new(None),
        })
    }

    // ── Control surface ───────────────────────────────────────────────────────

    pub async fn start(self: &Arc<Self>) -> Value {
        if self.is_active.swap(true, Ordering::SeqCst) {
            return json!({
                "status": "already_active",
                "message": "listener is already running",
                "is_active": true,
            });
        }

        let mut task = self.task.lock().await;
        let needs_spawn = task.as_ref().map(|t| t.is_finished()).unwrap_or(true);
        if needs_spawn {
            let this = Arc::clone(self);
            *task = Some(tokio::spawn(async move {
                if this.settings.debug_replay {
                    this.run_debug_replay().await;
                } else {
                    this.run().await;
                }
            }));
            info!("listener: started");
        }

        json!({
            "status": "started",
            "message": "listener started successfully",
            "is_active": true,
            "url": self.settings.websocket_url,
        })
    }

    pub async fn stop(&self) -> Value {
        if !self.is_active.swap(false, Ordering::SeqCst) {
            return json!({
                "status": "already_inactive",
                "message": "listener is already stopped",
                "is_active": false,
            });
        }
        // Wake the loop out of a blocking read or a reconnect sleep so the
        // connection is closed promptly.
        self.stop_notify.notify_waiters();
        info!("listener: stopped");
        json!({
            "status": "stopped",
            "message": "listener stopped successfully",
            "is_active": false,
        })
    }

    pub async fn status(&self) -> Value {
        let task = self.task.lock().await;
        let task_status = match task.as_ref() {
            None => "none",
            Some(t) if t.is_finished() => "completed",
            Some(_) => "running",
        };
        json!({
            "is_active": self.is_active.load(Ordering::SeqCst),
            "task_status": task_status,
            "websocket_url": self.settings.websocket_url,
            "auto_start": self.settings.auto_start,
            "debug_replay": self.settings.debug_replay,
            "connection_status": if self.is_connected.load(Ordering::SeqCst) {
                "connected"
            } else {
                "disconnected"
            },
            "subscribers": self.broadcaster.count().await,
        })
    }

    // ── Subscription loop ─────────────────────────────────────────────────────

    async fn run(self: Arc<Self>) {
        let url = self.settings.websocket_url.clone();
        let reconnect_delay = Duration::from_secs(self.settings.reconnect_delay_s);

        while self.is_active.load(Ordering::SeqCst) {
            info!("listener: connecting to {url}");
            match connect_async(url.as_str()).await {
                Ok((stream, _resp)) => {
                    info!("listener: connected to {url}");
                    self.is_connected.store(true, Ordering::SeqCst);
                    let (mut write, mut read) = stream.split();

                    loop {
                        tokio::select! {
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    if !self.is_active.load(Ordering::SeqCst) {
                                        let _ = write.close().await;
                                        break;
                                    }
                                    if let Some(reply) = self.handle_frame(text.as_str()).await {
                                        if let Err(e) = write.send(Message::text(reply)).await {
                                            warn!("listener: upstream send failed: {e}");
                                            break;
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    warn!("listener: connection closed by server");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!("listener: read error: {e}");
                                    break;
                                }
                                None => {
                                    warn!("listener: stream ended");
                                    break;
                                }
                            },
                            _ = self.stop_notify.notified() => {
                                let _ = write.close().await;
                                break;
                            }
                        }
                    }
                    self.is_connected.store(false, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!("listener: connection error: {e}");
                }
            }

            if !self.is_active.load(Ordering::SeqCst) {
                break;
            }
            debug!("listener: reconnecting in {}s", reconnect_delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(reconnect_delay) => {}
                _ = self.stop_notify.notified() => break,
            }
        }
        info!("listener: loop terminated");
    }

    /// Offline mode: feed a synthetic viewshed around the site through
    /// the normal trigger path on a timer.
    async fn run_debug_replay(self: Arc<Self>) {
        let interval = Duration::from_secs(self.settings.debug_replay_interval_s.max(1));
        let frame = debug_replay_frame(
            self.settings.site_lat,
            self.settings.site_lon,
            self.settings.filter_radius_km / 2.0,
        )
        .to_string();
        info!(
            "listener: debug replay every {}s (no upstream connection)",
            interval.as_secs()
        );
        while self.is_active.load(Ordering::SeqCst) {
            self.handle_frame(&frame).await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop_notify.notified() => break,
            }
        }
        info!("listener: debug replay terminated");
    }

    /// Process one upstream frame. Returns the envelope to write back on
    /// the channel when the frame triggered a successful cycle.
    async fn handle_frame(&self, text: &str) -> Option<String> {
        let message: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!("listener: ignoring non-JSON frame: {e}");
                return None;
            }
        };

        let polygon = match extract_viewshed_polygon(&message) {
            Some(p) => p,
            None => {
                debug!("listener: frame carries no visible_sea_area polygon, ignoring");
                return None;
            }
        };

        info!("listener: viewshed trigger received, running matching cycle");
        let response = self
            .controller
            .match_cycle(
                Some(&polygon),
                self.settings.since_minutes,
                self.settings.ais_limit,
                self.settings.arpa_limit,
            )
            .await;

        self.cache
            .add(
                message.clone(),
                json!({
                    "source": "viewshed_listener",
                    "received_at": Utc::now().to_rfc3339(),
                    "cycle_success": response.success,
                }),
                None,
            )
            .await;

        if !response.success {
            error!("listener: cycle failed: {}", response.message);
            return None;
        }

        let envelope = assignments_envelope(&response, &message);
        self.broadcaster.broadcast(&envelope).await;
        Some(envelope.to_string())
    }
}

// ── Frame parsing & envelopes ─────────────────────────────────────────────────

/// Extract the outer-ring polygon of the `visible_sea_area` feature from
/// a FeatureCollection frame, if this frame is a trigger at all.
pub fn extract_viewshed_polygon(message: &Value) -> Option<PolygonCoords> {
    if message.get("type")?.as_str()? != "FeatureCollection" {
        return None;
    }
    for feature in message.get("features")?.as_array()? {
        let is_viewshed = feature
            .pointer("/properties/type")
            .and_then(Value::as_str)
            .map(|t| t == "visible_sea_area")
            .unwrap_or(false);
        if !is_viewshed {
            continue;
        }
        let geometry = feature.get("geometry")?;
        if geometry.get("type").and_then(Value::as_str) != Some("Polygon") {
            continue;
        }
        let polygon: PolygonCoords =
            serde_json::from_value(geometry.get("coordinates")?.clone()).ok()?;
        if polygon.first().map(|ring| ring.len()).unwrap_or(0) >= 3 {
            return Some(polygon);
        }
    }
    None
}

/// The outbound envelope written back on the trigger channel and fanned
/// out to subscribers: matched pairs, unmatched lists, and the original
/// trigger echoed under `message_listener`.
pub fn assignments_envelope(response: &MatchResponse, trigger: &Value) -> Value {
    let (pairs, unmatched_ais, unmatched_arpa) = match &response.data {
        Some(data) => (
            serde_json::to_value(&data.matched_pairs).unwrap_or_default(),
            serde_json::to_value(&data.unmatched_ais).unwrap_or_default(),
            serde_json::to_value(&data.unmatched_arpa).unwrap_or_default(),
        ),
        None => (json!([]), json!([]), json!([])),
    };
    json!({
        "type": "assignments_weighted",
        "pairs": pairs,
        "unmatched_ais": unmatched_ais,
        "unmatched_arpa": unmatched_arpa,
        "message_listener": trigger,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Synthetic trigger used by debug replay: a rectangular viewshed of
/// `half_span_km` around the site.
fn debug_replay_frame(site_lat: f64, site_lon: f64, half_span_km: f64) -> Value {
    let bbox = Bbox::around_site(site_lat, site_lon, half_span_km);
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": { "type": "visible_sea_area", "bearing": 0.0, "zoom": 12.0 },
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [bbox.min_lon, bbox.min_lat],
                    [bbox.min_lon, bbox.max_lat],
                    [bbox.max_lon, bbox.max_lat],
                    [bbox.max_lon, bbox.min_lat],
                    [bbox.min_lon, bbox.min_lat],
                ]]
            }
        }]
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewshed_polygon_is_extracted_from_trigger_frame() {
        let frame = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "type": "camera_position" },
                    "geometry": { "type": "Point", "coordinates": [116.8, -1.28] }
                },
                {
                    "type": "Feature",
                    "properties": { "type": "visible_sea_area", "bearing": 45.0, "zoom": 11.0 },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[
                            [116.78, -1.25], [116.78, -1.32],
                            [116.85, -1.32], [116.85, -1.25],
                            [116.78, -1.25]
                        ]]
                    }
                }
            ]
        });
        let polygon = extract_viewshed_polygon(&frame).unwrap();
        assert_eq!(polygon[0].len(), 5);
        assert_eq!(polygon[0][0], vec![116.78, -1.25]);
    }

    #[test]
    fn non_trigger_frames_are_ignored() {
        assert!(extract_viewshed_polygon(&json!({"type": "ping"})).is_none());
        assert!(extract_viewshed_polygon(&json!({
            "type": "FeatureCollection",
            "features": []
        }))
        .is_none());
        // A viewshed feature with the wrong geometry type is not a trigger.
        assert!(extract_viewshed_polygon(&json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "type": "visible_sea_area" },
                "geometry": { "type": "Point", "coordinates": [116.8, -1.28] }
            }]
        }))
        .is_none());
    }

    #[test]
    fn debug_frame_round_trips_through_extraction() {
        let frame = debug_replay_frame(-1.279656, 116.809655, 30.0);
        let polygon = extract_viewshed_polygon(&frame).unwrap();
        let bbox = Bbox::of_polygon(&polygon).unwrap();
        assert!(bbox.contains(-1.279656, 116.809655));
    }

    #[test]
    fn envelope_carries_pairs_and_echoes_trigger() {
        let trigger = json!({"type": "FeatureCollection", "features": []});
        let response = MatchResponse {
            success: true,
            message: "ok".into(),
            data: None,
            timestamp: Utc::now().to_rfc3339(),
        };
        let envelope = assignments_envelope(&response, &trigger);
        assert_eq!(envelope["type"], "assignments_weighted");
        assert_eq!(envelope["message_listener"], trigger);
        assert!(envelope["pairs"].as_array().unwrap().is_empty());
    }
}
