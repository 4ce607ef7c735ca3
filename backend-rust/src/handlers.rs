//! # handlers
//!
//! HTTP/WebSocket façade: matching on demand, cache introspection,
//! listener control, and the subscriber socket. Thin layer — every
//! handler delegates to a component and shapes the JSON.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use fusion_core::PolygonCoords;

use crate::broadcast::Broadcaster;
use crate::cache::RecentTrackCache;
use crate::config::Settings;
use crate::listener::UpstreamListener;
use crate::matcher::{MatchController, MatchResponse};
use crate::store::TrackStore;

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn TrackStore>,
    pub cache: Arc<RecentTrackCache>,
    pub controller: Arc<MatchController>,
    pub listener: Arc<UpstreamListener>,
    pub broadcaster: Arc<Broadcaster>,
    pub started_at_ms: u64,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Service info & health ─────────────────────────────────────────────────────

pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": "track-fusion",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "websocket_url": state.settings.websocket_url,
        "endpoints": {
            "health": "/health",
            "match": "/match",
            "websocket": "/ws",
            "cache_stats": "/cache/stats",
            "cache_recent": "/cache/recent",
            "cache_clear": "/cache/clear",
            "listener_status": "/listener/status",
            "listener_start": "/listener/start",
            "listener_stop": "/listener/stop",
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let store_ok = state.store.ping().await;
    let cache_stats = state.cache.stats().await;
    let uptime_secs = (now_ms().saturating_sub(state.started_at_ms)) / 1000;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime_secs,
        "clickhouse": if store_ok { "connected" } else { "disconnected" },
        "redis": if cache_stats.backend == "redis" { "connected" } else { "disconnected" },
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Matching ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub polygon: PolygonCoords,
    pub since_minutes: Option<i64>,
    pub ais_limit: Option<usize>,
    pub arpa_limit: Option<usize>,
}

pub async fn run_match(
    State(state): State<AppState>,
    Json(req): Json<MatchRequest>,
) -> Json<MatchResponse> {
    let polygon = if req.polygon.is_empty() {
        None
    } else {
        Some(&req.polygon)
    };
    let response = state
        .controller
        .match_cycle(
            polygon,
            req.since_minutes.unwrap_or(state.settings.since_minutes),
            req.ais_limit.unwrap_or(state.settings.ais_limit),
            req.arpa_limit.unwrap_or(state.settings.arpa_limit),
        )
        .await;

    // Subscribers see every successful cycle, whichever path triggered it.
    if response.success {
        let trigger = json!({ "source": "api", "polygon": req.polygon });
        let envelope = crate::listener::assignments_envelope(&response, &trigger);
        state.broadcaster.broadcast(&envelope).await;
    }
    Json(response)
}

// ── Cache introspection ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.cache.stats().await).unwrap_or_default())
}

pub async fn cache_recent(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(100);
    Json(json!({
        "data": state.cache.get_recent(limit).await,
        "stats": state.cache.stats().await,
    }))
}

pub async fn cache_clear(State(state): State<AppState>) -> Json<Value> {
    state.cache.clear().await;
    Json(json!({ "message": "Cache cleared successfully" }))
}

// ── Listener control ──────────────────────────────────────────────────────────

pub async fn listener_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.listener.status().await)
}

pub async fn listener_start(State(state): State<AppState>) -> Json<Value> {
    Json(state.listener.start().await)
}

pub async fn listener_stop(State(state): State<AppState>) -> Json<Value> {
    Json(state.listener.stop().await)
}

// ── Subscriber WebSocket ──────────────────────────────────────────────────────

pub async fn ws_endpoint(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// On accept: one `initial_data` message with the recent cache, then
/// every broadcast envelope in FIFO order until the client goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    info!("ws: client connected");

    let initial = json!({
        "type": "initial_data",
        "data": state.cache.get_recent(50).await,
        "cache_stats": state.cache.stats().await,
        "timestamp": Utc::now().to_rfc3339(),
    });
    if sender.send(Message::Text(initial.to_string())).await.is_err() {
        return;
    }

    let (id, mut rx) = state.broadcaster.subscribe().await;

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    debug!("ws: client message: {}", text.chars().take(100).collect::<String>());
                    let receipt = json!({
                        "status": "received",
                        "message": text,
                        "timestamp": Utc::now().to_rfc3339(),
                    });
                    if sender.send(Message::Text(receipt.to_string())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("ws: client read error: {e}");
                    break;
                }
            },
        }
    }

    state.broadcaster.unsubscribe(id).await;
    info!("ws: client disconnected");
}
