mod broadcast;
mod cache;
mod config;
mod handlers;
mod listener;
mod matcher;
mod store;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use broadcast::Broadcaster;
use cache::RecentTrackCache;
use config::Settings;
use handlers::{now_ms, AppState};
use listener::UpstreamListener;
use matcher::MatchController;
use store::{ClickHouseStore, TrackStore};

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started_at_ms = now_ms();

    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fusion_backend=info,fusion_core=info".into()),
        )
        .init();

    // Configuration and projection problems are fatal: exit non-zero
    // instead of limping along with a half-applied setup.
    let settings = Arc::new(Settings::from_env().context("configuration error")?);
    info!(
        "track-fusion v{} starting — upstream: {}",
        env!("CARGO_PKG_VERSION"),
        settings.websocket_url
    );

    let store: Arc<dyn TrackStore> = Arc::new(
        ClickHouseStore::new(&settings).context("data store client setup failed")?,
    );
    let cache = Arc::new(RecentTrackCache::new(
        settings.redis_url.as_deref(),
        &settings.redis_prefix,
        settings.cache_max_size,
        settings.cache_ttl_s,
    ));
    let controller = Arc::new(
        MatchController::new(settings.clone(), store.clone())
            .context("projection setup failed")?,
    );
    let broadcaster = Arc::new(Broadcaster::new());
    let upstream = UpstreamListener::new(
        settings.clone(),
        controller.clone(),
        cache.clone(),
        broadcaster.clone(),
    );

    if settings.auto_start {
        upstream.start().await;
    }

    let state = AppState {
        settings: settings.clone(),
        store,
        cache,
        controller,
        listener: upstream,
        broadcaster,
        started_at_ms,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/match", post(handlers::run_match))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/recent", get(handlers::cache_recent))
        .route("/cache/clear", post(handlers::cache_clear))
        .route("/listener/status", get(handlers::listener_status))
        .route("/listener/start", post(handlers::listener_start))
        .route("/listener/stop", post(handlers::listener_stop))
        .route("/ws", get(handlers::ws_endpoint))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", settings.host, settings.port);
    info!("listening on {addr}");

    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    axum::serve(tcp, app).await.context("server error")?;

    Ok(())
}
