use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;

use crate::bridge::PersistenceBridge;
use crate::watcher::WatcherState;

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    online: bool,
    last_probe_seconds_ago: Option<u64>,
    uploaded: u64,
    rejected: u64,
    checked_in: usize,
    with_image: usize,
    pending: Vec<PendingStatus>,
}

#[derive(Serialize)]
struct PendingStatus {
    point_id: String,
    key: String,
    queued_at: u64,
    attempts: u32,
}

struct AppState {
    watcher: Arc<WatcherState>,
    bridge: Arc<AsyncMutex<PersistenceBridge>>,
    start_time: Instant,
}

pub fn router(watcher: Arc<WatcherState>, bridge: Arc<AsyncMutex<PersistenceBridge>>) -> Router {
    let state = Arc::new(AppState {
        watcher,
        bridge,
        start_time: Instant::now(),
    });
    Router::new()
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Serve the HTTP status endpoint on the given port.
pub async fn serve_http(
    watcher: Arc<WatcherState>,
    bridge: Arc<AsyncMutex<PersistenceBridge>>,
    port: u16,
) -> anyhow::Result<()> {
    let app = router(watcher, bridge);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Status endpoint: http://localhost:{}/status", port);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let mut bridge = state.bridge.lock().await;
    if let Err(e) = bridge.refresh().await {
        tracing::warn!("Status: failed to reload local state: {}", e);
    }
    let checkins = bridge.checkins().entries();

    let pending = bridge
        .queue()
        .entries()
        .iter()
        .map(|e| PendingStatus {
            point_id: e.point_id.clone(),
            key: e.key.clone(),
            queued_at: e.created_at,
            attempts: e.attempts,
        })
        .collect();

    let w = &state.watcher;
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        online: *w.online.lock().unwrap(),
        last_probe_seconds_ago: w.last_probe.lock().unwrap().map(|t| t.elapsed().as_secs()),
        uploaded: *w.uploaded.lock().unwrap(),
        rejected: *w.rejected.lock().unwrap(),
        checked_in: checkins.len(),
        with_image: checkins.values().filter(|c| c.has_image).count(),
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ComposeConfig, StorageConfig};
    use crate::storage::BlobStore;

    #[tokio::test]
    async fn reports_checkins_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::with_client(
            reqwest::Client::new(),
            &StorageConfig {
                endpoint: "http://127.0.0.1:9".to_string(),
                bucket: "b".to_string(),
                api_key: None,
                public_base: None,
                timeout_secs: 1,
            },
        );
        let mut bridge = PersistenceBridge::open(store, dir.path(), &ComposeConfig::default())
            .await
            .unwrap();
        bridge.check_in("p1").await.unwrap();

        let app = router(
            Arc::new(WatcherState::default()),
            Arc::new(AsyncMutex::new(bridge)),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["checked_in"], 1);
        assert_eq!(body["with_image"], 0);
        assert_eq!(body["online"], false);
        assert!(body["pending"].as_array().unwrap().is_empty());
    }
}
