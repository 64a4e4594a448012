use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::PersistenceBridge;

/// Watcher state shared with the status endpoint.
#[derive(Default)]
pub struct WatcherState {
    pub online: Mutex<bool>,
    pub pending: Mutex<usize>,
    pub uploaded: Mutex<u64>,
    pub rejected: Mutex<u64>,
    pub last_probe: Mutex<Option<Instant>>,
}

/// Periodically probes the object store and flushes the pending queue each
/// time connectivity comes back.
pub struct ConnectivityWatcher {
    pub state: Arc<WatcherState>,
    _task: JoinHandle<()>,
}

impl ConnectivityWatcher {
    pub fn start(
        bridge: Arc<AsyncMutex<PersistenceBridge>>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(WatcherState::default());
        let shared = state.clone();

        let task = tokio::spawn(async move {
            tracing::info!("Connectivity watcher started (every {:?})", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tick(&bridge, &shared).await;
                    }
                }
            }

            tracing::info!("Connectivity watcher stopped");
        });

        Self { state, _task: task }
    }
}

/// One probe. Returns true if a flush ran.
///
/// The probe runs on a cloned store with the bridge unlocked, so a stalled
/// network never blocks the status endpoint.
pub async fn tick(bridge: &AsyncMutex<PersistenceBridge>, state: &WatcherState) -> bool {
    let store = bridge.lock().await.store().clone();
    let online = store.probe().await;
    let was_online = std::mem::replace(&mut *state.online.lock().unwrap(), online);
    *state.last_probe.lock().unwrap() = Some(Instant::now());

    if online != was_online {
        tracing::info!("Object store is {}", if online { "reachable" } else { "unreachable" });
    }

    let mut bridge = bridge.lock().await;
    // Other processes queue into the same state dir.
    if let Err(e) = bridge.refresh().await {
        tracing::error!("Failed to reload local state: {}", e);
        return false;
    }
    *state.pending.lock().unwrap() = bridge.queue().len();

    // Flush on the offline -> online edge, and on every online probe while
    // entries remain (an earlier flush may have stopped part way).
    if !online || bridge.queue().is_empty() {
        return false;
    }

    match bridge.retry_pending().await {
        Ok(report) => {
            *state.uploaded.lock().unwrap() += report.uploaded.len() as u64;
            *state.rejected.lock().unwrap() += report.rejected.len() as u64;
            *state.pending.lock().unwrap() = report.remaining;
            for (point, url) in &report.uploaded {
                tracing::info!("Queued composite for {} uploaded: {}", point, url);
            }
            for (point, reason) in &report.rejected {
                tracing::error!("Queued composite for {} rejected: {}", point, reason);
            }
        }
        Err(e) => tracing::error!("Retrying pending uploads failed: {}", e),
    }
    true
}
