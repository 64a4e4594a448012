use anyhow::Context as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use crate::bridge::{PersistenceBridge, PublishOutcome, RetryReport};
use crate::config::Config;
use crate::interaction::InputEvent;
use crate::loader::ImageLoader;
use crate::points::{self, Point};
use crate::session::{CompareSession, CompositeResult};
use crate::storage::BlobStore;
use crate::transform::TransformState;

/// Everything the app shares, built once at startup and passed down.
pub struct AppContext {
    pub config: Config,
    pub loader: ImageLoader,
    pub bridge: Arc<AsyncMutex<PersistenceBridge>>,
}

/// Inputs for one compose run.
#[derive(Debug, Default)]
pub struct ComposeRequest {
    pub point_id: String,
    /// Overrides the point's catalogue reference.
    pub reference: Option<String>,
    pub overlay: String,
    /// Starting transform; fields left `None` keep the session defaults.
    pub scale: Option<f32>,
    pub offset: Option<(f32, f32)>,
    pub crop_fraction: Option<f32>,
    pub gestures: Vec<InputEvent>,
    pub upload: bool,
    pub output: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ComposeOutcome {
    pub composite: CompositeResult,
    pub published: Option<PublishOutcome>,
}

impl AppContext {
    pub async fn init(config: Config) -> anyhow::Result<Self> {
        let store = BlobStore::new(&config.storage)?;
        let bridge =
            PersistenceBridge::open(store, &config.settings.state_dir, &config.compose)
                .await
                .context("Failed to open local state")?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.storage.timeout_secs))
            .build()?;

        tracing::debug!("State directory: {}", config.settings.state_dir.display());
        Ok(Self {
            loader: ImageLoader::new(http),
            bridge: Arc::new(AsyncMutex::new(bridge)),
            config,
        })
    }

    pub fn load_points(&self) -> anyhow::Result<Vec<Point>> {
        points::load(&self.config.points.file)
    }

    fn reference_for(&self, request: &ComposeRequest) -> anyhow::Result<String> {
        if let Some(ref r) = request.reference {
            return Ok(r.clone());
        }
        let points = self.load_points()?;
        let point = points::find(&points, &request.point_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown point '{}'", request.point_id))?;
        point
            .reference_source(&self.config.points.asset_base)
            .ok_or_else(|| anyhow::anyhow!("Point '{}' has no reference screenshot", point.id))
    }

    /// Load, align, composite and optionally publish one check-in photo.
    pub async fn compose(&self, request: ComposeRequest) -> anyhow::Result<ComposeOutcome> {
        let reference = self.reference_for(&request)?;
        let mut session = CompareSession::open(self.config.compose.session_options());

        session
            .load_images(&self.loader, &reference, &request.overlay)
            .await
            .context("No screenshot")?;

        let defaults = session.transform();
        let (offset_x, offset_y) = request
            .offset
            .unwrap_or((defaults.offset_x, defaults.offset_y));
        session.set_transform(TransformState {
            scale: request.scale.unwrap_or(defaults.scale),
            offset_x,
            offset_y,
            crop_fraction: request.crop_fraction.unwrap_or(defaults.crop_fraction),
        });
        session.frame();

        for event in &request.gestures {
            session.handle(event);
            session.frame();
        }
        tracing::debug!(
            "Replayed {} gesture events, {} redraws",
            request.gestures.len(),
            session.render_count()
        );

        let composite = session.finalize(self.config.compose.jpeg_quality)?;

        if let Some(ref path) = request.output {
            tokio::fs::write(path, &composite.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }

        let published = if request.upload {
            let mut bridge = self.bridge.lock().await;
            Some(bridge.publish(&request.point_id, &composite.bytes).await?)
        } else {
            None
        };

        Ok(ComposeOutcome {
            composite,
            published,
        })
    }

    pub async fn flush(&self) -> anyhow::Result<RetryReport> {
        let mut bridge = self.bridge.lock().await;
        Ok(bridge.retry_pending().await?)
    }

    pub async fn remove(&self, point_id: &str) -> anyhow::Result<()> {
        let mut bridge = self.bridge.lock().await;
        bridge.remove(point_id).await?;
        Ok(())
    }
}

pub fn read_gestures(path: &Path) -> anyhow::Result<Vec<InputEvent>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read gesture script {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse gesture script {}: {}", path.display(), e))
}
