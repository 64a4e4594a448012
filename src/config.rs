use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::interaction::DeviceClass;
use crate::points::Characters;
use crate::session::SessionOptions;
use crate::transform::{MAX_CROP_FRACTION, MIN_CROP_FRACTION};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    pub storage: StorageConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub points: PointsConfig,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub status_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Seconds between connectivity probes while watching.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            status_port: 0,
            log_level: default_log_level(),
            state_dir: default_state_dir(),
            retry_interval: default_retry_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".checkin")
}

fn default_retry_interval() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base for public object URLs; derived from `endpoint` if absent.
    #[serde(default)]
    pub public_base: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_bucket() -> String {
    "compressed-images".to_string()
}

fn default_timeout() -> u64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct ComposeConfig {
    #[serde(default = "default_crop_fraction")]
    pub default_crop_fraction: f32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_upload_max_width")]
    pub upload_max_width: u32,
    #[serde(default = "default_upload_quality")]
    pub upload_quality: u8,
    #[serde(default = "default_max_display")]
    pub max_display_width: u32,
    #[serde(default = "default_max_display")]
    pub max_display_height: u32,
    #[serde(default = "default_device")]
    pub device: DeviceClass,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_narrow_viewport")]
    pub narrow_viewport_width: u32,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            default_crop_fraction: default_crop_fraction(),
            jpeg_quality: default_jpeg_quality(),
            upload_max_width: default_upload_max_width(),
            upload_quality: default_upload_quality(),
            max_display_width: default_max_display(),
            max_display_height: default_max_display(),
            device: default_device(),
            viewport_width: default_viewport_width(),
            narrow_viewport_width: default_narrow_viewport(),
        }
    }
}

impl ComposeConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            default_crop_fraction: self.default_crop_fraction,
            max_display_width: self.max_display_width,
            max_display_height: self.max_display_height,
            device: self.device,
            viewport_width: self.viewport_width,
            narrow_viewport_width: self.narrow_viewport_width,
        }
    }
}

fn default_crop_fraction() -> f32 {
    0.3
}

fn default_jpeg_quality() -> u8 {
    92
}

fn default_upload_max_width() -> u32 {
    720
}

fn default_upload_quality() -> u8 {
    85
}

fn default_max_display() -> u32 {
    600
}

fn default_device() -> DeviceClass {
    DeviceClass::Mouse
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_narrow_viewport() -> u32 {
    700
}

#[derive(Debug, Deserialize)]
pub struct PointsConfig {
    #[serde(default = "default_points_file")]
    pub file: PathBuf,
    /// Where `./`-relative reference paths resolve to (URL or directory).
    #[serde(default = "default_asset_base")]
    pub asset_base: String,
    #[serde(default)]
    pub characters: Characters,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            file: default_points_file(),
            asset_base: default_asset_base(),
            characters: Characters::default(),
        }
    }
}

fn default_points_file() -> PathBuf {
    PathBuf::from("data/points.json")
}

fn default_asset_base() -> String {
    "data".to_string()
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let storage = &self.storage;
        if !(storage.endpoint.starts_with("http://") || storage.endpoint.starts_with("https://")) {
            anyhow::bail!("storage.endpoint must be an http(s) URL, got '{}'", storage.endpoint);
        }
        if storage.bucket.is_empty() {
            anyhow::bail!("storage.bucket must not be empty");
        }
        if storage.timeout_secs == 0 {
            anyhow::bail!("storage.timeout_secs must be > 0");
        }

        let compose = &self.compose;
        if !(MIN_CROP_FRACTION..=MAX_CROP_FRACTION).contains(&compose.default_crop_fraction) {
            anyhow::bail!(
                "compose.default_crop_fraction must be {} to {}",
                MIN_CROP_FRACTION,
                MAX_CROP_FRACTION
            );
        }
        for (name, q) in [
            ("jpeg_quality", compose.jpeg_quality),
            ("upload_quality", compose.upload_quality),
        ] {
            if !(1..=100).contains(&q) {
                anyhow::bail!("compose.{} must be 1 to 100", name);
            }
        }
        if self.settings.retry_interval == 0 {
            anyhow::bail!("settings.retry_interval must be > 0");
        }
        Ok(())
    }
}
