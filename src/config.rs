use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::enroll::MultiFacePolicy;
use crate::pipeline::LIVE_DETECT_INTERVAL;

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("", "", "facerec"));

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEREC_CONFIG_PATH") {
    Some(path) => PathBuf::from(path),
    None => PROJECT_DIRS
        .as_ref()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml")),
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACEREC_DATA_DIR") {
    Some(path) => PathBuf::from(path),
    None => PROJECT_DIRS
        .as_ref()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".")),
});

pub const DEFAULT_THRESHOLD: f32 = 0.85;
pub const DEFAULT_GEOLOCATION_URL: &str = "http://ip-api.com/json";

/// Tensor layout names accepted for `embedder_layout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    #[default]
    Nhwc,
    Nchw,
}

impl From<Layout> for facerec_vision::model::TensorLayout {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Nhwc => Self::Nhwc,
            Layout::Nchw => Self::Nchw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum Euclidean distance accepted as a match.
    pub threshold: f32,
    pub camera: String,
    /// Enrollment input: one sub-directory of images per person.
    pub face_images_dir: PathBuf,
    /// Persisted per-person embedding units.
    pub gallery_dir: PathBuf,
    pub screenshot_dir: PathBuf,
    pub detector_model: PathBuf,
    pub embedder_model: PathBuf,
    pub embedder_input_size: u32,
    pub embedder_layout: Layout,
    pub detection_score: f32,
    pub nms_threshold: f32,
    /// Live mode runs detection on every Nth frame.
    pub live_detect_interval: u64,
    pub window_width: usize,
    pub window_height: usize,
    pub font_path: Option<PathBuf>,
    pub geolocation_url: Option<String>,
    pub augment: bool,
    pub multi_face_policy: MultiFacePolicy,
}

impl Default for Config {
    fn default() -> Self {
        let data = DATA_DIR.as_path();
        Self {
            threshold: DEFAULT_THRESHOLD,
            camera: "/dev/video0".to_string(),
            face_images_dir: data.join("FACE_IMAGES"),
            gallery_dir: data.join("Trained_Model"),
            screenshot_dir: data.join("screenshots"),
            detector_model: data.join("models/face_detection_yunet_2023mar.onnx"),
            embedder_model: data.join("models/facenet.onnx"),
            embedder_input_size: 160,
            embedder_layout: Layout::Nhwc,
            detection_score: 0.6,
            nms_threshold: 0.3,
            live_detect_interval: LIVE_DETECT_INTERVAL,
            window_width: 1280,
            window_height: 720,
            font_path: Some(PathBuf::from(
                "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            )),
            geolocation_url: Some(DEFAULT_GEOLOCATION_URL.to_string()),
            augment: true,
            multi_face_policy: MultiFacePolicy::default(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            anyhow::bail!("threshold must be a positive number, got {}", self.threshold);
        }
        if self.live_detect_interval == 0 {
            anyhow::bail!("live_detect_interval must be at least 1");
        }
        if self.embedder_input_size == 0 {
            anyhow::bail!("embedder_input_size must be at least 1");
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
