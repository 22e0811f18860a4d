use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub slot: SlotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Still-frame endpoint of the camera, e.g. `http://camera.local:8080/frame`.
    /// Only the producer needs it; see [`Config::camera_url`].
    #[serde(default)]
    pub camera_url: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Spatial downsampling factor applied before compression, in (0, 1].
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// JPEG quality in [0, 1].
    #[serde(default = "default_quality")]
    pub quality: f32,
    #[serde(default = "default_max_snapshot_kb")]
    pub max_snapshot_kb: f64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotBackendKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotConfig {
    #[serde(default = "default_slot_backend")]
    pub backend: SlotBackendKind,
    #[serde(default = "default_slot_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_url: None,
            interval_secs: default_interval_secs(),
            scale: default_scale(),
            quality: default_quality(),
            max_snapshot_kb: default_max_snapshot_kb(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            backend: default_slot_backend(),
            path: default_slot_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let capture = &self.capture;
        if !(capture.scale > 0.0 && capture.scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "capture.scale must be in (0, 1], got {}",
                capture.scale
            )));
        }
        if !(0.0..=1.0).contains(&capture.quality) {
            return Err(ConfigError::Invalid(format!(
                "capture.quality must be in [0, 1], got {}",
                capture.quality
            )));
        }
        if capture.interval_secs == 0 {
            return Err(ConfigError::Invalid("capture.interval_secs must be > 0".into()));
        }
        if !(capture.max_snapshot_kb > 0.0) {
            return Err(ConfigError::Invalid("capture.max_snapshot_kb must be > 0".into()));
        }
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::Invalid("inference.timeout_secs must be > 0".into()));
        }
        Ok(())
    }

    /// The camera endpoint, which is mandatory for capturing.
    pub fn camera_url(&self) -> Result<&str, ConfigError> {
        match self.capture.camera_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(ConfigError::Invalid("capture.camera_url is required".into())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_interval_secs() -> u64 {
    10
}
fn default_scale() -> f32 {
    0.5
}
fn default_quality() -> f32 {
    0.5
}
fn default_max_snapshot_kb() -> f64 {
    5120.0
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_server_url() -> String {
    "http://127.0.0.1:3000".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_port() -> u16 {
    3000
}
fn default_inference_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_inference_timeout_secs() -> u64 {
    30
}
fn default_slot_backend() -> SlotBackendKind {
    SlotBackendKind::File
}
fn default_slot_path() -> PathBuf {
    PathBuf::from("lastImage.jpg")
}
fn default_log_level() -> String {
    "info".into()
}
