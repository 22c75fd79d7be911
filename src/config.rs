use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::backends::BACKEND_NAMES;
use crate::detect::{DetectionParams, ModelShape};

const DEFAULT_DEVICE_ADDR: &str = "127.0.0.1:7001";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CANDIDATES: usize = 8400;
const DEFAULT_QUEUE_DEPTH: usize = 2;

#[derive(Debug, Deserialize, Default)]
struct PathpaldConfigFile {
    device: Option<DeviceConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    address: Option<String>,
    radio_enabled: Option<bool>,
    connect_timeout_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    candidates: Option<usize>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    label: Option<String>,
    queue_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PathpaldConfig {
    pub device: DeviceSettings,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// `host:port` of the serial bridge.
    pub address: String,
    /// When false the radio reports unavailable and no connect is attempted.
    pub radio_enabled: bool,
    /// Zero disables the timeout.
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub candidates: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub label: String,
    pub queue_depth: usize,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_DEVICE_ADDR.to_string(),
            radio_enabled: true,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        let params = DetectionParams::default();
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            candidates: DEFAULT_CANDIDATES,
            confidence_threshold: params.confidence_threshold,
            iou_threshold: params.iou_threshold,
            label: params.label,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl DetectorSettings {
    pub fn shape(&self) -> ModelShape {
        ModelShape {
            width: self.input_width,
            height: self.input_height,
            candidates: self.candidates,
        }
    }

    pub fn params(&self) -> DetectionParams {
        DetectionParams {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            label: self.label.clone(),
        }
    }
}

impl PathpaldConfig {
    /// Load from the file named by `PATHPAL_CONFIG` (if set), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PATHPAL_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PathpaldConfigFile) -> Self {
        let device_file = file.device.unwrap_or_default();
        let defaults = DeviceSettings::default();
        let device = DeviceSettings {
            address: device_file.address.unwrap_or(defaults.address),
            radio_enabled: device_file.radio_enabled.unwrap_or(defaults.radio_enabled),
            connect_timeout: device_file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            reconnect_delay: device_file
                .reconnect_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
        };

        let detector_file = file.detector.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.backend),
            model_path: detector_file.model_path,
            input_width: detector_file.input_width.unwrap_or(defaults.input_width),
            input_height: detector_file.input_height.unwrap_or(defaults.input_height),
            candidates: detector_file.candidates.unwrap_or(defaults.candidates),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            iou_threshold: detector_file.iou_threshold.unwrap_or(defaults.iou_threshold),
            label: detector_file.label.unwrap_or(defaults.label),
            queue_depth: detector_file.queue_depth.unwrap_or(defaults.queue_depth),
        };

        Self { device, detector }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("PATHPAL_DEVICE_ADDR") {
            if !addr.trim().is_empty() {
                self.device.address = addr.trim().to_string();
            }
        }
        if let Ok(enabled) = std::env::var("PATHPAL_RADIO_ENABLED") {
            self.device.radio_enabled = parse_bool(&enabled).ok_or_else(|| {
                anyhow!("PATHPAL_RADIO_ENABLED must be one of 1/0, true/false, yes/no, on/off")
            })?;
        }
        if let Ok(delay) = std::env::var("PATHPAL_RECONNECT_DELAY_SECS") {
            let seconds: u64 = delay.trim().parse().map_err(|_| {
                anyhow!("PATHPAL_RECONNECT_DELAY_SECS must be an integer number of seconds")
            })?;
            self.device.reconnect_delay = Duration::from_secs(seconds);
        }
        if let Ok(backend) = std::env::var("PATHPAL_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("PATHPAL_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(value) = std::env::var("PATHPAL_CONFIDENCE_THRESHOLD") {
            self.detector.confidence_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PATHPAL_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("PATHPAL_IOU_THRESHOLD") {
            self.detector.iou_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PATHPAL_IOU_THRESHOLD must be a number"))?;
        }
        Ok(())
    }

    /// Check ranges and normalize names. Called by `load`.
    pub fn validate(&mut self) -> Result<()> {
        crate::transport::parse_endpoint(&self.device.address)
            .map_err(|e| anyhow!("device.address is invalid: {}", e))?;

        let detector = &mut self.detector;
        detector.backend = detector.backend.to_lowercase();
        if !BACKEND_NAMES.contains(&detector.backend.as_str()) {
            return Err(anyhow!(
                "detector.backend '{}' is not one of {:?}",
                detector.backend,
                BACKEND_NAMES
            ));
        }
        if detector.backend == "tract" && detector.model_path.is_none() {
            return Err(anyhow!("detector.model_path is required for the tract backend"));
        }
        for (name, value) in [
            ("confidence_threshold", detector.confidence_threshold),
            ("iou_threshold", detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector.{} must lie in [0, 1], got {}", name, value));
            }
        }
        if detector.input_width == 0 || detector.input_height == 0 {
            return Err(anyhow!("detector input dimensions must be greater than zero"));
        }
        if detector.candidates == 0 {
            return Err(anyhow!("detector.candidates must be greater than zero"));
        }
        if detector.queue_depth == 0 {
            return Err(anyhow!("detector.queue_depth must be greater than zero"));
        }
        if detector.label.trim().is_empty() {
            return Err(anyhow!("detector.label must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PathpaldConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
