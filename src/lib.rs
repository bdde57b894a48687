pub mod capture;
pub mod detector;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod export;
pub mod overlay;
pub mod pipeline;
pub mod session;
pub mod utils;

use std::path::{Path, PathBuf};

use capture::frame::{LensFacing, PixelFormat};
use detector::{Delegate, DetectorOptions, RunningMode};
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use error::{Error, Result};
pub use session::Session;

use crate::utils::FoundDevice;

/// Environment variables override file values, e.g. `HANDLENS__DETECTOR__NUM_HANDS=1`.
pub const ENV_PREFIX: &str = "HANDLENS";

/// System configuration, fixed for the lifetime of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub pipeline: PipelineConfig,
    pub display: DisplayConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub lens_facing: LensFacing,
    /// Sensor orientation the camera reports, clockwise
    pub rotation_degrees: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub model_asset_path: String,
    pub delegate: Delegate,
    pub num_hands: u32,
    pub min_hand_detection_confidence: f32,
    pub min_hand_presence_confidence: f32,
    pub min_tracking_confidence: f32,
    pub running_mode: RunningMode,
    /// Recorded results to replay instead of running a model
    pub replay_path: Option<PathBuf>,
    /// Simulated per-request latency of the replay detector
    pub replay_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub idle_poll_ms: u64,
    /// Report a detector request as slow after this long
    pub slow_request_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub fps_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub view_id: i64,
    /// Write `onLandmarks` calls here; stdout when unset
    pub output: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
                width: 640,
                height: 480,
                fps: 30,
                format: PixelFormat::Mjpeg,
                buffer_count: 4,
                lens_facing: LensFacing::Front,
                rotation_degrees: 0,
            },
            detector: DetectorConfig::default(),
            pipeline: PipelineConfig::default(),
            display: DisplayConfig {
                width: 720,
                height: 1280,
            },
            export: ExportConfig {
                view_id: 0,
                output: None,
            },
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let options = DetectorOptions::default();
        Self {
            model_asset_path: options.model_asset_path,
            delegate: options.delegate,
            num_hands: options.num_hands,
            min_hand_detection_confidence: options.min_hand_detection_confidence,
            min_hand_presence_confidence: options.min_hand_presence_confidence,
            min_tracking_confidence: options.min_tracking_confidence,
            running_mode: options.running_mode,
            replay_path: None,
            replay_latency_ms: 0,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 50,
            slow_request_ms: 1_000,
            shutdown_timeout_ms: 2_000,
            fps_window_ms: 1_000,
        }
    }
}

impl DetectorConfig {
    pub fn options(&self) -> DetectorOptions {
        DetectorOptions {
            model_asset_path: self.model_asset_path.clone(),
            delegate: self.delegate,
            num_hands: self.num_hands,
            min_hand_detection_confidence: self.min_hand_detection_confidence,
            min_hand_presence_confidence: self.min_hand_presence_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
            running_mode: self.running_mode,
        }
    }
}

impl Config {
    /// Defaults, then `path` if it exists, then `HANDLENS__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if d.num_hands == 0 {
            return Err(Error::InvalidConfig("detector.num_hands must be at least 1".into()));
        }
        for (name, value) in [
            ("min_hand_detection_confidence", d.min_hand_detection_confidence),
            ("min_hand_presence_confidence", d.min_hand_presence_confidence),
            ("min_tracking_confidence", d.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "detector.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.capture.rotation_degrees % 90 != 0 {
            return Err(Error::InvalidConfig(format!(
                "capture.rotation_degrees must be a multiple of 90, got {}",
                self.capture.rotation_degrees
            )));
        }
        if self.capture.fps == 0 {
            return Err(Error::InvalidConfig("capture.fps must be positive".into()));
        }
        Ok(())
    }
}

/// Performance metrics collected throughout the pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct Metrics {
    pub frames_submitted: u64,
    pub frames_superseded: u64,
    pub frames_dropped: u64,
    pub requests_dispatched: u64,
    pub slow_requests: u64,
    /// Frames the camera lost before delivery
    pub source_drops: u64,
    pub results_received: u64,
    pub detector_errors: u64,
}
