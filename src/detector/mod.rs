//! Hand landmark detector collaborator.
//!
//! The detector itself is opaque. It accepts an image plus a strictly
//! increasing timestamp and later reports a [`DetectionResult`] or a
//! [`DetectorError`] through the callback it was created with, on a thread of
//! its own choosing.

pub mod replay;

use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, Result};

pub use replay::{ReplayDetector, ReplayDetectorFactory};

/// Number of landmarks in one hand.
pub const NUM_LANDMARKS: usize = 21;

/// A normalized landmark: `x`, `y` in image space (roughly `[0, 1]`), `z` depth
/// relative to the wrist.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// One classification candidate, e.g. `"Left"` with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub category_name: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hand {
    /// Ordered by landmark index, normally [`NUM_LANDMARKS`] long
    pub landmarks: Vec<Landmark>,
    /// Handedness candidates, best first. May be empty.
    #[serde(default)]
    pub handedness: Vec<Category>,
}

impl Hand {
    /// Name of the top handedness category, if the detector produced one.
    pub fn handedness_label(&self) -> Option<&str> {
        self.handedness.first().map(|c| c.category_name.as_str())
    }
}

/// Describes the image a result was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDescriptor {
    pub width: u32,
    pub height: u32,
    /// The request's correlation timestamp
    pub timestamp_ms: u64,
}

/// Immutable once produced. Shared read-only between renderer and exporter.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub hands: Vec<Hand>,
    pub input: InputDescriptor,
}

impl DetectionResult {
    pub fn timestamp_ms(&self) -> u64 {
        self.input.timestamp_ms
    }

    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }
}

/// What a detector reports through its callback.
#[derive(Debug, Clone)]
pub enum DetectorEvent {
    Result(DetectionResult),
    Error(DetectorError),
}

/// Completion callback, registered once when the detector is created.
pub type DetectorCallback = Arc<dyn Fn(DetectorEvent) + Send + Sync>;

/// Detection request as handed to the detector.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub image: Arc<RgbaImage>,
    pub timestamp_ms: u64,
}

pub trait Detector: Send {
    /// Submits a request and returns once the detector has accepted it.
    ///
    /// Completion arrives later through the callback.
    fn detect_async(&mut self, request: DetectionRequest) -> Result<(), DetectorError>;

    /// Releases the detector. No calls are made after this.
    fn close(&mut self);
}

/// Builds a detector for one session.
pub trait DetectorFactory: Send + Sync {
    fn create(&self, options: &DetectorOptions, callback: DetectorCallback)
        -> Result<Box<dyn Detector>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

/// How results are consumed. Decides the overlay's scale mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningMode {
    Image,
    Video,
    #[default]
    LiveStream,
}

/// Fixed at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    pub model_asset_path: String,
    pub delegate: Delegate,
    pub num_hands: u32,
    pub min_hand_detection_confidence: f32,
    pub min_hand_presence_confidence: f32,
    pub min_tracking_confidence: f32,
    pub running_mode: RunningMode,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            model_asset_path: "hand_landmarker.task".into(),
            delegate: Delegate::Cpu,
            num_hands: 2,
            min_hand_detection_confidence: 0.5,
            min_hand_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
            running_mode: RunningMode::LiveStream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handedness_label_uses_top_category() {
        let mut hand = Hand::default();
        assert_eq!(hand.handedness_label(), None);

        hand.handedness = vec![
            Category {
                category_name: "Left".into(),
                score: 0.9,
            },
            Category {
                category_name: "Right".into(),
                score: 0.1,
            },
        ];
        assert_eq!(hand.handedness_label(), Some("Left"));
    }

    #[test]
    fn default_options() {
        let opts = DetectorOptions::default();
        assert_eq!(opts.num_hands, 2);
        assert_eq!(opts.min_hand_detection_confidence, 0.5);
        assert_eq!(opts.min_hand_presence_confidence, 0.5);
        assert_eq!(opts.min_tracking_confidence, 0.5);
        assert_eq!(opts.running_mode, RunningMode::LiveStream);
    }
}
