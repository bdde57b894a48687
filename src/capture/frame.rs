use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Shared origin so timestamps keep increasing across camera rebinds.
static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// A raw camera frame as delivered by a [`FrameSource`](super::FrameSource).
///
/// Owned by whichever pipeline stage currently holds it. Superseded frames are
/// dropped, never queued.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Immutable pixel data - can be handed between threads without copying
    pub data: Bytes,

    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,

    /// Sensor orientation reported by the camera, clockwise, multiple of 90
    pub rotation_degrees: i32,

    pub lens_facing: LensFacing,

    /// Monotonic capture time in milliseconds since the process clock origin
    pub timestamp_ms: u64,

    /// Instant of capture, for latency tracking only
    pub captured_at: Instant,
}

impl Frame {
    /// Bytes required to hold a full frame of this size and format, if fixed.
    pub fn expected_len(&self) -> Option<usize> {
        let pixels = self.width as usize * self.height as usize;
        match self.format {
            PixelFormat::Rgba8888 => Some(pixels * 4),
            PixelFormat::Rgb24 => Some(pixels * 3),
            PixelFormat::Yuyv4 => Some(pixels * 2),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Pixel formats we accept from the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8888,
    Rgb24,
    Yuyv4,
    Mjpeg,
}

/// Which way the lens points. Front-facing frames are mirrored before detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    #[default]
    Front,
    Back,
}

/// Monotonic millisecond clock. Every instance counts from the same origin.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: *CLOCK_ORIGIN,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clocks_share_an_origin() {
        let first = MonotonicClock::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = MonotonicClock::new();
        assert_eq!(first.origin, second.origin);
        assert!(second.now_ms() >= 5);
    }

    #[test]
    fn mjpeg_has_no_fixed_length() {
        let frame = Frame {
            data: Bytes::new(),
            width: 4,
            height: 2,
            format: PixelFormat::Mjpeg,
            rotation_degrees: 0,
            lens_facing: LensFacing::Back,
            timestamp_ms: 0,
            captured_at: Instant::now(),
        };
        assert_eq!(frame.expected_len(), None);
        assert_eq!(
            Frame {
                format: PixelFormat::Yuyv4,
                ..frame
            }
            .expected_len(),
            Some(16)
        );
    }
}
