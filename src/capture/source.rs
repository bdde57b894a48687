use std::time::{Duration, Instant};

use bytes::Bytes;

use super::frame::{Frame, LensFacing, MonotonicClock, PixelFormat};
use crate::error::Result;

/// The camera collaborator: yields frames at sensor rate.
///
/// `next_frame` blocks until the sensor has a frame ready. Implementations
/// live on the capture thread and must never wait on detection or rendering.
pub trait FrameSource {
    fn lens_facing(&self) -> LensFacing;

    fn next_frame(&mut self) -> Result<Frame>;

    /// Frames lost before they reached us, e.g. dropped by the driver.
    fn dropped_frames(&self) -> u64 {
        0
    }
}

/// Generates a moving gradient at a fixed rate. Stands in for a camera in
/// demos and tests.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    rotation_degrees: i32,
    lens_facing: LensFacing,
    interval: Duration,
    clock: MonotonicClock,
    next_due: Option<Instant>,
    sequence: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            rotation_degrees: 0,
            lens_facing: LensFacing::Front,
            interval: Duration::from_secs(1) / fps.max(1),
            clock: MonotonicClock::new(),
            next_due: None,
            sequence: 0,
        }
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation_degrees = degrees;
        self
    }

    pub fn with_lens_facing(mut self, lens_facing: LensFacing) -> Self {
        self.lens_facing = lens_facing;
        self
    }

    fn render(&self) -> Vec<u8> {
        let shift = (self.sequence % 256) as u32;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height {
            for x in 0..self.width {
                let r = ((x * 255 / self.width.max(1)) + shift) % 256;
                let g = (y * 255 / self.height.max(1)) % 256;
                data.extend_from_slice(&[r as u8, g as u8, 96, 255]);
            }
        }
        data
    }
}

impl FrameSource for SyntheticSource {
    fn lens_facing(&self) -> LensFacing {
        self.lens_facing
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);
        self.sequence += 1;

        Ok(Frame {
            data: Bytes::from(self.render()),
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba8888,
            rotation_degrees: self.rotation_degrees,
            lens_facing: self.lens_facing,
            timestamp_ms: self.clock.now_ms(),
            captured_at: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_are_well_formed() {
        let mut source = SyntheticSource::new(4, 2, 1000).with_rotation(90);
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();

        assert_eq!(first.expected_len(), Some(first.data.len()));
        assert_eq!(first.rotation_degrees, 90);
        assert_eq!(first.lens_facing, LensFacing::Front);
        assert!(second.timestamp_ms >= first.timestamp_ms);
        assert_ne!(first.data, second.data);
    }
}
