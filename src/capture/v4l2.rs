//! V4L2 camera source backed by memory-mapped buffers

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Frame, LensFacing, MonotonicClock, PixelFormat};
use crate::capture::source::FrameSource;
use crate::error::{Error, Result};
use crate::CaptureConfig;

/// Camera capture through a V4L2 device node
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    clock: MonotonicClock,
    driver_sequence: Option<u32>,
    /// Frames the driver dropped before we could dequeue them
    driver_drops: u64,
}

impl V4l2Capture {
    /// Opens the device and negotiates the configured format.
    ///
    /// Every failure here is a binding failure: the host keeps running without
    /// a camera stream.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {:?}", config.device);

        let bind = |what: &str, e: std::io::Error| Error::Binding(format!("{what}: {e}"));

        let device = Device::with_path(&config.device.path).map_err(|e| bind("open", e))?;

        let caps = device.query_caps().map_err(|e| bind("query caps", e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(Error::Binding("device doesn't support video capture".into()));
        }

        let mut fmt = device.format().map_err(|e| bind("get format", e))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Rgba8888 => FourCC::new(b"AB24"),
        };

        let actual = device.set_format(&fmt).map_err(|e| bind("set format", e))?;
        if actual.width != config.width || actual.height != config.height {
            return Err(Error::Binding(format!(
                "device negotiated {}x{} instead of {}x{}",
                actual.width, actual.height, config.width, config.height
            )));
        }

        Ok(Self {
            device: Box::new(device),
            stream: None,
            config,
            clock: MonotonicClock::new(),
            driver_sequence: None,
            driver_drops: 0,
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<()> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)
                .map_err(|e| Error::Binding(format!("request buffers: {e}")))?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    fn track_driver_sequence(&mut self, seq: u32) {
        let gap = sequence_gap(self.driver_sequence, seq);
        if gap > 0 {
            self.driver_drops += u64::from(gap);
            debug!(gap, seq, "driver dropped frames");
        }
        self.driver_sequence = Some(seq);
    }
}

/// Frames skipped between two driver sequence numbers. Wraps at `u32::MAX`;
/// a backwards step (stream restart) counts as no loss.
fn sequence_gap(prev: Option<u32>, seq: u32) -> u32 {
    let Some(prev) = prev else {
        return 0;
    };
    let gap = seq.wrapping_sub(prev).wrapping_sub(1);
    if gap < u32::MAX / 2 {
        gap
    } else {
        0
    }
}

impl FrameSource for V4l2Capture {
    fn lens_facing(&self) -> LensFacing {
        self.config.lens_facing
    }

    fn dropped_frames(&self) -> u64 {
        self.driver_drops
    }

    #[instrument(level = "trace", skip(self))]
    fn next_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Capture("stream not started".into()))?;

        let (buf, meta) = stream.next().map_err(|e| Error::Capture(e.to_string()))?;
        let captured_at = Instant::now();

        // Compressed frames only fill part of the mapped buffer.
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = Bytes::copy_from_slice(&buf[..used]);
        let driver_seq = meta.sequence;

        self.track_driver_sequence(driver_seq);

        Ok(Frame {
            data,
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
            rotation_degrees: self.config.rotation_degrees,
            lens_facing: self.config.lens_facing,
            timestamp_ms: self.clock.now_ms(),
            captured_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_skipped_driver_sequences() {
        assert_eq!(sequence_gap(None, 7), 0);
        assert_eq!(sequence_gap(Some(7), 8), 0);
        assert_eq!(sequence_gap(Some(7), 10), 2);
        assert_eq!(sequence_gap(Some(u32::MAX), 1), 1);
        assert_eq!(sequence_gap(Some(10), 3), 0);
        assert_eq!(sequence_gap(Some(10), 10), 0);
    }
}
