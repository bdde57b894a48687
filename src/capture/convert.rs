//! Frame to detector image: decode, then rotate and mirror in one pass.
//!
//! Rotation and mirroring are folded into a single integer affine map from
//! destination to source pixel, so each output pixel is sampled exactly once.

use image::RgbaImage;
use tracing::instrument;

use super::decoder::decode_frame;
use super::frame::{Frame, LensFacing};
use crate::error::ConversionError;

/// Integer 2x3 affine map `(u, v) -> (a*u + b*v + c, d*u + e*v + f)`.
///
/// Used as the inverse mapping from output pixel to input pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelAffine {
    pub a: i64,
    pub b: i64,
    pub c: i64,
    pub d: i64,
    pub e: i64,
    pub f: i64,
}

impl PixelAffine {
    pub const IDENTITY: Self = Self {
        a: 1,
        b: 0,
        c: 0,
        d: 0,
        e: 1,
        f: 0,
    };

    /// Maps a pixel of the clockwise-rotated image back to the `width`x`height` source.
    pub fn rotation(degrees: i32, width: u32, height: u32) -> Result<Self, ConversionError> {
        let (w, h) = (i64::from(width), i64::from(height));
        let map = match degrees.rem_euclid(360) {
            0 => Self::IDENTITY,
            // dst (u, v) = (h-1-y, x)
            90 => Self {
                a: 0,
                b: 1,
                c: 0,
                d: -1,
                e: 0,
                f: h - 1,
            },
            180 => Self {
                a: -1,
                b: 0,
                c: w - 1,
                d: 0,
                e: -1,
                f: h - 1,
            },
            // dst (u, v) = (y, w-1-x)
            270 => Self {
                a: 0,
                b: -1,
                c: w - 1,
                d: 1,
                e: 0,
                f: 0,
            },
            _ => return Err(ConversionError::UnsupportedRotation(degrees)),
        };
        Ok(map)
    }

    /// Horizontal flip of an image `width` pixels wide.
    pub fn mirror_x(width: u32) -> Self {
        Self {
            a: -1,
            b: 0,
            c: i64::from(width) - 1,
            d: 0,
            e: 1,
            f: 0,
        }
    }

    /// `self ∘ inner`: apply `inner` first, then `self`.
    pub fn compose(&self, inner: &Self) -> Self {
        Self {
            a: self.a * inner.a + self.b * inner.d,
            b: self.a * inner.b + self.b * inner.e,
            c: self.a * inner.c + self.b * inner.f + self.c,
            d: self.d * inner.a + self.e * inner.d,
            e: self.d * inner.b + self.e * inner.e,
            f: self.d * inner.c + self.e * inner.f + self.f,
        }
    }

    #[inline]
    pub fn apply(&self, u: i64, v: i64) -> (i64, i64) {
        (
            self.a * u + self.b * v + self.c,
            self.d * u + self.e * v + self.f,
        )
    }
}

/// Output size of a frame after rotation.
pub fn rotated_size(width: u32, height: u32, degrees: i32) -> (u32, u32) {
    match degrees.rem_euclid(360) {
        90 | 270 => (height, width),
        _ => (width, height),
    }
}

/// Converts camera frames into the upright RGBA images the detector consumes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameConverter;

impl FrameConverter {
    pub fn new() -> Self {
        Self
    }

    /// Rotates by the frame's sensor orientation, then mirrors front-facing frames.
    #[instrument(level = "trace", skip_all, fields(ts = frame.timestamp_ms))]
    pub fn convert(&self, frame: &Frame) -> Result<RgbaImage, ConversionError> {
        // Reject bad rotations before paying for a decode.
        let rotation = PixelAffine::rotation(frame.rotation_degrees, frame.width, frame.height)?;
        let source = decode_frame(frame)?;
        let (out_w, out_h) = rotated_size(frame.width, frame.height, frame.rotation_degrees);

        let map = match frame.lens_facing {
            LensFacing::Front => rotation.compose(&PixelAffine::mirror_x(out_w)),
            LensFacing::Back => rotation,
        };

        if map == PixelAffine::IDENTITY {
            return Ok(source);
        }

        Ok(warp(&source, &map, out_w, out_h))
    }
}

fn warp(source: &RgbaImage, map: &PixelAffine, out_w: u32, out_h: u32) -> RgbaImage {
    let src = source.as_raw();
    let src_w = i64::from(source.width());
    let mut out = vec![0u8; out_w as usize * out_h as usize * 4];

    for (v, row) in out.chunks_exact_mut(out_w as usize * 4).enumerate() {
        for (u, px) in row.chunks_exact_mut(4).enumerate() {
            let (x, y) = map.apply(u as i64, v as i64);
            let offset = ((y * src_w + x) * 4) as usize;
            px.copy_from_slice(&src[offset..offset + 4]);
        }
    }

    // Sizes are derived from the source, so the buffer always fits.
    RgbaImage::from_raw(out_w, out_h, out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use bytes::Bytes;
    use std::time::Instant;

    /// 3x2 image whose red channel encodes the pixel index.
    ///
    /// ```text
    /// 0 1 2
    /// 3 4 5
    /// ```
    fn frame(rotation_degrees: i32, lens_facing: LensFacing) -> Frame {
        let data: Vec<u8> = (0..6u8).flat_map(|i| [i, 0, 0, 255]).collect();
        Frame {
            data: Bytes::from(data),
            width: 3,
            height: 2,
            format: PixelFormat::Rgba8888,
            rotation_degrees,
            lens_facing,
            timestamp_ms: 1,
            captured_at: Instant::now(),
        }
    }

    fn grid(img: &RgbaImage) -> Vec<Vec<u8>> {
        (0..img.height())
            .map(|y| (0..img.width()).map(|x| img.get_pixel(x, y).0[0]).collect())
            .collect()
    }

    fn convert(rotation: i32, facing: LensFacing) -> Vec<Vec<u8>> {
        grid(&FrameConverter::new().convert(&frame(rotation, facing)).unwrap())
    }

    #[test]
    fn back_camera_without_rotation_is_untouched() {
        assert_eq!(convert(0, LensFacing::Back), vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn rotates_clockwise() {
        assert_eq!(
            convert(90, LensFacing::Back),
            vec![vec![3, 0], vec![4, 1], vec![5, 2]]
        );
        assert_eq!(convert(180, LensFacing::Back), vec![vec![5, 4, 3], vec![2, 1, 0]]);
        assert_eq!(
            convert(270, LensFacing::Back),
            vec![vec![2, 5], vec![1, 4], vec![0, 3]]
        );
    }

    #[test]
    fn front_camera_mirrors_after_rotating() {
        assert_eq!(convert(0, LensFacing::Front), vec![vec![2, 1, 0], vec![5, 4, 3]]);
        assert_eq!(
            convert(90, LensFacing::Front),
            vec![vec![0, 3], vec![1, 4], vec![2, 5]]
        );
    }

    #[test]
    fn negative_rotation_wraps() {
        assert_eq!(convert(-90, LensFacing::Back), convert(270, LensFacing::Back));
    }

    #[test]
    fn odd_rotation_is_rejected() {
        let err = FrameConverter::new()
            .convert(&frame(45, LensFacing::Back))
            .unwrap_err();
        assert_eq!(err, ConversionError::UnsupportedRotation(45));
    }

    #[test]
    fn empty_frame_is_rejected() {
        let mut f = frame(0, LensFacing::Front);
        f.width = 0;
        assert!(matches!(
            FrameConverter::new().convert(&f),
            Err(ConversionError::EmptyFrame { .. })
        ));
    }
}
