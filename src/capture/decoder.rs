//! Raw camera payload to RGBA8888.

use image::RgbaImage;
use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::{Frame, PixelFormat};
use crate::error::ConversionError;

/// Decodes `frame` into an upright, unmirrored RGBA image of the frame's size.
pub fn decode_frame(frame: &Frame) -> Result<RgbaImage, ConversionError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(ConversionError::EmptyFrame {
            width: frame.width,
            height: frame.height,
        });
    }

    if let Some(expected) = frame.expected_len() {
        if frame.data.len() < expected {
            return Err(ConversionError::BufferTooSmall {
                expected,
                actual: frame.data.len(),
            });
        }
    }

    let pixels = frame.width as usize * frame.height as usize;
    let rgba = match frame.format {
        PixelFormat::Rgba8888 => frame.data[..pixels * 4].to_vec(),
        PixelFormat::Rgb24 => rgb_to_rgba(&frame.data[..pixels * 3]),
        PixelFormat::Yuyv4 => yuyv_to_rgba(&frame.data[..pixels * 2]),
        PixelFormat::Mjpeg => {
            if frame.data.is_empty() {
                return Err(ConversionError::BufferTooSmall {
                    expected: 1,
                    actual: 0,
                });
            }
            decode_jpeg(frame)?
        }
    };

    let actual = rgba.len();
    RgbaImage::from_raw(frame.width, frame.height, rgba).ok_or(ConversionError::BufferTooSmall {
        expected: pixels * 4,
        actual,
    })
}

fn decode_jpeg(frame: &Frame) -> Result<Vec<u8>, ConversionError> {
    let mut decoder = Decoder::new(&frame.data[..]);
    let pixels = decoder
        .decode()
        .map_err(|e| ConversionError::Jpeg(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| ConversionError::Jpeg("missing image info".into()))?;

    if u32::from(info.width) != frame.width || u32::from(info.height) != frame.height {
        return Err(ConversionError::SizeMismatch {
            width: frame.width,
            height: frame.height,
            actual_width: info.width.into(),
            actual_height: info.height.into(),
        });
    }

    match info.pixel_format {
        JpegPixelFormat::RGB24 => Ok(rgb_to_rgba(&pixels)),
        JpegPixelFormat::L8 => Ok(pixels.iter().flat_map(|&l| [l, l, l, 255]).collect()),
        other => Err(ConversionError::Jpeg(format!(
            "unsupported jpeg pixel format {other:?}"
        ))),
    }
}

fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for chunk in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
    }
    rgba
}

/// BT.601 limited-range YUYV 4:2:2, two pixels per 4-byte macropixel.
fn yuyv_to_rgba(yuyv: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(yuyv.len() * 2);
    for px in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (px[0], px[1], px[2], px[3]);
        rgba.extend_from_slice(&yuv_to_rgba(y0, u, v));
        rgba.extend_from_slice(&yuv_to_rgba(y1, u, v));
    }
    rgba
}

fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
        255,
    ]
}
