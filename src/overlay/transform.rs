//! Normalized image space to view pixels.

use serde::{Deserialize, Serialize};

use crate::detector::RunningMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    /// Whole image visible, letterboxed
    Fit,
    /// View fully covered, overflow cropped
    Fill,
}

impl From<RunningMode> for ScaleMode {
    fn from(mode: RunningMode) -> Self {
        match mode {
            RunningMode::Image | RunningMode::Video => ScaleMode::Fit,
            // Camera previews are presented center-cropped.
            RunningMode::LiveStream => ScaleMode::Fill,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Scale then translate. Recomputed for every presented result.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewTransform {
    pub scale: f32,
    pub translate_x: f32,
    pub translate_y: f32,
    /// Source image size the transform was computed for
    pub image: Size,
}

impl ViewTransform {
    /// Centers `image` in `view`, scaled per `mode`.
    ///
    /// An empty image or view yields a zero scale centered in the view, so
    /// everything collapses to a point instead of dividing by zero.
    pub fn compute(image: Size, view: Size, mode: ScaleMode) -> Self {
        let (iw, ih) = (image.width as f32, image.height as f32);
        let (vw, vh) = (view.width as f32, view.height as f32);

        let scale = if image.is_empty() || view.is_empty() {
            0.0
        } else {
            let sx = vw / iw;
            let sy = vh / ih;
            match mode {
                ScaleMode::Fit => sx.min(sy),
                ScaleMode::Fill => sx.max(sy),
            }
        };

        Self {
            scale,
            translate_x: (vw - iw * scale) / 2.0,
            translate_y: (vh - ih * scale) / 2.0,
            image,
        }
    }

    /// Maps a normalized image point to view pixels.
    #[inline]
    pub fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.image.width as f32 * self.scale + self.translate_x,
            y * self.image.height as f32 * self.scale + self.translate_y,
        )
    }

    /// Maps a view pixel back to normalized image space, for hit-testing.
    pub fn unmap(&self, px: f32, py: f32) -> Option<(f32, f32)> {
        if self.scale == 0.0 || self.image.is_empty() {
            return None;
        }
        Some((
            (px - self.translate_x) / (self.image.width as f32 * self.scale),
            (py - self.translate_y) / (self.image.height as f32 * self.scale),
        ))
    }

    /// View-space rectangle `(x, y, w, h)` covered by the whole image.
    pub fn image_rect(&self) -> (f32, f32, f32, f32) {
        (
            self.translate_x,
            self.translate_y,
            self.image.width as f32 * self.scale,
            self.image.height as f32 * self.scale,
        )
    }
}
