//! SDL2 Window Display Module
//! Hosts the consumption context: draws the camera preview with the landmark
//! overlay on top and exports each delivered result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use image::RgbaImage;
use sdl2::event::{Event, WindowEvent};
use sdl2::pixels::{Color as SdlColor, PixelFormatEnum};
use sdl2::rect::{Point, Rect};
use sdl2::render::{Canvas as SdlCanvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{info, warn};

use crate::detector::RunningMode;
use crate::dispatch::ResultReceiver;
use crate::export::ExportAdapter;
use crate::overlay::{Canvas, OverlayRenderer, Paint, ScaleMode, Size, ViewTransform};
use crate::pipeline::Mailbox;

/// SDL2 Window Display
/// Owns the window; everything that touches results runs on this thread.
pub struct Sdl2Display {
    canvas: SdlCanvas<Window>,
    width: u32,
    height: u32,
}

/// Streaming texture holding the latest preview image.
struct PreviewTexture<'a> {
    texture: Texture<'a>,
    size: Size,
}

fn needs_new_texture(current: Option<Size>, image: Size) -> bool {
    current != Some(image)
}

/// Uploads a new preview, reusing the texture while the size is unchanged.
fn upload_preview<'a>(
    creator: &'a TextureCreator<WindowContext>,
    slot: &mut Option<PreviewTexture<'a>>,
    image: &RgbaImage,
) -> Result<()> {
    let size = Size::new(image.width(), image.height());
    if needs_new_texture(slot.as_ref().map(|p| p.size), size) {
        // ABGR8888 is R, G, B, A in memory on little-endian hosts.
        let texture = creator
            .create_texture_streaming(PixelFormatEnum::ABGR8888, size.width, size.height)
            .map_err(|e| eyre!(e))?;
        *slot = Some(PreviewTexture { texture, size });
    }
    if let Some(preview) = slot {
        preview
            .texture
            .update(None, image.as_raw(), (size.width * 4) as usize)
            .map_err(|e| eyre!(e))?;
    }
    Ok(())
}

/// Adapts the SDL canvas to the overlay's drawing interface.
struct OverlayPainter<'a> {
    canvas: &'a mut SdlCanvas<Window>,
}

impl OverlayPainter<'_> {
    fn set_color(&mut self, paint: &Paint) {
        let c = paint.color;
        self.canvas.set_draw_color(SdlColor::RGBA(c.r, c.g, c.b, c.a));
    }
}

impl Canvas for OverlayPainter<'_> {
    fn draw_circle(&mut self, x: f32, y: f32, radius: f32, paint: &Paint) {
        self.set_color(paint);
        let r = radius.max(1.0);
        let rect = Rect::new(
            (x - r) as i32,
            (y - r) as i32,
            (2.0 * r) as u32,
            (2.0 * r) as u32,
        );
        if let Err(e) = self.canvas.fill_rect(rect) {
            warn!("Failed to draw landmark: {}", e);
        }
    }

    fn draw_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, paint: &Paint) {
        self.set_color(paint);
        // SDL lines are one pixel wide; thicken by offsetting perpendicular copies.
        let (dx, dy) = (x2 - x1, y2 - y1);
        let len = (dx * dx + dy * dy).sqrt().max(f32::EPSILON);
        let (nx, ny) = (-dy / len, dx / len);
        let half = (paint.stroke_width / 2.0).max(0.5);

        let mut offset = -half;
        while offset <= half {
            let start = Point::new((x1 + nx * offset) as i32, (y1 + ny * offset) as i32);
            let end = Point::new((x2 + nx * offset) as i32, (y2 + ny * offset) as i32);
            if let Err(e) = self.canvas.draw_line(start, end) {
                warn!("Failed to draw connection: {}", e);
                return;
            }
            offset += 1.0;
        }
    }
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("Hand Landmarker", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;

        Ok(Self {
            canvas,
            width,
            height,
        })
    }

    fn view(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Draws the preview through the same transform the overlay uses.
    fn render(
        &mut self,
        preview: Option<&PreviewTexture<'_>>,
        overlay: &OverlayRenderer,
        mode: RunningMode,
    ) -> Result<()> {
        self.canvas.set_draw_color(SdlColor::RGB(0, 0, 0));
        self.canvas.clear();

        if let Some(preview) = preview {
            let transform = ViewTransform::compute(preview.size, self.view(), ScaleMode::from(mode));
            let (x, y, w, h) = transform.image_rect();

            let dst = Rect::new(x as i32, y as i32, w.max(1.0) as u32, h.max(1.0) as u32);
            self.canvas
                .copy(&preview.texture, None, dst)
                .map_err(|e| eyre!(e))?;
        }

        overlay.draw(&mut OverlayPainter {
            canvas: &mut self.canvas,
        });

        self.canvas.present();
        Ok(())
    }

    /// Runs until the window closes or `shutdown` is set.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        mut receiver: ResultReceiver,
        preview: Arc<Mailbox<RgbaImage>>,
        mut exporter: ExportAdapter,
        mode: RunningMode,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let mut overlay = OverlayRenderer::new(self.view(), mode);
        let texture_creator = self.canvas.texture_creator();
        let mut preview_texture: Option<PreviewTexture<'_>> = None;

        'running: loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. } => {
                        info!("Quit event received");
                        break 'running;
                    }
                    Event::Window {
                        win_event: WindowEvent::SizeChanged(w, h),
                        ..
                    } => {
                        self.width = w.max(1) as u32;
                        self.height = h.max(1) as u32;
                        overlay.set_view_size(self.view());
                    }
                    _ => {}
                }
            }

            if shutdown.load(Ordering::Acquire) {
                info!("Shutdown requested");
                break;
            }

            if let Some(image) = preview.take() {
                upload_preview(&texture_creator, &mut preview_texture, &image)?;
            }
            receiver.deliver(&mut [&mut overlay, &mut exporter]);

            self.render(preview_texture.as_ref(), &overlay, mode)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_is_reused_for_same_size() {
        assert!(needs_new_texture(None, Size::new(640, 480)));
        assert!(!needs_new_texture(Some(Size::new(640, 480)), Size::new(640, 480)));
        assert!(needs_new_texture(Some(Size::new(640, 480)), Size::new(480, 640)));
    }
}
