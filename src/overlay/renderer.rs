use std::sync::Arc;

use super::skeleton::HAND_CONNECTIONS;
use super::transform::{ScaleMode, Size, ViewTransform};
use crate::detector::{DetectionResult, RunningMode};
use crate::dispatch::ResultConsumer;

const LANDMARK_STROKE_WIDTH: f32 = 8.0;
const CONNECTION_STROKE_WIDTH: f32 = 5.0;
const LANDMARK_RADIUS: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Color,
    pub stroke_width: f32,
}

/// One primitive emitted by the renderer, in view pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Circle {
        x: f32,
        y: f32,
        radius: f32,
        paint: Paint,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        paint: Paint,
    },
}

/// Drawing surface the overlay paints onto.
pub trait Canvas {
    fn draw_circle(&mut self, x: f32, y: f32, radius: f32, paint: &Paint);

    fn draw_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, paint: &Paint);
}

/// Records shapes instead of rasterizing them.
impl Canvas for Vec<Shape> {
    fn draw_circle(&mut self, x: f32, y: f32, radius: f32, paint: &Paint) {
        self.push(Shape::Circle {
            x,
            y,
            radius,
            paint: *paint,
        });
    }

    fn draw_line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, paint: &Paint) {
        self.push(Shape::Line {
            x1,
            y1,
            x2,
            y2,
            paint: *paint,
        });
    }
}

/// Paints landmarks and bones for the last received result.
///
/// Holds no state besides that result, the view size and the derived
/// transform, so drawing twice yields the same shapes.
pub struct OverlayRenderer {
    result: Option<Arc<DetectionResult>>,
    mode: RunningMode,
    view: Size,
    transform: ViewTransform,
    landmark_paint: Paint,
    connection_paint: Paint,
}

impl OverlayRenderer {
    pub fn new(view: Size, mode: RunningMode) -> Self {
        Self {
            result: None,
            mode,
            view,
            transform: ViewTransform::default(),
            landmark_paint: Paint {
                color: Color::RED,
                stroke_width: LANDMARK_STROKE_WIDTH,
            },
            connection_paint: Paint {
                color: Color::GREEN,
                stroke_width: CONNECTION_STROKE_WIDTH,
            },
        }
    }

    /// Stores `result` and recomputes the transform for the current view.
    pub fn present(
        &mut self,
        result: Arc<DetectionResult>,
        source_width: u32,
        source_height: u32,
        mode: RunningMode,
    ) {
        self.mode = mode;
        self.transform = ViewTransform::compute(
            Size::new(source_width, source_height),
            self.view,
            ScaleMode::from(mode),
        );
        self.result = Some(result);
    }

    pub fn set_view_size(&mut self, view: Size) {
        if view == self.view {
            return;
        }
        self.view = view;
        self.transform =
            ViewTransform::compute(self.transform.image, view, ScaleMode::from(self.mode));
    }

    pub fn result(&self) -> Option<&Arc<DetectionResult>> {
        self.result.as_ref()
    }

    /// The transform landmarks are drawn with. Use it for hit-testing too.
    pub fn transform(&self) -> &ViewTransform {
        &self.transform
    }

    pub fn draw(&self, canvas: &mut dyn Canvas) {
        let Some(result) = &self.result else {
            return;
        };
        let t = &self.transform;

        for hand in &result.hands {
            let points: Vec<(f32, f32)> =
                hand.landmarks.iter().map(|lm| t.map(lm.x, lm.y)).collect();

            for &(x, y) in &points {
                canvas.draw_circle(x, y, LANDMARK_RADIUS, &self.landmark_paint);
            }

            for &(start, end) in &HAND_CONNECTIONS {
                // Partial hands only get the bones whose endpoints exist.
                if let (Some(&(x1, y1)), Some(&(x2, y2))) = (points.get(start), points.get(end)) {
                    canvas.draw_line(x1, y1, x2, y2, &self.connection_paint);
                }
            }
        }
    }

    pub fn shapes(&self) -> Vec<Shape> {
        let mut shapes = Vec::new();
        self.draw(&mut shapes);
        shapes
    }
}

impl ResultConsumer for OverlayRenderer {
    fn consume(&mut self, result: &Arc<DetectionResult>) {
        let (w, h) = (result.input.width, result.input.height);
        self.present(result.clone(), w, h, self.mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{Hand, InputDescriptor, Landmark, NUM_LANDMARKS};
    use approx::assert_relative_eq;

    fn result(hands: Vec<Hand>) -> Arc<DetectionResult> {
        Arc::new(DetectionResult {
            hands,
            input: InputDescriptor {
                width: 1280,
                height: 720,
                timestamp_ms: 1,
            },
        })
    }

    fn full_hand() -> Hand {
        Hand {
            landmarks: (0..NUM_LANDMARKS)
                .map(|i| Landmark::new(i as f32 / 20.0, 0.5, 0.0))
                .collect(),
            handedness: Vec::new(),
        }
    }

    #[test]
    fn nothing_presented_draws_nothing() {
        let renderer = OverlayRenderer::new(Size::new(1080, 1920), RunningMode::LiveStream);
        assert!(renderer.shapes().is_empty());
    }

    #[test]
    fn zero_hands_draw_nothing() {
        let mut renderer = OverlayRenderer::new(Size::new(1080, 1920), RunningMode::LiveStream);
        renderer.present(result(vec![]), 1280, 720, RunningMode::LiveStream);
        assert!(renderer.shapes().is_empty());
    }

    #[test]
    fn full_hand_draws_points_then_bones() {
        let mut renderer = OverlayRenderer::new(Size::new(1080, 1920), RunningMode::LiveStream);
        renderer.present(result(vec![full_hand(), full_hand()]), 1280, 720, RunningMode::LiveStream);

        let shapes = renderer.shapes();
        let per_hand = NUM_LANDMARKS + HAND_CONNECTIONS.len();
        assert_eq!(shapes.len(), 2 * per_hand);
        assert!(shapes[..NUM_LANDMARKS]
            .iter()
            .all(|s| matches!(s, Shape::Circle { paint, .. } if paint.color == Color::RED)));
        assert!(shapes[NUM_LANDMARKS..per_hand]
            .iter()
            .all(|s| matches!(s, Shape::Line { paint, .. } if paint.color == Color::GREEN)));
    }

    #[test]
    fn points_go_through_the_view_transform() {
        let mut renderer = OverlayRenderer::new(Size::new(1080, 1920), RunningMode::LiveStream);
        renderer.present(result(vec![full_hand()]), 1280, 720, RunningMode::LiveStream);

        let t = *renderer.transform();
        let Shape::Circle { x, y, radius, .. } = renderer.shapes()[10] else {
            panic!("expected a circle");
        };
        assert_relative_eq!(x, 0.5 * 1280.0 * t.scale + t.translate_x, epsilon = 1e-3);
        assert_relative_eq!(y, 0.5 * 720.0 * t.scale + t.translate_y, epsilon = 1e-3);
        assert_eq!(radius, LANDMARK_RADIUS);
    }

    #[test]
    fn redraw_is_identical() {
        let mut renderer = OverlayRenderer::new(Size::new(640, 480), RunningMode::Image);
        renderer.present(result(vec![full_hand()]), 1280, 720, RunningMode::Image);
        assert_eq!(renderer.shapes(), renderer.shapes());
    }

    #[test]
    fn resize_recomputes_transform() {
        let mut renderer = OverlayRenderer::new(Size::new(640, 480), RunningMode::Image);
        renderer.present(result(vec![full_hand()]), 1280, 720, RunningMode::Image);
        let before = *renderer.transform();

        renderer.set_view_size(Size::new(1280, 720));
        let after = *renderer.transform();
        assert_relative_eq!(after.scale, 1.0, epsilon = 1e-6);
        assert_ne!(before, after);
    }

    #[test]
    fn partial_hand_skips_missing_bones() {
        let mut hand = full_hand();
        hand.landmarks.truncate(5);
        let mut renderer = OverlayRenderer::new(Size::new(640, 480), RunningMode::LiveStream);
        renderer.present(result(vec![hand]), 1280, 720, RunningMode::LiveStream);

        let shapes = renderer.shapes();
        let lines = shapes.iter().filter(|s| matches!(s, Shape::Line { .. })).count();
        assert_eq!(lines, 4); // thumb only
        assert_eq!(shapes.len() - lines, 5);
    }

    #[test]
    fn consuming_uses_result_dimensions() {
        let mut renderer = OverlayRenderer::new(Size::new(1080, 1920), RunningMode::LiveStream);
        renderer.consume(&result(vec![full_hand()]));
        assert_eq!(renderer.transform().image, Size::new(1280, 720));
        assert!(renderer.result().is_some());
    }
}
