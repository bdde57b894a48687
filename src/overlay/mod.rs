//! Landmark overlay: coordinate mapping and skeleton drawing.

pub mod renderer;
pub mod skeleton;
pub mod transform;

pub use renderer::{Canvas, Color, OverlayRenderer, Paint, Shape};
pub use skeleton::HAND_CONNECTIONS;
pub use transform::{ScaleMode, Size, ViewTransform};
