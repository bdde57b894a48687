pub mod convert;
pub mod decoder;
pub mod frame;
pub mod source;
pub mod v4l2;

pub use convert::FrameConverter;
pub use frame::{Frame, LensFacing, MonotonicClock, PixelFormat};
pub use source::{FrameSource, SyntheticSource};
pub use v4l2::V4l2Capture;
