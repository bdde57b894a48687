pub mod display;

pub use display::Sdl2Display;
