//! Pixel output.
//!
//! - **palette**: 256 logical colors packed for the surface's pixel format
//! - **surface**: presentation target trait and an in-memory implementation
//! - **renderer**: rasterizes dirty grid rows through a shadow buffer

pub mod palette;
pub mod renderer;
pub mod surface;

pub use palette::{Palette, PixelFormat};
pub use renderer::{Renderer, SurfaceChange};
pub use surface::{MemorySurface, Surface, SurfaceGeometry};
