//! pixterm - a minimal framebuffer terminal emulator core
//!
//! Child output is decoded by [`core::term::VtParser`] into a cell grid
//! ([`core::term::TerminalState`]), and [`ui::Renderer`] turns dirty rows
//! of that grid into pixels on a [`ui::Surface`] using bitmap glyphs from a
//! [`font::GlyphTable`].

pub mod config;
pub mod core;
pub mod error;
pub mod font;
pub mod ui;

pub use config::Config;
pub use error::{Result, TermError};
