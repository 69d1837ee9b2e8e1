//! Error types shared by the terminal core, font loader and renderer.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TermError {
    #[error("Glyph table has no {role} glyph (U+{code:04X})")]
    MissingGlyph { role: &'static str, code: u32 },

    #[error("The {role} glyph U+{code:04X} has the wrong cell width")]
    SubstituteWidth { role: &'static str, code: u32 },

    #[error("Invalid glyph U+{code:04X}: {reason}")]
    InvalidGlyph { code: u32, reason: String },

    #[error("Unknown pixel format code: {0}")]
    UnknownPixelFormat(i32),

    #[error("Invalid {channel} bitfield: offset {offset}, length {length}")]
    InvalidBitfield {
        channel: &'static str,
        offset: u8,
        length: u8,
    },

    #[error("Invalid surface geometry: {0}")]
    InvalidGeometry(String),

    #[error("BDF parse error at line {line}: {message}")]
    FontParse { line: usize, message: String },

    #[error("Font cell is {found_width}x{found_height}, expected {cell_width}x{cell_height}")]
    FontMetrics {
        cell_width: u32,
        cell_height: u32,
        found_width: u32,
        found_height: u32,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, TermError>;
