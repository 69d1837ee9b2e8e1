//! Configuration for pixterm.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.pixterm/config.toml`
//! - Defaults for every value, so a missing file or section is never an error
//! - Validation of the values the terminal core relies on
//!
//! # Configuration File
//!
//! ```toml
//! [terminal]
//! cell_width = 8
//! cell_height = 16
//! tab_width = 8
//! ambiguous_wide = false
//!
//! [colors]
//! default_fg = 7
//! default_bg = 0
//! cursor_fg = 0
//! cursor_bg = 2
//!
//! [glyphs]
//! font = "/usr/share/fonts/misc/milkjf_k16.bdf"
//! substitute_half = 0x0020
//! substitute_wide = 0x3013
//! replacement_char = 0x0020
//!
//! [surface]
//! width = 640
//! height = 384
//! pixel_format = "rgbx8888"
//!
//! [io]
//! read_timeout_ms = 15
//! lazy_draw = false
//! ```
//!
//! Everything here is fixed once the terminal is initialized.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TermError};
use crate::ui::palette::PixelFormat;

/// Widest cell the renderer can address: a wide glyph row must fit in a `u32`.
pub const MAX_CELL_WIDTH: u32 = 16;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub terminal: TerminalConfig,
    pub colors: ColorConfig,
    pub glyphs: GlyphConfig,
    pub surface: SurfaceConfig,
    pub io: IoConfig,
}

/// Grid geometry and parsing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Cell width in pixels
    pub cell_width: u32,
    /// Cell height in pixels
    pub cell_height: u32,
    /// Hardware tab stop interval
    pub tab_width: u16,
    /// Initial escape sequence buffer size (grows by doubling)
    pub escape_buffer_size: usize,
    /// Treat East Asian ambiguous width characters as wide
    pub ambiguous_wide: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cell_width: 8,
            cell_height: 16,
            tab_width: 8,
            escape_buffer_size: 1024,
            ambiguous_wide: false,
        }
    }
}

/// Logical color indices (into the 256 color palette)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub default_fg: u8,
    pub default_bg: u8,
    /// Glyph color of the cell under the cursor
    pub cursor_fg: u8,
    /// Background color of the cell under the cursor
    pub cursor_bg: u8,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            default_fg: 7,
            default_bg: 0,
            cursor_fg: 0,
            cursor_bg: 2,
        }
    }
}

/// Glyph resource and substitution code points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlyphConfig {
    /// BDF font to load; a synthesized fallback set is used when absent
    pub font: Option<PathBuf>,
    /// Glyph written into erased cells
    pub default_char: u32,
    /// Used for missing single width glyphs
    pub substitute_half: u32,
    /// Used for missing double width glyphs
    pub substitute_wide: u32,
    /// Used for malformed UTF-8 sequences
    pub replacement_char: u32,
}

impl Default for GlyphConfig {
    fn default() -> Self {
        Self {
            font: None,
            default_char: 0x0020,
            substitute_half: 0x0020,
            substitute_wide: 0x3013,
            replacement_char: 0x0020,
        }
    }
}

/// In-memory presentation target used by the headless driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// "rgba8888", "rgbx8888", "rgb565" or "xrgb8888"
    pub pixel_format: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 384,
            offset_x: 0,
            offset_y: 0,
            pixel_format: "rgbx8888".to_string(),
        }
    }
}

/// Control loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// How long one loop iteration waits for child output
    pub read_timeout_ms: u64,
    pub read_buffer_size: usize,
    /// Don't draw when a read filled the whole buffer (more data is coming)
    pub lazy_draw: bool,
    /// Draw even when the surface is not visible
    pub background_draw: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 15,
            read_buffer_size: 4096,
            lazy_draw: false,
            background_draw: false,
        }
    }
}

impl IoConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Ignoring {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Load and validate configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TermError::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check the values the terminal core depends on
    pub fn validate(&self) -> Result<()> {
        let t = &self.terminal;
        if t.cell_width == 0 || t.cell_width > MAX_CELL_WIDTH {
            return Err(TermError::InvalidConfig(format!(
                "cell_width must be between 1 and {}, got {}",
                MAX_CELL_WIDTH, t.cell_width
            )));
        }
        if t.cell_height == 0 {
            return Err(TermError::InvalidConfig("cell_height must be positive".into()));
        }
        if t.tab_width == 0 {
            return Err(TermError::InvalidConfig("tab_width must be positive".into()));
        }
        if t.escape_buffer_size == 0 || self.io.read_buffer_size == 0 {
            return Err(TermError::InvalidConfig("buffer sizes must be positive".into()));
        }
        if PixelFormat::by_name(&self.surface.pixel_format).is_none() {
            return Err(TermError::InvalidConfig(format!(
                "unknown pixel_format {:?}",
                self.surface.pixel_format
            )));
        }
        Ok(())
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".pixterm").join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
