//! Glyph table: code point -> fixed-size monochrome bitmap.
//!
//! Every glyph is exactly one cell tall and either one cell (HALF) or two
//! cells (WIDE) wide. Bitmap rows are stored the way BDF stores them: the
//! row is padded on the right to a whole number of bytes, and the leftmost
//! pixel is the most significant used bit. For a glyph `gw` pixels wide the
//! rightmost pixel therefore sits at bit `row_padding(gw)`.
//!
//! Cells never own glyphs; they carry a [`GlyphId`] handed out by the table,
//! which always resolves.

pub mod bdf;

use std::collections::HashMap;
use std::ops::Range;

use crate::config::{Config, GlyphConfig, MAX_CELL_WIDTH};
use crate::error::{Result, TermError};

/// Declared cell width of a glyph
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlyphWidth {
    Half,
    Wide,
}

impl GlyphWidth {
    pub fn cells(self) -> u16 {
        match self {
            GlyphWidth::Half => 1,
            GlyphWidth::Wide => 2,
        }
    }
}

/// A single bitmap glyph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Glyph {
    pub code: u32,
    pub width: GlyphWidth,
    /// One entry per pixel row, top to bottom
    pub bitmap: Vec<u32>,
}

impl Glyph {
    /// A glyph with no pixels set
    pub fn blank(code: u32, width: GlyphWidth, cell_height: u32) -> Self {
        Self {
            code,
            width,
            bitmap: vec![0; cell_height as usize],
        }
    }

    /// A hollow rectangle covering the whole glyph box
    pub fn boxed(code: u32, width: GlyphWidth, cell_width: u32, cell_height: u32) -> Self {
        let gw = cell_width * width.cells() as u32;
        let mut glyph = Self::blank(code, width, cell_height);
        let last_row = cell_height.saturating_sub(1) as usize;
        for (h, row) in glyph.bitmap.iter_mut().enumerate() {
            for x in 0..gw {
                let edge = h == 0 || h == last_row || x == 0 || x == gw - 1;
                if edge {
                    *row |= pixel_mask(gw, x);
                }
            }
        }
        glyph
    }

    /// Whether pixel `x` (0 = leftmost) of row `h` is set
    pub fn pixel(&self, cell_width: u32, h: usize, x: u32) -> bool {
        let gw = cell_width * self.width.cells() as u32;
        x < gw
            && self
                .bitmap
                .get(h)
                .map_or(false, |row| row & pixel_mask(gw, x) != 0)
    }
}

/// Number of unused low-order bits in a BDF row of `pixel_width` pixels
pub fn row_padding(pixel_width: u32) -> u32 {
    (pixel_width + 7) / 8 * 8 - pixel_width
}

/// Bit for pixel `x` (0 = leftmost) in a row `pixel_width` pixels wide
pub fn pixel_mask(pixel_width: u32, x: u32) -> u32 {
    1 << (row_padding(pixel_width) + pixel_width - 1 - x)
}

/// Handle to a glyph stored in a [`GlyphTable`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlyphId(usize);

/// Read-only glyph lookup shared by the cell grid and the renderer
#[derive(Debug)]
pub struct GlyphTable {
    cell_width: u32,
    cell_height: u32,
    glyphs: Vec<Glyph>,
    index: HashMap<u32, GlyphId>,
    default_char: GlyphId,
    substitute_half: GlyphId,
    substitute_wide: GlyphId,
}

impl GlyphTable {
    /// Code points the table can hold (the Basic Multilingual Plane)
    pub const SUPPORTED: Range<u32> = 0..0x1_0000;

    /// Build a table from glyphs, checking that the default and both
    /// substitute glyphs exist with the right widths.
    pub fn new(
        cell_width: u32,
        cell_height: u32,
        glyphs: impl IntoIterator<Item = Glyph>,
        roles: &GlyphConfig,
    ) -> Result<Self> {
        if cell_width == 0 || cell_width > MAX_CELL_WIDTH || cell_height == 0 {
            return Err(TermError::InvalidConfig(format!(
                "unsupported cell size {}x{}",
                cell_width, cell_height
            )));
        }

        let mut table = Self {
            cell_width,
            cell_height,
            glyphs: Vec::new(),
            index: HashMap::new(),
            default_char: GlyphId(0),
            substitute_half: GlyphId(0),
            substitute_wide: GlyphId(0),
        };

        for glyph in glyphs {
            table.insert(glyph)?;
        }

        table.default_char = table.required("default", roles.default_char, None)?;
        table.substitute_half =
            table.required("half-width substitute", roles.substitute_half, Some(GlyphWidth::Half))?;
        table.substitute_wide =
            table.required("wide substitute", roles.substitute_wide, Some(GlyphWidth::Wide))?;

        Ok(table)
    }

    /// Minimal table used when no font is configured: blank default and
    /// half-width substitute, boxed wide substitute.
    pub fn fallback(cell_width: u32, cell_height: u32, roles: &GlyphConfig) -> Result<Self> {
        let mut glyphs = vec![Glyph::blank(roles.default_char, GlyphWidth::Half, cell_height)];
        if roles.substitute_half != roles.default_char {
            glyphs.push(Glyph::boxed(
                roles.substitute_half,
                GlyphWidth::Half,
                cell_width,
                cell_height,
            ));
        }
        glyphs.push(Glyph::boxed(
            roles.substitute_wide,
            GlyphWidth::Wide,
            cell_width,
            cell_height,
        ));
        Self::new(cell_width, cell_height, glyphs, roles)
    }

    /// Load the configured BDF font, or fall back to the synthesized set
    pub fn from_config(config: &Config) -> Result<Self> {
        let (cw, ch) = (config.terminal.cell_width, config.terminal.cell_height);
        match &config.glyphs.font {
            Some(path) => {
                let glyphs = bdf::load(path, cw, ch)?;
                tracing::info!("Loaded {} glyphs from {}", glyphs.len(), path.display());
                Self::new(cw, ch, glyphs, &config.glyphs)
            }
            None => Self::fallback(cw, ch, &config.glyphs),
        }
    }

    fn insert(&mut self, glyph: Glyph) -> Result<()> {
        if !Self::SUPPORTED.contains(&glyph.code) {
            return Err(TermError::InvalidGlyph {
                code: glyph.code,
                reason: "outside the Basic Multilingual Plane".into(),
            });
        }
        if glyph.bitmap.len() != self.cell_height as usize {
            return Err(TermError::InvalidGlyph {
                code: glyph.code,
                reason: format!(
                    "{} bitmap rows, expected {}",
                    glyph.bitmap.len(),
                    self.cell_height
                ),
            });
        }

        match self.index.get(&glyph.code) {
            Some(&id) => self.glyphs[id.0] = glyph,
            None => {
                let id = GlyphId(self.glyphs.len());
                self.index.insert(glyph.code, id);
                self.glyphs.push(glyph);
            }
        }
        Ok(())
    }

    fn required(&self, role: &'static str, code: u32, width: Option<GlyphWidth>) -> Result<GlyphId> {
        let id = *self
            .index
            .get(&code)
            .ok_or(TermError::MissingGlyph { role, code })?;
        match width {
            Some(w) if self.glyphs[id.0].width != w => Err(TermError::SubstituteWidth { role, code }),
            _ => Ok(id),
        }
    }

    pub fn cell_width(&self) -> u32 {
        self.cell_width
    }

    pub fn cell_height(&self) -> u32 {
        self.cell_height
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn lookup(&self, code: u32) -> Option<GlyphId> {
        self.index.get(&code).copied()
    }

    pub fn glyph(&self, id: GlyphId) -> &Glyph {
        &self.glyphs[id.0]
    }

    /// Glyph written into erased cells
    pub fn default_glyph(&self) -> GlyphId {
        self.default_char
    }

    pub fn substitute(&self, width: GlyphWidth) -> GlyphId {
        match width {
            GlyphWidth::Half => self.substitute_half,
            GlyphWidth::Wide => self.substitute_wide,
        }
    }

    /// Pick the glyph for `code` displayed `width` cells wide.
    ///
    /// Unsupported code points, missing glyphs and glyphs whose declared
    /// width disagrees with `width` all fall back to the substitute glyph.
    pub fn resolve(&self, code: u32, width: GlyphWidth) -> GlyphId {
        match self.lookup(code) {
            Some(id) if Self::SUPPORTED.contains(&code) && self.glyphs[id.0].width == width => id,
            _ => {
                tracing::trace!("U+{:04X}: using {:?} substitute glyph", code, width);
                self.substitute(width)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> GlyphConfig {
        GlyphConfig::default()
    }

    #[test]
    fn test_pixel_mask_layout() {
        // 8 pixels: no padding, leftmost pixel is bit 7
        assert_eq!(pixel_mask(8, 0), 0x80);
        assert_eq!(pixel_mask(8, 7), 0x01);
        // 6 pixels: padded to one byte, rightmost pixel at bit 2
        assert_eq!(row_padding(6), 2);
        assert_eq!(pixel_mask(6, 5), 0x04);
        // 16 pixels (wide 8px cell)
        assert_eq!(pixel_mask(16, 0), 0x8000);
    }

    #[test]
    fn test_fallback_table_has_required_glyphs() {
        let table = GlyphTable::fallback(8, 16, &roles()).unwrap();
        let wide = table.glyph(table.substitute(GlyphWidth::Wide));
        assert_eq!(wide.code, 0x3013);
        assert_eq!(wide.width, GlyphWidth::Wide);
        assert!(wide.pixel(8, 0, 0));
        assert!(wide.pixel(8, 0, 15));
        assert!(!wide.pixel(8, 5, 5));

        let space = table.glyph(table.default_glyph());
        assert!(space.bitmap.iter().all(|row| *row == 0));
    }

    #[test]
    fn test_missing_substitute_is_fatal() {
        let glyphs = vec![Glyph::blank(0x20, GlyphWidth::Half, 16)];
        let err = GlyphTable::new(8, 16, glyphs, &roles()).unwrap_err();
        assert!(matches!(err, TermError::MissingGlyph { code: 0x3013, .. }));
    }

    #[test]
    fn test_substitute_with_wrong_width_is_fatal() {
        let glyphs = vec![
            Glyph::blank(0x20, GlyphWidth::Half, 16),
            Glyph::blank(0x3013, GlyphWidth::Half, 16),
        ];
        let err = GlyphTable::new(8, 16, glyphs, &roles()).unwrap_err();
        assert!(matches!(err, TermError::SubstituteWidth { code: 0x3013, .. }));
    }

    #[test]
    fn test_resolve_falls_back_on_missing_or_mismatched_glyph() {
        let glyphs = vec![
            Glyph::blank(0x20, GlyphWidth::Half, 16),
            Glyph::boxed(0x3013, GlyphWidth::Wide, 8, 16),
            Glyph::boxed(0x41, GlyphWidth::Half, 8, 16),
            // declared wide, but 'B' is narrow
            Glyph::boxed(0x42, GlyphWidth::Wide, 8, 16),
        ];
        let table = GlyphTable::new(8, 16, glyphs, &roles()).unwrap();

        assert_eq!(table.resolve(0x41, GlyphWidth::Half), table.lookup(0x41).unwrap());
        assert_eq!(table.resolve(0x42, GlyphWidth::Half), table.substitute(GlyphWidth::Half));
        assert_eq!(table.resolve(0x4E00, GlyphWidth::Wide), table.substitute(GlyphWidth::Wide));
        assert_eq!(table.resolve(0x1F600, GlyphWidth::Wide), table.substitute(GlyphWidth::Wide));
    }

    #[test]
    fn test_wrong_row_count_rejected() {
        let glyphs = vec![Glyph::blank(0x20, GlyphWidth::Half, 12)];
        assert!(matches!(
            GlyphTable::new(8, 16, glyphs, &roles()),
            Err(TermError::InvalidGlyph { code: 0x20, .. })
        ));
    }
}
