//! Terminal renderer
//!
//! Rasterizes dirty rows of the cell grid into a shadow buffer laid out
//! exactly like the surface, then copies the whole shadow into the locked
//! surface in a single bulk copy.

use super::palette::Palette;
use super::surface::{Surface, SurfaceGeometry};
use crate::config::Config;
use crate::core::term::{AttrFlags, CellWidth, ColorPair, TerminalState};
use crate::error::{Result, TermError};
use crate::font::row_padding;

/// What a geometry check found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceChange {
    Unchanged,
    /// Same grid size, but every row has to be drawn again
    Redraw,
    /// The grid must be reallocated
    Resized { cols: u16, rows: u16 },
}

/// Terminal renderer
pub struct Renderer {
    geometry: SurfaceGeometry,
    palette: Palette,
    shadow: Vec<u8>,
    cell_width: u32,
    cell_height: u32,
    cursor_colors: ColorPair,
}

impl Renderer {
    pub fn new(geometry: SurfaceGeometry, config: &Config) -> Result<Self> {
        geometry.validate()?;
        let renderer = Self {
            geometry,
            palette: Palette::new(geometry.format),
            shadow: vec![0; geometry.buffer_len()],
            cell_width: config.terminal.cell_width,
            cell_height: config.terminal.cell_height,
            cursor_colors: ColorPair {
                fg: config.colors.cursor_fg,
                bg: config.colors.cursor_bg,
            },
        };
        renderer.check_fits(&geometry)?;
        Ok(renderer)
    }

    /// Terminal size in cells for the current geometry
    pub fn grid_size(&self) -> (u16, u16) {
        self.cells_for(&self.geometry)
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn shadow(&self) -> &[u8] {
        &self.shadow
    }

    fn cells_for(&self, geometry: &SurfaceGeometry) -> (u16, u16) {
        let cols = (geometry.width - geometry.offset_x) / self.cell_width;
        let rows = (geometry.height - geometry.offset_y) / self.cell_height;
        (
            cols.min(u16::MAX as u32) as u16,
            rows.min(u16::MAX as u32) as u16,
        )
    }

    fn check_fits(&self, geometry: &SurfaceGeometry) -> Result<()> {
        match self.cells_for(geometry) {
            (0, _) | (_, 0) => Err(TermError::InvalidGeometry(format!(
                "{}x{} surface cannot hold a single {}x{} cell",
                geometry.width, geometry.height, self.cell_width, self.cell_height
            ))),
            _ => Ok(()),
        }
    }

    /// Pick up a recreated surface. A new pixel format rebuilds the
    /// palette; a new size means the grid has to be reallocated.
    pub fn sync_surface(&mut self, surface: &dyn Surface) -> Result<SurfaceChange> {
        let geometry = surface.geometry();
        if geometry == self.geometry {
            return Ok(SurfaceChange::Unchanged);
        }
        geometry.validate()?;
        self.check_fits(&geometry)?;

        if geometry.format != self.geometry.format {
            tracing::info!("Pixel format changed, rebuilding palette");
            self.palette = Palette::new(geometry.format);
        }

        let before = self.grid_size();
        self.geometry = geometry;
        self.shadow = vec![0; geometry.buffer_len()];

        let (cols, rows) = self.grid_size();
        if (cols, rows) != before {
            tracing::info!("Surface is now {}x{} ({}x{} cells)", geometry.width, geometry.height, cols, rows);
            Ok(SurfaceChange::Resized { cols, rows })
        } else {
            Ok(SurfaceChange::Redraw)
        }
    }

    /// Draw every dirty row and present the result.
    ///
    /// Returns `false` without touching the dirty flags when the surface
    /// cannot be locked.
    pub fn refresh(&mut self, term: &mut TerminalState, surface: &mut dyn Surface) -> bool {
        let Some(buffer) = surface.lock() else {
            tracing::trace!("Surface not presentable, keeping dirty rows");
            return false;
        };

        if term.modes.cursor_visible {
            term.mark_dirty(term.cursor().row);
        }

        let (_, grid_rows) = self.grid_size();
        for line in 0..term.rows().min(grid_rows) {
            if term.is_dirty(line) {
                self.draw_line(term, line);
                let keep = term.modes.cursor_visible && line == term.cursor().row;
                term.set_dirty(line, keep);
            }
        }

        let len = self.shadow.len().min(buffer.len());
        if len < self.shadow.len() {
            tracing::warn!("Surface buffer is {} bytes, expected {}", buffer.len(), self.shadow.len());
        }
        buffer[..len].copy_from_slice(&self.shadow[..len]);

        surface.unlock_and_post();
        true
    }

    fn draw_line(&mut self, term: &TerminalState, line: u16) {
        let Some(cells) = term.line(line) else {
            return;
        };
        let (grid_cols, _) = self.grid_size();
        let cols = cells.len().min(grid_cols as usize);

        let cw = self.cell_width;
        let ch = self.cell_height;
        let bpp = self.geometry.format.bytes_per_pixel as usize;
        let stride = self.geometry.stride as usize;
        let glyphs = term.glyphs();
        let cursor = term.cursor();
        let cursor_on_line = term.modes.cursor_visible && cursor.row == line;

        for col in (0..cols).rev() {
            let cell = &cells[col];
            let glyph = glyphs.glyph(cell.glyph);

            let glyph_width = match cell.width {
                CellWidth::Half => cw,
                CellWidth::Wide | CellWidth::NextToWide => cw * 2,
            };
            // the left half of a wide glyph sits one cell further up the row
            let mut padding = row_padding(glyph_width);
            if cell.width == CellWidth::Wide {
                padding += cw;
            }

            let cursor_col = cursor.col as usize;
            let under_cursor = cursor_on_line
                && (col == cursor_col
                    || (cell.width == CellWidth::Wide && col + 1 == cursor_col)
                    || (cell.width == CellWidth::NextToWide && col == cursor_col + 1));
            let colors = if under_cursor {
                self.cursor_colors
            } else {
                cell.colors
            };
            let fg = self.palette.pixel(colors.fg).to_le_bytes();
            let mut bg = self.palette.pixel(colors.bg).to_le_bytes();

            for h in 0..ch {
                if h == ch - 1 && cell.attrs.contains(AttrFlags::UNDERLINE) {
                    bg = fg;
                }
                let bits = glyph.bitmap.get(h as usize).copied().unwrap_or(0);
                let y = (line as u32 * ch + h + self.geometry.offset_y) as usize;

                for w in 0..cw {
                    let set = bits.checked_shr(padding + w).map_or(false, |b| b & 1 != 0);
                    let x = (col as u32 * cw + (cw - 1 - w) + self.geometry.offset_x) as usize;
                    let pos = x * bpp + y * stride;
                    let pixel = if set { &fg } else { &bg };
                    self.shadow[pos..pos + bpp].copy_from_slice(&pixel[..bpp]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::GlyphConfig;
    use crate::core::term::TermOptions;
    use crate::font::{Glyph, GlyphTable, GlyphWidth};
    use crate::ui::palette::PixelFormat;
    use crate::ui::surface::MemorySurface;

    const GRAY: u32 = 0xAAAAAA;
    const GREEN: u32 = 0x00AA00;

    fn config() -> Config {
        let mut config = Config::default();
        config.terminal.cell_width = 4;
        config.terminal.cell_height = 4;
        config
    }

    /// 4x4 cells; 'A' is a hollow box
    fn setup(format: PixelFormat) -> (Renderer, MemorySurface, TerminalState) {
        let config = config();
        let glyphs = vec![
            Glyph::blank(0x20, GlyphWidth::Half, 4),
            Glyph::boxed(0x3013, GlyphWidth::Wide, 4, 4),
            Glyph::boxed('A' as u32, GlyphWidth::Half, 4, 4),
        ];
        let table = GlyphTable::new(4, 4, glyphs, &GlyphConfig::default()).unwrap();
        let geometry = SurfaceGeometry::packed(16, 8, format);
        let renderer = Renderer::new(geometry, &config).unwrap();
        let surface = MemorySurface::new(geometry).unwrap();
        let (cols, rows) = renderer.grid_size();
        let term = TerminalState::new(cols, rows, Arc::new(table), TermOptions::from(&config));
        (renderer, surface, term)
    }

    #[test]
    fn test_grid_size_from_geometry() {
        let geometry = SurfaceGeometry {
            offset_x: 4,
            offset_y: 1,
            ..SurfaceGeometry::packed(20, 9, PixelFormat::xrgb8888())
        };
        let renderer = Renderer::new(geometry, &config()).unwrap();
        assert_eq!(renderer.grid_size(), (4, 2));

        let tiny = SurfaceGeometry::packed(3, 8, PixelFormat::xrgb8888());
        assert!(matches!(
            Renderer::new(tiny, &config()),
            Err(TermError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_refresh_draws_glyph_pixels() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::xrgb8888());
        term.modes.cursor_visible = false;
        term.insert_character('A' as u32);

        assert!(renderer.refresh(&mut term, &mut surface));
        assert_eq!(surface.frames_posted(), 1);
        // box edge
        assert_eq!(surface.pixel_at(0, 0), Some(GRAY));
        assert_eq!(surface.pixel_at(3, 2), Some(GRAY));
        // box interior and the blank cell next to it
        assert_eq!(surface.pixel_at(1, 1), Some(0));
        assert_eq!(surface.pixel_at(4, 0), Some(0));
    }

    #[test]
    fn test_offset_shifts_output() {
        let config = config();
        let (_, _, mut term) = setup(PixelFormat::xrgb8888());
        let geometry = SurfaceGeometry {
            offset_x: 2,
            offset_y: 1,
            ..SurfaceGeometry::packed(18, 9, PixelFormat::xrgb8888())
        };
        let mut renderer = Renderer::new(geometry, &config).unwrap();
        let mut surface = MemorySurface::new(geometry).unwrap();
        term.modes.cursor_visible = false;
        term.insert_character('A' as u32);

        renderer.refresh(&mut term, &mut surface);
        assert_eq!(surface.pixel_at(1, 1), Some(0));
        assert_eq!(surface.pixel_at(2, 1), Some(GRAY));
    }

    #[test]
    fn test_cursor_cell_uses_cursor_colors() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::xrgb8888());
        term.insert_character('A' as u32);
        assert_eq!(term.cursor().col, 1);

        renderer.refresh(&mut term, &mut surface);
        assert_eq!(surface.pixel_at(0, 0), Some(GRAY));
        assert_eq!(surface.pixel_at(4, 0), Some(GREEN));
        assert_eq!(surface.pixel_at(7, 3), Some(GREEN));
        assert_eq!(surface.pixel_at(8, 0), Some(0));
    }

    #[test]
    fn test_cursor_on_wide_glyph_covers_both_halves() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::xrgb8888());
        term.insert_character(0x3013);
        term.cursor_column(2);

        renderer.refresh(&mut term, &mut surface);
        // interior pixels of both halves take the cursor background
        assert_eq!(surface.pixel_at(2, 1), Some(GREEN));
        assert_eq!(surface.pixel_at(5, 1), Some(GREEN));
    }

    #[test]
    fn test_wide_glyph_spans_two_cells() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::xrgb8888());
        term.modes.cursor_visible = false;
        term.insert_character(0x3013);

        renderer.refresh(&mut term, &mut surface);
        assert_eq!(surface.pixel_at(0, 1), Some(GRAY));
        assert_eq!(surface.pixel_at(3, 1), Some(0));
        assert_eq!(surface.pixel_at(4, 1), Some(0));
        assert_eq!(surface.pixel_at(7, 1), Some(GRAY));
        assert_eq!(surface.pixel_at(5, 0), Some(GRAY));
    }

    #[test]
    fn test_underline_paints_bottom_row() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::xrgb8888());
        term.modes.cursor_visible = false;
        term.attrs = AttrFlags::UNDERLINE;
        term.insert_character(' ' as u32);
        term.insert_character('A' as u32);

        renderer.refresh(&mut term, &mut surface);
        assert_eq!(surface.pixel_at(1, 3), Some(GRAY));
        assert_eq!(surface.pixel_at(1, 2), Some(0));
        // only the bottom row of an underlined glyph changes background
        assert_eq!(surface.pixel_at(5, 1), Some(0));
        assert_eq!(surface.pixel_at(5, 3), Some(GRAY));
        assert_eq!(surface.pixel_at(4, 1), Some(GRAY));
    }

    #[test]
    fn test_dirty_flags_after_refresh() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::xrgb8888());
        renderer.refresh(&mut term, &mut surface);
        assert!(term.is_dirty(0));
        assert!(!term.is_dirty(1));

        term.modes.cursor_visible = false;
        renderer.refresh(&mut term, &mut surface);
        assert!(!term.is_dirty(0));
    }

    #[test]
    fn test_lock_failure_keeps_dirty_rows() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::xrgb8888());
        surface.set_available(false);
        assert!(!renderer.refresh(&mut term, &mut surface));
        assert!(term.is_dirty(0) && term.is_dirty(1));
        assert_eq!(surface.frames_posted(), 0);

        surface.set_available(true);
        assert!(renderer.refresh(&mut term, &mut surface));
        assert!(!term.is_dirty(1));
    }

    #[test]
    fn test_two_byte_pixels() {
        let (mut renderer, mut surface, mut term) = setup(PixelFormat::rgb565());
        term.modes.cursor_visible = false;
        term.insert_character('A' as u32);

        renderer.refresh(&mut term, &mut surface);
        let gray = PixelFormat::rgb565().pixel(GRAY).to_le_bytes();
        assert_eq!(&surface.pixels()[0..2], &gray[..2]);
        assert_eq!(surface.pixels().len(), 16 * 8 * 2);
    }

    #[test]
    fn test_sync_surface() {
        let (mut renderer, mut surface, _) = setup(PixelFormat::xrgb8888());
        assert_eq!(renderer.sync_surface(&surface).unwrap(), SurfaceChange::Unchanged);

        surface
            .reconfigure(SurfaceGeometry::packed(16, 8, PixelFormat::rgb565()))
            .unwrap();
        assert_eq!(renderer.sync_surface(&surface).unwrap(), SurfaceChange::Redraw);
        assert_eq!(renderer.palette().format(), PixelFormat::rgb565());

        surface
            .reconfigure(SurfaceGeometry::packed(32, 8, PixelFormat::rgb565()))
            .unwrap();
        assert_eq!(
            renderer.sync_surface(&surface).unwrap(),
            SurfaceChange::Resized { cols: 8, rows: 2 }
        );
        assert_eq!(renderer.shadow().len(), 32 * 8 * 2);
    }
}
