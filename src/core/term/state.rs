//! Terminal state management
//!
//! The cell grid: a `rows x cols` array of cells plus the cursor, scroll
//! region, tab stops, current rendition and one dirty flag per row. Every
//! mutation goes through methods here so that wide glyph pairs stay intact
//! and each touched row is marked for the renderer.

use std::sync::Arc;

use bitflags::bitflags;
use unicode_width::UnicodeWidthChar;

use super::charset::{Charsets, Utf8Decoder};
use crate::config::Config;
use crate::font::{GlyphId, GlyphTable, GlyphWidth};
use crate::ui::palette::BRIGHT_INC;

bitflags! {
    /// Rendition attributes
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AttrFlags: u8 {
        const BOLD = 1 << 0;
        const UNDERLINE = 1 << 1;
        const BLINK = 1 << 2;
        const REVERSE = 1 << 3;
    }
}

/// How a cell takes part in a glyph
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellWidth {
    Half,
    /// Left half of a double width glyph
    Wide,
    /// Right half; always directly after a `Wide` cell
    NextToWide,
}

/// Foreground and background palette indices
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ColorPair {
    pub fg: u8,
    pub bg: u8,
}

/// A single cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub glyph: GlyphId,
    /// Effective colors, after bold/blink/reverse were applied
    pub colors: ColorPair,
    pub attrs: AttrFlags,
    pub width: CellWidth,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorPos {
    pub row: u16,
    pub col: u16,
}

/// Saved cursor state (DECSC / SCOSC)
#[derive(Clone, Copy, Debug, Default)]
struct SavedState {
    cursor: CursorPos,
    colors: ColorPair,
    attrs: AttrFlags,
    origin_mode: bool,
}

/// Terminal modes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalModes {
    pub cursor_visible: bool,
    pub auto_wrap: bool,
    /// Cursor addressing is relative to the scroll region
    pub origin_mode: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            cursor_visible: true,
            auto_wrap: true,
            origin_mode: false,
        }
    }
}

/// Settings the grid needs from the configuration
#[derive(Clone, Debug)]
pub struct TermOptions {
    pub tab_width: u16,
    pub default_colors: ColorPair,
    /// Shown for malformed UTF-8
    pub replacement_char: u32,
    pub ambiguous_wide: bool,
}

impl From<&Config> for TermOptions {
    fn from(config: &Config) -> Self {
        Self {
            tab_width: config.terminal.tab_width.max(1),
            default_colors: ColorPair {
                fg: config.colors.default_fg,
                bg: config.colors.default_bg,
            },
            replacement_char: config.glyphs.replacement_char,
            ambiguous_wide: config.terminal.ambiguous_wide,
        }
    }
}

/// Terminal state holding all screen data
pub struct TerminalState {
    cols: u16,
    rows: u16,
    cells: Vec<Cell>,
    dirty: Vec<bool>,
    tabstops: Vec<bool>,
    cursor: CursorPos,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    scroll_region: (u16, u16),
    /// Current rendition used for new glyphs and erased cells
    pub colors: ColorPair,
    pub attrs: AttrFlags,
    pub modes: TerminalModes,
    saved: SavedState,
    /// The last glyph filled the final column; wrap before the next one
    wrap_pending: bool,
    pub(crate) utf8: Utf8Decoder,
    pub(crate) charsets: Charsets,
    pub title: String,
    glyphs: Arc<GlyphTable>,
    options: TermOptions,
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16, glyphs: Arc<GlyphTable>, options: TermOptions) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let blank = Cell {
            glyph: glyphs.default_glyph(),
            colors: options.default_colors,
            attrs: AttrFlags::empty(),
            width: CellWidth::Half,
        };
        let mut state = Self {
            cols,
            rows,
            cells: vec![blank; cols as usize * rows as usize],
            dirty: vec![true; rows as usize],
            tabstops: vec![false; cols as usize],
            cursor: CursorPos::default(),
            scroll_region: (0, rows - 1),
            colors: options.default_colors,
            attrs: AttrFlags::empty(),
            modes: TerminalModes::default(),
            saved: SavedState::default(),
            wrap_pending: false,
            utf8: Utf8Decoder::new(),
            charsets: Charsets::default(),
            title: String::new(),
            glyphs,
            options,
        };
        state.reset();
        state
    }

    /// Reallocate for a new size. Contents are not preserved.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        let blank = self.blank_cell();
        self.cells = vec![blank; self.cols as usize * self.rows as usize];
        self.dirty = vec![true; self.rows as usize];
        self.tabstops = vec![false; self.cols as usize];
        self.reset();
    }

    /// Full reset (RIS)
    pub fn reset(&mut self) {
        self.modes = TerminalModes::default();
        self.wrap_pending = false;
        self.scroll_region = (0, self.rows - 1);
        self.cursor = CursorPos::default();
        self.colors = self.options.default_colors;
        self.attrs = AttrFlags::empty();
        self.saved = SavedState {
            colors: self.options.default_colors,
            ..SavedState::default()
        };

        let blank = self.blank_cell();
        self.cells.fill(blank);
        let tab_width = self.options.tab_width as usize;
        for (col, stop) in self.tabstops.iter_mut().enumerate() {
            *stop = col % tab_width == 0;
        }
        self.dirty.fill(true);

        self.utf8.reset();
        self.charsets = Charsets::default();
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cursor(&self) -> CursorPos {
        self.cursor
    }

    pub fn scroll_region(&self) -> (u16, u16) {
        self.scroll_region
    }

    pub fn wrap_pending(&self) -> bool {
        self.wrap_pending
    }

    pub fn glyphs(&self) -> &GlyphTable {
        &self.glyphs
    }

    pub fn options(&self) -> &TermOptions {
        &self.options
    }

    pub fn default_colors(&self) -> ColorPair {
        self.options.default_colors
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<&Cell> {
        if row < self.rows && col < self.cols {
            Some(&self.cells[self.cell_index(row, col)])
        } else {
            None
        }
    }

    /// All cells of one row
    pub fn line(&self, row: u16) -> Option<&[Cell]> {
        if row >= self.rows {
            return None;
        }
        let start = self.cell_index(row, 0);
        Some(&self.cells[start..start + self.cols as usize])
    }

    pub fn is_dirty(&self, row: u16) -> bool {
        self.dirty.get(row as usize).copied().unwrap_or(false)
    }

    pub fn set_dirty(&mut self, row: u16, dirty: bool) {
        if let Some(flag) = self.dirty.get_mut(row as usize) {
            *flag = dirty;
        }
    }

    pub fn mark_dirty(&mut self, row: u16) {
        self.set_dirty(row, true);
    }

    /// Force every row to be redrawn
    pub fn mark_all_dirty(&mut self) {
        self.dirty.fill(true);
    }

    pub fn is_tabstop(&self, col: u16) -> bool {
        self.tabstops.get(col as usize).copied().unwrap_or(false)
    }

    fn cell_index(&self, row: u16, col: u16) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    fn blank_cell(&self) -> Cell {
        Cell {
            glyph: self.glyphs.default_glyph(),
            colors: self.colors,
            attrs: AttrFlags::empty(),
            width: CellWidth::Half,
        }
    }

    fn char_width(&self, code: u32) -> usize {
        let Some(ch) = char::from_u32(code) else {
            return 0;
        };
        let width = if self.options.ambiguous_wide {
            ch.width_cjk()
        } else {
            ch.width()
        };
        width.unwrap_or(0)
    }

    /// Put a character at the current cursor position
    pub fn insert_character(&mut self, code: u32) {
        let width = self.char_width(code);
        if width == 0 {
            tracing::trace!("U+{:04X} has no width, dropped", code);
            return;
        }
        let width = if width >= 2 {
            GlyphWidth::Wide
        } else {
            GlyphWidth::Half
        };
        if width == GlyphWidth::Wide && self.cols < 2 {
            tracing::trace!("U+{:04X} does not fit a single column grid", code);
            return;
        }
        let glyph = self.glyphs.resolve(code, width);

        let last_col = self.cols - 1;
        if self.cursor.col == last_col && (self.wrap_pending || width == GlyphWidth::Wide) {
            self.cursor.col = 0;
            self.move_cursor(1, 0);
        }
        self.wrap_pending = false;

        let advance = self.set_cell(self.cursor.row, self.cursor.col, glyph);
        self.move_cursor(0, advance as i32);
    }

    /// Write a glyph with the current rendition. Returns the number of
    /// columns it occupies.
    pub fn set_cell(&mut self, row: u16, col: u16, glyph: GlyphId) -> u16 {
        if row >= self.rows || col >= self.cols {
            return 0;
        }

        let mut colors = self.colors;
        if self.attrs.contains(AttrFlags::BOLD) && colors.fg < BRIGHT_INC {
            colors.fg += BRIGHT_INC;
        }
        if self.attrs.contains(AttrFlags::BLINK) && colors.bg < BRIGHT_INC {
            colors.bg += BRIGHT_INC;
        }
        if self.attrs.contains(AttrFlags::REVERSE) {
            std::mem::swap(&mut colors.fg, &mut colors.bg);
        }

        let wide = self.glyphs.glyph(glyph).width == GlyphWidth::Wide;
        let has_room = col + 1 < self.cols;

        self.detach_wide_partner(row, col);
        if wide && has_room {
            self.detach_wide_partner(row, col + 1);
        }

        let cell = Cell {
            glyph,
            colors,
            attrs: self.attrs,
            width: if wide { CellWidth::Wide } else { CellWidth::Half },
        };
        let idx = self.cell_index(row, col);
        self.cells[idx] = cell;
        self.dirty[row as usize] = true;

        if wide && has_room {
            self.cells[idx + 1] = Cell {
                width: CellWidth::NextToWide,
                ..cell
            };
            2
        } else {
            1
        }
    }

    /// Blank a cell with the current colors
    pub fn erase_cell(&mut self, row: u16, col: u16) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        self.detach_wide_partner(row, col);
        let idx = self.cell_index(row, col);
        self.cells[idx] = self.blank_cell();
        self.dirty[row as usize] = true;
    }

    /// Copy one cell, carrying a wide glyph's right half along with it
    pub fn copy_cell(&mut self, dst_row: u16, dst_col: u16, src_row: u16, src_col: u16) {
        let Some(&src) = self.cell(src_row, src_col) else {
            return;
        };
        if dst_row >= self.rows || dst_col >= self.cols {
            return;
        }

        match src.width {
            // moved together with its left half
            CellWidth::NextToWide => {}
            CellWidth::Wide if dst_col == self.cols - 1 => self.erase_cell(dst_row, dst_col),
            width => {
                let idx = self.cell_index(dst_row, dst_col);
                self.cells[idx] = src;
                if width == CellWidth::Wide {
                    self.cells[idx + 1] = Cell {
                        width: CellWidth::NextToWide,
                        ..src
                    };
                }
                self.dirty[dst_row as usize] = true;
            }
        }
    }

    /// Blank the other half of a wide pair that includes (row, col)
    fn detach_wide_partner(&mut self, row: u16, col: u16) {
        let idx = self.cell_index(row, col);
        let blank = self.blank_cell();
        match self.cells[idx].width {
            CellWidth::Wide if col + 1 < self.cols => {
                if self.cells[idx + 1].width == CellWidth::NextToWide {
                    self.cells[idx + 1] = blank;
                }
            }
            CellWidth::NextToWide if col > 0 => {
                if self.cells[idx - 1].width == CellWidth::Wide {
                    self.cells[idx - 1] = blank;
                }
            }
            _ => {}
        }
    }

    /// The first cell a line shift reads from must not be a right half:
    /// `copy_cell` skips those and the destination would keep stale content.
    fn erase_right_half(&mut self, row: u16, col: u16) {
        if self.cell(row, col).map(|c| c.width) == Some(CellWidth::NextToWide) {
            self.erase_cell(row, col);
        }
    }

    /// Erase any half of a wide pair left without its partner
    fn repair_wide_pairs(&mut self, row: u16) {
        let start = self.cell_index(row, 0);
        let cols = self.cols as usize;
        let blank = self.blank_cell();
        let mut repaired = false;

        for col in 0..cols {
            let broken = match self.cells[start + col].width {
                CellWidth::Half => false,
                CellWidth::Wide => {
                    col + 1 >= cols || self.cells[start + col + 1].width != CellWidth::NextToWide
                }
                CellWidth::NextToWide => {
                    col == 0 || self.cells[start + col - 1].width != CellWidth::Wide
                }
            };
            if broken {
                self.cells[start + col] = blank;
                repaired = true;
            }
        }

        if repaired {
            self.dirty[row as usize] = true;
        }
    }

    fn erase_row(&mut self, row: u16) {
        let start = self.cell_index(row, 0);
        let blank = self.blank_cell();
        self.cells[start..start + self.cols as usize].fill(blank);
        self.dirty[row as usize] = true;
    }

    /// Shift rows `top..=bottom` by `offset` (positive moves content up).
    /// Vacated rows are erased.
    pub fn scroll(&mut self, top: u16, bottom: u16, offset: i32) {
        let bottom = bottom.min(self.rows - 1);
        if offset == 0 || top >= bottom {
            return;
        }

        for row in top..=bottom {
            self.dirty[row as usize] = true;
        }

        let cols = self.cols as usize;
        let height = (bottom - top + 1) as usize;
        let shift = (offset.unsigned_abs() as usize).min(height);
        let region = top as usize * cols;
        let kept = (height - shift) * cols;

        if offset > 0 {
            let from = region + shift * cols;
            self.cells.copy_within(from..from + kept, region);
            for row in (bottom as usize + 1 - shift)..=bottom as usize {
                self.erase_row(row as u16);
            }
        } else {
            self.cells.copy_within(region..region + kept, region + shift * cols);
            for row in top as usize..top as usize + shift {
                self.erase_row(row as u16);
            }
        }
    }

    /// Relative move. Crossing the scroll region's edge scrolls it instead,
    /// and moving past the last column arms the deferred wrap.
    pub fn move_cursor(&mut self, dy: i32, dx: i32) {
        let (top, bottom) = self.scroll_region;
        let last_col = self.cols as i32 - 1;

        let mut col = self.cursor.col as i32 + dx;
        if col > last_col {
            if self.modes.auto_wrap {
                self.wrap_pending = true;
            }
            col = last_col;
        }
        self.cursor.col = col.max(0) as u16;

        let row = self.cursor.row;
        if (row == top && dy < 0) || (row == bottom && dy > 0) {
            self.scroll(top, bottom, dy);
        } else {
            let row = (row as i32 + dy).clamp(0, self.rows as i32 - 1);
            self.cursor.row = row as u16;
        }
    }

    /// Absolute move (0-based). In origin mode the row is relative to the
    /// scroll region and confined to it.
    pub fn set_cursor(&mut self, row: i32, col: i32) {
        let (top, bottom) = if self.modes.origin_mode {
            self.scroll_region
        } else {
            (0, self.rows - 1)
        };
        let row = if self.modes.origin_mode {
            row + top as i32
        } else {
            row
        };
        self.cursor.row = row.clamp(top as i32, bottom as i32) as u16;
        self.cursor.col = col.clamp(0, self.cols as i32 - 1) as u16;
        self.wrap_pending = false;
    }

    /// Vertical move for CUU/CUD/CNL/CPL: stays inside the scroll region
    /// when it starts there, never scrolls.
    fn move_vertical(&mut self, dy: i32) {
        let (top, bottom) = self.scroll_region;
        let row = self.cursor.row;
        let (lo, hi) = if (top..=bottom).contains(&row) {
            (top, bottom)
        } else {
            (0, self.rows - 1)
        };
        self.cursor.row = (row as i32 + dy).clamp(lo as i32, hi as i32) as u16;
        self.wrap_pending = false;
    }

    fn move_horizontal(&mut self, dx: i32) {
        let col = self.cursor.col as i32 + dx;
        self.cursor.col = col.clamp(0, self.cols as i32 - 1) as u16;
        self.wrap_pending = false;
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
        self.wrap_pending = false;
    }

    /// Line feed - move cursor down, scroll if at the region bottom
    pub fn linefeed(&mut self) {
        self.wrap_pending = false;
        self.move_cursor(1, 0);
    }

    /// Index (IND)
    pub fn index(&mut self) {
        self.linefeed();
    }

    /// Next line (NEL)
    pub fn next_line(&mut self) {
        self.carriage_return();
        self.move_cursor(1, 0);
    }

    /// Reverse index - cursor up, scroll if at the region top
    pub fn reverse_index(&mut self) {
        self.wrap_pending = false;
        self.move_cursor(-1, 0);
    }

    pub fn backspace(&mut self) {
        self.wrap_pending = false;
        self.move_cursor(0, -1);
    }

    /// Move to the next tab stop, or the last column if there is none
    pub fn horizontal_tab(&mut self) {
        self.forward_tab(1);
    }

    /// CHT
    pub fn forward_tab(&mut self, n: u16) {
        for _ in 0..n.max(1) {
            let next = (self.cursor.col + 1..self.cols)
                .find(|&col| self.tabstops[col as usize])
                .unwrap_or(self.cols - 1);
            self.cursor.col = next;
        }
        self.wrap_pending = false;
    }

    /// CBT
    pub fn backward_tab(&mut self, n: u16) {
        for _ in 0..n.max(1) {
            let prev = (0..self.cursor.col)
                .rev()
                .find(|&col| self.tabstops[col as usize])
                .unwrap_or(0);
            self.cursor.col = prev;
        }
        self.wrap_pending = false;
    }

    /// HTS
    pub fn set_tabstop(&mut self) {
        self.tabstops[self.cursor.col as usize] = true;
    }

    /// TBC: 0 clears the stop at the cursor, 3 clears all
    pub fn clear_tabstop(&mut self, mode: u16) {
        match mode {
            0 => self.tabstops[self.cursor.col as usize] = false,
            3 => self.tabstops.fill(false),
            _ => tracing::debug!("Unsupported TBC mode {}", mode),
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.move_vertical(-(n.max(1) as i32));
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.move_vertical(n.max(1) as i32);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        self.move_horizontal(n.max(1) as i32);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        self.move_horizontal(-(n.max(1) as i32));
    }

    /// CNL
    pub fn cursor_next_line(&mut self, n: u16) {
        self.cursor_down(n);
        self.cursor.col = 0;
    }

    /// CPL
    pub fn cursor_prev_line(&mut self, n: u16) {
        self.cursor_up(n);
        self.cursor.col = 0;
    }

    /// CHA (1-indexed)
    pub fn cursor_column(&mut self, col: u16) {
        self.cursor.col = col.max(1).min(self.cols) - 1;
        self.wrap_pending = false;
    }

    /// VPA (1-indexed, origin relative)
    pub fn cursor_row(&mut self, row: u16) {
        self.set_cursor(row.max(1) as i32 - 1, self.cursor.col as i32);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        self.set_cursor(row.max(1) as i32 - 1, col.max(1) as i32 - 1);
    }

    /// Erase in display
    pub fn erase_in_display(&mut self, mode: u16) {
        let row = self.cursor.row;
        match mode {
            0 => {
                self.erase_in_line(0);
                for r in row + 1..self.rows {
                    self.erase_row(r);
                }
            }
            1 => {
                for r in 0..row {
                    self.erase_row(r);
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                for r in 0..self.rows {
                    self.erase_row(r);
                }
            }
            _ => tracing::debug!("Unsupported ED mode {}", mode),
        }
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: u16) {
        let CursorPos { row, col } = self.cursor;
        match mode {
            0 => {
                for c in col..self.cols {
                    self.erase_cell(row, c);
                }
            }
            1 => {
                for c in 0..=col {
                    self.erase_cell(row, c);
                }
            }
            2 => self.erase_row(row),
            _ => tracing::debug!("Unsupported EL mode {}", mode),
        }
    }

    /// ICH: shift the rest of the line right, blanking the gap
    pub fn insert_blanks(&mut self, n: u16) {
        let CursorPos { row, col } = self.cursor;
        let n = n.max(1) as i32;
        self.detach_wide_partner(row, col);
        self.erase_right_half(row, col);
        for i in (col as i32..self.cols as i32).rev() {
            if i - n >= col as i32 {
                self.copy_cell(row, i as u16, row, (i - n) as u16);
            } else {
                self.erase_cell(row, i as u16);
            }
        }
        self.repair_wide_pairs(row);
    }

    /// DCH: shift the rest of the line left, blanking the tail
    pub fn delete_chars(&mut self, n: u16) {
        let CursorPos { row, col } = self.cursor;
        let n = n.max(1) as u32;
        self.detach_wide_partner(row, col);
        if col as u32 + n < self.cols as u32 {
            self.erase_right_half(row, (col as u32 + n) as u16);
        }
        for i in col..self.cols {
            let src = i as u32 + n;
            if src < self.cols as u32 {
                self.copy_cell(row, i, row, src as u16);
            } else {
                self.erase_cell(row, i);
            }
        }
        self.repair_wide_pairs(row);
    }

    /// ECH
    pub fn erase_chars(&mut self, n: u16) {
        let CursorPos { row, col } = self.cursor;
        let end = (col as u32 + n.max(1) as u32).min(self.cols as u32) as u16;
        for c in col..end {
            self.erase_cell(row, c);
        }
    }

    /// Insert lines at cursor position (only inside the scroll region)
    pub fn insert_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let row = self.cursor.row;
        if row < top || row > bottom {
            return;
        }
        if row == bottom {
            self.erase_row(row);
        } else {
            self.scroll(row, bottom, -(n.max(1) as i32));
        }
    }

    /// Delete lines at cursor position (only inside the scroll region)
    pub fn delete_lines(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let row = self.cursor.row;
        if row < top || row > bottom {
            return;
        }
        if row == bottom {
            self.erase_row(row);
        } else {
            self.scroll(row, bottom, n.max(1) as i32);
        }
    }

    /// SU
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        self.scroll(top, bottom, n.max(1) as i32);
    }

    /// SD
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        self.scroll(top, bottom, -(n.max(1) as i32));
    }

    /// Set scroll region (1-indexed, inclusive). An empty or inverted
    /// region is ignored; otherwise the cursor goes home.
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let top = top.max(1).min(self.rows) - 1;
        let bottom = bottom.max(1).min(self.rows) - 1;
        if top >= bottom {
            tracing::debug!("Ignoring scroll region {}..{}", top + 1, bottom + 1);
            return;
        }
        self.scroll_region = (top, bottom);
        self.set_cursor(0, 0);
    }

    /// Save cursor position
    pub fn save_cursor(&mut self) {
        self.saved = SavedState {
            cursor: self.cursor,
            colors: self.colors,
            attrs: self.attrs,
            origin_mode: self.modes.origin_mode,
        };
    }

    /// Restore cursor position
    pub fn restore_cursor(&mut self) {
        let saved = self.saved;
        self.modes.origin_mode = saved.origin_mode;
        self.colors = saved.colors;
        self.attrs = saved.attrs;
        self.cursor = CursorPos {
            row: saved.cursor.row.min(self.rows - 1),
            col: saved.cursor.col.min(self.cols - 1),
        };
        self.wrap_pending = false;
    }

    /// Set private mode
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            6 => {
                self.modes.origin_mode = enable;
                self.set_cursor(0, 0);
            }
            7 => {
                self.modes.auto_wrap = enable;
                if !enable {
                    self.wrap_pending = false;
                }
            }
            25 => {
                self.modes.cursor_visible = enable;
                self.mark_dirty(self.cursor.row);
            }
            _ => tracing::debug!(
                "Unsupported private mode {} ({})",
                mode,
                if enable { "set" } else { "reset" }
            ),
        }
    }

    /// SGR 0
    pub fn reset_rendition(&mut self) {
        self.colors = self.options.default_colors;
        self.attrs = AttrFlags::empty();
    }

    /// DECALN: fill the screen with 'E'
    pub fn screen_alignment(&mut self) {
        let cell = Cell {
            glyph: self.glyphs.resolve('E' as u32, GlyphWidth::Half),
            ..self.blank_cell()
        };
        self.cells.fill(cell);
        self.dirty.fill(true);
        self.scroll_region = (0, self.rows - 1);
        self.cursor = CursorPos::default();
        self.wrap_pending = false;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::GlyphConfig;
    use crate::font::Glyph;

    /// Boxed glyphs for printable ASCII plus a few wide characters
    pub(crate) fn test_glyphs() -> GlyphTable {
        let mut glyphs = vec![
            Glyph::blank(0x20, GlyphWidth::Half, 16),
            Glyph::boxed(0x3013, GlyphWidth::Wide, 8, 16),
            Glyph::boxed(0x3042, GlyphWidth::Wide, 8, 16),
            Glyph::boxed(0x4E2D, GlyphWidth::Wide, 8, 16),
        ];
        glyphs.extend((0x21..=0x7E).map(|c| Glyph::boxed(c, GlyphWidth::Half, 8, 16)));
        glyphs.push(Glyph::boxed(0x2500, GlyphWidth::Half, 8, 16));
        GlyphTable::new(8, 16, glyphs, &GlyphConfig::default()).unwrap()
    }

    pub(crate) fn term(cols: u16, rows: u16) -> TerminalState {
        let config = Config::default();
        TerminalState::new(cols, rows, Arc::new(test_glyphs()), TermOptions::from(&config))
    }

    /// Row contents as text, trailing blanks trimmed
    pub(crate) fn text(t: &TerminalState, row: u16) -> String {
        let line = t.line(row).unwrap();
        let s: String = line
            .iter()
            .filter(|c| c.width != CellWidth::NextToWide)
            .map(|c| char::from_u32(t.glyphs().glyph(c.glyph).code).unwrap_or('?'))
            .collect();
        s.trim_end().to_string()
    }

    fn put(t: &mut TerminalState, s: &str) {
        for ch in s.chars() {
            t.insert_character(ch as u32);
        }
    }

    fn fill_rows(t: &mut TerminalState) {
        for r in 0..t.rows() {
            t.set_cursor(r as i32, 0);
            t.insert_character('a' as u32 + r as u32);
        }
    }

    fn assert_pairs_intact(t: &TerminalState, row: u16) {
        let line = t.line(row).unwrap();
        for (col, cell) in line.iter().enumerate() {
            match cell.width {
                CellWidth::Wide => assert_eq!(line[col + 1].width, CellWidth::NextToWide),
                CellWidth::NextToWide => assert_eq!(line[col - 1].width, CellWidth::Wide),
                CellWidth::Half => {}
            }
        }
    }

    #[test]
    fn test_put_ascii_advances_cursor() {
        let mut t = term(10, 3);
        (0..3).for_each(|r| t.set_dirty(r, false));
        put(&mut t, "hi");
        assert_eq!(text(&t, 0), "hi");
        assert_eq!(t.cursor(), CursorPos { row: 0, col: 2 });
        assert!(t.is_dirty(0));
        assert!(!t.is_dirty(1));
    }

    #[test]
    fn test_deferred_wrap() {
        let mut t = term(5, 3);
        put(&mut t, "abcde");
        assert_eq!(t.cursor(), CursorPos { row: 0, col: 4 });
        assert!(t.wrap_pending());

        put(&mut t, "f");
        assert_eq!(text(&t, 0), "abcde");
        assert_eq!(text(&t, 1), "f");
        assert_eq!(t.cursor(), CursorPos { row: 1, col: 1 });
    }

    #[test]
    fn test_carriage_return_cancels_pending_wrap() {
        let mut t = term(5, 3);
        put(&mut t, "abcde");
        t.carriage_return();
        put(&mut t, "x");
        assert_eq!(text(&t, 0), "xbcde");
        assert_eq!(text(&t, 1), "");
    }

    #[test]
    fn test_no_autowrap_overwrites_last_column() {
        let mut t = term(5, 3);
        t.set_private_mode(7, false);
        put(&mut t, "abcdefg");
        assert_eq!(text(&t, 0), "abcdg");
        assert_eq!(t.cursor(), CursorPos { row: 0, col: 4 });
    }

    #[test]
    fn test_wrap_at_bottom_scrolls() {
        let mut t = term(3, 2);
        put(&mut t, "abcdefg");
        assert_eq!(text(&t, 0), "def");
        assert_eq!(text(&t, 1), "g");
    }

    #[test]
    fn test_wide_char_occupies_two_cells() {
        let mut t = term(10, 2);
        put(&mut t, "aあb");
        let line = t.line(0).unwrap();
        assert_eq!(line[1].width, CellWidth::Wide);
        assert_eq!(line[2].width, CellWidth::NextToWide);
        assert_eq!(line[1].glyph, line[2].glyph);
        assert_eq!(text(&t, 0), "aあb");
        assert_eq!(t.cursor().col, 4);
    }

    #[test]
    fn test_wide_char_at_last_column_wraps_first() {
        let mut t = term(4, 2);
        put(&mut t, "abcあ");
        assert_eq!(text(&t, 0), "abc");
        assert_eq!(text(&t, 1), "あ");
        assert_eq!(t.cursor(), CursorPos { row: 1, col: 2 });
        assert_pairs_intact(&t, 0);
        assert_pairs_intact(&t, 1);
    }

    #[test]
    fn test_wide_char_dropped_on_single_column_grid() {
        let mut t = term(1, 2);
        put(&mut t, "あ");
        assert_eq!(text(&t, 0), "");
        assert_eq!(t.cursor(), CursorPos::default());
    }

    #[test]
    fn test_overwriting_half_of_wide_pair_blanks_partner() {
        let mut t = term(6, 1);
        put(&mut t, "あ");
        t.set_cursor(0, 1);
        put(&mut t, "x");
        assert_eq!(text(&t, 0), " x");
        assert_eq!(t.line(0).unwrap()[0].width, CellWidth::Half);

        let mut t = term(6, 1);
        put(&mut t, "あ");
        t.set_cursor(0, 0);
        put(&mut t, "y");
        assert_eq!(text(&t, 0), "y");
        assert_pairs_intact(&t, 0);
    }

    #[test]
    fn test_zero_width_and_control_codes_dropped() {
        let mut t = term(6, 1);
        put(&mut t, "e");
        t.insert_character(0x0301);
        t.insert_character(0x07);
        assert_eq!(text(&t, 0), "e");
        assert_eq!(t.cursor().col, 1);
    }

    #[test]
    fn test_missing_glyph_uses_substitute() {
        let mut t = term(6, 1);
        t.insert_character(0x4E00);
        let line = t.line(0).unwrap();
        assert_eq!(line[0].glyph, t.glyphs().substitute(GlyphWidth::Wide));
        assert_eq!(line[0].width, CellWidth::Wide);
        assert_eq!(t.cursor().col, 2);
    }

    #[test]
    fn test_rendition_promotes_and_swaps_colors() {
        let mut t = term(6, 1);
        t.attrs = AttrFlags::BOLD;
        t.colors = ColorPair { fg: 1, bg: 0 };
        put(&mut t, "a");
        assert_eq!(t.line(0).unwrap()[0].colors, ColorPair { fg: 9, bg: 0 });

        t.attrs = AttrFlags::REVERSE | AttrFlags::BLINK;
        t.colors = ColorPair { fg: 2, bg: 4 };
        put(&mut t, "b");
        assert_eq!(t.line(0).unwrap()[1].colors, ColorPair { fg: 12, bg: 2 });

        t.attrs = AttrFlags::BOLD;
        t.colors = ColorPair { fg: 200, bg: 0 };
        put(&mut t, "c");
        assert_eq!(t.line(0).unwrap()[2].colors.fg, 200);
    }

    #[test]
    fn test_linefeed_scrolls_inside_region() {
        let mut t = term(10, 5);
        fill_rows(&mut t);
        t.set_scroll_region(2, 4);
        assert_eq!(t.scroll_region(), (1, 3));
        assert_eq!(t.cursor(), CursorPos::default());

        t.set_cursor(3, 0);
        t.linefeed();
        assert_eq!(text(&t, 0), "a");
        assert_eq!(text(&t, 1), "c");
        assert_eq!(text(&t, 2), "d");
        assert_eq!(text(&t, 3), "");
        assert_eq!(text(&t, 4), "e");
        assert_eq!(t.cursor().row, 3);

        t.set_cursor(1, 0);
        t.reverse_index();
        assert_eq!(text(&t, 1), "");
        assert_eq!(text(&t, 2), "c");
        assert_eq!(t.cursor().row, 1);
    }

    #[test]
    fn test_scroll_up_then_down() {
        let mut t = term(4, 6);
        fill_rows(&mut t);
        t.scroll(1, 4, 1);
        t.scroll(1, 4, -1);
        assert_eq!(text(&t, 0), "a");
        assert_eq!(text(&t, 1), "");
        assert_eq!(text(&t, 2), "c");
        assert_eq!(text(&t, 3), "d");
        assert_eq!(text(&t, 4), "e");
        assert_eq!(text(&t, 5), "f");
    }

    #[test]
    fn test_scroll_clamps_offset_and_ignores_empty_region() {
        let mut t = term(4, 3);
        fill_rows(&mut t);
        t.scroll(2, 2, 1);
        assert_eq!(text(&t, 2), "c");

        t.scroll(0, 2, 10);
        assert!((0..3).all(|r| text(&t, r).is_empty()));

        fill_rows(&mut t);
        t.scroll(0, 2, -10);
        assert!((0..3).all(|r| text(&t, r).is_empty()));
    }

    #[test]
    fn test_tab_stops() {
        let mut t = term(20, 1);
        t.horizontal_tab();
        assert_eq!(t.cursor().col, 8);
        t.horizontal_tab();
        assert_eq!(t.cursor().col, 16);
        t.horizontal_tab();
        assert_eq!(t.cursor().col, 19);

        t.clear_tabstop(3);
        t.set_cursor(0, 4);
        t.set_tabstop();
        t.carriage_return();
        t.horizontal_tab();
        assert_eq!(t.cursor().col, 4);

        t.set_cursor(0, 10);
        t.backward_tab(1);
        assert_eq!(t.cursor().col, 4);
        t.backward_tab(1);
        assert_eq!(t.cursor().col, 0);
    }

    #[test]
    fn test_insert_delete_erase_chars() {
        let mut t = term(6, 1);
        put(&mut t, "abcd");
        t.set_cursor(0, 1);
        t.insert_blanks(2);
        assert_eq!(text(&t, 0), "a  bcd");

        t.delete_chars(2);
        assert_eq!(text(&t, 0), "abcd");

        t.erase_chars(2);
        assert_eq!(text(&t, 0), "a  d");
        assert_eq!(t.cursor().col, 1);
    }

    #[test]
    fn test_delete_chars_keeps_wide_pairs_consistent() {
        let mut t = term(6, 1);
        t.set_cursor(0, 2);
        put(&mut t, "あ");
        t.set_cursor(0, 0);
        t.delete_chars(1);
        assert_eq!(t.line(0).unwrap()[1].width, CellWidth::Wide);
        assert_pairs_intact(&t, 0);

        let mut t = term(6, 1);
        t.set_cursor(0, 2);
        put(&mut t, "あ");
        t.set_cursor(0, 3);
        t.delete_chars(1);
        assert_pairs_intact(&t, 0);
        assert_eq!(text(&t, 0), "");

        let mut t = term(5, 1);
        t.set_cursor(0, 2);
        put(&mut t, "あ");
        t.set_cursor(0, 0);
        t.insert_blanks(1);
        assert_pairs_intact(&t, 0);
    }

    #[test]
    fn test_shift_starting_on_right_half_leaves_no_stale_cell() {
        let mut t = term(6, 1);
        put(&mut t, "aあcd");
        t.set_cursor(0, 0);
        t.delete_chars(2);
        assert_eq!(text(&t, 0), " cd");
        assert_pairs_intact(&t, 0);

        let mut t = term(6, 1);
        put(&mut t, "aあcd");
        t.set_cursor(0, 2);
        t.insert_blanks(1);
        assert_eq!(text(&t, 0), "a   cd");
        assert_pairs_intact(&t, 0);
    }

    #[test]
    fn test_insert_and_delete_lines() {
        let mut t = term(4, 5);
        fill_rows(&mut t);
        t.set_cursor(1, 0);
        t.insert_lines(2);
        let rows: Vec<_> = (0..5).map(|r| text(&t, r)).collect();
        assert_eq!(rows, vec!["a", "", "", "b", "c"]);

        t.delete_lines(1);
        let rows: Vec<_> = (0..5).map(|r| text(&t, r)).collect();
        assert_eq!(rows, vec!["a", "", "b", "c", ""]);
    }

    #[test]
    fn test_line_ops_at_region_bottom_and_outside() {
        let mut t = term(4, 5);
        fill_rows(&mut t);
        t.set_scroll_region(1, 3);
        t.set_cursor(2, 0);
        t.insert_lines(1);
        assert_eq!(text(&t, 2), "");
        assert_eq!(text(&t, 1), "b");

        t.set_cursor(4, 0);
        t.delete_lines(1);
        assert_eq!(text(&t, 4), "e");
    }

    #[test]
    fn test_origin_mode_addressing() {
        let mut t = term(10, 10);
        t.set_scroll_region(3, 6);
        t.set_private_mode(6, true);
        assert_eq!(t.cursor(), CursorPos { row: 2, col: 0 });

        t.cursor_position(2, 3);
        assert_eq!(t.cursor(), CursorPos { row: 3, col: 2 });

        t.cursor_position(20, 1);
        assert_eq!(t.cursor().row, 5);

        t.cursor_down(10);
        assert_eq!(t.cursor().row, 5);

        t.set_private_mode(6, false);
        t.cursor_position(1, 1);
        assert_eq!(t.cursor(), CursorPos::default());
    }

    #[test]
    fn test_relative_moves_clamp_without_scrolling() {
        let mut t = term(10, 5);
        fill_rows(&mut t);
        t.set_cursor(4, 5);
        t.cursor_down(3);
        t.cursor_forward(20);
        assert_eq!(t.cursor(), CursorPos { row: 4, col: 9 });
        assert_eq!(text(&t, 0), "a");

        t.cursor_prev_line(2);
        assert_eq!(t.cursor(), CursorPos { row: 2, col: 0 });
    }

    #[test]
    fn test_save_and_restore_cursor() {
        let mut t = term(10, 5);
        t.set_cursor(2, 3);
        t.attrs = AttrFlags::BOLD;
        t.colors.fg = 1;
        t.save_cursor();

        t.set_cursor(0, 0);
        t.reset_rendition();
        t.restore_cursor();
        assert_eq!(t.cursor(), CursorPos { row: 2, col: 3 });
        assert_eq!(t.attrs, AttrFlags::BOLD);
        assert_eq!(t.colors.fg, 1);
    }

    #[test]
    fn test_erase_in_display_and_line() {
        let mut t = term(4, 3);
        for r in 0..3 {
            t.set_cursor(r, 0);
            put(&mut t, "abcd");
        }
        t.set_cursor(1, 1);
        t.erase_in_line(0);
        assert_eq!(text(&t, 1), "a");
        t.erase_in_display(1);
        assert_eq!(text(&t, 0), "");
        assert_eq!(text(&t, 1), "");
        assert_eq!(text(&t, 2), "abcd");
        t.erase_in_display(2);
        assert_eq!(text(&t, 2), "");
    }

    #[test]
    fn test_erase_uses_current_colors() {
        let mut t = term(4, 1);
        t.colors = ColorPair { fg: 3, bg: 4 };
        t.erase_in_line(2);
        assert!(t
            .line(0)
            .unwrap()
            .iter()
            .all(|c| c.colors == ColorPair { fg: 3, bg: 4 } && c.attrs.is_empty()));
    }

    #[test]
    fn test_reset_and_resize() {
        let mut t = term(10, 4);
        put(&mut t, "hello");
        t.set_scroll_region(2, 3);
        t.attrs = AttrFlags::UNDERLINE;
        t.modes.cursor_visible = false;

        t.resize(6, 2);
        assert_eq!((t.cols(), t.rows()), (6, 2));
        assert_eq!(t.scroll_region(), (0, 1));
        assert_eq!(t.cursor(), CursorPos::default());
        assert!(t.modes.cursor_visible);
        assert!(t.attrs.is_empty());
        assert!(t.is_dirty(0) && t.is_dirty(1));
        assert_eq!(text(&t, 0), "");
        assert!(t.is_tabstop(0));
        assert!(!t.is_tabstop(5));
    }

    #[test]
    fn test_reset_restores_blank_grid() {
        let mut t = term(20, 3);
        t.colors = ColorPair { fg: 2, bg: 5 };
        t.attrs = AttrFlags::BOLD | AttrFlags::REVERSE | AttrFlags::UNDERLINE;
        put(&mut t, "abcあ中");
        t.set_cursor(2, 5);
        put(&mut t, "xyz");
        t.erase_in_line(0);
        t.clear_tabstop(3);
        t.set_cursor(1, 3);
        t.set_tabstop();
        (0..3).for_each(|r| t.set_dirty(r, false));

        t.reset();

        let blank = Cell {
            glyph: t.glyphs().default_glyph(),
            colors: t.default_colors(),
            attrs: AttrFlags::empty(),
            width: CellWidth::Half,
        };
        for row in 0..t.rows() {
            assert!(t.line(row).unwrap().iter().all(|c| *c == blank), "row {}", row);
            assert!(t.is_dirty(row));
        }
        let tab_width = t.options().tab_width;
        for col in 0..t.cols() {
            assert_eq!(t.is_tabstop(col), col % tab_width == 0, "column {}", col);
        }
        assert_eq!(t.cursor(), CursorPos::default());
        assert_eq!(t.colors, t.default_colors());
        assert!(t.attrs.is_empty());
        assert!(!t.wrap_pending());
    }

    #[test]
    fn test_screen_alignment() {
        let mut t = term(3, 2);
        t.screen_alignment();
        assert_eq!(text(&t, 0), "EEE");
        assert_eq!(text(&t, 1), "EEE");
    }
}
