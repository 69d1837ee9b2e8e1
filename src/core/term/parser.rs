//! VT sequence parser
//!
//! Byte-at-a-time state machine that turns the child's output into calls on
//! [`TerminalState`]. Everything after ESC is collected in an
//! [`EscapeBuffer`] and only decoded once the final byte arrives, so a
//! sequence aborted by an illegal byte never touches the grid.

use super::charset::Utf8Step;
use super::state::{AttrFlags, TerminalState};
use crate::ui::palette::{nearest_index, BRIGHT_INC};

/// Response that needs to be sent back to the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(u16, u16),
    /// Operating status report: ESC [ 0 n
    StatusOk,
    /// Device attributes response
    DeviceAttributes,
    /// Secondary device attributes response
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            // VT102
            Response::DeviceAttributes => b"\x1b[?6c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
        }
    }
}

/// Which kind of sequence is being collected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SeqState {
    #[default]
    Reset,
    Esc,
    Csi,
    Osc,
    Dcs,
}

/// Growable byte buffer for the sequence in progress.
///
/// Starts at the configured size and doubles whenever it is full; the
/// write position is kept across growth.
#[derive(Debug)]
pub struct EscapeBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl EscapeBuffer {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            buf: vec![0; size.max(1)],
            len: 0,
        }
    }

    pub fn push(&mut self, byte: u8) {
        if self.len == self.buf.len() {
            let size = self.buf.len() * 2;
            tracing::trace!("escape buffer grows to {} bytes", size);
            self.buf.resize(size, 0);
        }
        self.buf[self.len] = byte;
        self.len += 1;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn last(&self) -> Option<u8> {
        self.as_bytes().last().copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Parser state machine
pub struct VtParser {
    state: SeqState,
    buffer: EscapeBuffer,
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl VtParser {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            state: SeqState::Reset,
            buffer: EscapeBuffer::with_capacity(buffer_size),
        }
    }

    pub fn state(&self) -> SeqState {
        self.state
    }

    pub fn buffer(&self) -> &EscapeBuffer {
        &self.buffer
    }

    /// Drop any partial sequence
    pub fn reset(&mut self) {
        self.state = SeqState::Reset;
        self.buffer.clear();
    }

    /// Feed a chunk of child output, collecting any replies
    pub fn feed(&mut self, bytes: &[u8], term: &mut TerminalState) -> Vec<Response> {
        bytes
            .iter()
            .filter_map(|&byte| self.advance(byte, term))
            .collect()
    }

    /// Feed a single byte to the parser
    pub fn advance(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match self.state {
            SeqState::Reset => {
                self.ground(byte, term);
                None
            }
            SeqState::Esc => self.escape(byte, term),
            SeqState::Csi => self.csi(byte, term),
            SeqState::Osc | SeqState::Dcs => self.string(byte, term),
        }
    }

    /// Give up on the current sequence. The offending byte is dropped,
    /// except ESC, which starts a new sequence.
    fn abort(&mut self, byte: u8) {
        tracing::trace!(
            "invalid byte {:#04x} in {:?} sequence {:?}",
            byte,
            self.state,
            String::from_utf8_lossy(self.buffer.as_bytes())
        );
        self.reset();
        if byte == 0x1B {
            self.state = SeqState::Esc;
        }
    }

    fn ground(&mut self, byte: u8, term: &mut TerminalState) {
        if byte < 0x80 && term.utf8.is_pending() {
            tracing::trace!("UTF-8 sequence interrupted by {:#04x}", byte);
            term.utf8.reset();
            term.insert_character(term.options().replacement_char);
        }

        match byte {
            0x1B => self.state = SeqState::Esc,
            0x00..=0x1F => control(byte, term),
            0x7F => {}
            0x20..=0x7E => {
                let code = term.charsets.translate(byte);
                term.insert_character(code);
            }
            _ => match term.utf8.push(byte) {
                Utf8Step::Pending => {}
                Utf8Step::Char(code) => term.insert_character(code),
                Utf8Step::Invalid => term.insert_character(term.options().replacement_char),
            },
        }
    }

    fn escape(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x2F => {
                self.buffer.push(byte);
                None
            }
            0x30..=0x7E => {
                let introducer = match byte {
                    b'[' => Some(SeqState::Csi),
                    b']' => Some(SeqState::Osc),
                    b'P' => Some(SeqState::Dcs),
                    _ => None,
                };
                self.buffer.push(byte);
                if let (true, Some(next)) = (self.buffer.len() == 1, introducer) {
                    self.state = next;
                    return None;
                }
                let response = self.execute_escape(term);
                self.reset();
                response
            }
            _ => {
                self.abort(byte);
                None
            }
        }
    }

    fn csi(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x3F => {
                self.buffer.push(byte);
                None
            }
            0x40..=0x7E => {
                self.buffer.push(byte);
                let seq = CsiSequence::parse(self.buffer.as_bytes());
                let response = execute_csi(&seq, term);
                self.reset();
                response
            }
            _ => {
                self.abort(byte);
                None
            }
        }
    }

    /// OSC and DCS bodies, terminated by BEL or ESC \
    ///
    /// An ESC followed by anything else abandons the string and starts a
    /// new escape sequence with that byte.
    fn string(&mut self, byte: u8, term: &mut TerminalState) -> Option<Response> {
        if self.buffer.last() == Some(0x1B) {
            if byte == b'\\' {
                self.finish_string(true, term);
                return None;
            }
            self.abort(0x1B);
            return self.escape(byte, term);
        }

        match byte {
            0x07 => self.finish_string(false, term),
            0x1B | 0x20..=0x7E => self.buffer.push(byte),
            _ => self.abort(byte),
        }
        None
    }

    fn finish_string(&mut self, string_terminator: bool, term: &mut TerminalState) {
        let bytes = self.buffer.as_bytes();
        let end = bytes.len() - usize::from(string_terminator);
        let payload = bytes.get(1..end).unwrap_or(&[]);
        match self.state {
            SeqState::Osc => execute_osc(payload, term),
            _ => tracing::debug!("Discarding DCS ({} bytes)", payload.len()),
        }
        self.reset();
    }

    fn execute_escape(&self, term: &mut TerminalState) -> Option<Response> {
        let bytes = self.buffer.as_bytes();
        let (intermediates, final_byte) = match bytes.split_last() {
            Some((&last, rest)) => (rest, last),
            None => return None,
        };

        match (intermediates, final_byte) {
            ([], b'7') => term.save_cursor(),
            ([], b'8') => term.restore_cursor(),
            ([], b'D') => term.index(),
            ([], b'E') => term.next_line(),
            ([], b'H') => term.set_tabstop(),
            ([], b'M') => term.reverse_index(),
            ([], b'Z') => return Some(Response::DeviceAttributes),
            ([], b'c') => {
                tracing::debug!("Full reset");
                term.reset();
            }
            ([slot @ (b'(' | b')')], set) => term.charsets.designate(*slot, set),
            ([b'#'], b'8') => term.screen_alignment(),
            _ => tracing::debug!("Unknown ESC: {:?}", String::from_utf8_lossy(bytes)),
        }
        None
    }
}

fn control(byte: u8, term: &mut TerminalState) {
    match byte {
        0x07 => {} // BEL
        0x08 => term.backspace(),
        0x09 => term.horizontal_tab(),
        0x0A..=0x0C => term.linefeed(),
        0x0D => term.carriage_return(),
        0x0E => term.charsets.shifted = true,
        0x0F => term.charsets.shifted = false,
        _ => tracing::trace!("Ignoring control {:#04x}", byte),
    }
}

/// Decoded CSI sequence
#[derive(Debug, Default, PartialEq, Eq)]
struct CsiSequence {
    /// Leading `<`, `=`, `>` or `?`
    private: Option<u8>,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    final_byte: u8,
}

impl CsiSequence {
    /// `bytes` is everything after ESC, starting with `[`
    fn parse(bytes: &[u8]) -> Self {
        let final_byte = bytes.last().copied().unwrap_or(0);
        let mut body = bytes.get(1..bytes.len().saturating_sub(1)).unwrap_or(&[]);
        let mut seq = Self {
            final_byte,
            ..Self::default()
        };

        if let Some((&first, rest)) = body.split_first() {
            if (0x3C..=0x3F).contains(&first) {
                seq.private = Some(first);
                body = rest;
            }
        }

        let mut current: Option<u16> = None;
        let mut has_params = false;
        for &b in body {
            match b {
                b'0'..=b'9' => {
                    let digit = (b - b'0') as u16;
                    current = Some(current.unwrap_or(0).saturating_mul(10).saturating_add(digit));
                    has_params = true;
                }
                b';' | b':' => {
                    seq.params.push(current.take().unwrap_or(0));
                    has_params = true;
                }
                0x20..=0x2F => seq.intermediates.push(b),
                _ => {}
            }
        }
        if has_params {
            seq.params.push(current.unwrap_or(0));
        }
        seq
    }

    /// Parameter `index`, with 0 or a missing value meaning `default`
    fn arg(&self, index: usize, default: u16) -> u16 {
        match self.params.get(index) {
            Some(&value) if value != 0 => value,
            _ => default,
        }
    }
}

fn execute_csi(seq: &CsiSequence, term: &mut TerminalState) -> Option<Response> {
    match (seq.private, seq.intermediates.as_slice(), seq.final_byte) {
        (None, [], b'@') => term.insert_blanks(seq.arg(0, 1)),
        (None, [], b'A') => term.cursor_up(seq.arg(0, 1)),
        (None, [], b'B' | b'e') => term.cursor_down(seq.arg(0, 1)),
        (None, [], b'C' | b'a') => term.cursor_forward(seq.arg(0, 1)),
        (None, [], b'D') => term.cursor_backward(seq.arg(0, 1)),
        (None, [], b'E') => term.cursor_next_line(seq.arg(0, 1)),
        (None, [], b'F') => term.cursor_prev_line(seq.arg(0, 1)),
        (None, [], b'G' | b'`') => term.cursor_column(seq.arg(0, 1)),
        (None, [], b'H' | b'f') => term.cursor_position(seq.arg(0, 1), seq.arg(1, 1)),
        (None, [], b'I') => term.forward_tab(seq.arg(0, 1)),
        (None, [], b'J') => term.erase_in_display(seq.arg(0, 0)),
        (None, [], b'K') => term.erase_in_line(seq.arg(0, 0)),
        (None, [], b'L') => term.insert_lines(seq.arg(0, 1)),
        (None, [], b'M') => term.delete_lines(seq.arg(0, 1)),
        (None, [], b'P') => term.delete_chars(seq.arg(0, 1)),
        (None, [], b'S') => term.scroll_up(seq.arg(0, 1)),
        (None, [], b'T') => term.scroll_down(seq.arg(0, 1)),
        (None, [], b'X') => term.erase_chars(seq.arg(0, 1)),
        (None, [], b'Z') => term.backward_tab(seq.arg(0, 1)),
        (None, [], b'c') if seq.arg(0, 0) == 0 => return Some(Response::DeviceAttributes),
        (Some(b'>'), [], b'c') => return Some(Response::SecondaryDeviceAttributes),
        (None, [], b'd') => term.cursor_row(seq.arg(0, 1)),
        (None, [], b'g') => term.clear_tabstop(seq.arg(0, 0)),
        (Some(b'?'), [], b'h') => {
            for &mode in &seq.params {
                term.set_private_mode(mode, true);
            }
        }
        (Some(b'?'), [], b'l') => {
            for &mode in &seq.params {
                term.set_private_mode(mode, false);
            }
        }
        (None, [], b'm') => execute_sgr(&seq.params, term),
        (None, [], b'n') => match seq.arg(0, 0) {
            5 => return Some(Response::StatusOk),
            6 => {
                let cursor = term.cursor();
                let top = if term.modes.origin_mode {
                    term.scroll_region().0
                } else {
                    0
                };
                return Some(Response::CursorPosition(
                    cursor.row.saturating_sub(top) + 1,
                    cursor.col + 1,
                ));
            }
            n => tracing::debug!("Unsupported DSR {}", n),
        },
        (None, [], b'r') => term.set_scroll_region(seq.arg(0, 1), seq.arg(1, term.rows())),
        (None, [], b's') => term.save_cursor(),
        (None, [], b'u') => term.restore_cursor(),
        _ => tracing::debug!(
            "Unknown CSI: private={:?}, intermediates={:?}, params={:?}, final={:?}",
            seq.private.map(char::from),
            seq.intermediates,
            seq.params,
            seq.final_byte as char
        ),
    }
    None
}

fn execute_sgr(params: &[u16], term: &mut TerminalState) {
    if params.is_empty() {
        term.reset_rendition();
        return;
    }

    let mut iter = params.iter().copied();

    while let Some(param) = iter.next() {
        match param {
            0 => term.reset_rendition(),
            1 => term.attrs |= AttrFlags::BOLD,
            4 => term.attrs |= AttrFlags::UNDERLINE,
            5 => term.attrs |= AttrFlags::BLINK,
            7 => term.attrs |= AttrFlags::REVERSE,

            21 | 22 => term.attrs.remove(AttrFlags::BOLD),
            24 => term.attrs.remove(AttrFlags::UNDERLINE),
            25 => term.attrs.remove(AttrFlags::BLINK),
            27 => term.attrs.remove(AttrFlags::REVERSE),

            30..=37 => term.colors.fg = (param - 30) as u8,
            38 => {
                if let Some(color) = extended_color(&mut iter) {
                    term.colors.fg = color;
                }
            }
            39 => term.colors.fg = term.default_colors().fg,

            40..=47 => term.colors.bg = (param - 40) as u8,
            48 => {
                if let Some(color) = extended_color(&mut iter) {
                    term.colors.bg = color;
                }
            }
            49 => term.colors.bg = term.default_colors().bg,

            90..=97 => term.colors.fg = (param - 90) as u8 + BRIGHT_INC,
            100..=107 => term.colors.bg = (param - 100) as u8 + BRIGHT_INC,

            _ => tracing::trace!("Unsupported SGR {}", param),
        }
    }
}

/// `5;n` (palette index) or `2;r;g;b` (mapped to the nearest index)
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<u8> {
    let channel = |v: u16| v.min(255) as u8;
    match iter.next()? {
        5 => iter.next().map(channel),
        2 => {
            let r = channel(iter.next()?);
            let g = channel(iter.next()?);
            let b = channel(iter.next()?);
            Some(nearest_index(r, g, b))
        }
        mode => {
            tracing::trace!("Unsupported extended color mode {}", mode);
            None
        }
    }
}

fn execute_osc(payload: &[u8], term: &mut TerminalState) {
    let text = String::from_utf8_lossy(payload);
    let (code, arg) = text.split_once(';').unwrap_or((text.as_ref(), ""));
    match code {
        "0" | "2" => term.title = arg.to_string(),
        "1" => {} // icon name
        _ => tracing::debug!("Unsupported OSC {:?}", code),
    }
}
