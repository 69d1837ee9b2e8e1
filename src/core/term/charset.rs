//! Incremental UTF-8 decoding and G0/G1 character set translation.

/// Result of pushing one byte into the decoder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Utf8Step {
    /// More continuation bytes are expected
    Pending,
    /// A complete, valid code point
    Char(u32),
    /// The sequence was malformed; the caller shows the replacement glyph
    Invalid,
}

/// Streaming UTF-8 decoder.
///
/// State survives across reads, so a multi-byte sequence split between two
/// chunks decodes the same as when it arrives in one. Overlong forms,
/// surrogates, non-characters and values above U+10FFFF are rejected.
#[derive(Clone, Debug, Default)]
pub struct Utf8Decoder {
    code: u32,
    lead: u8,
    count: u8,
    following: u8,
    valid: bool,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// A lead byte was seen and its continuation bytes are still missing
    pub fn is_pending(&self) -> bool {
        self.following > 0
    }

    /// Feed one byte in the range 0x80..=0xFF
    pub fn push(&mut self, byte: u8) -> Utf8Step {
        match byte {
            0x80..=0xBF => {
                if self.following == 0 {
                    tracing::trace!("stray UTF-8 continuation byte {:#04x}", byte);
                    self.reset();
                    return Utf8Step::Invalid;
                }
                if self.count == 0 && !self.second_byte_ok(byte) {
                    self.valid = false;
                }
                self.code = (self.code << 6) | (byte & 0x3F) as u32;
                self.count += 1;
                if self.count < self.following {
                    return Utf8Step::Pending;
                }
                let step = if self.valid && is_valid_scalar(self.code) {
                    Utf8Step::Char(self.code)
                } else {
                    tracing::trace!("malformed UTF-8 sequence (U+{:X})", self.code);
                    Utf8Step::Invalid
                };
                self.reset();
                step
            }
            0xC0..=0xFD => {
                let (following, mask) = match byte {
                    0xC0..=0xDF => (1, 0x1F),
                    0xE0..=0xEF => (2, 0x0F),
                    0xF0..=0xF7 => (3, 0x07),
                    0xF8..=0xFB => (4, 0x03),
                    _ => (5, 0x01),
                };
                let step = if self.is_pending() {
                    Utf8Step::Invalid
                } else {
                    Utf8Step::Pending
                };
                *self = Self {
                    code: (byte & mask) as u32,
                    lead: byte,
                    count: 0,
                    following,
                    valid: true,
                };
                step
            }
            _ => {
                // 0xFE and 0xFF never appear in UTF-8; ASCII is handled by the caller
                self.reset();
                Utf8Step::Invalid
            }
        }
    }

    /// Reject overlong encodings as early as the second byte
    fn second_byte_ok(&self, byte: u8) -> bool {
        match self.lead {
            0xC0..=0xDF => self.code > 1,
            0xE0 => byte >= 0xA0,
            0xF0 => byte >= 0x90,
            0xF8 => byte >= 0x88,
            0xFC => byte >= 0x84,
            _ => true,
        }
    }
}

fn is_valid_scalar(code: u32) -> bool {
    !matches!(code, 0xD800..=0xDFFF | 0xFDD0..=0xFDEF)
        && (code & 0xFFFF) < 0xFFFE
        && code <= 0x10FFFF
}

/// Graphic set that can be designated into G0 or G1
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    #[default]
    Ascii,
    DecSpecialGraphics,
}

impl Charset {
    /// Map a designation final byte (`ESC ( F`) to a set
    pub fn from_final(byte: u8) -> Self {
        match byte {
            b'0' => Charset::DecSpecialGraphics,
            _ => Charset::Ascii,
        }
    }

    pub fn translate(self, byte: u8) -> u32 {
        match self {
            Charset::Ascii => byte as u32,
            Charset::DecSpecialGraphics => dec_special_graphics(byte).unwrap_or(byte as u32),
        }
    }
}

/// G0/G1 designations and the current shift state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Charsets {
    pub g0: Charset,
    pub g1: Charset,
    /// SO selects G1, SI selects G0 again
    pub shifted: bool,
}

impl Charsets {
    pub fn designate(&mut self, slot: u8, final_byte: u8) {
        let set = Charset::from_final(final_byte);
        match slot {
            b'(' => self.g0 = set,
            b')' => self.g1 = set,
            _ => tracing::debug!("Unsupported charset slot {:?}", slot as char),
        }
    }

    pub fn translate(&self, byte: u8) -> u32 {
        if self.shifted {
            self.g1.translate(byte)
        } else {
            self.g0.translate(byte)
        }
    }
}

/// VT100 line drawing set, 0x5F..=0x7E
fn dec_special_graphics(byte: u8) -> Option<u32> {
    let code = match byte {
        0x5F => 0x0020,
        0x60 => 0x25C6,
        0x61 => 0x2592,
        0x62 => 0x2409,
        0x63 => 0x240C,
        0x64 => 0x240D,
        0x65 => 0x240A,
        0x66 => 0x00B0,
        0x67 => 0x00B1,
        0x68 => 0x2424,
        0x69 => 0x240B,
        0x6A => 0x2518,
        0x6B => 0x2510,
        0x6C => 0x250C,
        0x6D => 0x2514,
        0x6E => 0x253C,
        0x6F => 0x23BA,
        0x70 => 0x23BB,
        0x71 => 0x2500,
        0x72 => 0x23BC,
        0x73 => 0x23BD,
        0x74 => 0x251C,
        0x75 => 0x2524,
        0x76 => 0x2534,
        0x77 => 0x252C,
        0x78 => 0x2502,
        0x79 => 0x2264,
        0x7A => 0x2265,
        0x7B => 0x03C0,
        0x7C => 0x2260,
        0x7D => 0x00A3,
        0x7E => 0x00B7,
        _ => return None,
    };
    Some(code)
}
