//! Color palette and pixel formats.
//!
//! Cells carry logical color indices (0-255). At startup, and again whenever
//! the surface changes format, every index is converted once into a packed
//! pixel value for the active [`PixelFormat`].

use crate::error::{Result, TermError};

pub const COLORS: usize = 256;

/// Offset added to a base color (0-7) to get its bright variant
pub const BRIGHT_INC: u8 = 8;

/// Position and size of one color channel inside a pixel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bitfield {
    pub offset: u8,
    pub length: u8,
}

impl Bitfield {
    pub const fn new(offset: u8, length: u8) -> Self {
        Self { offset, length }
    }

    /// Place an 8-bit channel value, keeping its top `length` bits
    fn pack(self, value: u8) -> u32 {
        ((value as u32) >> (8 - self.length)) << self.offset
    }

    /// Extract the channel and widen it back to 8 bits
    fn unpack(self, pixel: u32) -> u8 {
        let max = (1u32 << self.length) - 1;
        let value = (pixel >> self.offset) & max;
        (value * 255 / max) as u8
    }
}

/// Native surface format codes understood by [`PixelFormat::from_code`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum FormatCode {
    Rgba8888 = 1,
    Rgbx8888 = 2,
    Rgb565 = 4,
}

impl TryFrom<i32> for FormatCode {
    type Error = TermError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            1 => Ok(FormatCode::Rgba8888),
            2 => Ok(FormatCode::Rgbx8888),
            4 => Ok(FormatCode::Rgb565),
            _ => Err(TermError::UnknownPixelFormat(code)),
        }
    }
}

/// Channel layout of a packed pixel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormat {
    pub red: Bitfield,
    pub green: Bitfield,
    pub blue: Bitfield,
    pub bytes_per_pixel: u8,
}

impl PixelFormat {
    pub fn new(red: Bitfield, green: Bitfield, blue: Bitfield, bytes_per_pixel: u8) -> Result<Self> {
        if !(1..=4).contains(&bytes_per_pixel) {
            return Err(TermError::InvalidGeometry(format!(
                "{} bytes per pixel",
                bytes_per_pixel
            )));
        }
        for (channel, field) in [("red", red), ("green", green), ("blue", blue)] {
            let fits = field.offset as u32 + field.length as u32 <= bytes_per_pixel as u32 * 8;
            if !(1..=8).contains(&field.length) || !fits {
                return Err(TermError::InvalidBitfield {
                    channel,
                    offset: field.offset,
                    length: field.length,
                });
            }
        }
        Ok(Self {
            red,
            green,
            blue,
            bytes_per_pixel,
        })
    }

    /// Red in the lowest byte, 32 bits per pixel
    pub const fn rgbx8888() -> Self {
        Self {
            red: Bitfield::new(0, 8),
            green: Bitfield::new(8, 8),
            blue: Bitfield::new(16, 8),
            bytes_per_pixel: 4,
        }
    }

    pub const fn rgb565() -> Self {
        Self {
            red: Bitfield::new(0, 5),
            green: Bitfield::new(5, 6),
            blue: Bitfield::new(11, 5),
            bytes_per_pixel: 2,
        }
    }

    /// Blue in the lowest byte, 32 bits per pixel (typical Linux framebuffer)
    pub const fn xrgb8888() -> Self {
        Self {
            red: Bitfield::new(16, 8),
            green: Bitfield::new(8, 8),
            blue: Bitfield::new(0, 8),
            bytes_per_pixel: 4,
        }
    }

    pub fn from_format_code(code: FormatCode) -> Self {
        match code {
            // alpha bits are left clear
            FormatCode::Rgba8888 | FormatCode::Rgbx8888 => Self::rgbx8888(),
            FormatCode::Rgb565 => Self::rgb565(),
        }
    }

    /// Resolve a native format code; unknown codes are an error
    pub fn from_code(code: i32) -> Result<Self> {
        FormatCode::try_from(code).map(Self::from_format_code)
    }

    /// Look up a format by its configuration name
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rgba8888" | "rgbx8888" => Some(Self::rgbx8888()),
            "rgb565" => Some(Self::rgb565()),
            "xrgb8888" | "bgrx8888" => Some(Self::xrgb8888()),
            _ => None,
        }
    }

    /// Convert a 24-bit 0xRRGGBB color into a packed pixel
    pub fn pixel(&self, rgb: u32) -> u32 {
        let r = (rgb >> 16) as u8;
        let g = (rgb >> 8) as u8;
        let b = rgb as u8;
        self.red.pack(r) + self.green.pack(g) + self.blue.pack(b)
    }

    /// Recover 8-bit channels from a packed pixel
    pub fn unpack(&self, pixel: u32) -> (u8, u8, u8) {
        (
            self.red.unpack(pixel),
            self.green.unpack(pixel),
            self.blue.unpack(pixel),
        )
    }
}

const SYSTEM_COLORS: [u32; 16] = [
    0x000000, 0xAA0000, 0x00AA00, 0xAA5500, 0x0000AA, 0xAA00AA, 0x00AAAA, 0xAAAAAA,
    0x555555, 0xFF5555, 0x55FF55, 0xFFFF55, 0x5555FF, 0xFF55FF, 0x55FFFF, 0xFFFFFF,
];

const CUBE_LEVELS: [u8; 6] = [0x00, 0x5F, 0x87, 0xAF, 0xD7, 0xFF];

/// 24-bit color of a palette index
///
/// 0-15 are the system colors, 16-231 a 6x6x6 color cube and 232-255 a
/// grayscale ramp.
pub fn color_rgb(index: u8) -> u32 {
    match index {
        0..=15 => SYSTEM_COLORS[index as usize],
        16..=231 => {
            let i = index - 16;
            let r = CUBE_LEVELS[(i / 36) as usize] as u32;
            let g = CUBE_LEVELS[(i / 6 % 6) as usize] as u32;
            let b = CUBE_LEVELS[(i % 6) as usize] as u32;
            (r << 16) | (g << 8) | b
        }
        232..=255 => {
            let level = 8 + 10 * (index - 232) as u32;
            (level << 16) | (level << 8) | level
        }
    }
}

/// Closest palette entry (cube or grayscale) to a 24-bit color
pub fn nearest_index(r: u8, g: u8, b: u8) -> u8 {
    fn cube_step(v: u8) -> u8 {
        match v {
            0..=47 => 0,
            48..=114 => 1,
            _ => (v - 35) / 40,
        }
    }
    fn distance(a: (u8, u8, u8), b: (u8, u8, u8)) -> u32 {
        let d = |x: u8, y: u8| (x as i32 - y as i32).pow(2) as u32;
        d(a.0, b.0) + d(a.1, b.1) + d(a.2, b.2)
    }

    let (qr, qg, qb) = (cube_step(r), cube_step(g), cube_step(b));
    let cube = (
        CUBE_LEVELS[qr as usize],
        CUBE_LEVELS[qg as usize],
        CUBE_LEVELS[qb as usize],
    );
    let cube_index = 16 + 36 * qr + 6 * qg + qb;

    let average = ((r as u32 + g as u32 + b as u32) / 3) as u8;
    let gray_step = if average > 238 { 23 } else { average.saturating_sub(3) / 10 };
    let gray_level = 8 + 10 * gray_step;
    let gray_index = 232 + gray_step;

    let target = (r, g, b);
    if distance((gray_level, gray_level, gray_level), target) < distance(cube, target) {
        gray_index
    } else {
        cube_index
    }
}

/// Packed pixel value for every logical color index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    format: PixelFormat,
    pixels: [u32; COLORS],
}

impl Palette {
    pub fn new(format: PixelFormat) -> Self {
        let mut pixels = [0u32; COLORS];
        for (index, pixel) in pixels.iter_mut().enumerate() {
            *pixel = format.pixel(color_rgb(index as u8));
        }
        Self { format, pixels }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixel(&self, index: u8) -> u32 {
        self.pixels[index as usize]
    }
}
