//! Presentation target.
//!
//! A [`Surface`] owns the pixel memory that ends up on screen. The renderer
//! only borrows it for the duration of one bulk copy per frame.

use std::io::{self, Write};

use super::palette::PixelFormat;
use crate::config::SurfaceConfig;
use crate::error::{Result, TermError};

/// Pixel layout of a surface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceGeometry {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel row
    pub stride: u32,
    /// Top-left corner of the terminal area (letterboxing)
    pub offset_x: u32,
    pub offset_y: u32,
    pub format: PixelFormat,
}

impl SurfaceGeometry {
    /// Geometry with no row padding and no offset
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel as u32,
            offset_x: 0,
            offset_y: 0,
            format,
        }
    }

    pub fn from_config(config: &SurfaceConfig) -> Result<Self> {
        let format = PixelFormat::by_name(&config.pixel_format).ok_or_else(|| {
            TermError::InvalidConfig(format!("unknown pixel_format {:?}", config.pixel_format))
        })?;
        let geometry = Self {
            offset_x: config.offset_x,
            offset_y: config.offset_y,
            ..Self::packed(config.width, config.height, format)
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn buffer_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TermError::InvalidGeometry(format!(
                "empty surface {}x{}",
                self.width, self.height
            )));
        }
        let row_bytes = self.width as u64 * self.format.bytes_per_pixel as u64;
        if (self.stride as u64) < row_bytes {
            return Err(TermError::InvalidGeometry(format!(
                "stride {} is shorter than a {} pixel row",
                self.stride, self.width
            )));
        }
        if self.offset_x >= self.width || self.offset_y >= self.height {
            return Err(TermError::InvalidGeometry(format!(
                "offset {},{} lies outside the {}x{} surface",
                self.offset_x, self.offset_y, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Lockable pixel buffer supplied by the display side
pub trait Surface {
    /// Current geometry; may change between frames
    fn geometry(&self) -> SurfaceGeometry;

    /// Borrow the pixel buffer for one frame. `None` means the surface is
    /// not presentable right now.
    fn lock(&mut self) -> Option<&mut [u8]>;

    /// Release the buffer and publish its contents
    fn unlock_and_post(&mut self);

    /// Whether drawing is worthwhile at all
    fn is_visible(&self) -> bool {
        true
    }
}

/// Surface backed by a plain `Vec<u8>`
#[derive(Debug)]
pub struct MemorySurface {
    geometry: SurfaceGeometry,
    pixels: Vec<u8>,
    visible: bool,
    available: bool,
    locked: bool,
    frames: u64,
}

impl MemorySurface {
    pub fn new(geometry: SurfaceGeometry) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            pixels: vec![0; geometry.buffer_len()],
            visible: true,
            available: true,
            locked: false,
            frames: 0,
        })
    }

    pub fn from_config(config: &SurfaceConfig) -> Result<Self> {
        Self::new(SurfaceGeometry::from_config(config)?)
    }

    /// Recreate the buffer with a new geometry
    pub fn reconfigure(&mut self, geometry: SurfaceGeometry) -> Result<()> {
        geometry.validate()?;
        self.geometry = geometry;
        self.pixels = vec![0; geometry.buffer_len()];
        Ok(())
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn frames_posted(&self) -> u64 {
        self.frames
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Make `lock` fail, as a display that is being torn down would
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Packed pixel value at (x, y)
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        let bpp = self.geometry.format.bytes_per_pixel as usize;
        let pos = x as usize * bpp + y as usize * self.geometry.stride as usize;
        let mut bytes = [0u8; 4];
        bytes[..bpp].copy_from_slice(self.pixels.get(pos..pos + bpp)?);
        Some(u32::from_le_bytes(bytes))
    }

    /// Dump the buffer as a binary PPM (P6) image
    pub fn write_ppm<W: Write>(&self, mut out: W) -> io::Result<()> {
        let SurfaceGeometry {
            width,
            height,
            format,
            ..
        } = self.geometry;
        write!(out, "P6\n{} {}\n255\n", width, height)?;

        let mut row = Vec::with_capacity(width as usize * 3);
        for y in 0..height {
            row.clear();
            for x in 0..width {
                let (r, g, b) = format.unpack(self.pixel_at(x, y).unwrap_or(0));
                row.extend_from_slice(&[r, g, b]);
            }
            out.write_all(&row)?;
        }
        out.flush()
    }
}

impl Surface for MemorySurface {
    fn geometry(&self) -> SurfaceGeometry {
        self.geometry
    }

    fn lock(&mut self) -> Option<&mut [u8]> {
        if !self.available || self.locked {
            return None;
        }
        self.locked = true;
        Some(self.pixels.as_mut_slice())
    }

    fn unlock_and_post(&mut self) {
        if self.locked {
            self.locked = false;
            self.frames += 1;
        }
    }

    fn is_visible(&self) -> bool {
        self.visible
    }
}
