//! Packed pixel formats
//!
//! Framebuffers pack 1, 2, 4 or 8 bits per pixel. Pixel 0 of every byte
//! occupies the least significant bits, so for the 4 bpp framebuffer the
//! even pixel lives in the low nibble.
//!
//! All per-pixel addressing goes through [`PixelFormat`]; nothing else in
//! the crate shifts pixel bits by hand except the diff inner loop.
//!
//! ## Example
//!
//! ```
//! use epdrive::PixelFormat;
//!
//! let mut line = [0u8; 2];
//! assert!(PixelFormat::Bpp4.set(&mut line, 1, 0xA));
//! assert_eq!(line[0], 0xA0);
//! assert_eq!(PixelFormat::Bpp4.get(&line, 1), Some(0xA));
//! assert_eq!(PixelFormat::Bpp1.line_bytes(9), 2);
//! ```

use crate::error::DiffError;

/// Bit density of a packed buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// 1 bit per pixel, 8 pixels per byte
    Bpp1,
    /// 2 bits per pixel, 4 pixels per byte
    Bpp2,
    /// 4 bits per pixel, 2 pixels per byte
    #[default]
    Bpp4,
    /// 8 bits per pixel, 1 pixel per byte
    Bpp8,
}

impl PixelFormat {
    /// Bits used by a single pixel
    pub const fn bits_per_pixel(self) -> usize {
        match self {
            Self::Bpp1 => 1,
            Self::Bpp2 => 2,
            Self::Bpp4 => 4,
            Self::Bpp8 => 8,
        }
    }

    /// Pixels stored in one byte
    pub const fn pixels_per_byte(self) -> usize {
        8 / self.bits_per_pixel()
    }

    /// Mask covering one pixel value
    pub const fn value_mask(self) -> u8 {
        u8::MAX >> (8 - self.bits_per_pixel())
    }

    /// Bytes per line of `width` pixels
    pub const fn line_bytes(self, width: usize) -> usize {
        (width * self.bits_per_pixel()).div_ceil(8)
    }

    /// Bytes for a `width` x `height` buffer: `ceil(width * bpp / 8) * height`
    pub const fn buffer_size(self, width: usize, height: usize) -> usize {
        self.line_bytes(width) * height
    }

    const fn locate(self, x: usize) -> (usize, u32) {
        let ppb = self.pixels_per_byte();
        (x / ppb, ((x % ppb) * self.bits_per_pixel()) as u32)
    }

    /// Read pixel `x` of a packed line
    pub fn get(self, line: &[u8], x: usize) -> Option<u8> {
        let (index, shift) = self.locate(x);
        line.get(index)
            .map(|byte| (byte >> shift) & self.value_mask())
    }

    /// Write pixel `x` of a packed line
    ///
    /// Returns `false` when `x` lies past the end of `line`. Bits of
    /// `value` above the pixel width are ignored.
    pub fn set(self, line: &mut [u8], x: usize, value: u8) -> bool {
        let (index, shift) = self.locate(x);
        let mask = self.value_mask();
        match line.get_mut(index) {
            Some(byte) => {
                *byte = (*byte & !(mask << shift)) | ((value & mask) << shift);
                true
            }
            None => false,
        }
    }

    /// Scale a pixel value to the 4-bit grey level used by waveform lookups
    pub const fn to_level(self, value: u8) -> u8 {
        match self {
            Self::Bpp1 => (value & 1) * 0x0F,
            Self::Bpp2 => (value & 3) * 5,
            Self::Bpp4 => value & 0x0F,
            Self::Bpp8 => value >> 4,
        }
    }

    /// Unpack `pixels` values from `packed` into one byte per pixel
    pub fn unpack(self, packed: &[u8], pixels: usize, out: &mut [u8]) -> Result<(), DiffError> {
        check_len(self.line_bytes(pixels), packed.len())?;
        check_len(pixels, out.len())?;
        for (x, value) in out.iter_mut().take(pixels).enumerate() {
            let (index, shift) = self.locate(x);
            *value = (packed[index] >> shift) & self.value_mask();
        }
        Ok(())
    }

    /// Pack one-byte-per-pixel `values` into `out`
    ///
    /// Bytes of `out` covered by `values` are overwritten; padding bits of a
    /// trailing partial byte are cleared.
    pub fn pack(self, values: &[u8], out: &mut [u8]) -> Result<(), DiffError> {
        let required = self.line_bytes(values.len());
        check_len(required, out.len())?;
        out[..required].fill(0);
        let mask = self.value_mask();
        for (x, value) in values.iter().enumerate() {
            let (index, shift) = self.locate(x);
            out[index] |= (value & mask) << shift;
        }
        Ok(())
    }
}

fn check_len(required: usize, provided: usize) -> Result<(), DiffError> {
    if provided < required {
        return Err(DiffError::BufferTooSmall { required, provided });
    }
    Ok(())
}
