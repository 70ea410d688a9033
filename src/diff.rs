//! Difference engine
//!
//! Compares the last drawn framebuffer with the new one, one line at a time,
//! and produces:
//!
//! - an *interlaced* line with one byte per pixel, `(new << 4) | old`, which
//!   the waveform lookup turns into drive codes
//! - a dirty column map with one byte per framebuffer byte, holding
//!   `new ^ old` so every changed pixel leaves a non-zero nibble
//!
//! Framebuffers are 4 bpp with the even pixel in the low nibble.
//!
//! ## Example
//!
//! ```
//! use epdrive::diff::{interlace_line, populate_line_mask};
//!
//! let from = [0xFF, 0xF0];
//! let to = [0xFF, 0xFF];
//! let mut interlaced = [0u8; 4];
//! let mut dirty = [0u8; 2];
//!
//! let changed = interlace_line(&from, &to, &mut interlaced, &mut dirty, 4).unwrap();
//! assert!(changed);
//! assert_eq!(interlaced, [0xFF, 0xFF, 0xF0, 0xFF]);
//! assert_eq!(dirty, [0x00, 0x0F]);
//!
//! let mut mask = [0u8; 1];
//! populate_line_mask(Some(&dirty), &mut mask, 1).unwrap();
//! assert_eq!(mask, [0x30]);
//! ```

use crate::config::Dimensions;
use crate::error::DiffError;

/// Axis-aligned pixel rectangle
///
/// A rectangle with zero width or height is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    /// Left edge
    pub x: u16,
    /// Top edge
    pub y: u16,
    /// Width in pixels
    pub width: u16,
    /// Height in pixels
    pub height: u16,
}

impl Rect {
    /// Create a rectangle
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole panel
    pub const fn full(dims: Dimensions) -> Self {
        Self::new(0, 0, dims.width, dims.height)
    }

    /// True when the rectangle covers no pixels
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when `(x, y)` lies inside the rectangle
    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x
            && y >= self.y
            && u32::from(x) < u32::from(self.x) + u32::from(self.width)
            && u32::from(y) < u32::from(self.y) + u32::from(self.height)
    }

    /// One past the right edge
    pub fn right(&self) -> u32 {
        u32::from(self.x) + u32::from(self.width)
    }

    /// One past the bottom edge
    pub fn bottom(&self) -> u32 {
        u32::from(self.y) + u32::from(self.height)
    }
}

/// Interlace one line of two 4 bpp buffers
///
/// For each of the `pixels` pixels writes `(to << 4) | from` into
/// `interlaced` and ORs `to ^ from` into the pixel's nibble of
/// `dirty_columns`. An odd trailing pixel only uses the low nibble of the
/// last input byte.
///
/// The dirty column map is accumulated, never cleared here, so a whole
/// image can share one map. Calling this on a prefix and then on the
/// matching suffix (starting at a byte boundary) gives the same output as a
/// single whole-line call.
///
/// Returns whether any pixel differs.
///
/// # Errors
///
/// Returns [`DiffError::BufferTooSmall`] when a slice is shorter than
/// `pixels` needs.
pub fn interlace_line(
    from: &[u8],
    to: &[u8],
    interlaced: &mut [u8],
    dirty_columns: &mut [u8],
    pixels: usize,
) -> Result<bool, DiffError> {
    let bytes = pixels.div_ceil(2);
    check_len(bytes, from.len())?;
    check_len(bytes, to.len())?;
    check_len(bytes, dirty_columns.len())?;
    check_len(pixels, interlaced.len())?;

    let mut changed = 0u8;
    let whole = pixels / 2;
    for i in 0..whole {
        let (f, t) = (from[i], to[i]);
        interlaced[2 * i] = ((t & 0x0F) << 4) | (f & 0x0F);
        interlaced[2 * i + 1] = (t & 0xF0) | (f >> 4);
        let diff = t ^ f;
        dirty_columns[i] |= diff;
        changed |= diff;
    }
    if pixels % 2 == 1 {
        let (f, t) = (from[whole] & 0x0F, to[whole] & 0x0F);
        interlaced[2 * whole] = (t << 4) | f;
        let diff = t ^ f;
        dirty_columns[whole] |= diff;
        changed |= diff;
    }
    Ok(changed != 0)
}

/// Expand a dirty column map into a drive line mask
///
/// Drive lines carry four pixels per byte, two bits each with pixel 0 in
/// the low bits. Every pixel whose nibble in `dirty_columns` is non-zero
/// gets both of its bits set in `mask`. With `None` the first `mask_len`
/// bytes are set to `0xFF`. Bytes of `mask` past `mask_len` are not
/// touched.
///
/// # Errors
///
/// Returns [`DiffError::BufferTooSmall`] when `mask` is shorter than
/// `mask_len` or `dirty_columns` does not cover `2 * mask_len` bytes.
pub fn populate_line_mask(
    dirty_columns: Option<&[u8]>,
    mask: &mut [u8],
    mask_len: usize,
) -> Result<(), DiffError> {
    check_len(mask_len, mask.len())?;
    let Some(columns) = dirty_columns else {
        mask[..mask_len].fill(0xFF);
        return Ok(());
    };
    check_len(2 * mask_len, columns.len())?;

    for (i, out) in mask.iter_mut().take(mask_len).enumerate() {
        let mut value = 0u8;
        for k in 0..4 {
            let pixel = 4 * i + k;
            let nibble = (columns[pixel / 2] >> (4 * (pixel % 2))) & 0x0F;
            if nibble != 0 {
                value |= 0b11 << (2 * k);
            }
        }
        *out = value;
    }
    Ok(())
}

/// Clear the drive codes of pixels outside the mask
pub fn apply_line_mask(line: &mut [u8], mask: &[u8]) {
    for (byte, m) in line.iter_mut().zip(mask) {
        *byte &= m;
    }
}

/// Interlace every row of `crop` and find what changed
///
/// `interlaced` holds one byte per pixel for the whole panel, `dirty_lines`
/// one flag per row and `dirty_columns` one byte per framebuffer column
/// byte. The map and the flags are cleared first, then accumulated over the
/// rows of the crop. Only the crop's columns are interlaced (widened to
/// whole framebuffer bytes), the rest of `interlaced` is left as it was.
///
/// Returns the bounding rectangle of the changed pixels inside the crop,
/// an empty rectangle when nothing changed.
///
/// # Errors
///
/// Returns [`DiffError::InvalidCrop`] when the crop starts outside the
/// panel and [`DiffError::BufferTooSmall`] when a buffer does not match the
/// panel size. A crop reaching past the panel edge is clamped.
pub fn difference_image(
    from: &[u8],
    to: &[u8],
    dims: Dimensions,
    crop: Rect,
    interlaced: &mut [u8],
    dirty_lines: &mut [bool],
    dirty_columns: &mut [u8],
) -> Result<Rect, DiffError> {
    let width = usize::from(dims.width);
    let height = usize::from(dims.height);
    let row_bytes = width / 2;
    check_len(dims.buffer_size(), from.len())?;
    check_len(dims.buffer_size(), to.len())?;
    check_len(dims.pixels(), interlaced.len())?;
    check_len(height, dirty_lines.len())?;
    check_len(row_bytes, dirty_columns.len())?;
    if crop.x >= dims.width || crop.y >= dims.height {
        return Err(DiffError::InvalidCrop);
    }

    dirty_columns[..row_bytes].fill(0);
    dirty_lines[..height].fill(false);

    let x_end = (crop.right() as usize).min(width);
    let y_end = (crop.bottom() as usize).min(height);
    // whole framebuffer bytes
    let first_byte = usize::from(crop.x) / 2;
    let last_byte = x_end.div_ceil(2);
    let pixels = 2 * (last_byte - first_byte);

    for y in usize::from(crop.y)..y_end {
        let row = y * row_bytes;
        let span = row + first_byte..row + last_byte;
        let out = y * width + 2 * first_byte;
        dirty_lines[y] = interlace_line(
            &from[span.clone()],
            &to[span],
            &mut interlaced[out..out + pixels],
            &mut dirty_columns[first_byte..last_byte],
            pixels,
        )?;
    }

    let column_dirty = |x: usize| (dirty_columns[x / 2] >> (4 * (x % 2))) & 0x0F != 0;
    let min_x = (usize::from(crop.x)..x_end).find(|&x| column_dirty(x));
    let max_x = (usize::from(crop.x)..x_end).rev().find(|&x| column_dirty(x));
    let min_y = (usize::from(crop.y)..y_end).find(|&y| dirty_lines[y]);
    let max_y = (usize::from(crop.y)..y_end).rev().find(|&y| dirty_lines[y]);

    match (min_x, max_x, min_y, max_y) {
        (Some(x0), Some(x1), Some(y0), Some(y1)) => Ok(Rect::new(
            x0 as u16,
            y0 as u16,
            (x1 - x0 + 1) as u16,
            (y1 - y0 + 1) as u16,
        )),
        _ => Ok(Rect::new(crop.x, crop.y, 0, 0)),
    }
}

fn check_len(required: usize, provided: usize) -> Result<(), DiffError> {
    if provided < required {
        return Err(DiffError::BufferTooSmall { required, provided });
    }
    Ok(())
}
