//! Producer side of the line queue
//!
//! A [`LineFeeder`] walks the panel top to bottom and turns each row into a
//! [`LineRecord`] of interlaced pixels, `(new << 4) | old`. It never blocks:
//! [`fill`](LineFeeder::fill) pushes rows until the queue is full and
//! returns, so it can be called from a spin loop, a second core or between
//! rows of the drive loop itself.

use crate::config::Dimensions;
use crate::diff::Rect;
use crate::error::DiffError;
use crate::pixel::PixelFormat;
use crate::queue::{LineRecord, Producer};

/// Known uniform state of the panel before a frame update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Previous {
    /// Every pixel is white
    White,
    /// Every pixel is black
    Black,
}

impl Previous {
    const fn level(self) -> u8 {
        match self {
            Self::White => 0x0F,
            Self::Black => 0x00,
        }
    }
}

/// Where row data comes from
#[derive(Clone, Copy, Debug)]
pub enum Packing<'a> {
    /// Rows already interlaced by
    /// [`difference_image`](crate::diff::difference_image)
    Difference {
        /// One byte per panel pixel
        interlaced: &'a [u8],
        /// One flag per panel row; clean rows are not driven
        dirty_lines: &'a [bool],
    },
    /// A packed image drawn into the crop over a uniform previous state
    Frame {
        /// Packed pixels covering the whole crop, row by row,
        /// [`PixelFormat::buffer_size`] of the crop size
        data: &'a [u8],
        /// Packing of `data`
        format: PixelFormat,
        /// What the panel shows before the update
        previous: Previous,
    },
}

/// Row producer for one sweep
///
/// `W` must hold a whole panel row.
#[derive(Debug)]
pub struct LineFeeder<'a, const W: usize> {
    packing: Packing<'a>,
    width: usize,
    height: u16,
    crop: Rect,
    next_row: u16,
}

impl<'a, const W: usize> LineFeeder<'a, W> {
    /// Prepare a sweep over `dims`, driving only rows inside `crop`
    ///
    /// # Errors
    ///
    /// [`DiffError::BufferTooSmall`] when `W` or the source buffers are
    /// smaller than the panel needs and [`DiffError::InvalidCrop`] when the
    /// crop starts outside the panel.
    pub fn new(packing: Packing<'a>, dims: Dimensions, crop: Rect) -> Result<Self, DiffError> {
        let width = usize::from(dims.width);
        let height = usize::from(dims.height);
        check_len(width, W)?;
        match packing {
            Packing::Difference {
                interlaced,
                dirty_lines,
            } => {
                check_len(dims.pixels(), interlaced.len())?;
                check_len(height, dirty_lines.len())?;
            }
            Packing::Frame { data, format, .. } => {
                let area = format.buffer_size(usize::from(crop.width), usize::from(crop.height));
                check_len(area, data.len())?;
            }
        }
        if crop.x >= dims.width || crop.y >= dims.height {
            return Err(DiffError::InvalidCrop);
        }
        Ok(Self {
            packing,
            width,
            height: dims.height,
            crop,
            next_row: 0,
        })
    }

    /// Whether every row has been pushed
    pub fn is_done(&self) -> bool {
        self.next_row >= self.height
    }

    /// Push rows until the queue is full or the sweep is complete
    ///
    /// Returns the number of rows pushed.
    pub fn fill<const N: usize>(&mut self, producer: &mut Producer<'_, N, W>) -> usize {
        let mut pushed = 0;
        while !self.is_done() {
            let Ok(slot) = producer.acquire_write_slot() else {
                break;
            };
            self.render(self.next_row, slot);
            if producer.commit_write().is_err() {
                break;
            }
            self.next_row += 1;
            pushed += 1;
        }
        pushed
    }

    fn render(&self, row: u16, record: &mut LineRecord<W>) {
        let y = usize::from(row);
        let width = self.width;
        let in_crop = row >= self.crop.y && u32::from(row) < self.crop.bottom();

        match self.packing {
            Packing::Difference {
                interlaced,
                dirty_lines,
            } => {
                if in_crop && dirty_lines[y] {
                    record.fill(row, true, &interlaced[y * width..(y + 1) * width]);
                } else {
                    record.set_clean(row, width);
                }
            }
            Packing::Frame {
                data,
                format,
                previous,
            } => {
                if !in_crop {
                    record.set_clean(row, width);
                    return;
                }
                let line_bytes = format.line_bytes(usize::from(self.crop.width));
                let start = usize::from(row - self.crop.y) * line_bytes;
                let line = &data[start..start + line_bytes];
                let first = usize::from(self.crop.x);
                let stop = (self.crop.right() as usize).min(width);
                let old = previous.level();
                for (x, pixel) in record.data[..width].iter_mut().enumerate() {
                    let new = if (first..stop).contains(&x) {
                        format.get(line, x - first).map_or(old, |v| format.to_level(v))
                    } else {
                        old
                    };
                    *pixel = (new << 4) | old;
                }
                record.row = row;
                record.dirty = true;
                record.len = width;
            }
        }
    }
}

fn check_len(required: usize, provided: usize) -> Result<(), DiffError> {
    if provided < required {
        return Err(DiffError::BufferTooSmall { required, provided });
    }
    Ok(())
}
