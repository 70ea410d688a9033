//! High-level display
//!
//! [`Display`] ties the pipeline together. It keeps two 4 bpp framebuffers:
//! the front buffer the application draws into and the back buffer holding
//! what the panel currently shows. An update diffs the two, powers the
//! rails up, drives every pass of the selected waveform through the line
//! queue and powers the rails down again, whatever the outcome.
//!
//! All memory is supplied by the caller through [`Buffers`], so the display
//! works without an allocator.

use core::sync::atomic::AtomicBool;
use embedded_hal::delay::DelayNs;

use crate::config::{Config, Dimensions, Rotation};
use crate::diff::{Rect, difference_image};
use crate::error::{DiffError, DrawError};
use crate::feeder::{LineFeeder, Packing, Previous};
use crate::pixel::PixelFormat;
use crate::power::PowerSequencer;
use crate::queue::LineQueue;
use crate::rotation::{apply_rotation, inverse_rotate_area};
use crate::scheduler::DriveScheduler;
use crate::waveform::{DrawPlan, DriveCode, Waveform, WaveformMode};

/// Sweeps per clearing cycle that drive every pixel dark
const CLEAR_DARKEN_SWEEPS: usize = 10;

/// Sweeps per clearing cycle that drive every pixel light
const CLEAR_LIGHTEN_SWEEPS: usize = 10;

/// Idle sweeps closing each clearing cycle
const CLEAR_IDLE_SWEEPS: usize = 2;

static NEVER_CANCEL: AtomicBool = AtomicBool::new(false);

/// Result type for display operations
pub type DisplayResult<P> = core::result::Result<(), DrawError<<P as PowerSequencer>::Error>>;

/// Caller-provided memory of a [`Display`]
///
/// Sizes for a panel of `width` x `height`:
///
/// | Buffer | Bytes |
/// |---|---|
/// | `front`, `back` | `width / 2 * height` |
/// | `interlaced` | `width * height` |
/// | `dirty_columns` | [`Buffers::dirty_columns_size`] |
/// | `dirty_lines` | `height` flags |
pub struct Buffers<'a> {
    /// Framebuffer the application draws into
    pub front: &'a mut [u8],
    /// What the panel currently shows
    pub back: &'a mut [u8],
    /// One byte per pixel scratch for the diff
    pub interlaced: &'a mut [u8],
    /// Changed columns of the last diff
    pub dirty_columns: &'a mut [u8],
    /// Changed rows of the last diff
    pub dirty_lines: &'a mut [bool],
}

impl Buffers<'_> {
    /// Bytes of the dirty column map for `dims`
    ///
    /// Two map bytes per drive line byte, which is one more than the
    /// framebuffer row when the width is not a multiple of four.
    pub fn dirty_columns_size(dims: Dimensions) -> usize {
        2 * dims.drive_line_bytes()
    }

    fn check(&self, dims: Dimensions) -> Result<(), DiffError> {
        let checks = [
            (dims.buffer_size(), self.front.len()),
            (dims.buffer_size(), self.back.len()),
            (dims.pixels(), self.interlaced.len()),
            (Self::dirty_columns_size(dims), self.dirty_columns.len()),
            (usize::from(dims.height), self.dirty_lines.len()),
        ];
        for (required, provided) in checks {
            if provided < required {
                return Err(DiffError::BufferTooSmall { required, provided });
            }
        }
        Ok(())
    }
}

/// Power sequencer, line queue and scheduler of one panel
struct Pipeline<P, const N: usize, const W: usize> {
    power: P,
    queue: LineQueue<N, W>,
    scheduler: DriveScheduler<W>,
    dims: Dimensions,
}

impl<P, const N: usize, const W: usize> Pipeline<P, N, W>
where
    P: PowerSequencer,
{
    /// Power up, drive every pass of `plan`, power down
    ///
    /// The rails are switched off even when a pass fails; the first error
    /// wins.
    fn run<D: DelayNs>(
        &mut self,
        plan: &DrawPlan<'_>,
        packing: Packing<'_>,
        crop: Rect,
        cancel: &AtomicBool,
        delay: &mut D,
    ) -> Result<u32, DrawError<P::Error>> {
        let result = self
            .power
            .power_on(delay)
            .map_err(DrawError::from)
            .and_then(|()| self.passes(plan, packing, crop, cancel, delay));
        let off = self.power.power_off(delay);
        let rows = result?;
        off?;
        Ok(rows)
    }

    fn passes<D: DelayNs>(
        &mut self,
        plan: &DrawPlan<'_>,
        packing: Packing<'_>,
        crop: Rect,
        cancel: &AtomicBool,
        delay: &mut D,
    ) -> Result<u32, DrawError<P::Error>> {
        let mut rows = 0;
        for pass in 0..plan.passes() {
            let lut = plan.pass_lut(pass)?;
            let mut feeder = LineFeeder::<W>::new(packing, self.dims, crop)?;
            self.queue.reset();
            let (mut producer, mut consumer) = self.queue.split();
            rows += self.scheduler.drive_pass(
                &mut self.power,
                &mut consumer,
                &lut,
                plan.frame_time(pass),
                cancel,
                delay,
                || feeder.fill(&mut producer),
            )?;
        }
        Ok(rows)
    }
}

/// Differential update driver for one panel
///
/// ## Type Parameters
///
/// * `P` - Board implementing [`PowerSequencer`]
/// * `N` - Line queue slots (one is reserved)
/// * `W` - Line record width in pixels, at least the panel width
///
/// ## Example
///
/// ```rust,no_run
/// use epdrive::{Buffers, Builder, Dimensions, Display, Rect, WaveformMode};
/// # use core::convert::Infallible;
/// # use embedded_hal::delay::DelayNs;
/// # use embedded_hal::i2c::{I2c, Operation};
/// # use epdrive::{BoardV6, I2cRegisters, PixelBus, SequencerConfig};
/// # struct MockI2c;
/// # impl embedded_hal::i2c::ErrorType for MockI2c { type Error = Infallible; }
/// # impl I2c for MockI2c {
/// #     fn transaction(&mut self, _address: u8, _operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
/// #         Ok(())
/// #     }
/// # }
/// # struct MockPixels;
/// # impl PixelBus for MockPixels {
/// #     type Error = Infallible;
/// #     fn attach(&mut self) -> Result<(), Self::Error> { Ok(()) }
/// #     fn detach(&mut self) -> Result<(), Self::Error> { Ok(()) }
/// #     fn clock_out(&mut self, _data: &[u8], _hold_time: u16) -> Result<(), Self::Error> { Ok(()) }
/// # }
/// # struct MockDelay;
/// # impl DelayNs for MockDelay { fn delay_ns(&mut self, _ns: u32) {} }
/// # let mut delay = MockDelay;
/// let dims = match Dimensions::new(16, 8) {
///     Ok(dims) => dims,
///     Err(_) => return,
/// };
/// let config = match Builder::new().dimensions(dims).build() {
///     Ok(config) => config,
///     Err(_) => return,
/// };
/// let board = BoardV6::new(I2cRegisters::new(MockI2c), MockPixels, SequencerConfig::from(&config));
///
/// let mut front = [0u8; 64];
/// let mut back = [0u8; 64];
/// let mut interlaced = [0u8; 128];
/// let mut dirty_columns = [0u8; 8];
/// let mut dirty_lines = [false; 8];
/// let buffers = Buffers {
///     front: &mut front,
///     back: &mut back,
///     interlaced: &mut interlaced,
///     dirty_columns: &mut dirty_columns,
///     dirty_lines: &mut dirty_lines,
/// };
/// let mut display = match Display::<_, 4, 16>::new(board, config, buffers) {
///     Ok(display) => display,
///     Err(_) => return,
/// };
///
/// display.set_pixel(3, 2, 0x0);
/// let _ = display.update_area(WaveformMode::Monochrome, 25, Rect::new(0, 0, 8, 4), &mut delay);
/// ```
pub struct Display<'a, P, const N: usize, const W: usize>
where
    P: PowerSequencer,
{
    pipeline: Pipeline<P, N, W>,
    config: Config,
    buffers: Buffers<'a>,
    waveform: Option<&'a Waveform<'a>>,
    cancel: &'a AtomicBool,
}

impl<'a, P, const N: usize, const W: usize> Display<'a, P, N, W>
where
    P: PowerSequencer,
{
    /// Create a display; both framebuffers start white
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::BufferTooSmall`] when a buffer or `W` is
    /// smaller than the panel needs.
    pub fn new(power: P, config: Config, buffers: Buffers<'a>) -> Result<Self, DiffError> {
        let dims = config.dimensions;
        buffers.check(dims)?;
        let scheduler = DriveScheduler::new(&config)?;
        let mut display = Self {
            pipeline: Pipeline {
                power,
                queue: LineQueue::new(),
                scheduler,
                dims,
            },
            config,
            buffers,
            waveform: None,
            cancel: &NEVER_CANCEL,
        };
        display.buffers.front.fill(0xFF);
        display.buffers.back.fill(0xFF);
        Ok(display)
    }

    /// Use `waveform` for every mode but [`WaveformMode::Monochrome`]
    pub fn with_waveform(mut self, waveform: &'a Waveform<'a>) -> Self {
        self.waveform = Some(waveform);
        self
    }

    /// Abort updates between rows while `flag` is set
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = flag;
        self
    }

    /// Native panel dimensions
    pub fn dimensions(&self) -> Dimensions {
        self.config.dimensions
    }

    /// Logical rotation
    pub fn rotation(&self) -> Rotation {
        self.config.rotation
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Power sequencer, for calibration and temperature reads
    pub fn power_mut(&mut self) -> &mut P {
        &mut self.pipeline.power
    }

    /// Give the power sequencer back
    pub fn release(self) -> P {
        self.pipeline.power
    }

    /// The front framebuffer, native orientation, 4 bpp
    pub fn framebuffer(&self) -> &[u8] {
        &*self.buffers.front
    }

    /// Mutable access to the front framebuffer
    pub fn framebuffer_mut(&mut self) -> &mut [u8] {
        &mut *self.buffers.front
    }

    /// Fill the front framebuffer with white
    pub fn set_all_white(&mut self) {
        self.buffers.front.fill(0xFF);
    }

    /// Set a pixel in logical coordinates to a 4-bit grey level
    ///
    /// Pixels outside the rotated panel are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, level: u8) {
        let logical = self.config.rotated_dimensions();
        if x >= u32::from(logical.width) || y >= u32::from(logical.height) {
            return;
        }
        let Dimensions { width, height } = self.config.dimensions;
        let (px, py) = apply_rotation(
            x,
            y,
            u32::from(width),
            u32::from(height),
            self.config.rotation,
        );
        let row_bytes = usize::from(width) / 2;
        let start = py as usize * row_bytes;
        if let Some(line) = self.buffers.front.get_mut(start..start + row_bytes) {
            PixelFormat::Bpp4.set(line, px as usize, level);
        }
    }

    /// Push the whole front framebuffer to the panel
    pub fn update_screen<D: DelayNs>(
        &mut self,
        mode: WaveformMode,
        temperature: i16,
        delay: &mut D,
    ) -> DisplayResult<P> {
        let logical = self.config.rotated_dimensions();
        let area = Rect::new(0, 0, logical.width, logical.height);
        self.update_area(mode, temperature, area, delay)
    }

    /// Push the part of the front framebuffer inside `area`
    ///
    /// `area` is in logical coordinates and is clipped to the panel.
    /// Nothing is driven, and the rails stay off, when the area is
    /// unchanged. On success the driven part of the front buffer becomes
    /// the new back buffer.
    ///
    /// # Errors
    ///
    /// [`DrawError::InvalidCrop`] when `area` lies wholly outside the
    /// panel, otherwise see [`DrawError`]. The rails are off whenever this
    /// returns.
    pub fn update_area<D: DelayNs>(
        &mut self,
        mode: WaveformMode,
        temperature: i16,
        area: Rect,
        delay: &mut D,
    ) -> DisplayResult<P> {
        let dims = self.config.dimensions;
        let crop = inverse_rotate_area(area, dims.width, dims.height, self.config.rotation);
        if crop.is_empty() {
            if area.is_empty() {
                return Ok(());
            }
            return Err(DrawError::InvalidCrop);
        }
        let plan = DrawPlan::new(
            self.waveform,
            mode,
            temperature,
            self.config.monochrome_frames,
            self.config.frame_time,
        )?;

        let changed = difference_image(
            &*self.buffers.back,
            &*self.buffers.front,
            dims,
            crop,
            self.buffers.interlaced,
            self.buffers.dirty_lines,
            self.buffers.dirty_columns,
        )?;
        if changed.is_empty() {
            log::debug!("Nothing changed inside {:?}", crop);
            return Ok(());
        }

        self.pipeline
            .scheduler
            .set_line_mask(Some(&*self.buffers.dirty_columns), crop)?;
        let packing = Packing::Difference {
            interlaced: &*self.buffers.interlaced,
            dirty_lines: &*self.buffers.dirty_lines,
        };
        let rows = self
            .pipeline
            .run(&plan, packing, crop, self.cancel, delay)?;

        self.commit(crop);
        log::info!(
            "Updated {}x{} at ({}, {}): {} passes, {} rows",
            changed.width,
            changed.height,
            changed.x,
            changed.y,
            plan.passes(),
            rows
        );
        Ok(())
    }

    /// Drive a packed frame over a panel of known uniform content
    ///
    /// The frame is in native orientation and covers the whole panel. The
    /// back buffer is updated to the frame; the front buffer is left alone.
    ///
    /// # Errors
    ///
    /// See [`DrawError`]. The rails are off whenever this returns.
    pub fn draw_frame<D: DelayNs>(
        &mut self,
        frame: &[u8],
        format: PixelFormat,
        previous: Previous,
        mode: WaveformMode,
        temperature: i16,
        delay: &mut D,
    ) -> DisplayResult<P> {
        let area = Rect::full(self.config.dimensions);
        self.draw_frame_area(area, frame, format, previous, mode, temperature, delay)
    }

    /// Drive a packed image into `area` of a panel of known uniform content
    ///
    /// `area` is in native coordinates and `frame` holds
    /// `area.width` x `area.height` pixels packed as `format`. Parts of the
    /// area past the panel edge are skipped. Only pixels inside the area
    /// are driven, and only those are written to the back buffer.
    ///
    /// # Errors
    ///
    /// [`DrawError::InvalidCrop`] when the area starts outside the panel,
    /// [`DrawError::BufferTooSmall`] when `frame` does not cover it,
    /// otherwise see [`DrawError`]. The rails are off whenever this returns.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_frame_area<D: DelayNs>(
        &mut self,
        area: Rect,
        frame: &[u8],
        format: PixelFormat,
        previous: Previous,
        mode: WaveformMode,
        temperature: i16,
        delay: &mut D,
    ) -> DisplayResult<P> {
        if area.is_empty() {
            return Ok(());
        }
        let dims = self.config.dimensions;
        let plan = DrawPlan::new(
            self.waveform,
            mode,
            temperature,
            self.config.monochrome_frames,
            self.config.frame_time,
        )?;
        let packing = Packing::Frame {
            data: frame,
            format,
            previous,
        };
        // validate before powering up
        LineFeeder::<W>::new(packing, dims, area)?;
        self.pipeline.scheduler.set_line_mask(None, area)?;
        self.pipeline
            .run(&plan, packing, area, self.cancel, delay)?;

        let width = usize::from(dims.width);
        let first = usize::from(area.x);
        let visible = (area.right() as usize).min(width) - first;
        let src_bytes = format.line_bytes(usize::from(area.width));
        let levels = &mut self.buffers.interlaced[..width];
        for (src, y) in frame.chunks_exact(src_bytes).zip(rows_of(area, dims)) {
            let dst = &mut self.buffers.back[y * width / 2..(y + 1) * width / 2];
            PixelFormat::Bpp4.unpack(dst, width, levels)?;
            let inside = &mut levels[first..first + visible];
            format.unpack(src, visible, inside)?;
            for value in inside.iter_mut() {
                *value = format.to_level(*value);
            }
            PixelFormat::Bpp4.pack(levels, dst)?;
        }
        Ok(())
    }

    /// Flash the whole panel dark and light `cycles` times
    ///
    /// Uses the configured frame time per sweep; see
    /// [`clear_area`](Self::clear_area).
    ///
    /// # Errors
    ///
    /// See [`DrawError`]. The rails are off whenever this returns.
    pub fn full_clear<D: DelayNs>(&mut self, cycles: u8, delay: &mut D) -> DisplayResult<P> {
        let area = Rect::full(self.config.dimensions);
        let cycle_time = self.config.frame_time;
        self.clear_area(area, cycles, cycle_time, delay)
    }

    /// Flash `area` dark and light `cycles` times
    ///
    /// `area` is in native coordinates. Each cycle drives ten dark sweeps,
    /// ten light sweeps and two idle sweeps, every row held for
    /// `cycle_time` tenths of a microsecond. Clears ghosting; the area is
    /// white in both framebuffers afterwards.
    ///
    /// # Errors
    ///
    /// [`DrawError::InvalidCrop`] when the area starts outside the panel,
    /// otherwise see [`DrawError`]. The rails are off whenever this returns.
    pub fn clear_area<D: DelayNs>(
        &mut self,
        area: Rect,
        cycles: u8,
        cycle_time: u16,
        delay: &mut D,
    ) -> DisplayResult<P> {
        let dims = self.config.dimensions;
        if area.x >= dims.width || area.y >= dims.height {
            return Err(DrawError::InvalidCrop);
        }
        let pipeline = &mut self.pipeline;

        let result = pipeline
            .power
            .power_on(delay)
            .map_err(DrawError::from)
            .and_then(|()| {
                let sweeps = [
                    (DriveCode::Darken, CLEAR_DARKEN_SWEEPS),
                    (DriveCode::Lighten, CLEAR_LIGHTEN_SWEEPS),
                    (DriveCode::None, CLEAR_IDLE_SWEEPS),
                ];
                for _ in 0..cycles {
                    for (code, count) in sweeps {
                        for _ in 0..count {
                            pipeline.scheduler.push_pixels(
                                &mut pipeline.power,
                                area,
                                code,
                                cycle_time,
                                delay,
                            )?;
                        }
                    }
                }
                Ok(())
            });
        let off = pipeline.power.power_off(delay);
        result?;
        off?;

        let width = usize::from(dims.width);
        let stop = (area.right() as usize).min(width);
        for y in rows_of(area, dims) {
            let row = y * width / 2..(y + 1) * width / 2;
            for x in usize::from(area.x)..stop {
                PixelFormat::Bpp4.set(&mut self.buffers.front[row.clone()], x, 0x0F);
                PixelFormat::Bpp4.set(&mut self.buffers.back[row.clone()], x, 0x0F);
            }
        }
        Ok(())
    }

    /// Copy the crop columns of the front buffer into the back buffer
    ///
    /// At an odd edge only the nibble of the pixel inside the crop is
    /// copied; its neighbour was not driven.
    fn commit(&mut self, crop: Rect) {
        let dims = self.config.dimensions;
        let row_bytes = usize::from(dims.width) / 2;
        let first = usize::from(crop.x);
        let stop = (crop.right() as usize).min(usize::from(dims.width));
        for y in rows_of(crop, dims) {
            let span = y * row_bytes..(y + 1) * row_bytes;
            let front = &self.buffers.front[span.clone()];
            let back = &mut self.buffers.back[span];

            let mut x = first;
            if x % 2 == 1 {
                back[x / 2] = (back[x / 2] & 0x0F) | (front[x / 2] & 0xF0);
                x += 1;
            }
            let whole = stop / 2;
            if x / 2 < whole {
                back[x / 2..whole].copy_from_slice(&front[x / 2..whole]);
            }
            if stop % 2 == 1 && stop > x {
                back[whole] = (back[whole] & 0xF0) | (front[whole] & 0x0F);
            }
        }
    }
}

/// Panel rows covered by `area`
fn rows_of(area: Rect, dims: Dimensions) -> core::ops::Range<usize> {
    usize::from(area.y)..(area.bottom() as usize).min(usize::from(dims.height))
}
