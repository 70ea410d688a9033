//! Drive scheduler
//!
//! The consumer side of the pipeline. One call to
//! [`DriveScheduler::drive_pass`] is one top-to-bottom sweep of the panel:
//! every row is read from the [`LineQueue`](crate::queue::LineQueue) in
//! order, turned into drive codes with the pass lookup, masked to the
//! changed columns and clocked out through the
//! [`PowerSequencer`]. Nothing is clocked unless the rails report
//! [`RailState::Ready`].
//!
//! Bus failures are returned as they are. Retrying a frame is up to the
//! caller.

use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::delay::DelayNs;

use crate::config::{Config, Dimensions};
use crate::diff::{Rect, apply_line_mask, populate_line_mask};
use crate::error::{DiffError, DrawError};
use crate::power::{PowerSequencer, RailState};
use crate::queue::{Consumer, LineRecord};
use crate::waveform::{DriveCode, PassLut};

/// Interval between reads while waiting for a line record
const LINE_POLL_US: u32 = 10;

/// Consumer of line records for one panel
///
/// `W` is the record width in pixels and must cover the panel width.
pub struct DriveScheduler<const W: usize> {
    dims: Dimensions,
    power_ready_timeout_ms: u32,
    line_timeout_us: u32,
    mask: [u8; W],
    out: [u8; W],
    record: LineRecord<W>,
}

impl<const W: usize> DriveScheduler<W> {
    /// Create a scheduler for the panel described by `config`
    ///
    /// The line mask starts fully set.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::BufferTooSmall`] when `W` is narrower than the
    /// panel.
    pub fn new(config: &Config) -> Result<Self, DiffError> {
        let width = usize::from(config.dimensions.width);
        if W < width {
            return Err(DiffError::BufferTooSmall {
                required: width,
                provided: W,
            });
        }
        Ok(Self {
            dims: config.dimensions,
            power_ready_timeout_ms: config.power_ready_timeout_ms,
            line_timeout_us: config.line_timeout_us,
            mask: [0xFF; W],
            out: [0; W],
            record: LineRecord::new(),
        })
    }

    /// Restrict driving to the changed columns inside `crop`
    ///
    /// `dirty_columns` is the map from
    /// [`difference_image`](crate::diff::difference_image); `None` treats
    /// every column as changed. Columns outside `crop` are never driven.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::BufferTooSmall`] when the map does not cover
    /// two bytes per drive line byte.
    pub fn set_line_mask(
        &mut self,
        dirty_columns: Option<&[u8]>,
        crop: Rect,
    ) -> Result<(), DiffError> {
        let bytes = self.dims.drive_line_bytes();
        populate_line_mask(dirty_columns, &mut self.mask, bytes)?;

        let first = usize::from(crop.x);
        let end = (crop.right() as usize).min(usize::from(self.dims.width));
        for x in (0..4 * bytes).filter(|&x| x < first || x >= end) {
            self.mask[x / 4] &= !(0b11 << (2 * (x % 4)));
        }
        Ok(())
    }

    /// Current line mask, one drive line long
    pub fn line_mask(&self) -> &[u8] {
        &self.mask[..self.dims.drive_line_bytes()]
    }

    /// Wait until the rails report `Ready`
    ///
    /// Polls [`PowerSequencer::state`] once per millisecond for at most
    /// `timeout_ms`. Rails brought up by
    /// [`power_on`](PowerSequencer::power_on) are already `Ready` and pass
    /// on the first check; a sequencer whose state follows the hardware or
    /// another execution context is given time to settle.
    ///
    /// # Errors
    ///
    /// Returns [`DrawError::PowerNotReady`] when the timeout elapses.
    pub fn wait_for_power<P, D>(
        power: &P,
        delay: &mut D,
        timeout_ms: u32,
    ) -> Result<(), DrawError<P::Error>>
    where
        P: PowerSequencer,
        D: DelayNs,
    {
        let mut waited = 0;
        while power.state() != RailState::Ready {
            if waited >= timeout_ms {
                log::error!(
                    "Rails not ready after {} ms (state {:?})",
                    timeout_ms,
                    power.state()
                );
                return Err(DrawError::PowerNotReady);
            }
            delay.delay_ms(1);
            waited += 1;
        }
        Ok(())
    }

    /// Drive one sweep of the panel
    ///
    /// Reads one record per row. When the queue is empty `refill` is asked
    /// to produce more rows; once it has nothing to add the scheduler waits
    /// up to the configured line timeout. `cancel` is checked before every
    /// row.
    ///
    /// Once the frame has begun it is always ended, and on any error the
    /// records still queued are discarded.
    ///
    /// Returns the number of rows driven.
    ///
    /// # Errors
    ///
    /// - [`DrawError::PowerNotReady`] if the rails never come up
    /// - [`DrawError::QueueUnderrun`] if a record does not arrive in time
    /// - [`DrawError::RowMismatch`] if a record is for the wrong row
    /// - [`DrawError::Aborted`] after a cancellation
    /// - [`DrawError::Power`] for sequencer and bus failures
    #[allow(clippy::too_many_arguments)]
    pub fn drive_pass<P, D, const N: usize>(
        &mut self,
        power: &mut P,
        consumer: &mut Consumer<'_, N, W>,
        lut: &PassLut,
        frame_time: u16,
        cancel: &AtomicBool,
        delay: &mut D,
        mut refill: impl FnMut() -> usize,
    ) -> Result<u32, DrawError<P::Error>>
    where
        P: PowerSequencer,
        D: DelayNs,
    {
        Self::wait_for_power(power, delay, self.power_ready_timeout_ms)?;
        power.begin_frame(delay)?;

        let result = self.sweep(power, consumer, lut, frame_time, cancel, delay, &mut refill);
        if result.is_err() {
            let dropped = consumer.discard_all();
            log::debug!("Dropped {} queued rows", dropped);
        }
        let end = power.end_frame(delay);
        let rows = result?;
        end?;
        Ok(rows)
    }

    #[allow(clippy::too_many_arguments)]
    fn sweep<P, D, const N: usize>(
        &mut self,
        power: &mut P,
        consumer: &mut Consumer<'_, N, W>,
        lut: &PassLut,
        frame_time: u16,
        cancel: &AtomicBool,
        delay: &mut D,
        refill: &mut impl FnMut() -> usize,
    ) -> Result<u32, DrawError<P::Error>>
    where
        P: PowerSequencer,
        D: DelayNs,
    {
        let bytes = self.dims.drive_line_bytes();
        let mut rows_driven = 0u32;
        for row in 0..self.dims.height {
            if cancel.load(Ordering::Acquire) {
                log::warn!("Update aborted at row {}", row);
                return Err(DrawError::Aborted { rows_driven });
            }

            if !self.next_record(consumer, delay, refill) {
                log::error!(
                    "No line record for row {} after {} us",
                    row,
                    self.line_timeout_us
                );
                return Err(DrawError::QueueUnderrun { row });
            }
            if self.record.row != row {
                return Err(DrawError::RowMismatch {
                    expected: row,
                    actual: self.record.row,
                });
            }

            let out = &mut self.out[..bytes];
            out.fill(0);
            if self.record.dirty {
                lut.lookup_line(self.record.line(), out)?;
                apply_line_mask(out, &self.mask[..bytes]);
            }
            power.write_row(out, frame_time)?;
            rows_driven += 1;
        }
        Ok(rows_driven)
    }

    /// Read the next record into `self.record`
    ///
    /// Returns `false` when nothing arrived within the line timeout.
    fn next_record<D, const N: usize>(
        &mut self,
        consumer: &mut Consumer<'_, N, W>,
        delay: &mut D,
        refill: &mut impl FnMut() -> usize,
    ) -> bool
    where
        D: DelayNs,
    {
        let mut waited = 0;
        loop {
            if consumer.read(&mut self.record).is_ok() {
                return true;
            }
            if refill() > 0 {
                continue;
            }
            if waited >= self.line_timeout_us {
                return false;
            }
            delay.delay_us(LINE_POLL_US);
            waited += LINE_POLL_US;
        }
    }

    /// Drive `code` over `area` for one sweep
    ///
    /// Rows outside the area get no drive. Used for clearing cycles that do
    /// not depend on panel content.
    ///
    /// # Errors
    ///
    /// [`DrawError::PowerNotReady`] if the rails are not up and
    /// [`DrawError::Power`] for sequencer and bus failures.
    pub fn push_pixels<P, D>(
        &mut self,
        power: &mut P,
        area: Rect,
        code: DriveCode,
        hold_time: u16,
        delay: &mut D,
    ) -> Result<(), DrawError<P::Error>>
    where
        P: PowerSequencer,
        D: DelayNs,
    {
        Self::wait_for_power(power, delay, self.power_ready_timeout_ms)?;

        // a drive line is a quarter of a record, so both rows fit in `out`
        let bytes = self.dims.drive_line_bytes();
        let (pattern, rest) = self.out.split_at_mut(bytes);
        let blank = &mut rest[..bytes];
        blank.fill(0);
        pattern.fill(code.fill_byte());
        let first = usize::from(area.x);
        let stop = (area.right() as usize).min(usize::from(self.dims.width));
        for x in (0..4 * bytes).filter(|&x| x < first || x >= stop) {
            pattern[x / 4] &= !(0b11 << (2 * (x % 4)));
        }

        power.begin_frame(delay)?;
        let mut result = Ok(());
        for row in 0..self.dims.height {
            let line = if row >= area.y && u32::from(row) < area.bottom() {
                &*pattern
            } else {
                &*blank
            };
            result = power.write_row(line, hold_time);
            if result.is_err() {
                break;
            }
        }
        let end = power.end_frame(delay);
        result?;
        end?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Builder;
    use crate::feeder::{LineFeeder, Packing, Previous};
    use crate::pixel::PixelFormat;
    use crate::power::mock::{DriveCall, MockDelay, MockPower};
    use crate::queue::LineQueue;
    use alloc::vec;
    use core::cell::Cell;

    fn config(width: u16, height: u16) -> Config {
        Builder::new()
            .dimensions(Dimensions::new(width, height).unwrap())
            .line_timeout_us(100)
            .power_ready_timeout_ms(5)
            .build()
            .unwrap()
    }

    #[test]
    fn test_rejects_narrow_records() {
        assert!(matches!(
            DriveScheduler::<4>::new(&config(8, 2)),
            Err(DiffError::BufferTooSmall {
                required: 8,
                provided: 4
            })
        ));
    }

    #[test]
    fn test_line_mask_clears_columns_outside_crop() {
        let mut scheduler = DriveScheduler::<8>::new(&config(8, 2)).unwrap();
        scheduler.set_line_mask(None, Rect::new(2, 0, 4, 2)).unwrap();
        assert_eq!(scheduler.line_mask(), &[0xF0, 0x0F]);

        let columns = [0x00, 0x0F, 0x00, 0x11];
        scheduler.set_line_mask(Some(&columns), Rect::new(0, 0, 8, 2)).unwrap();
        assert_eq!(scheduler.line_mask(), &[0x30, 0xF0]);
    }

    #[test]
    fn test_wait_for_power_times_out() {
        let power = MockPower::default();
        let mut delay = MockDelay::default();
        let result = DriveScheduler::<8>::wait_for_power(&power, &mut delay, 3);
        assert!(matches!(result, Err(DrawError::PowerNotReady)));
        assert_eq!(delay.calls, 3);
    }

    #[test]
    fn test_wait_for_power_follows_state_changes() {
        let power = MockPower {
            ready_after: Cell::new(Some(2)),
            ..MockPower::default()
        };
        let mut delay = MockDelay::default();
        DriveScheduler::<8>::wait_for_power(&power, &mut delay, 5).unwrap();
        assert_eq!(delay.calls, 2);
    }

    #[test]
    fn test_pass_refuses_without_power() {
        let mut scheduler = DriveScheduler::<4>::new(&config(4, 2)).unwrap();
        let mut power = MockPower::default();
        let mut queue = LineQueue::<4, 4>::new();
        let (_, mut consumer) = queue.split();
        let result = scheduler.drive_pass(
            &mut power,
            &mut consumer,
            &PassLut::monochrome(),
            120,
            &AtomicBool::new(false),
            &mut MockDelay::default(),
            || 0,
        );
        assert!(matches!(result, Err(DrawError::PowerNotReady)));
        assert!(power.calls.is_empty());
    }

    #[test]
    fn test_pass_drives_every_row_through_lut_and_mask() {
        let config = config(4, 2);
        let dims = config.dimensions;
        let mut scheduler = DriveScheduler::<4>::new(&config).unwrap();
        let mut power = MockPower::ready();
        let mut delay = MockDelay::default();

        // row 0 all black over white, row 1 unchanged
        let interlaced = [0x0F, 0x0F, 0x0F, 0x0F, 0xFF, 0xFF, 0xFF, 0xFF];
        let dirty_lines = [true, false];
        let mut feeder = LineFeeder::<4>::new(
            Packing::Difference {
                interlaced: &interlaced,
                dirty_lines: &dirty_lines,
            },
            dims,
            Rect::full(dims),
        )
        .unwrap();
        scheduler.set_line_mask(None, Rect::new(0, 0, 2, 2)).unwrap();

        let mut queue = LineQueue::<2, 4>::new();
        let (mut producer, mut consumer) = queue.split();
        let rows = scheduler
            .drive_pass(
                &mut power,
                &mut consumer,
                &PassLut::monochrome(),
                80,
                &AtomicBool::new(false),
                &mut delay,
                || feeder.fill(&mut producer),
            )
            .unwrap();

        assert_eq!(rows, 2);
        assert_eq!(power.calls.first(), Some(&DriveCall::Begin));
        assert_eq!(power.calls.last(), Some(&DriveCall::End));
        assert_eq!(power.rows(), [(vec![0x05], 80), (vec![0x00], 80)]);
    }

    #[test]
    fn test_pass_underrun_when_producer_stalls() {
        let mut scheduler = DriveScheduler::<4>::new(&config(4, 2)).unwrap();
        let mut power = MockPower::ready();
        let mut queue = LineQueue::<4, 4>::new();
        let (mut producer, mut consumer) = queue.split();
        producer.push(&LineRecord::new()).unwrap();

        let result = scheduler.drive_pass(
            &mut power,
            &mut consumer,
            &PassLut::monochrome(),
            120,
            &AtomicBool::new(false),
            &mut MockDelay::default(),
            || 0,
        );
        assert!(matches!(result, Err(DrawError::QueueUnderrun { row: 1 })));
        assert_eq!(power.rows().len(), 1);
        assert_eq!(power.calls.last(), Some(&DriveCall::End));
    }

    #[test]
    fn test_pass_rejects_out_of_order_rows() {
        let mut scheduler = DriveScheduler::<4>::new(&config(4, 2)).unwrap();
        let mut power = MockPower::ready();
        let mut queue = LineQueue::<4, 4>::new();
        let (mut producer, mut consumer) = queue.split();
        let mut record = LineRecord::new();
        record.set_clean(1, 4);
        producer.push(&record).unwrap();

        let result = scheduler.drive_pass(
            &mut power,
            &mut consumer,
            &PassLut::monochrome(),
            120,
            &AtomicBool::new(false),
            &mut MockDelay::default(),
            || 0,
        );
        assert!(matches!(
            result,
            Err(DrawError::RowMismatch {
                expected: 0,
                actual: 1
            })
        ));
        assert_eq!(power.calls, [DriveCall::Begin, DriveCall::End]);
    }

    #[test]
    fn test_cancel_discards_queue_and_ends_frame() {
        let config = config(4, 3);
        let dims = config.dimensions;
        let mut scheduler = DriveScheduler::<4>::new(&config).unwrap();
        let mut power = MockPower::ready();
        let frame = [0u8; 6];
        let mut feeder = LineFeeder::<4>::new(
            Packing::Frame {
                data: &frame,
                format: PixelFormat::Bpp4,
                previous: Previous::White,
            },
            dims,
            Rect::full(dims),
        )
        .unwrap();
        let mut queue = LineQueue::<4, 4>::new();
        let (mut producer, mut consumer) = queue.split();
        feeder.fill(&mut producer);

        let cancel = AtomicBool::new(true);
        let result = scheduler.drive_pass(
            &mut power,
            &mut consumer,
            &PassLut::monochrome(),
            120,
            &cancel,
            &mut MockDelay::default(),
            || 0,
        );
        assert!(matches!(result, Err(DrawError::Aborted { rows_driven: 0 })));
        assert!(consumer.is_empty());
        assert_eq!(power.calls, [DriveCall::Begin, DriveCall::End]);
    }

    #[test]
    fn test_bus_error_mid_frame_is_returned() {
        let mut scheduler = DriveScheduler::<4>::new(&config(4, 3)).unwrap();
        let mut power = MockPower {
            fail_row: Some(0),
            ..MockPower::ready()
        };
        let mut queue = LineQueue::<4, 4>::new();
        let (mut producer, mut consumer) = queue.split();
        for row in 0..3 {
            let mut record = LineRecord::new();
            record.set_clean(row, 4);
            producer.push(&record).unwrap();
        }

        let result = scheduler.drive_pass(
            &mut power,
            &mut consumer,
            &PassLut::monochrome(),
            120,
            &AtomicBool::new(false),
            &mut MockDelay::default(),
            || 0,
        );
        assert!(matches!(
            result,
            Err(DrawError::Power(crate::error::Error::Bus("dma")))
        ));
        assert!(consumer.is_empty());
        assert_eq!(power.calls.last(), Some(&DriveCall::End));
    }

    #[test]
    fn test_push_pixels_fills_area_rows() {
        let mut scheduler = DriveScheduler::<8>::new(&config(8, 3)).unwrap();
        let mut power = MockPower::ready();
        scheduler
            .push_pixels(
                &mut power,
                Rect::new(0, 1, 6, 1),
                DriveCode::Lighten,
                50,
                &mut MockDelay::default(),
            )
            .unwrap();
        assert_eq!(
            power.rows(),
            [
                (vec![0x00, 0x00], 50),
                (vec![0xAA, 0x0A], 50),
                (vec![0x00, 0x00], 50)
            ]
        );
    }
}
