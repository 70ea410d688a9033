//! Power sequencing
//!
//! A panel may only be driven while its high-voltage rails are up and
//! stable. [`PowerSequencer`] is the state machine that gets them there and
//! back down again:
//!
//! ```text
//! Off -> RailsRising -> Stabilizing -> Ready -> RailsFalling -> Off
//!            |               |                       |
//!            +-------------> Error <-----------------+
//! ```
//!
//! Every wait on the hardware is a bounded poll. When a budget runs out the
//! transition is abandoned, the failing status value is logged and the
//! sequencer parks in [`RailState::Error`]; [`PowerSequencer::power_off`]
//! brings it back to `Off`.
//!
//! One implementation exists per board revision:
//!
//! - [`v6::BoardV6`]: PCA9555 expander plus TPS65185 PMIC over I2C
//! - [`v5::BoardV5`]: shift-register control lines with a timed rail ramp

use core::fmt::Debug;
use embedded_hal::delay::DelayNs;

use crate::config::Config;
use crate::error::Error;

pub mod v5;
pub mod v6;

pub(crate) type PowerResult<T, E> = core::result::Result<T, Error<E>>;

/// Rail state of the sequencer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RailState {
    /// Rails down, pixel bus released
    #[default]
    Off,
    /// Power-up requested, waiting for power good
    RailsRising,
    /// Rails enabled, waiting for every rail to settle
    Stabilizing,
    /// Rails up; rows may be driven
    Ready,
    /// Power-down in progress
    RailsFalling,
    /// A transition was abandoned; call `power_off` to recover
    Error,
}

/// Instantaneous configuration of the panel's control lines
///
/// Only the sequencer changes these. The v6 board derives the rail flags
/// from the PMIC enable register, the v5 board switches them one by one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PowerState {
    /// Main supply of the high-voltage stage
    pub power_up: bool,
    /// Negative source rail
    pub negative_rail: bool,
    /// Positive source rail
    pub positive_rail: bool,
    /// Gate low rail
    pub gate_low: bool,
    /// Gate high rail
    pub gate_high: bool,
    /// PMIC wakeup
    pub wakeup: bool,
    /// VCOM buffer enable
    pub vcom_ctrl: bool,
    /// Gate driver output enable
    pub output_enable: bool,
    /// Gate driver mode
    pub mode: bool,
    /// Gate start pulse
    pub stv: bool,
    /// Source driver latch enable
    pub latch_enable: bool,
    /// Source driver start pulse
    pub sth: bool,
}

/// Timing and calibration the sequencers need from [`Config`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequencerConfig {
    /// VCOM magnitude in millivolts
    pub vcom_mv: u16,
    /// Budget of each power-good poll
    pub power_good_retries: u32,
    /// Budget of the thermistor poll
    pub thermistor_retries: u32,
    /// Delay between polls in microseconds
    pub poll_interval_us: u32,
    /// Reported when no thermistor answers
    pub fallback_temperature: i8,
}

impl From<&Config> for SequencerConfig {
    fn from(config: &Config) -> Self {
        Self {
            vcom_mv: config.vcom_mv,
            power_good_retries: config.power_good_retries,
            thermistor_retries: config.thermistor_retries,
            poll_interval_us: config.poll_interval_us,
            fallback_temperature: config.fallback_temperature,
        }
    }
}

/// Board power state machine
///
/// The sequencer owns both buses of the board. Rows can only be written
/// through it, and only while [`state`](Self::state) is
/// [`RailState::Ready`], so power sequencing and pixel output never share
/// the bus.
pub trait PowerSequencer {
    /// Error type of the board's buses
    type Error: Debug;

    /// Current rail state
    fn state(&self) -> RailState;

    /// Current control line configuration
    fn ctrl_state(&self) -> PowerState;

    /// Put the control chips into a known, powered-down configuration
    fn init<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error>;

    /// Power down if needed and release the control chips
    fn deinit<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error>;

    /// Bring the rails up: `Off -> RailsRising -> Stabilizing -> Ready`
    ///
    /// A no-op when already `Ready`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] outside `Off`/`Ready`,
    /// [`Error::PowerSequenceTimeout`] when a poll budget runs out and
    /// [`Error::Bus`] on a failed transaction. The last two leave the
    /// sequencer in [`RailState::Error`].
    fn power_on<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error>;

    /// Take the rails down: `Ready -> RailsFalling -> Off`
    ///
    /// A no-op when already `Off`. Also the way out of
    /// [`RailState::Error`].
    fn power_off<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error>;

    /// Measure the kickback voltage of the panel in millivolts
    ///
    /// Runs its own power-up, takes the reading and powers down again.
    /// Needs `Off`.
    fn measure_vcom<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<u16, Self::Error>;

    /// Read the ambient temperature in degrees Celsius
    ///
    /// Returns the configured fallback, with a warning, when the board has
    /// no thermistor or it does not answer.
    fn ambient_temperature<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<i8, Self::Error>;

    /// Program the VCOM magnitude in millivolts
    ///
    /// Takes effect immediately when the rails are up, otherwise at the
    /// next power-on.
    fn set_vcom(&mut self, mv: u16) -> PowerResult<(), Self::Error>;

    /// Start a top-to-bottom sweep
    fn begin_frame<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error>;

    /// Clock one row of drive codes out and latch it
    ///
    /// `hold_time` is in tenths of a microsecond.
    fn write_row(&mut self, data: &[u8], hold_time: u16) -> PowerResult<(), Self::Error>;

    /// Finish a sweep
    fn end_frame<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error>;
}

/// Result of a bounded status poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Poll {
    /// The condition held; carries the status that satisfied it
    Ready(u8),
    /// The budget ran out; carries the last status read
    Exhausted(u8),
}

/// Read a status until `ready` accepts it
///
/// Reads at most `retries + 1` times with `interval_us` between reads. Bus
/// errors end the poll at once.
pub(crate) fn poll_status<D, E>(
    delay: &mut D,
    retries: u32,
    interval_us: u32,
    mut read: impl FnMut() -> Result<u8, E>,
    ready: impl Fn(u8) -> bool,
) -> Result<Poll, E>
where
    D: DelayNs,
{
    let mut status = read()?;
    let mut tries = 0;
    while !ready(status) {
        if tries >= retries {
            return Ok(Poll::Exhausted(status));
        }
        tries += 1;
        delay.delay_us(interval_us);
        status = read()?;
    }
    Ok(Poll::Ready(status))
}

/// Refuse anything but `Ready`
pub(crate) fn require_ready<E>(state: RailState) -> PowerResult<(), E> {
    if state != RailState::Ready {
        return Err(Error::InvalidState {
            expected: RailState::Ready,
            actual: state,
        });
    }
    Ok(())
}

/// Gate driver start sequence shared by the boards
///
/// `push` writes the control lines to the hardware.
pub(crate) fn start_frame<D, E>(
    ctrl: &mut PowerState,
    delay: &mut D,
    mut push: impl FnMut(&PowerState) -> Result<(), E>,
) -> Result<(), E>
where
    D: DelayNs,
{
    ctrl.mode = true;
    push(ctrl)?;
    delay.delay_us(1);

    // start pulse, timing sensitive
    ctrl.stv = false;
    push(ctrl)?;
    delay.delay_us(100);
    ctrl.stv = true;
    push(ctrl)?;
    delay.delay_us(4);

    ctrl.output_enable = true;
    push(ctrl)
}

/// Gate driver stop sequence shared by the boards
pub(crate) fn finish_frame<D, E>(
    ctrl: &mut PowerState,
    delay: &mut D,
    mut push: impl FnMut(&PowerState) -> Result<(), E>,
) -> Result<(), E>
where
    D: DelayNs,
{
    ctrl.stv = false;
    push(ctrl)?;
    delay.delay_us(5);
    ctrl.mode = false;
    push(ctrl)?;
    delay.delay_us(10);
    ctrl.output_enable = false;
    push(ctrl)?;
    delay.delay_us(3);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::mock::MockDelay;
    use super::*;

    #[test]
    fn test_poll_ready_on_first_read() {
        let mut delay = MockDelay::default();
        let result = poll_status::<_, ()>(&mut delay, 5, 1_000, || Ok(0x40), |s| s & 0x40 != 0);
        assert_eq!(result, Ok(Poll::Ready(0x40)));
        assert_eq!(delay.calls, 0);
    }

    #[test]
    fn test_poll_gives_up_after_budget() {
        let mut delay = MockDelay::default();
        let mut reads = 0;
        let result = poll_status::<_, ()>(
            &mut delay,
            500,
            1_000,
            || {
                reads += 1;
                Ok(0x00)
            },
            |s| s != 0,
        );
        assert_eq!(result, Ok(Poll::Exhausted(0x00)));
        assert_eq!(reads, 501);
        assert_eq!(delay.total_ns, 500 * 1_000_000);
    }

    #[test]
    fn test_poll_stops_on_bus_error() {
        let mut delay = MockDelay::default();
        let mut reads = 0;
        let result = poll_status(
            &mut delay,
            10,
            1,
            || {
                reads += 1;
                if reads == 3 { Err("nack") } else { Ok(0) }
            },
            |s| s != 0,
        );
        assert_eq!(result, Err("nack"));
        assert_eq!(reads, 3);
    }

    #[test]
    fn test_require_ready() {
        assert!(require_ready::<()>(RailState::Ready).is_ok());
        assert!(matches!(
            require_ready::<()>(RailState::Stabilizing),
            Err(Error::InvalidState {
                expected: RailState::Ready,
                actual: RailState::Stabilizing
            })
        ));
    }

    #[test]
    fn test_frame_sequences_toggle_lines() {
        let mut ctrl = PowerState::default();
        let mut delay = MockDelay::default();
        let mut pushes = alloc::vec::Vec::new();

        start_frame::<_, ()>(&mut ctrl, &mut delay, |c| {
            pushes.push((c.mode, c.stv, c.output_enable));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            pushes,
            [
                (true, false, false),
                (true, false, false),
                (true, true, false),
                (true, true, true)
            ]
        );

        pushes.clear();
        finish_frame::<_, ()>(&mut ctrl, &mut delay, |c| {
            pushes.push((c.mode, c.stv, c.output_enable));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            pushes,
            [(true, false, true), (false, false, true), (false, false, false)]
        );
    }
}
