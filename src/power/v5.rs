//! v5 board: shift-register control lines
//!
//! Rails and gate driver lines sit behind an eight bit shift register
//! clocked from three GPIOs. There is no PMIC to ask, so the rails are
//! ramped on a fixed schedule and the board has no VCOM control and no
//! thermistor.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use super::{
    PowerResult, PowerSequencer, PowerState, RailState, SequencerConfig, finish_frame,
    require_ready, start_frame,
};
use crate::error::Error;
use crate::interface::{BusError, PixelBus, ShiftRegister};

/// Register bits in shift order
fn register_bits(ctrl: &PowerState) -> [bool; 8] {
    [
        ctrl.output_enable,
        ctrl.mode,
        ctrl.gate_high,
        ctrl.stv,
        ctrl.gate_low,
        ctrl.negative_rail,
        ctrl.positive_rail,
        ctrl.power_up,
    ]
}

/// Power sequencer of the v5 board
///
/// ## Type Parameters
///
/// * `DATA`, `CLK`, `STR` - Shift register pins implementing [`OutputPin`]
/// * `P` - Pixel output implementing [`PixelBus`]
pub struct BoardV5<DATA, CLK, STR, P> {
    control: ShiftRegister<DATA, CLK, STR>,
    pixels: P,
    settings: SequencerConfig,
    state: RailState,
    ctrl: PowerState,
}

impl<DATA, CLK, STR, P, PinErr> BoardV5<DATA, CLK, STR, P>
where
    DATA: OutputPin<Error = PinErr>,
    CLK: OutputPin<Error = PinErr>,
    STR: OutputPin<Error = PinErr>,
    P: PixelBus,
    PinErr: core::fmt::Debug,
{
    /// Create the sequencer in [`RailState::Off`]
    pub fn new(control: ShiftRegister<DATA, CLK, STR>, pixels: P, settings: SequencerConfig) -> Self {
        Self {
            control,
            pixels,
            settings,
            state: RailState::Off,
            ctrl: PowerState::default(),
        }
    }

    /// Give the control register and the pixel bus back
    pub fn release(self) -> (ShiftRegister<DATA, CLK, STR>, P) {
        (self.control, self.pixels)
    }

    fn push(&mut self) -> PowerResult<(), BusError<PinErr, P::Error>> {
        self.control
            .write(&register_bits(&self.ctrl))
            .map_err(|e| Error::Bus(BusError::Control(e)))
    }

    fn ramp_up<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), BusError<PinErr, P::Error>> {
        self.state = RailState::RailsRising;
        self.pixels
            .attach()
            .map_err(|e| Error::Bus(BusError::Pixel(e)))?;

        self.ctrl.power_up = true;
        self.push()?;
        delay.delay_us(100);
        self.ctrl.gate_low = true;
        self.push()?;
        delay.delay_us(500);
        self.ctrl.negative_rail = true;
        self.push()?;
        delay.delay_us(500);
        self.ctrl.gate_high = true;
        self.push()?;
        delay.delay_us(500);
        self.ctrl.positive_rail = true;
        self.push()?;

        self.state = RailState::Stabilizing;
        delay.delay_us(100);
        self.ctrl.stv = true;
        self.ctrl.sth = true;
        self.push()?;
        self.state = RailState::Ready;
        Ok(())
    }

    fn ramp_down<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), BusError<PinErr, P::Error>> {
        self.state = RailState::RailsFalling;
        self.ctrl.gate_high = false;
        self.ctrl.positive_rail = false;
        self.push()?;
        delay.delay_us(10);
        self.ctrl.gate_low = false;
        self.ctrl.negative_rail = false;
        self.push()?;
        delay.delay_us(100);

        self.ctrl = PowerState::default();
        self.push()?;
        self.pixels
            .detach()
            .map_err(|e| Error::Bus(BusError::Pixel(e)))?;
        self.state = RailState::Off;
        Ok(())
    }

    fn guard<T>(
        &mut self,
        result: PowerResult<T, BusError<PinErr, P::Error>>,
    ) -> PowerResult<T, BusError<PinErr, P::Error>> {
        if result.is_err() {
            self.state = RailState::Error;
        }
        result
    }
}

impl<DATA, CLK, STR, P, PinErr> PowerSequencer for BoardV5<DATA, CLK, STR, P>
where
    DATA: OutputPin<Error = PinErr>,
    CLK: OutputPin<Error = PinErr>,
    STR: OutputPin<Error = PinErr>,
    P: PixelBus,
    PinErr: core::fmt::Debug,
{
    type Error = BusError<PinErr, P::Error>;

    fn state(&self) -> RailState {
        self.state
    }

    fn ctrl_state(&self) -> PowerState {
        self.ctrl
    }

    fn init<D: DelayNs>(&mut self, _delay: &mut D) -> PowerResult<(), Self::Error> {
        self.ctrl = PowerState {
            stv: true,
            ..PowerState::default()
        };
        self.push()
    }

    fn deinit<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error> {
        self.power_off(delay)?;
        self.ctrl.stv = false;
        self.ctrl.mode = false;
        self.ctrl.output_enable = false;
        self.push()
    }

    fn power_on<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error> {
        match self.state {
            RailState::Ready => return Ok(()),
            RailState::Off => {}
            actual => {
                return Err(Error::InvalidState {
                    expected: RailState::Off,
                    actual,
                });
            }
        }
        let result = self.ramp_up(delay);
        self.guard(result)
    }

    fn power_off<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error> {
        match self.state {
            RailState::Off => return Ok(()),
            RailState::Ready | RailState::Error => {}
            actual => {
                return Err(Error::InvalidState {
                    expected: RailState::Ready,
                    actual,
                });
            }
        }
        let result = self.ramp_down(delay);
        self.guard(result)
    }

    fn measure_vcom<D: DelayNs>(&mut self, _delay: &mut D) -> PowerResult<u16, Self::Error> {
        Err(Error::Unsupported)
    }

    fn ambient_temperature<D: DelayNs>(&mut self, _delay: &mut D) -> PowerResult<i8, Self::Error> {
        let fallback = self.settings.fallback_temperature;
        log::warn!("Board has no thermistor, assuming {fallback} C");
        Ok(fallback)
    }

    fn set_vcom(&mut self, _mv: u16) -> PowerResult<(), Self::Error> {
        Err(Error::Unsupported)
    }

    fn begin_frame<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error> {
        require_ready(self.state)?;
        let control = &mut self.control;
        let result = start_frame(&mut self.ctrl, delay, |ctrl| {
            control.write(&register_bits(ctrl))
        })
        .map_err(|e| Error::Bus(BusError::Control(e)));
        self.guard(result)
    }

    fn write_row(&mut self, data: &[u8], hold_time: u16) -> PowerResult<(), Self::Error> {
        require_ready(self.state)?;
        self.ctrl.latch_enable = true;
        let result = self
            .pixels
            .clock_out(data, hold_time)
            .map_err(|e| Error::Bus(BusError::Pixel(e)));
        self.ctrl.latch_enable = false;
        self.guard(result)
    }

    fn end_frame<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error> {
        require_ready(self.state)?;
        let control = &mut self.control;
        let result = finish_frame(&mut self.ctrl, delay, |ctrl| {
            control.write(&register_bits(ctrl))
        })
        .map_err(|e| Error::Bus(BusError::Control(e)));
        self.guard(result)
    }
}
