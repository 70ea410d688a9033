//! v6 board: PCA9555 expander and TPS65185 PMIC
//!
//! The gate driver lines and the PMIC's WAKEUP, PWRUP and VCOM_CTRL inputs
//! hang off port 1 of the expander; PWRGOOD and the PMIC interrupt come back
//! on the same port. Rails, VCOM and the thermistor are programmed over I2C.
//!
//! ## Example
//!
//! ```rust,no_run
//! use epdrive::power::v6::BoardV6;
//! use epdrive::power::{PowerSequencer, RailState, SequencerConfig};
//! use epdrive::{Builder, Dimensions, I2cRegisters, PixelBus};
//! # use core::convert::Infallible;
//! # use embedded_hal::delay::DelayNs;
//! # use embedded_hal::i2c::{I2c, Operation};
//! # struct MockI2c;
//! # impl embedded_hal::i2c::ErrorType for MockI2c { type Error = Infallible; }
//! # impl I2c for MockI2c {
//! #     fn transaction(&mut self, _address: u8, _operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
//! #         Ok(())
//! #     }
//! # }
//! # struct MockBus;
//! # impl PixelBus for MockBus {
//! #     type Error = Infallible;
//! #     fn attach(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! #     fn detach(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! #     fn clock_out(&mut self, _data: &[u8], _hold: u16) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct MockDelay;
//! # impl DelayNs for MockDelay { fn delay_ns(&mut self, _ns: u32) {} }
//! # let mut delay = MockDelay;
//! let dims = match Dimensions::new(960, 540) {
//!     Ok(dims) => dims,
//!     Err(_) => return,
//! };
//! let config = match Builder::new().dimensions(dims).vcom_mv(1560).build() {
//!     Ok(config) => config,
//!     Err(_) => return,
//! };
//!
//! let mut board = BoardV6::new(
//!     I2cRegisters::new(MockI2c),
//!     MockBus,
//!     SequencerConfig::from(&config),
//! );
//! let _ = board.init(&mut delay);
//! let _ = board.ambient_temperature(&mut delay);
//! if board.power_on(&mut delay).is_ok() {
//!     assert_eq!(board.state(), RailState::Ready);
//! }
//! let _ = board.power_off(&mut delay);
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, ErrorKind};

use super::{
    Poll, PowerResult, PowerSequencer, PowerState, RailState, SequencerConfig, finish_frame,
    poll_status, require_ready, start_frame,
};
use crate::error::{Error, MAX_VCOM_MV, PollStage};
use crate::interface::{BusError, PixelBus, RegisterBus};
use crate::register::*;

type BoardError<R, P> = BusError<<R as RegisterBus>::Error, <P as PixelBus>::Error>;

/// Port 1 bits for a control line configuration
fn expander_bits(ctrl: &PowerState) -> u8 {
    let mut value = 0;
    if ctrl.output_enable {
        value |= PIN_OE;
    }
    if ctrl.mode {
        value |= PIN_MODE;
    }
    if ctrl.stv {
        value |= PIN_STV;
    }
    if ctrl.power_up {
        value |= PIN_PWRUP;
    }
    if ctrl.vcom_ctrl {
        value |= PIN_VCOM_CTRL;
    }
    if ctrl.wakeup {
        value |= PIN_WAKEUP;
    }
    value
}

fn gpio_bit<E>(pin: u8) -> PowerResult<u8, E> {
    if pin > 7 {
        return Err(Error::Unsupported);
    }
    Ok(1 << pin)
}

/// Power sequencer of the v6 board
///
/// ## Type Parameters
///
/// * `R` - Control bus implementing [`RegisterBus`]
/// * `P` - Pixel output implementing [`PixelBus`]
pub struct BoardV6<R, P> {
    regs: R,
    pixels: P,
    settings: SequencerConfig,
    state: RailState,
    ctrl: PowerState,
    attached: bool,
    // port 0 of the expander, broken out for the application
    gpio_direction: u8,
    gpio_output: u8,
}

impl<R, P> BoardV6<R, P>
where
    R: RegisterBus,
    P: PixelBus,
{
    /// Create the sequencer in [`RailState::Off`]
    pub fn new(regs: R, pixels: P, settings: SequencerConfig) -> Self {
        Self {
            regs,
            pixels,
            settings,
            state: RailState::Off,
            ctrl: PowerState::default(),
            attached: false,
            gpio_direction: 0,
            gpio_output: 0,
        }
    }

    /// Give both buses back
    pub fn release(self) -> (R, P) {
        (self.regs, self.pixels)
    }

    /// VCOM programmed at the next power-on, in millivolts
    pub fn vcom_mv(&self) -> u16 {
        self.settings.vcom_mv
    }

    /// Make `pin` (0..=7) of the free expander port an input or an output
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for pins past 7, [`Error::Bus`] when the
    /// expander does not answer.
    pub fn set_gpio_direction(
        &mut self,
        pin: u8,
        input: bool,
    ) -> PowerResult<(), BoardError<R, P>> {
        let bit = gpio_bit(pin)?;
        let direction = if input {
            self.gpio_direction | bit
        } else {
            self.gpio_direction & !bit
        };
        self.write(PCA_ADDR, PCA_CONFIG0, direction)?;
        self.gpio_direction = direction;
        Ok(())
    }

    /// Drive output `pin` (0..=7) of the free expander port
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for pins past 7, [`Error::Bus`] when the
    /// expander does not answer.
    pub fn gpio_write(&mut self, pin: u8, high: bool) -> PowerResult<(), BoardError<R, P>> {
        let bit = gpio_bit(pin)?;
        let output = if high {
            self.gpio_output | bit
        } else {
            self.gpio_output & !bit
        };
        self.write(PCA_ADDR, PCA_OUTPUT0, output)?;
        self.gpio_output = output;
        Ok(())
    }

    /// Level of `pin` (0..=7) of the free expander port
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] for pins past 7, [`Error::Bus`] when the
    /// expander does not answer.
    pub fn gpio_read(&mut self, pin: u8) -> PowerResult<bool, BoardError<R, P>> {
        let bit = gpio_bit(pin)?;
        Ok(self.read(PCA_ADDR, PCA_INPUT0)? & bit != 0)
    }

    fn write(&mut self, device: u8, register: u8, value: u8) -> PowerResult<(), BoardError<R, P>> {
        self.regs
            .write_register(device, register, value)
            .map_err(|e| Error::Bus(BusError::Control(e)))
    }

    fn read(&mut self, device: u8, register: u8) -> PowerResult<u8, BoardError<R, P>> {
        self.regs
            .read_register(device, register)
            .map_err(|e| Error::Bus(BusError::Control(e)))
    }

    fn push_ctrl(&mut self) -> PowerResult<(), BoardError<R, P>> {
        let value = expander_bits(&self.ctrl);
        self.write(PCA_ADDR, PCA_OUTPUT1, value)
    }

    fn poll<D: DelayNs>(
        &mut self,
        delay: &mut D,
        stage: PollStage,
        retries: u32,
        (device, register): (u8, u8),
        ready: impl Fn(u8) -> bool,
    ) -> PowerResult<u8, BoardError<R, P>> {
        let interval = self.settings.poll_interval_us;
        let regs = &mut self.regs;
        match poll_status(
            delay,
            retries,
            interval,
            || regs.read_register(device, register),
            ready,
        ) {
            Ok(Poll::Ready(status)) => Ok(status),
            Ok(Poll::Exhausted(status)) => {
                log::error!("Timed out waiting for {stage} (status 0x{status:02X})");
                Err(Error::PowerSequenceTimeout { stage, status })
            }
            Err(e) => Err(Error::Bus(BusError::Control(e))),
        }
    }

    fn log_interrupts(&mut self) {
        if let (Ok(int1), Ok(int2)) = (
            self.regs.read_register(TPS_ADDR, TPS_INT1),
            self.regs.read_register(TPS_ADDR, TPS_INT2),
        ) {
            log::error!("PMIC interrupt status: 0x{int1:02X} 0x{int2:02X}");
        }
    }

    fn write_vcom(&mut self) -> PowerResult<(), BoardError<R, P>> {
        let steps = self.settings.vcom_mv / 10;
        self.write(TPS_ADDR, TPS_VCOM1, (steps & 0xFF) as u8)?;
        self.write(TPS_ADDR, TPS_VCOM2, ((steps >> 8) & 0x01) as u8)
    }

    /// Raise PWRUP and wait for both power-good conditions
    ///
    /// Leaves the state at `Stabilizing` once PWRGOOD is seen. `enable`
    /// selects the steady-state path (rail enable and VCOM programming)
    /// over the measurement path.
    fn ramp_up<D: DelayNs>(
        &mut self,
        delay: &mut D,
        enable: bool,
    ) -> PowerResult<(), BoardError<R, P>> {
        let retries = self.settings.power_good_retries;
        self.state = RailState::RailsRising;
        self.ctrl.stv = true;
        self.ctrl.wakeup = true;
        self.push_ctrl()?;
        self.ctrl.power_up = true;
        self.push_ctrl()?;
        if enable {
            self.ctrl.vcom_ctrl = true;
            self.push_ctrl()?;
        }
        delay.delay_ms(1);

        let power_good = self.poll(
            delay,
            PollStage::PowerGood,
            retries,
            (PCA_ADDR, PCA_INPUT1),
            |s| s & PIN_PWRGOOD != 0,
        );
        if power_good.is_err() {
            self.log_interrupts();
        }
        power_good?;

        self.state = RailState::Stabilizing;
        if enable {
            self.write(TPS_ADDR, TPS_ENABLE, TPS_ENABLE_ALL)?;
            self.write_vcom()?;
        }
        self.ctrl.negative_rail = true;
        self.ctrl.positive_rail = true;
        self.ctrl.gate_low = true;
        self.ctrl.gate_high = true;
        self.ctrl.sth = true;

        self.poll(
            delay,
            PollStage::RailsGood,
            retries,
            (TPS_ADDR, TPS_PG),
            |s| s & TPS_PG_ALL == TPS_PG_ALL,
        )?;
        Ok(())
    }

    fn ramp_down<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), BoardError<R, P>> {
        self.state = RailState::RailsFalling;
        let wakeup = self.ctrl.wakeup;
        self.ctrl = PowerState {
            wakeup,
            ..PowerState::default()
        };
        self.push_ctrl()?;
        delay.delay_ms(1);
        self.ctrl.wakeup = false;
        self.push_ctrl()?;
        if self.attached {
            self.pixels
                .detach()
                .map_err(|e| Error::Bus(BusError::Pixel(e)))?;
            self.attached = false;
        }
        self.state = RailState::Off;
        Ok(())
    }

    fn power_on_sequence<D: DelayNs>(
        &mut self,
        delay: &mut D,
    ) -> PowerResult<(), BoardError<R, P>> {
        self.pixels
            .attach()
            .map_err(|e| Error::Bus(BusError::Pixel(e)))?;
        self.attached = true;
        self.ramp_up(delay, true)?;
        self.state = RailState::Ready;
        Ok(())
    }

    fn measure_sequence<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<u16, BoardError<R, P>> {
        self.ctrl.output_enable = true;
        self.ctrl.mode = false;
        self.ramp_up(delay, false)?;

        self.write(TPS_ADDR, TPS_VCOM2, TPS_VCOM2_HIZ)?;
        delay.delay_ms(1);
        // clear stale interrupts before the acquisition
        self.read(TPS_ADDR, TPS_INT1)?;
        self.write(TPS_ADDR, TPS_VCOM2, TPS_VCOM2_ACQUIRE)?;
        self.poll(
            delay,
            PollStage::VcomAcquisition,
            self.settings.power_good_retries,
            (TPS_ADDR, TPS_INT1),
            |s| s & TPS_INT1_ACQC != 0,
        )?;

        let lsb = u16::from(self.read(TPS_ADDR, TPS_VCOM1)?);
        let msb = u16::from(self.read(TPS_ADDR, TPS_VCOM2)?);
        let mv = ((lsb | (msb << 8)) & 0x01FF) * 10;

        self.ramp_down(delay)?;
        Ok(mv)
    }

    fn read_thermistor<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<i8, BoardError<R, P>> {
        self.write(TPS_ADDR, TPS_TMST1, TPS_TMST1_READ)?;
        self.poll(
            delay,
            PollStage::Thermistor,
            self.settings.thermistor_retries,
            (TPS_ADDR, TPS_TMST1),
            |s| s & TPS_TMST1_DONE != 0,
        )?;
        Ok(self.read(TPS_ADDR, TPS_TMST_VALUE)? as i8)
    }

    fn shutdown<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), BoardError<R, P>> {
        // hand VCOM_CTRL and PWRUP back to their pull resistors
        self.write(
            PCA_ADDR,
            PCA_CONFIG1,
            PIN_PWRGOOD | PIN_INT | PIN_VCOM_CTRL | PIN_PWRUP,
        )?;
        self.poll(
            delay,
            PollStage::Shutdown,
            self.settings.power_good_retries,
            (PCA_ADDR, PCA_INPUT1),
            |s| s & (PIN_PWRGOOD | PIN_INT) == PIN_INT,
        )?;
        // the PMIC raises one more interrupt after shutting down
        delay.delay_ms(500);
        self.read(PCA_ADDR, PCA_INPUT0)?;
        self.read(PCA_ADDR, PCA_INPUT1)?;
        Ok(())
    }

    fn guard<T>(
        &mut self,
        result: PowerResult<T, BoardError<R, P>>,
    ) -> PowerResult<T, BoardError<R, P>> {
        if result.is_err() {
            self.state = RailState::Error;
        }
        result
    }
}

impl<R, P> PowerSequencer for BoardV6<R, P>
where
    R: RegisterBus,
    P: PixelBus,
{
    type Error = BoardError<R, P>;

    fn state(&self) -> RailState {
        self.state
    }

    fn ctrl_state(&self) -> PowerState {
        self.ctrl
    }

    fn init<D: DelayNs>(&mut self, _delay: &mut D) -> PowerResult<(), Self::Error> {
        self.ctrl = PowerState::default();
        self.write(PCA_ADDR, PCA_CONFIG1, PIN_PWRGOOD | PIN_INT)?;
        self.push_ctrl()
    }

    fn deinit<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error> {
        self.power_off(delay)?;
        self.shutdown(delay)
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
        let result = self.power_on_sequence(delay);
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

    fn measure_vcom<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<u16, Self::Error> {
        if self.state != RailState::Off {
            return Err(Error::InvalidState {
                expected: RailState::Off,
                actual: self.state,
            });
        }
        let result = self.measure_sequence(delay);
        self.guard(result)
    }

    fn ambient_temperature<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<i8, Self::Error> {
        let fallback = self.settings.fallback_temperature;
        match self.read_thermistor(delay) {
            Err(Error::Bus(BusError::Control(e)))
                if matches!(e.kind(), ErrorKind::NoAcknowledge(_)) =>
            {
                log::warn!("No thermistor answered, assuming {fallback} C");
                Ok(fallback)
            }
            result => result,
        }
    }

    fn set_vcom(&mut self, mv: u16) -> PowerResult<(), Self::Error> {
        if mv > MAX_VCOM_MV {
            return Err(Error::InvalidVcom { mv });
        }
        self.settings.vcom_mv = mv;
        match self.state {
            RailState::Stabilizing | RailState::Ready => self.write_vcom(),
            _ => Ok(()),
        }
    }

    fn begin_frame<D: DelayNs>(&mut self, delay: &mut D) -> PowerResult<(), Self::Error> {
        require_ready(self.state)?;
        let regs = &mut self.regs;
        let result = start_frame(&mut self.ctrl, delay, |ctrl| {
            regs.write_register(PCA_ADDR, PCA_OUTPUT1, expander_bits(ctrl))
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
        let regs = &mut self.regs;
        let result = finish_frame(&mut self.ctrl, delay, |ctrl| {
            regs.write_register(PCA_ADDR, PCA_OUTPUT1, expander_bits(ctrl))
        })
        .map_err(|e| Error::Bus(BusError::Control(e)));
        self.guard(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::mock::{MockDelay, MockPixelBus, PixelCall};
    use alloc::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum MockI2cError {
        Nack,
        Arbitration,
    }

    impl embedded_hal::i2c::Error for MockI2cError {
        fn kind(&self) -> ErrorKind {
            match self {
                Self::Nack => {
                    ErrorKind::NoAcknowledge(embedded_hal::i2c::NoAcknowledgeSource::Address)
                }
                Self::Arbitration => ErrorKind::ArbitrationLoss,
            }
        }
    }

    /// Register file of both chips
    struct MockRegisters {
        writes: Vec<(u8, u8, u8)>,
        pca: [u8; 8],
        tps: [u8; 0x11],
        /// Device that does not acknowledge
        absent: Option<u8>,
        fail_with: Option<MockI2cError>,
        /// Reads of TPS INT1 after the acquisition start that report done
        acquire_done: bool,
    }

    impl MockRegisters {
        fn healthy() -> Self {
            let mut tps = [0u8; 0x11];
            tps[usize::from(TPS_PG)] = 0xFA;
            tps[usize::from(TPS_TMST1)] = TPS_TMST1_DONE;
            tps[usize::from(TPS_TMST_VALUE)] = 23;
            let mut pca = [0u8; 8];
            pca[usize::from(PCA_INPUT1)] = PIN_PWRGOOD;
            Self {
                writes: Vec::new(),
                pca,
                tps,
                absent: None,
                fail_with: None,
                acquire_done: true,
            }
        }

        fn output1_history(&self) -> Vec<u8> {
            self.writes
                .iter()
                .filter(|(dev, reg, _)| *dev == PCA_ADDR && *reg == PCA_OUTPUT1)
                .map(|(_, _, value)| *value)
                .collect()
        }

        fn tps_writes(&self) -> Vec<(u8, u8)> {
            self.writes
                .iter()
                .filter(|(dev, _, _)| *dev == TPS_ADDR)
                .map(|(_, reg, value)| (*reg, *value))
                .collect()
        }
    }

    impl RegisterBus for MockRegisters {
        type Error = MockI2cError;

        fn write_register(&mut self, device: u8, register: u8, value: u8) -> Result<(), Self::Error> {
            if self.absent == Some(device) {
                return Err(MockI2cError::Nack);
            }
            if let Some(e) = self.fail_with {
                return Err(e);
            }
            self.writes.push((device, register, value));
            match device {
                TPS_ADDR if register == TPS_VCOM2 && value == TPS_VCOM2_ACQUIRE => {
                    if self.acquire_done {
                        self.tps[usize::from(TPS_INT1)] = TPS_INT1_ACQC;
                    }
                    // kickback of 1.56 V
                    self.tps[usize::from(TPS_VCOM1)] = 156;
                }
                TPS_ADDR if register != TPS_TMST1 => self.tps[usize::from(register)] = value,
                _ => {}
            }
            Ok(())
        }

        fn read_register(&mut self, device: u8, register: u8) -> Result<u8, Self::Error> {
            if self.absent == Some(device) {
                return Err(MockI2cError::Nack);
            }
            if let Some(e) = self.fail_with {
                return Err(e);
            }
            Ok(match device {
                PCA_ADDR => self.pca[usize::from(register)],
                _ => self.tps[usize::from(register)],
            })
        }
    }

    fn settings() -> SequencerConfig {
        SequencerConfig {
            vcom_mv: 1560,
            power_good_retries: 500,
            thermistor_retries: 100,
            poll_interval_us: 1_000,
            fallback_temperature: 25,
        }
    }

    fn board(regs: MockRegisters) -> BoardV6<MockRegisters, MockPixelBus> {
        BoardV6::new(regs, MockPixelBus::default(), settings())
    }

    #[test]
    fn test_gpio_port_tracks_each_pin() {
        let mut regs = MockRegisters::healthy();
        regs.pca[usize::from(PCA_INPUT0)] = 0b0000_0100;
        let mut board = board(regs);
        board.set_gpio_direction(2, true).unwrap();
        board.set_gpio_direction(5, true).unwrap();
        board.set_gpio_direction(5, false).unwrap();
        board.gpio_write(0, true).unwrap();
        board.gpio_write(3, true).unwrap();
        board.gpio_write(0, false).unwrap();
        assert!(board.gpio_read(2).unwrap());
        assert!(!board.gpio_read(1).unwrap());
        assert!(matches!(board.gpio_write(8, true), Err(Error::Unsupported)));

        let (regs, _) = board.release();
        assert_eq!(
            regs.writes,
            [
                (PCA_ADDR, PCA_CONFIG0, 0b0000_0100),
                (PCA_ADDR, PCA_CONFIG0, 0b0010_0100),
                (PCA_ADDR, PCA_CONFIG0, 0b0000_0100),
                (PCA_ADDR, PCA_OUTPUT0, 0b0000_0001),
                (PCA_ADDR, PCA_OUTPUT0, 0b0000_1001),
                (PCA_ADDR, PCA_OUTPUT0, 0b0000_1000),
            ]
        );
    }

    #[test]
    fn test_init_configures_inputs_and_clears_outputs() {
        let mut board = board(MockRegisters::healthy());
        board.init(&mut MockDelay::default()).unwrap();
        let (regs, _) = board.release();
        assert_eq!(
            regs.writes,
            [
                (PCA_ADDR, PCA_CONFIG1, PIN_PWRGOOD | PIN_INT),
                (PCA_ADDR, PCA_OUTPUT1, 0x00)
            ]
        );
    }

    #[test]
    fn test_power_on_reaches_ready() {
        let mut board = board(MockRegisters::healthy());
        let mut delay = MockDelay::default();
        board.power_on(&mut delay).unwrap();
        assert_eq!(board.state(), RailState::Ready);

        let ctrl = board.ctrl_state();
        assert!(ctrl.wakeup && ctrl.power_up && ctrl.vcom_ctrl && ctrl.stv && ctrl.sth);
        assert!(ctrl.positive_rail && ctrl.negative_rail);

        let (regs, pixels) = board.release();
        assert_eq!(
            regs.output1_history(),
            [
                PIN_STV | PIN_WAKEUP,
                PIN_STV | PIN_WAKEUP | PIN_PWRUP,
                PIN_STV | PIN_WAKEUP | PIN_PWRUP | PIN_VCOM_CTRL
            ]
        );
        assert_eq!(
            regs.tps_writes(),
            [(TPS_ENABLE, 0x3F), (TPS_VCOM1, 156), (TPS_VCOM2, 0)]
        );
        assert_eq!(pixels.calls, [PixelCall::Attach]);
    }

    #[test]
    fn test_power_on_twice_is_noop() {
        let mut board = board(MockRegisters::healthy());
        let mut delay = MockDelay::default();
        board.power_on(&mut delay).unwrap();
        board.power_on(&mut delay).unwrap();
        let (regs, _) = board.release();
        assert_eq!(regs.output1_history().len(), 3);
    }

    #[test]
    fn test_power_good_never_set_times_out() {
        let mut regs = MockRegisters::healthy();
        regs.pca[usize::from(PCA_INPUT1)] = 0;
        let mut board = board(regs);
        let mut delay = MockDelay::default();

        let result = board.power_on(&mut delay);
        assert!(matches!(
            result,
            Err(Error::PowerSequenceTimeout {
                stage: PollStage::PowerGood,
                status: 0
            })
        ));
        assert_eq!(board.state(), RailState::Error);
        // 1 ms settle plus 500 polls of 1 ms
        assert_eq!(delay.total_ns, 501 * 1_000_000);
    }

    #[test]
    fn test_rails_never_good_times_out() {
        let mut regs = MockRegisters::healthy();
        regs.tps[usize::from(TPS_PG)] = 0xF0;
        let mut board = board(regs);
        let result = board.power_on(&mut MockDelay::default());
        assert!(matches!(
            result,
            Err(Error::PowerSequenceTimeout {
                stage: PollStage::RailsGood,
                ..
            })
        ));
        assert_eq!(board.state(), RailState::Error);
    }

    #[test]
    fn test_power_off_recovers_from_error() {
        let mut regs = MockRegisters::healthy();
        regs.pca[usize::from(PCA_INPUT1)] = 0;
        let mut board = board(regs);
        let mut delay = MockDelay::default();
        assert!(board.power_on(&mut delay).is_err());
        assert!(matches!(
            board.power_on(&mut delay),
            Err(Error::InvalidState {
                actual: RailState::Error,
                ..
            })
        ));

        board.power_off(&mut delay).unwrap();
        assert_eq!(board.state(), RailState::Off);
        assert_eq!(board.ctrl_state(), PowerState::default());
    }

    #[test]
    fn test_power_off_deasserts_before_wakeup() {
        let mut board = board(MockRegisters::healthy());
        let mut delay = MockDelay::default();
        board.power_on(&mut delay).unwrap();
        board.power_off(&mut delay).unwrap();
        assert_eq!(board.state(), RailState::Off);

        let (regs, pixels) = board.release();
        let history = regs.output1_history();
        assert_eq!(history[history.len() - 2..], [PIN_WAKEUP, 0x00]);
        assert_eq!(pixels.calls, [PixelCall::Attach, PixelCall::Detach]);
    }

    #[test]
    fn test_power_off_when_off_is_noop() {
        let mut board = board(MockRegisters::healthy());
        board.power_off(&mut MockDelay::default()).unwrap();
        let (regs, _) = board.release();
        assert!(regs.writes.is_empty());
    }

    #[test]
    fn test_bus_error_is_surfaced_not_retried() {
        let mut regs = MockRegisters::healthy();
        regs.fail_with = Some(MockI2cError::Arbitration);
        let mut board = board(regs);
        let result = board.power_on(&mut MockDelay::default());
        assert!(matches!(
            result,
            Err(Error::Bus(BusError::Control(MockI2cError::Arbitration)))
        ));
        assert_eq!(board.state(), RailState::Error);
    }

    #[test]
    fn test_rows_refused_outside_ready() {
        let mut board = board(MockRegisters::healthy());
        let mut delay = MockDelay::default();
        assert!(matches!(
            board.write_row(&[0x55], 100),
            Err(Error::InvalidState {
                expected: RailState::Ready,
                actual: RailState::Off
            })
        ));
        assert!(board.begin_frame(&mut delay).is_err());

        board.power_on(&mut delay).unwrap();
        board.begin_frame(&mut delay).unwrap();
        assert!(board.ctrl_state().output_enable);
        board.write_row(&[0x55], 100).unwrap();
        board.end_frame(&mut delay).unwrap();
        assert!(!board.ctrl_state().output_enable);

        let (_, pixels) = board.release();
        assert_eq!(
            pixels.calls,
            [PixelCall::Attach, PixelCall::Row(alloc::vec![0x55], 100)]
        );
    }

    #[test]
    fn test_measure_vcom() {
        let mut board = board(MockRegisters::healthy());
        let mv = board.measure_vcom(&mut MockDelay::default()).unwrap();
        assert_eq!(mv, 1560);
        assert_eq!(board.state(), RailState::Off);

        let (regs, pixels) = board.release();
        let tps = regs.tps_writes();
        assert_eq!(tps, [(TPS_VCOM2, TPS_VCOM2_HIZ), (TPS_VCOM2, TPS_VCOM2_ACQUIRE)]);
        assert_eq!(
            regs.output1_history()[0],
            PIN_OE | PIN_STV | PIN_WAKEUP
        );
        assert!(pixels.calls.is_empty());
    }

    #[test]
    fn test_measure_vcom_acquisition_timeout() {
        let mut regs = MockRegisters::healthy();
        regs.acquire_done = false;
        let mut board = board(regs);
        let result = board.measure_vcom(&mut MockDelay::default());
        assert!(matches!(
            result,
            Err(Error::PowerSequenceTimeout {
                stage: PollStage::VcomAcquisition,
                ..
            })
        ));
        assert_eq!(board.state(), RailState::Error);
    }

    #[test]
    fn test_measure_vcom_needs_off() {
        let mut board = board(MockRegisters::healthy());
        let mut delay = MockDelay::default();
        board.power_on(&mut delay).unwrap();
        assert!(matches!(
            board.measure_vcom(&mut delay),
            Err(Error::InvalidState {
                expected: RailState::Off,
                actual: RailState::Ready
            })
        ));
    }

    #[test]
    fn test_set_vcom_programs_registers_when_ready() {
        let mut board = board(MockRegisters::healthy());
        let mut delay = MockDelay::default();
        assert!(matches!(
            board.set_vcom(MAX_VCOM_MV + 10),
            Err(Error::InvalidVcom { .. })
        ));

        board.set_vcom(2600).unwrap();
        assert_eq!(board.vcom_mv(), 2600);
        board.power_on(&mut delay).unwrap();
        board.set_vcom(1000).unwrap();

        let (regs, _) = board.release();
        let tps = regs.tps_writes();
        // 260 steps needs bit 8
        assert_eq!(tps[1..3], [(TPS_VCOM1, 4), (TPS_VCOM2, 1)]);
        assert_eq!(tps[3..], [(TPS_VCOM1, 100), (TPS_VCOM2, 0)]);
    }

    #[test]
    fn test_temperature_reads_thermistor() {
        let mut board = board(MockRegisters::healthy());
        assert_eq!(board.ambient_temperature(&mut MockDelay::default()).unwrap(), 23);
    }

    #[test]
    fn test_temperature_negative_reading() {
        let mut regs = MockRegisters::healthy();
        regs.tps[usize::from(TPS_TMST_VALUE)] = 0xF6;
        let mut board = board(regs);
        assert_eq!(board.ambient_temperature(&mut MockDelay::default()).unwrap(), -10);
    }

    #[test]
    fn test_temperature_falls_back_without_sensor() {
        let mut regs = MockRegisters::healthy();
        regs.absent = Some(TPS_ADDR);
        let mut board = board(regs);
        assert_eq!(board.ambient_temperature(&mut MockDelay::default()).unwrap(), 25);
    }

    #[test]
    fn test_temperature_conversion_timeout() {
        let mut regs = MockRegisters::healthy();
        regs.tps[usize::from(TPS_TMST1)] = 0;
        let mut board = board(regs);
        let mut delay = MockDelay::default();
        let result = board.ambient_temperature(&mut delay);
        assert!(matches!(
            result,
            Err(Error::PowerSequenceTimeout {
                stage: PollStage::Thermistor,
                ..
            })
        ));
        assert_eq!(delay.calls, 100);
    }

    #[test]
    fn test_deinit_waits_for_shutdown() {
        let mut regs = MockRegisters::healthy();
        regs.pca[usize::from(PCA_INPUT1)] = PIN_INT;
        let mut board = board(regs);
        board.deinit(&mut MockDelay::default()).unwrap();

        let (regs, _) = board.release();
        assert_eq!(
            regs.writes,
            [(
                PCA_ADDR,
                PCA_CONFIG1,
                PIN_PWRGOOD | PIN_INT | PIN_VCOM_CTRL | PIN_PWRUP
            )]
        );
    }

    #[test]
    fn test_deinit_shutdown_timeout() {
        let mut board = board(MockRegisters::healthy());
        let result = board.deinit(&mut MockDelay::default());
        assert!(matches!(
            result,
            Err(Error::PowerSequenceTimeout {
                stage: PollStage::Shutdown,
                status: PIN_PWRGOOD
            })
        ));
    }
}
