//! Bus collaborators
//!
//! The core never touches peripherals directly. It talks to three small
//! seams:
//!
//! - [`RegisterBus`]: one-byte register reads and writes on the control bus
//!   (I2C on the v6 board), with [`I2cRegisters`] as the embedded-hal
//!   implementation
//! - [`PixelBus`]: the bulk clocked output that shifts one row of drive
//!   codes into the source drivers (I2S or LCD peripheral plus DMA)
//! - [`ShiftRegister`]: the serial control register of the v5 board,
//!   bit-banged over three output pins
//!
//! ## Example
//!
//! ```rust,no_run
//! use epdrive::{I2cRegisters, RegisterBus};
//! # use core::convert::Infallible;
//! # use embedded_hal::i2c::{I2c, Operation};
//! # struct MockI2c;
//! # impl embedded_hal::i2c::ErrorType for MockI2c { type Error = Infallible; }
//! # impl I2c for MockI2c {
//! #     fn transaction(&mut self, _address: u8, _operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
//! #         Ok(())
//! #     }
//! # }
//! let mut regs = I2cRegisters::new(MockI2c);
//! let _ = regs.write_register(0x20, 0x07, 0xC0);
//! let _ = regs.read_register(0x20, 0x01);
//! ```

use core::fmt::Debug;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;

type InterfaceResult<T, E> = core::result::Result<T, E>;

/// Register access on the control bus
///
/// Implement this directly when the control chips sit behind something
/// other than a plain [`I2c`] bus.
pub trait RegisterBus {
    /// Error type for bus transactions
    ///
    /// Exposes an [`ErrorKind`](embedded_hal::i2c::ErrorKind) so a missing
    /// chip (no acknowledge) can be told apart from a broken bus.
    type Error: embedded_hal::i2c::Error;

    /// Write `value` to `register` of the device at `device`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: u8,
    ) -> InterfaceResult<(), Self::Error>;

    /// Read `register` of the device at `device`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    fn read_register(&mut self, device: u8, register: u8) -> InterfaceResult<u8, Self::Error>;
}

/// [`RegisterBus`] over an embedded-hal [`I2c`] bus
///
/// Writes send `[register, value]`; reads send `[register]` and read one
/// byte back in the same transaction.
pub struct I2cRegisters<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> I2cRegisters<I2C> {
    /// Wrap an I2C bus
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2c> RegisterBus for I2cRegisters<I2C> {
    type Error = I2C::Error;

    fn write_register(
        &mut self,
        device: u8,
        register: u8,
        value: u8,
    ) -> InterfaceResult<(), Self::Error> {
        self.i2c.write(device, &[register, value])
    }

    fn read_register(&mut self, device: u8, register: u8) -> InterfaceResult<u8, Self::Error> {
        let mut value = [0u8];
        self.i2c.write_read(device, &[register], &mut value)?;
        Ok(value[0])
    }
}

/// Bulk clocked output into the source drivers
///
/// One call to [`clock_out`](Self::clock_out) shifts one row of drive
/// codes (four pixels per byte) and latches it for `hold_time`.
pub trait PixelBus {
    /// Error type for the output peripheral
    type Error: Debug;

    /// Claim the output pins and peripheral
    ///
    /// # Errors
    ///
    /// Returns an error if the peripheral cannot be claimed.
    fn attach(&mut self) -> InterfaceResult<(), Self::Error>;

    /// Release the output pins and peripheral
    ///
    /// # Errors
    ///
    /// Returns an error if the peripheral cannot be released.
    fn detach(&mut self) -> InterfaceResult<(), Self::Error>;

    /// Clock one row of drive codes out
    ///
    /// `hold_time` is the gate on-time of the row in tenths of a microsecond.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails.
    fn clock_out(&mut self, data: &[u8], hold_time: u16) -> InterfaceResult<(), Self::Error>;
}

/// Errors from either bus of a board
///
/// Generic over the control bus and pixel bus error types.
#[derive(Debug)]
pub enum BusError<CtrlErr, PixErr> {
    /// Control bus (I2C or control pins) error
    Control(CtrlErr),
    /// Pixel bus error
    Pixel(PixErr),
}

impl<CtrlErr: Debug, PixErr: Debug> core::fmt::Display for BusError<CtrlErr, PixErr> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Control(e) => write!(f, "Control bus error: {e:?}"),
            Self::Pixel(e) => write!(f, "Pixel bus error: {e:?}"),
        }
    }
}

impl<CtrlErr: Debug, PixErr: Debug> core::error::Error for BusError<CtrlErr, PixErr> {}

/// Serial-in parallel-out control register on three pins
///
/// Data is set while the clock is low and sampled on the rising edge, then
/// a strobe pulse moves the shifted bits to the outputs.
///
/// ## Type Parameters
///
/// * `DATA` - Serial data pin implementing [`OutputPin`]
/// * `CLK` - Shift clock pin implementing [`OutputPin`]
/// * `STR` - Strobe (latch) pin implementing [`OutputPin`]
pub struct ShiftRegister<DATA, CLK, STR> {
    data: DATA,
    clk: CLK,
    str: STR,
}

impl<DATA, CLK, STR, PinErr> ShiftRegister<DATA, CLK, STR>
where
    DATA: OutputPin<Error = PinErr>,
    CLK: OutputPin<Error = PinErr>,
    STR: OutputPin<Error = PinErr>,
{
    /// Create a shift register from its pins
    pub fn new(data: DATA, clk: CLK, str: STR) -> Self {
        Self { data, clk, str }
    }

    /// Shift `bits` out, first element first, and latch them
    ///
    /// # Errors
    ///
    /// Returns the first pin error.
    pub fn write(&mut self, bits: &[bool]) -> InterfaceResult<(), PinErr> {
        for &bit in bits {
            self.clk.set_low()?;
            self.data.set_state(bit.into())?;
            self.clk.set_high()?;
        }
        self.str.set_high()?;
        self.str.set_low()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::cell::RefCell;
    use core::convert::Infallible;
    use embedded_hal::i2c::{ErrorType, Operation};

    struct MockI2c {
        writes: Vec<(u8, Vec<u8>)>,
        reply: u8,
    }

    impl ErrorType for MockI2c {
        type Error = Infallible;
    }

    impl I2c for MockI2c {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.writes.push((address, bytes.to_vec())),
                    Operation::Read(buf) => buf.fill(self.reply),
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_write_register_sends_register_then_value() {
        let mut regs = I2cRegisters::new(MockI2c {
            writes: Vec::new(),
            reply: 0,
        });
        regs.write_register(0x68, 0x01, 0x3F).unwrap();
        let i2c = regs.release();
        assert_eq!(i2c.writes, [(0x68, alloc::vec![0x01, 0x3F])]);
    }

    #[test]
    fn test_read_register_returns_reply() {
        let mut regs = I2cRegisters::new(MockI2c {
            writes: Vec::new(),
            reply: 0xFA,
        });
        assert_eq!(regs.read_register(0x68, 0x0F).unwrap(), 0xFA);
        let i2c = regs.release();
        assert_eq!(i2c.writes, [(0x68, alloc::vec![0x0F])]);
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Edge {
        Data(bool),
        Clk(bool),
        Str(bool),
    }

    struct MockPin<'a> {
        log: &'a RefCell<Vec<Edge>>,
        edge: fn(bool) -> Edge,
    }

    impl embedded_hal::digital::ErrorType for MockPin<'_> {
        type Error = Infallible;
    }

    impl OutputPin for MockPin<'_> {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push((self.edge)(false));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.log.borrow_mut().push((self.edge)(true));
            Ok(())
        }
    }

    #[test]
    fn test_shift_register_clocks_each_bit_then_strobes() {
        let log = RefCell::new(Vec::new());
        let mut register = ShiftRegister::new(
            MockPin {
                log: &log,
                edge: Edge::Data,
            },
            MockPin {
                log: &log,
                edge: Edge::Clk,
            },
            MockPin {
                log: &log,
                edge: Edge::Str,
            },
        );
        register.write(&[true, false]).unwrap();
        assert_eq!(
            log.into_inner(),
            [
                Edge::Clk(false),
                Edge::Data(true),
                Edge::Clk(true),
                Edge::Clk(false),
                Edge::Data(false),
                Edge::Clk(true),
                Edge::Str(true),
                Edge::Str(false),
            ]
        );
    }
}
