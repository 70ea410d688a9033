//! Register maps of the board's control chips
//!
//! The v6 board drives its control lines through a PCA9555 I/O expander and
//! powers the panel from a TPS65185 PMIC, both on the same I2C bus. Every
//! access is a single register byte followed by one data byte.
//!
//! ## Port 1 of the expander
//!
//! | Bit | Line | Direction |
//! |-----|------|-----------|
//! | 0 | OE | out |
//! | 1 | MODE | out |
//! | 2 | STV | out |
//! | 3 | PWRUP | out |
//! | 4 | VCOM_CTRL | out |
//! | 5 | WAKEUP | out |
//! | 6 | PWRGOOD | in |
//! | 7 | INT | in |
//!
//! ## Example
//!
//! ```rust,no_run
//! use epdrive::{register, I2cRegisters, RegisterBus};
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
//!
//! // Enable every rail of the PMIC
//! let _ = regs.write_register(register::TPS_ADDR, register::TPS_ENABLE, 0x3F);
//!
//! // Read the power-good register
//! let _ = regs.read_register(register::TPS_ADDR, register::TPS_PG);
//! ```

// Device addresses

/// PCA9555 I/O expander address (0x20)
pub const PCA_ADDR: u8 = 0x20;

/// TPS65185 PMIC address (0x68)
pub const TPS_ADDR: u8 = 0x68;

// PCA9555 registers

/// Input port 0
pub const PCA_INPUT0: u8 = 0x00;

/// Input port 1
///
/// Holds PWRGOOD and INT from the PMIC.
pub const PCA_INPUT1: u8 = 0x01;

/// Output port 0
pub const PCA_OUTPUT0: u8 = 0x02;

/// Output port 1
pub const PCA_OUTPUT1: u8 = 0x03;

/// Direction port 0 (1 = input)
pub const PCA_CONFIG0: u8 = 0x06;

/// Direction port 1 (1 = input)
pub const PCA_CONFIG1: u8 = 0x07;

// Port 1 lines

/// Gate driver output enable
pub const PIN_OE: u8 = 0x01;

/// Gate driver mode
pub const PIN_MODE: u8 = 0x02;

/// Gate driver start pulse
pub const PIN_STV: u8 = 0x04;

/// PMIC power-up request
pub const PIN_PWRUP: u8 = 0x08;

/// VCOM buffer enable
pub const PIN_VCOM_CTRL: u8 = 0x10;

/// PMIC wakeup
pub const PIN_WAKEUP: u8 = 0x20;

/// PMIC power good (input)
pub const PIN_PWRGOOD: u8 = 0x40;

/// PMIC interrupt (input, active low)
pub const PIN_INT: u8 = 0x80;

// TPS65185 registers

/// Thermistor reading, signed degrees Celsius
pub const TPS_TMST_VALUE: u8 = 0x00;

/// Rail enable
///
/// Writing 0x3F enables every rail and VCOM.
pub const TPS_ENABLE: u8 = 0x01;

/// VCOM bits 7..0 (10 mV steps)
pub const TPS_VCOM1: u8 = 0x03;

/// VCOM bit 8 plus measurement control
pub const TPS_VCOM2: u8 = 0x04;

/// Interrupt status 1
pub const TPS_INT1: u8 = 0x07;

/// Interrupt status 2
pub const TPS_INT2: u8 = 0x08;

/// Thermistor control 1
pub const TPS_TMST1: u8 = 0x0D;

/// Power-good status of every rail
pub const TPS_PG: u8 = 0x0F;

// Register values

/// All rails plus VCOM enabled
pub const TPS_ENABLE_ALL: u8 = 0x3F;

/// Rail power-good bits that must all be set before driving
pub const TPS_PG_ALL: u8 = 0xFA;

/// Start a thermistor conversion (TMST1)
pub const TPS_TMST1_READ: u8 = 0x80;

/// Conversion done (TMST1)
pub const TPS_TMST1_DONE: u8 = 0x20;

/// VCOM output high impedance with averaging (VCOM2)
pub const TPS_VCOM2_HIZ: u8 = 0x38;

/// Start a kickback acquisition (VCOM2)
pub const TPS_VCOM2_ACQUIRE: u8 = 0xA0;

/// Kickback acquisition complete (INT1)
pub const TPS_INT1_ACQC: u8 = 0x02;
