//! Differential update pipeline for parallel e-paper panels
//!
//! Drives electrophoretic panels whose source and gate drivers are clocked
//! directly by the controller (the ED047TC1 family on the v5 and v6
//! boards). Only pixels that changed since the last physical draw are
//! driven.
//!
//! ## Pipeline
//!
//! 1. [`diff`] compares the front framebuffer with the last drawn one and
//!    produces interlaced `(new << 4) | old` pixels plus a map of changed
//!    columns
//! 2. [`feeder`] turns rows into [`LineRecord`]s and pushes them into the
//!    lock-free [`LineQueue`]
//! 3. [`power`] ramps the panel rails up and down through bounded polls
//! 4. [`scheduler`] drains the queue row by row, looks up drive codes for
//!    each waveform pass and clocks them out, but only while the rails are
//!    [`RailState::Ready`]
//!
//! [`Display`] wires all of it to a pair of 4 bpp framebuffers.
//!
//! ## Features
//!
//! - `no_std`, no allocator needed
//! - `embedded-hal` v1.0 support
//! - `embedded-graphics` integration (with `graphics` feature)
//! - Two board revisions behind one [`PowerSequencer`] trait
//! - Rotation support
//!
//! ## Usage
//!
//! ```rust,no_run
//! use core::convert::Infallible;
//! use embedded_hal::delay::DelayNs;
//! use embedded_hal::i2c::{I2c, Operation};
//! use epdrive::{
//!     BoardV6, Buffers, Builder, Dimensions, Display, I2cRegisters, PixelBus, PowerSequencer,
//!     Rotation, SequencerConfig, WaveformMode,
//! };
//!
//! # struct MockI2c;
//! # impl embedded_hal::i2c::ErrorType for MockI2c { type Error = Infallible; }
//! # impl I2c for MockI2c {
//! #     fn transaction(&mut self, _address: u8, _operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
//! #         Ok(())
//! #     }
//! # }
//! # struct MockPixels;
//! # impl PixelBus for MockPixels {
//! #     type Error = Infallible;
//! #     fn attach(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! #     fn detach(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! #     fn clock_out(&mut self, _data: &[u8], _hold_time: u16) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct MockDelay;
//! # impl DelayNs for MockDelay { fn delay_ns(&mut self, _ns: u32) {} }
//! # let mut delay = MockDelay;
//! let dims = match Dimensions::new(32, 16) {
//!     Ok(dims) => dims,
//!     Err(_) => return,
//! };
//! let config = match Builder::new()
//!     .dimensions(dims)
//!     .rotation(Rotation::Rotate0)
//!     .vcom_mv(1560)
//!     .build()
//! {
//!     Ok(config) => config,
//!     Err(_) => return,
//! };
//!
//! let mut board = BoardV6::new(I2cRegisters::new(MockI2c), MockPixels, SequencerConfig::from(&config));
//! let _ = board.init(&mut delay);
//! let temperature = board.ambient_temperature(&mut delay).unwrap_or(25);
//!
//! let mut front = [0u8; 256];
//! let mut back = [0u8; 256];
//! let mut interlaced = [0u8; 512];
//! let mut dirty_columns = [0u8; 16];
//! let mut dirty_lines = [false; 16];
//! let buffers = Buffers {
//!     front: &mut front,
//!     back: &mut back,
//!     interlaced: &mut interlaced,
//!     dirty_columns: &mut dirty_columns,
//!     dirty_lines: &mut dirty_lines,
//! };
//! let mut display = match Display::<_, 4, 32>::new(board, config, buffers) {
//!     Ok(display) => display,
//!     Err(_) => return,
//! };
//!
//! display.set_pixel(10, 4, 0x0);
//! let _ = display.update_screen(WaveformMode::Monochrome, i16::from(temperature), &mut delay);
//! ```

#![no_std]

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

/// Configuration types and builder
pub mod config;
/// Difference engine: interlacing, dirty columns and line masks
pub mod diff;
/// High-level display with front and back framebuffers
pub mod display;
/// Error types
pub mod error;
/// Producer side: rows into line records
pub mod feeder;
/// Bus collaborators
pub mod interface;
/// Packed pixel formats
pub mod pixel;
/// Power sequencing state machine and board revisions
pub mod power;
/// Lock-free single-producer single-consumer line queue
pub mod queue;
/// Control chip register maps
pub mod register;
/// Coordinate rotation utilities
pub mod rotation;
/// Drive scheduler: the consumer side
pub mod scheduler;
/// Waveform tables and per-pass lookups
pub mod waveform;

/// Graphics support via embedded-graphics (requires `graphics` feature)
#[cfg(feature = "graphics")]
pub mod graphics;

pub use config::{Builder, Config, Dimensions, MAX_HEIGHT, MAX_VCOM_MV, MAX_WIDTH, Rotation};
pub use diff::{Rect, apply_line_mask, difference_image, interlace_line, populate_line_mask};
pub use display::{Buffers, Display, DisplayResult};
pub use error::{BuilderError, DiffError, DrawError, Error, LookupError, PollStage, QueueError};
pub use feeder::{LineFeeder, Packing, Previous};
pub use interface::{BusError, I2cRegisters, PixelBus, RegisterBus, ShiftRegister};
pub use pixel::PixelFormat;
pub use power::v5::BoardV5;
pub use power::v6::BoardV6;
pub use power::{PowerSequencer, PowerState, RailState, SequencerConfig};
pub use queue::{Consumer, LineQueue, LineRecord, Producer};
pub use scheduler::DriveScheduler;
pub use waveform::{
    DrawPlan, DriveCode, PassLut, TempRange, Waveform, WaveformMode, WaveformModeData,
    WaveformPhases,
};
