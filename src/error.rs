//! Error types for the update pipeline
//!
//! This module defines the error types for configuration building
//! ([`BuilderError`]), power sequencing ([`Error`]), frame drawing
//! ([`DrawError`]), waveform lookups ([`LookupError`]), the line queue
//! ([`QueueError`]) and the pure diff helpers ([`DiffError`]).
//!
//! ## Error Types
//!
//! - [`BuilderError`] - Errors during configuration construction
//! - [`Error`] - Power sequencer failures, including bounded-poll timeouts
//! - [`DrawError`] - Why a full-frame update could not be completed
//! - [`LookupError`] - Why no drive lookup exists for a mode
//! - [`QueueError`] - Backpressure signals from the line queue (not failures)
//! - [`BusError`](crate::interface::BusError) - Low-level bus failures
//!
//! ## Example
//!
//! ```
//! use epdrive::{Builder, BuilderError, Dimensions};
//!
//! // Missing dimensions
//! let result = Builder::new().build();
//! assert!(matches!(result, Err(BuilderError::MissingDimensions)));
//!
//! // Odd widths cannot be packed two pixels per byte
//! let result = Dimensions::new(801, 600);
//! assert!(result.is_err());
//! ```

use core::fmt::Debug;

use crate::power::RailState;

/// Maximum panel width in pixels
pub const MAX_WIDTH: u16 = 2048;

/// Maximum panel height in pixels
pub const MAX_HEIGHT: u16 = 2048;

/// Maximum VCOM magnitude in millivolts (9-bit register in 10 mV steps)
pub const MAX_VCOM_MV: u16 = 5110;

/// Which bounded polling loop gave up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollStage {
    /// Waiting for the regulator's power-good input after wakeup
    PowerGood,
    /// Waiting for every rail to report good in the power-good register
    RailsGood,
    /// Waiting for the kickback acquisition to complete
    VcomAcquisition,
    /// Waiting for a thermistor conversion
    Thermistor,
    /// Waiting for the regulator to report idle during shutdown
    Shutdown,
}

impl core::fmt::Display for PollStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PowerGood => write!(f, "power good"),
            Self::RailsGood => write!(f, "rails good"),
            Self::VcomAcquisition => write!(f, "VCOM acquisition"),
            Self::Thermistor => write!(f, "thermistor conversion"),
            Self::Shutdown => write!(f, "regulator shutdown"),
        }
    }
}

/// Errors reported by a [`PowerSequencer`](crate::power::PowerSequencer)
///
/// Generic over the board's bus error type so callers can match on the
/// underlying hardware failure.
#[derive(Debug)]
pub enum Error<E> {
    /// A bus transaction failed
    ///
    /// Wraps the error from the board's control or pixel bus. Never retried
    /// by the sequencer.
    Bus(E),
    /// A bounded poll loop exhausted its retry budget
    ///
    /// The power transition was abandoned and the sequencer is in
    /// [`RailState::Error`].
    PowerSequenceTimeout {
        /// The loop that gave up
        stage: PollStage,
        /// Last value read from the status register being polled
        status: u8,
    },
    /// The operation is not legal in the current rail state
    InvalidState {
        /// State the operation requires
        expected: RailState,
        /// State the sequencer was in
        actual: RailState,
    },
    /// The board revision has no hardware for this operation
    Unsupported,
    /// Requested VCOM is outside the programmable range
    InvalidVcom {
        /// Requested magnitude in millivolts
        mv: u16,
    },
}

impl<E: Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "Bus error: {e:?}"),
            Self::PowerSequenceTimeout { stage, status } => {
                write!(f, "Timed out waiting for {stage} (status 0x{status:02X})")
            }
            Self::InvalidState { expected, actual } => {
                write!(f, "Invalid rail state: expected {expected:?}, was {actual:?}")
            }
            Self::Unsupported => write!(f, "Operation not supported by this board"),
            Self::InvalidVcom { mv } => {
                write!(f, "Invalid VCOM: {mv} mV (max {MAX_VCOM_MV} mV)")
            }
        }
    }
}

impl<E: Debug> core::error::Error for Error<E> {}

/// Errors from the pure diff and line-mask helpers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffError {
    /// A buffer is shorter than the requested run needs
    BufferTooSmall {
        /// Required length in bytes
        required: usize,
        /// Provided length in bytes
        provided: usize,
    },
    /// Crop rectangle does not lie inside the image
    InvalidCrop,
}

impl core::fmt::Display for DiffError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BufferTooSmall { required, provided } => {
                write!(
                    f,
                    "Buffer too small: required {required} bytes, provided {provided}"
                )
            }
            Self::InvalidCrop => write!(f, "Crop area outside of image"),
        }
    }
}

impl core::error::Error for DiffError {}

/// Why a full-frame update could not be completed
///
/// Non-fatal: the display is left powered off and the caller may retry the
/// whole frame or fall back to a full redraw.
#[derive(Debug)]
pub enum DrawError<E> {
    /// The power sequencer or a bus transaction failed
    Power(Error<E>),
    /// Rails did not reach `Ready` before the caller's timeout
    PowerNotReady,
    /// No line record arrived within the per-line timeout
    QueueUnderrun {
        /// Row the scheduler was waiting for
        row: u16,
    },
    /// A record arrived for a different row than the one being driven
    RowMismatch {
        /// Row the scheduler was driving
        expected: u16,
        /// Row carried by the record
        actual: u16,
    },
    /// The caller cancelled the update between lines
    Aborted {
        /// Rows driven before the cancellation was observed
        rows_driven: u32,
    },
    /// The waveform has no data for the requested mode
    ModeNotFound,
    /// The waveform has no temperature ranges or no phases for the mode
    NoPhasesAvailable,
    /// Crop rectangle does not lie inside the image
    InvalidCrop,
    /// A buffer is shorter than the panel needs
    BufferTooSmall {
        /// Required length in bytes
        required: usize,
        /// Provided length in bytes
        provided: usize,
    },
}

impl<E> From<Error<E>> for DrawError<E> {
    fn from(error: Error<E>) -> Self {
        Self::Power(error)
    }
}

impl<E> From<DiffError> for DrawError<E> {
    fn from(error: DiffError) -> Self {
        match error {
            DiffError::BufferTooSmall { required, provided } => {
                Self::BufferTooSmall { required, provided }
            }
            DiffError::InvalidCrop => Self::InvalidCrop,
        }
    }
}

impl<E: Debug> core::fmt::Display for DrawError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Power(e) => write!(f, "Power error: {e}"),
            Self::PowerNotReady => write!(f, "Power rails not ready before timeout"),
            Self::QueueUnderrun { row } => write!(f, "Line queue underrun at row {row}"),
            Self::RowMismatch { expected, actual } => {
                write!(f, "Line record for row {actual} while driving row {expected}")
            }
            Self::Aborted { rows_driven } => {
                write!(f, "Update aborted after {rows_driven} rows")
            }
            Self::ModeNotFound => write!(f, "Waveform mode not found"),
            Self::NoPhasesAvailable => write!(f, "No waveform phases available"),
            Self::InvalidCrop => write!(f, "Invalid crop area"),
            Self::BufferTooSmall { required, provided } => {
                write!(
                    f,
                    "Buffer too small: required {required} bytes, provided {provided}"
                )
            }
        }
    }
}

impl<E: Debug> core::error::Error for DrawError<E> {}

/// Why no drive lookup could be built for a draw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupError {
    /// The waveform has no data for the requested mode
    ModeNotFound,
    /// The waveform has no temperature ranges or no phases for the mode
    NoPhasesAvailable,
}

impl core::fmt::Display for LookupError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ModeNotFound => write!(f, "Waveform mode not found"),
            Self::NoPhasesAvailable => write!(f, "No waveform phases available"),
        }
    }
}

impl core::error::Error for LookupError {}

impl<E> From<LookupError> for DrawError<E> {
    fn from(error: LookupError) -> Self {
        match error {
            LookupError::ModeNotFound => Self::ModeNotFound,
            LookupError::NoPhasesAvailable => Self::NoPhasesAvailable,
        }
    }
}

/// Backpressure signals from the line queue
///
/// These are not failures: the caller decides whether to spin, skip or drop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Every free slot is taken; the consumer has not drained enough
    Full,
    /// No committed slot is waiting
    Empty,
    /// `commit_write` was called without a preceding `acquire_write_slot`
    NothingAcquired,
}

impl core::fmt::Display for QueueError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => write!(f, "Line queue full"),
            Self::Empty => write!(f, "Line queue empty"),
            Self::NothingAcquired => write!(f, "No write slot acquired"),
        }
    }
}

impl core::error::Error for QueueError {}

/// Errors that can occur when building configuration
///
/// These errors occur during the builder pattern before any hardware is touched.
#[derive(Debug)]
pub enum BuilderError {
    /// Dimensions were not specified
    ///
    /// [`Builder::dimensions()`](crate::config::Builder::dimensions) must be called before building.
    MissingDimensions,
    /// Invalid dimensions provided
    ///
    /// See [`Dimensions::new()`](crate::config::Dimensions::new) for constraints.
    InvalidDimensions {
        /// Width in pixels requested
        width: u16,
        /// Height in pixels requested
        height: u16,
    },
    /// VCOM magnitude outside the programmable range
    InvalidVcom {
        /// Requested magnitude in millivolts
        mv: u16,
    },
    /// A poll retry budget of zero would never observe the hardware
    InvalidRetries,
}

impl core::fmt::Display for BuilderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingDimensions => write!(f, "Dimensions must be specified"),
            Self::InvalidDimensions { width, height } => write!(
                f,
                "Invalid dimensions {width}x{height} (max {MAX_WIDTH}x{MAX_HEIGHT}, width must be even)"
            ),
            Self::InvalidVcom { mv } => {
                write!(f, "Invalid VCOM {mv} mV (max {MAX_VCOM_MV} mV)")
            }
            Self::InvalidRetries => write!(f, "Poll retry budgets must be non-zero"),
        }
    }
}

impl core::error::Error for BuilderError {}
