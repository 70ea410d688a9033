//! Panel configuration types and builder

pub use crate::error::{BuilderError, MAX_HEIGHT, MAX_VCOM_MV, MAX_WIDTH};

/// Default VCOM magnitude in millivolts
pub const DEFAULT_VCOM_MV: u16 = 1600;

/// Default retry budget for the power rail polls
pub const DEFAULT_POWER_GOOD_RETRIES: u32 = 500;

/// Default retry budget for the thermistor conversion poll
pub const DEFAULT_THERMISTOR_RETRIES: u32 = 100;

/// Default frame time in tenths of a microsecond
pub const DEFAULT_FRAME_TIME: u16 = 120;

/// Default frames per monochrome update, as many as a built-in grey waveform
pub const DEFAULT_MONOCHROME_FRAMES: u8 = 15;

/// Panel dimensions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dimensions {
    /// Width in pixels (source driver outputs)
    pub width: u16,
    /// Height in pixels (gate driver outputs)
    pub height: u16,
}

impl Dimensions {
    /// Create new dimensions with validation
    ///
    /// # Errors
    ///
    /// Returns `BuilderError::InvalidDimensions` if:
    /// - width or height is zero
    /// - width > MAX_WIDTH or height > MAX_HEIGHT
    /// - width is odd (framebuffers pack two pixels per byte)
    pub fn new(width: u16, height: u16) -> Result<Self, BuilderError> {
        if width == 0 || width > MAX_WIDTH || width % 2 != 0 {
            return Err(BuilderError::InvalidDimensions { width, height });
        }
        if height == 0 || height > MAX_HEIGHT {
            return Err(BuilderError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }

    /// Size in bytes of a 4 bpp framebuffer for these dimensions
    pub fn buffer_size(&self) -> usize {
        self.width as usize / 2 * self.height as usize
    }

    /// Bytes of drive codes per row (four pixels per byte)
    pub fn drive_line_bytes(&self) -> usize {
        (self.width as usize).div_ceil(4)
    }

    /// Number of pixels
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Display rotation relative to native orientation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    /// No rotation (landscape)
    #[default]
    Rotate0,
    /// Rotate 90 degrees clockwise (portrait)
    Rotate90,
    /// Rotate 180 degrees (inverted landscape)
    Rotate180,
    /// Rotate 270 degrees clockwise (inverted portrait)
    Rotate270,
}

/// Pipeline configuration
///
/// Holds the runtime parameters the sequencer and scheduler need.
/// Use `Builder` to create a Config.
#[derive(Clone, Debug)]
pub struct Config {
    /// Panel dimensions
    pub dimensions: Dimensions,
    /// Logical rotation used for drawing
    pub rotation: Rotation,
    /// VCOM magnitude in millivolts, calibrated per panel
    pub vcom_mv: u16,
    /// Maximum polls of the power-good status before giving up
    pub power_good_retries: u32,
    /// Maximum polls of the thermistor conversion bit
    pub thermistor_retries: u32,
    /// Interval between polls in microseconds
    pub poll_interval_us: u32,
    /// Temperature reported when no sensor answers
    pub fallback_temperature: i8,
    /// How long the scheduler waits for `Ready` before failing a frame
    pub power_ready_timeout_ms: u32,
    /// How long the scheduler waits for each line record
    pub line_timeout_us: u32,
    /// Frames driven for monochrome updates
    ///
    /// Each frame is a full sweep with the monochrome lookup, so more frames
    /// push pixels further toward black or white.
    pub monochrome_frames: u8,
    /// Row hold time in tenths of a microsecond when the waveform has none
    pub frame_time: u16,
}

impl Config {
    /// Get the rotated dimensions based on rotation setting
    pub fn rotated_dimensions(&self) -> Dimensions {
        match self.rotation {
            Rotation::Rotate0 | Rotation::Rotate180 => self.dimensions,
            Rotation::Rotate90 | Rotation::Rotate270 => Dimensions {
                width: self.dimensions.height,
                height: self.dimensions.width,
            },
        }
    }
}

/// Builder for constructing pipeline configuration
///
/// # Example
///
/// ```rust,no_run
/// use epdrive::{Builder, Dimensions, Rotation};
///
/// let dims = match Dimensions::new(960, 540) {
///     Ok(dims) => dims,
///     Err(_) => return,
/// };
/// let config = match Builder::new()
///     .dimensions(dims)
///     .rotation(Rotation::Rotate0)
///     .vcom_mv(1560)
///     .build()
/// {
///     Ok(config) => config,
///     Err(_) => return,
/// };
/// let _ = config;
/// ```
#[must_use]
pub struct Builder {
    /// Panel dimensions (required)
    dimensions: Option<Dimensions>,
    /// Logical rotation
    rotation: Rotation,
    /// VCOM magnitude in millivolts
    vcom_mv: u16,
    /// Power-good retry budget
    power_good_retries: u32,
    /// Thermistor retry budget
    thermistor_retries: u32,
    /// Poll interval in microseconds
    poll_interval_us: u32,
    /// Fallback temperature in Celsius
    fallback_temperature: i8,
    /// Wait-for-ready timeout in milliseconds
    power_ready_timeout_ms: u32,
    /// Per-line wait in microseconds
    line_timeout_us: u32,
    /// Monochrome frame count
    monochrome_frames: u8,
    /// Default row hold time
    frame_time: u16,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            dimensions: None,
            rotation: Rotation::Rotate0,
            vcom_mv: DEFAULT_VCOM_MV,
            power_good_retries: DEFAULT_POWER_GOOD_RETRIES,
            thermistor_retries: DEFAULT_THERMISTOR_RETRIES,
            // One scheduler tick
            poll_interval_us: 1_000,
            fallback_temperature: 25,
            power_ready_timeout_ms: 1_000,
            line_timeout_us: 100_000,
            monochrome_frames: DEFAULT_MONOCHROME_FRAMES,
            frame_time: DEFAULT_FRAME_TIME,
        }
    }
}

impl Builder {
    /// Create a new Builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set panel dimensions (required)
    pub fn dimensions(mut self, dims: Dimensions) -> Self {
        self.dimensions = Some(dims);
        self
    }

    /// Set logical rotation
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set VCOM magnitude in millivolts
    pub fn vcom_mv(mut self, mv: u16) -> Self {
        self.vcom_mv = mv;
        self
    }

    /// Set the retry budget of both power rail polls
    pub fn power_good_retries(mut self, retries: u32) -> Self {
        self.power_good_retries = retries;
        self
    }

    /// Set the retry budget of the thermistor poll
    pub fn thermistor_retries(mut self, retries: u32) -> Self {
        self.thermistor_retries = retries;
        self
    }

    /// Set the interval between polls in microseconds
    pub fn poll_interval_us(mut self, us: u32) -> Self {
        self.poll_interval_us = us;
        self
    }

    /// Set the temperature reported when no sensor answers
    pub fn fallback_temperature(mut self, celsius: i8) -> Self {
        self.fallback_temperature = celsius;
        self
    }

    /// Set how long the scheduler waits for the rails to become ready
    pub fn power_ready_timeout_ms(mut self, ms: u32) -> Self {
        self.power_ready_timeout_ms = ms;
        self
    }

    /// Set how long the scheduler waits for each line record
    pub fn line_timeout_us(mut self, us: u32) -> Self {
        self.line_timeout_us = us;
        self
    }

    /// Set the number of frames driven for monochrome updates
    pub fn monochrome_frames(mut self, frames: u8) -> Self {
        self.monochrome_frames = frames;
        self
    }

    /// Set the row hold time used when the waveform carries none
    pub fn frame_time(mut self, tenths_us: u16) -> Self {
        self.frame_time = tenths_us;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `BuilderError::MissingDimensions` if dimensions were not set,
    /// `BuilderError::InvalidVcom` if VCOM exceeds [`MAX_VCOM_MV`], and
    /// `BuilderError::InvalidRetries` if a retry budget is zero.
    pub fn build(self) -> Result<Config, BuilderError> {
        if self.vcom_mv > MAX_VCOM_MV {
            return Err(BuilderError::InvalidVcom { mv: self.vcom_mv });
        }
        if self.power_good_retries == 0 || self.thermistor_retries == 0 {
            return Err(BuilderError::InvalidRetries);
        }
        Ok(Config {
            dimensions: self.dimensions.ok_or(BuilderError::MissingDimensions)?,
            rotation: self.rotation,
            vcom_mv: self.vcom_mv,
            power_good_retries: self.power_good_retries,
            thermistor_retries: self.thermistor_retries,
            poll_interval_us: self.poll_interval_us,
            fallback_temperature: self.fallback_temperature,
            power_ready_timeout_ms: self.power_ready_timeout_ms,
            line_timeout_us: self.line_timeout_us,
            monochrome_frames: self.monochrome_frames.max(1),
            frame_time: self.frame_time,
        })
    }
}
