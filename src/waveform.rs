//! Waveform selection and per-pass drive lookups
//!
//! A waveform says, for every temperature range and update mode, how many
//! phases (full-panel sweeps) an update takes and which drive code each
//! (old level, new level) pair gets in each phase. The tables themselves
//! are supplied by the caller; this module only selects and expands them.
//!
//! Phase data is 64 bytes: 16 target levels by 16 source levels, two bits
//! per source level with the first source in the top bits of each byte.
//!
//! ## Example
//!
//! ```
//! use epdrive::waveform::{DriveCode, DrawPlan, TempRange, Waveform, WaveformMode, WaveformModeData, WaveformPhases};
//!
//! // one phase that darkens everything
//! static LUT: [u8; 64] = [0x55; 64];
//! static PHASES: [WaveformPhases<'static>; 1] = [WaveformPhases::new(1, &LUT, None)];
//! static MODES: [WaveformModeData<'static>; 1] = [WaveformModeData::new(WaveformMode::Du, &PHASES)];
//! static RANGES: [TempRange; 1] = [TempRange::new(0, 50)];
//! static WAVEFORM: Waveform<'static> = Waveform::new(&MODES, &RANGES);
//!
//! let plan = DrawPlan::new(Some(&WAVEFORM), WaveformMode::Du, 22, 1, 120).unwrap();
//! assert_eq!(plan.passes(), 1);
//! let lut = plan.pass_lut(0).unwrap();
//! assert_eq!(lut.code(0x0F), DriveCode::Darken as u8);
//! ```

use crate::error::{DiffError, LookupError};

/// Update procedure of a draw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveformMode {
    /// Initialisation waveform
    Init,
    /// Direct update: any level to black or white
    Du,
    /// Flashing update between any grey levels
    Gc16,
    /// Faster variant of `Gc16`
    Gc16Fast,
    /// Fast monochrome animation
    A2,
    /// Non-flashing update between any grey levels
    Gl16,
    /// Faster variant of `Gl16`
    Gl16Fast,
    /// Four level variant of `Du`
    Du4,
    /// Arbitrary transitions between four levels
    Gl4,
    /// Inverted `Gl16`
    Gl16Inv,
    /// White screen to any grey level
    WhiteToGl16,
    /// Black screen to any grey level
    BlackToGl16,
    /// Black and white only, driven from a fixed table
    Monochrome,
}

impl WaveformMode {
    /// Mode identifier used in waveform tables
    pub const fn code(self) -> u8 {
        match self {
            Self::Init => 0x00,
            Self::Du => 0x01,
            Self::Gc16 => 0x02,
            Self::Gc16Fast => 0x03,
            Self::A2 => 0x04,
            Self::Gl16 => 0x05,
            Self::Gl16Fast => 0x06,
            Self::Du4 => 0x07,
            Self::Gl4 => 0x0A,
            Self::Gl16Inv => 0x0B,
            Self::WhiteToGl16 => 0x10,
            Self::BlackToGl16 => 0x11,
            Self::Monochrome => 0x20,
        }
    }
}

/// Two-bit drive code of one pixel in one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DriveCode {
    /// Leave the pixel alone
    None = 0,
    /// Push toward black
    Darken = 1,
    /// Push toward white
    Lighten = 2,
}

impl DriveCode {
    /// A drive byte with this code in all four pixel slots
    pub const fn fill_byte(self) -> u8 {
        (self as u8) * 0x55
    }
}

/// Phase data of one mode at one temperature range
#[derive(Clone, Copy, Debug)]
pub struct WaveformPhases<'a> {
    /// Number of phases
    pub phases: usize,
    /// `phases * 64` bytes of drive codes
    pub luts: &'a [u8],
    /// Hold time of each phase in tenths of a microsecond, if known
    pub phase_times: Option<&'a [u16]>,
}

impl<'a> WaveformPhases<'a> {
    /// Describe a phase table
    pub const fn new(phases: usize, luts: &'a [u8], phase_times: Option<&'a [u16]>) -> Self {
        Self {
            phases,
            luts,
            phase_times,
        }
    }
}

/// All temperature ranges of one mode
#[derive(Clone, Copy, Debug)]
pub struct WaveformModeData<'a> {
    /// Mode the data belongs to
    pub mode: WaveformMode,
    /// One entry per temperature range of the waveform
    pub ranges: &'a [WaveformPhases<'a>],
}

impl<'a> WaveformModeData<'a> {
    /// Describe a mode
    pub const fn new(mode: WaveformMode, ranges: &'a [WaveformPhases<'a>]) -> Self {
        Self { mode, ranges }
    }
}

/// Temperature interval `min <= t < max` in degrees Celsius
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TempRange {
    /// Lower bound, inclusive
    pub min: i16,
    /// Upper bound, exclusive
    pub max: i16,
}

impl TempRange {
    /// Describe an interval
    pub const fn new(min: i16, max: i16) -> Self {
        Self { min, max }
    }
}

/// Read-only waveform table
#[derive(Clone, Copy, Debug)]
pub struct Waveform<'a> {
    /// Modes the table covers
    pub modes: &'a [WaveformModeData<'a>],
    /// Temperature ranges, ascending
    pub temp_ranges: &'a [TempRange],
}

impl<'a> Waveform<'a> {
    /// Describe a waveform
    pub const fn new(modes: &'a [WaveformModeData<'a>], temp_ranges: &'a [TempRange]) -> Self {
        Self { modes, temp_ranges }
    }

    /// Index of the range holding `temperature`
    ///
    /// Temperatures outside every range use the nearest one. `None` when
    /// the waveform has no ranges.
    pub fn temp_range_index(&self, temperature: i16) -> Option<usize> {
        let last = self.temp_ranges.len().checked_sub(1)?;
        let index = self
            .temp_ranges
            .iter()
            .position(|range| temperature < range.max)
            .unwrap_or(last);
        Some(index)
    }

    /// Phase data for `mode` at `temperature`
    pub fn phases(
        &self,
        mode: WaveformMode,
        temperature: i16,
    ) -> Result<&'a WaveformPhases<'a>, LookupError> {
        let range = self
            .temp_range_index(temperature)
            .ok_or(LookupError::NoPhasesAvailable)?;
        let data = self
            .modes
            .iter()
            .find(|data| data.mode == mode)
            .ok_or(LookupError::ModeNotFound)?;
        data.ranges
            .get(range)
            .filter(|phases| phases.phases > 0)
            .ok_or(LookupError::NoPhasesAvailable)
    }
}

/// Drive codes of one pass for every interlaced pixel value
///
/// Indexed by `(new << 4) | old`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassLut([u8; 256]);

impl PassLut {
    /// Expand phase `phase` of a waveform table
    pub fn from_phase(phases: &WaveformPhases<'_>, phase: usize) -> Result<Self, LookupError> {
        let start = phase * 64;
        let table = phases
            .luts
            .get(start..start + 64)
            .filter(|_| phase < phases.phases)
            .ok_or(LookupError::NoPhasesAvailable)?;
        let mut lut = [0u8; 256];
        for (index, code) in lut.iter_mut().enumerate() {
            let (to, from) = (index >> 4, index & 0x0F);
            *code = (table[to * 4 + from / 4] >> (6 - 2 * (from % 4))) & 0b11;
        }
        Ok(Self(lut))
    }

    /// Fixed black and white table
    ///
    /// Levels below 8 count as black. Pixels already on the right side are
    /// left alone.
    pub fn monochrome() -> Self {
        let mut lut = [0u8; 256];
        for (index, code) in lut.iter_mut().enumerate() {
            let to_black = index >> 4 < 8;
            let from_black = index & 0x0F < 8;
            *code = match (from_black, to_black) {
                (false, true) => DriveCode::Darken as u8,
                (true, false) => DriveCode::Lighten as u8,
                _ => DriveCode::None as u8,
            };
        }
        Self(lut)
    }

    /// Drive code of one interlaced pixel
    pub fn code(&self, interlaced: u8) -> u8 {
        self.0[usize::from(interlaced)]
    }

    /// Turn interlaced pixels into a packed drive line
    ///
    /// Four pixels per output byte, pixel 0 in the low bits.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::BufferTooSmall`] when `out` cannot hold the line.
    pub fn lookup_line(&self, interlaced: &[u8], out: &mut [u8]) -> Result<(), DiffError> {
        let required = interlaced.len().div_ceil(4);
        if out.len() < required {
            return Err(DiffError::BufferTooSmall {
                required,
                provided: out.len(),
            });
        }
        for (byte, pixels) in out.iter_mut().zip(interlaced.chunks(4)) {
            *byte = pixels
                .iter()
                .enumerate()
                .fold(0, |acc, (k, &p)| acc | (self.code(p) << (2 * k)));
        }
        Ok(())
    }
}

enum Source<'a> {
    Phases(&'a WaveformPhases<'a>),
    Monochrome(usize),
}

/// Passes and lookups of one draw
///
/// Each pass is one full top-to-bottom sweep of the panel.
pub struct DrawPlan<'a> {
    source: Source<'a>,
    default_frame_time: u16,
}

impl<'a> DrawPlan<'a> {
    /// Select the tables for `mode` at `temperature`
    ///
    /// [`WaveformMode::Monochrome`] needs no waveform and runs
    /// `monochrome_frames` passes of the fixed table. Every other mode needs
    /// phase data.
    pub fn new(
        waveform: Option<&'a Waveform<'a>>,
        mode: WaveformMode,
        temperature: i16,
        monochrome_frames: u8,
        default_frame_time: u16,
    ) -> Result<Self, LookupError> {
        let source = match (mode, waveform) {
            (WaveformMode::Monochrome, _) => {
                Source::Monochrome(usize::from(monochrome_frames.max(1)))
            }
            (_, Some(waveform)) => Source::Phases(waveform.phases(mode, temperature)?),
            (_, None) => return Err(LookupError::NoPhasesAvailable),
        };
        Ok(Self {
            source,
            default_frame_time,
        })
    }

    /// Number of sweeps
    pub fn passes(&self) -> usize {
        match self.source {
            Source::Phases(phases) => phases.phases,
            Source::Monochrome(frames) => frames,
        }
    }

    /// Lookup of pass `pass`
    pub fn pass_lut(&self, pass: usize) -> Result<PassLut, LookupError> {
        match self.source {
            Source::Phases(phases) => PassLut::from_phase(phases, pass),
            Source::Monochrome(_) => Ok(PassLut::monochrome()),
        }
    }

    /// Row hold time of pass `pass` in tenths of a microsecond
    pub fn frame_time(&self, pass: usize) -> u16 {
        match self.source {
            Source::Phases(phases) => phases
                .phase_times
                .and_then(|times| times.get(pass).copied())
                .unwrap_or(self.default_frame_time),
            Source::Monochrome(_) => self.default_frame_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Phase 0: darken to black, phase 1: lighten to white
    fn two_phase_luts() -> [u8; 128] {
        let mut luts = [0u8; 128];
        // target 0, every source
        luts[..4].fill(0x55);
        // target 15, every source
        luts[64 + 60..64 + 64].fill(0xAA);
        luts
    }

    #[test]
    fn test_temp_range_selection() {
        let ranges = [
            TempRange::new(0, 10),
            TempRange::new(10, 20),
            TempRange::new(20, 30),
        ];
        let waveform = Waveform::new(&[], &ranges);
        assert_eq!(waveform.temp_range_index(-5), Some(0));
        assert_eq!(waveform.temp_range_index(0), Some(0));
        assert_eq!(waveform.temp_range_index(10), Some(1));
        assert_eq!(waveform.temp_range_index(29), Some(2));
        assert_eq!(waveform.temp_range_index(45), Some(2));
        assert_eq!(Waveform::new(&[], &[]).temp_range_index(20), None);
    }

    #[test]
    fn test_phases_lookup_errors() {
        let luts = [0u8; 64];
        let phases = [WaveformPhases::new(1, &luts, None)];
        let empty = [WaveformPhases::new(0, &[], None)];
        let modes = [
            WaveformModeData::new(WaveformMode::Gc16, &phases),
            WaveformModeData::new(WaveformMode::Du, &empty),
        ];
        let ranges = [TempRange::new(0, 50)];
        let waveform = Waveform::new(&modes, &ranges);

        assert!(waveform.phases(WaveformMode::Gc16, 20).is_ok());
        assert_eq!(
            waveform.phases(WaveformMode::A2, 20).err(),
            Some(LookupError::ModeNotFound)
        );
        assert_eq!(
            waveform.phases(WaveformMode::Du, 20).err(),
            Some(LookupError::NoPhasesAvailable)
        );
        assert_eq!(
            Waveform::new(&modes, &[])
                .phases(WaveformMode::Gc16, 20)
                .err(),
            Some(LookupError::NoPhasesAvailable)
        );
    }

    #[test]
    fn test_pass_lut_from_phase() {
        let luts = two_phase_luts();
        let phases = WaveformPhases::new(2, &luts, None);

        let first = PassLut::from_phase(&phases, 0).unwrap();
        assert_eq!(first.code(0x0F), DriveCode::Darken as u8);
        assert_eq!(first.code(0x05), DriveCode::Darken as u8);
        assert_eq!(first.code(0xF0), DriveCode::None as u8);

        let second = PassLut::from_phase(&phases, 1).unwrap();
        assert_eq!(second.code(0xF0), DriveCode::Lighten as u8);
        assert_eq!(second.code(0x0F), DriveCode::None as u8);

        assert_eq!(
            PassLut::from_phase(&phases, 2),
            Err(LookupError::NoPhasesAvailable)
        );
    }

    #[test]
    fn test_pass_lut_source_bit_order() {
        let mut luts = [0u8; 64];
        // target 3: source 4 darken, source 7 lighten
        luts[3 * 4 + 1] = 0b01_00_00_10;
        let lut = PassLut::from_phase(&WaveformPhases::new(1, &luts, None), 0).unwrap();
        assert_eq!(lut.code(0x34), 1);
        assert_eq!(lut.code(0x37), 2);
        assert_eq!(lut.code(0x35), 0);
    }

    #[test]
    fn test_monochrome_lut() {
        let lut = PassLut::monochrome();
        assert_eq!(lut.code(0x0F), DriveCode::Darken as u8);
        assert_eq!(lut.code(0xF0), DriveCode::Lighten as u8);
        assert_eq!(lut.code(0xFF), DriveCode::None as u8);
        assert_eq!(lut.code(0x00), DriveCode::None as u8);
    }

    #[test]
    fn test_lookup_line_packs_four_pixels() {
        let lut = PassLut::monochrome();
        let mut out = [0xFFu8; 2];
        lut.lookup_line(&[0x0F, 0xF0, 0xFF, 0x0F, 0xF0], &mut out)
            .unwrap();
        assert_eq!(out, [0b01_00_10_01, 0b10]);

        let mut short = [0u8; 1];
        assert!(lut.lookup_line(&[0; 5], &mut short).is_err());
    }

    #[test]
    fn test_plan_uses_phase_times() {
        let luts = two_phase_luts();
        let times = [200u16];
        let phases = [WaveformPhases::new(2, &luts, Some(&times[..]))];
        let modes = [WaveformModeData::new(WaveformMode::Gc16, &phases)];
        let ranges = [TempRange::new(0, 50)];
        let waveform = Waveform::new(&modes, &ranges);

        let plan = DrawPlan::new(Some(&waveform), WaveformMode::Gc16, 25, 1, 120).unwrap();
        assert_eq!(plan.passes(), 2);
        assert_eq!(plan.frame_time(0), 200);
        // no time for the second phase
        assert_eq!(plan.frame_time(1), 120);
    }

    #[test]
    fn test_plan_monochrome_without_waveform() {
        let plan = DrawPlan::new(None, WaveformMode::Monochrome, 25, 3, 120).unwrap();
        assert_eq!(plan.passes(), 3);
        assert_eq!(plan.pass_lut(2).unwrap(), PassLut::monochrome());

        assert!(matches!(
            DrawPlan::new(None, WaveformMode::Gc16, 25, 1, 120),
            Err(LookupError::NoPhasesAvailable)
        ));
    }

    #[test]
    fn test_drive_code_fill_byte() {
        assert_eq!(DriveCode::Darken.fill_byte(), 0x55);
        assert_eq!(DriveCode::Lighten.fill_byte(), 0xAA);
        assert_eq!(DriveCode::None.fill_byte(), 0x00);
    }
}
