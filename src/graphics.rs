//! Graphics support via embedded-graphics
//!
//! [`Display`] implements [`DrawTarget`] with [`Gray4`] colors, so every
//! embedded-graphics primitive, font and image can be drawn straight into
//! the front framebuffer. Drawing uses logical (rotated) coordinates; the
//! panel is only touched by the next update.
//!
//! ## Example
//!
//! ```rust,no_run
//! use embedded_graphics::{
//!     pixelcolor::Gray4,
//!     prelude::*,
//!     primitives::{Circle, PrimitiveStyle, Rectangle},
//! };
//! use epdrive::{Display, WaveformMode};
//! # use core::convert::Infallible;
//! # use embedded_hal::delay::DelayNs;
//! # use embedded_hal::i2c::{I2c, Operation};
//! # use epdrive::{BoardV6, Buffers, Builder, Dimensions, I2cRegisters, PixelBus, SequencerConfig};
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
//! # let dims = match Dimensions::new(64, 32) {
//! #     Ok(dims) => dims,
//! #     Err(_) => return,
//! # };
//! # let config = match Builder::new().dimensions(dims).build() {
//! #     Ok(config) => config,
//! #     Err(_) => return,
//! # };
//! # let board = BoardV6::new(I2cRegisters::new(MockI2c), MockPixels, SequencerConfig::from(&config));
//! # let mut front = [0u8; 1024];
//! # let mut back = [0u8; 1024];
//! # let mut interlaced = [0u8; 2048];
//! # let mut dirty_columns = [0u8; 32];
//! # let mut dirty_lines = [false; 32];
//! # let buffers = Buffers {
//! #     front: &mut front,
//! #     back: &mut back,
//! #     interlaced: &mut interlaced,
//! #     dirty_columns: &mut dirty_columns,
//! #     dirty_lines: &mut dirty_lines,
//! # };
//! # let mut display = match Display::<_, 8, 64>::new(board, config, buffers) {
//! #     Ok(display) => display,
//! #     Err(_) => return,
//! # };
//! let _ = display.clear(Gray4::WHITE);
//!
//! let _ = Rectangle::new(Point::new(4, 4), Size::new(20, 10))
//!     .into_styled(PrimitiveStyle::with_fill(Gray4::new(0x8)))
//!     .draw(&mut display);
//!
//! let _ = Circle::new(Point::new(30, 4), 20)
//!     .into_styled(PrimitiveStyle::with_stroke(Gray4::BLACK, 2))
//!     .draw(&mut display);
//!
//! // Only the changed pixels are driven
//! let _ = display.update_screen(WaveformMode::Monochrome, 25, &mut delay);
//! ```

use core::convert::Infallible;
use embedded_graphics_core::{
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Point, Size},
    pixelcolor::{Gray4, GrayColor},
    prelude::Pixel,
};

use crate::display::Display;
use crate::power::PowerSequencer;

impl<P, const N: usize, const W: usize> DrawTarget for Display<'_, P, N, W>
where
    P: PowerSequencer,
{
    type Color = Gray4;
    type Error = Infallible;

    fn draw_iter<Iter>(&mut self, pixels: Iter) -> Result<(), Self::Error>
    where
        Iter: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let sz = self.size();

        for Pixel(Point { x, y }, color) in pixels {
            if x < 0 || y < 0 {
                continue;
            }

            let x = x as u32;
            let y = y as u32;

            if x >= sz.width || y >= sz.height {
                continue;
            }

            self.set_pixel(x, y, color.luma());
        }

        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let level = color.luma() & 0x0F;
        self.framebuffer_mut().fill((level << 4) | level);
        Ok(())
    }
}

impl<P, const N: usize, const W: usize> OriginDimensions for Display<'_, P, N, W>
where
    P: PowerSequencer,
{
    fn size(&self) -> Size {
        let rotated = self.config().rotated_dimensions();
        Size::new(u32::from(rotated.width), u32::from(rotated.height))
    }
}
