//! Coordinate rotation utilities
//!
//! Drawing happens in logical coordinates; the framebuffer and the diff
//! always work in the panel's native (landscape) orientation. These helpers
//! map logical pixels and areas onto the native grid.
//!
//! ## Rotation Modes
//!
//! - **Rotate0**: Native orientation
//! - **Rotate90**: 90° clockwise, width and height swapped
//! - **Rotate180**: 180° rotation, origin at bottom-right
//! - **Rotate270**: 270° clockwise (or 90° counter-clockwise)
//!
//! ## Example
//!
//! ```
//! use epdrive::{rotation::apply_rotation, Rotation};
//!
//! // 16x8 panel: logical origin in portrait lands on the right edge
//! assert_eq!(apply_rotation(0, 0, 16, 8, Rotation::Rotate90), (15, 0));
//! assert_eq!(apply_rotation(3, 2, 16, 8, Rotation::Rotate180), (12, 5));
//! ```

use crate::config::Rotation;
use crate::diff::Rect;

/// Map a logical pixel to native panel coordinates
///
/// # Arguments
///
/// * `x`, `y` - Logical coordinates
/// * `width`, `height` - Native panel size in pixels
/// * `rotation` - Logical rotation
///
/// Coordinates outside the rotated panel wrap; callers bounds-check first.
pub fn apply_rotation(x: u32, y: u32, width: u32, height: u32, rotation: Rotation) -> (u32, u32) {
    match rotation {
        Rotation::Rotate0 => (x, y),
        Rotation::Rotate90 => (width.wrapping_sub(y + 1), x),
        Rotation::Rotate180 => (width.wrapping_sub(x + 1), height.wrapping_sub(y + 1)),
        Rotation::Rotate270 => (y, height.wrapping_sub(x + 1)),
    }
}

/// Map a logical area to the native area covering the same pixels
///
/// `width` and `height` are the native panel size. The area is first
/// clipped to the rotated panel, so the result always lies on the panel;
/// an area starting past the edge comes back empty.
pub fn inverse_rotate_area(area: Rect, width: u16, height: u16, rotation: Rotation) -> Rect {
    let (logical_w, logical_h) = match rotation {
        Rotation::Rotate0 | Rotation::Rotate180 => (width, height),
        Rotation::Rotate90 | Rotation::Rotate270 => (height, width),
    };
    let x = area.x.min(logical_w);
    let y = area.y.min(logical_h);
    // right() and bottom() are u32, so the sums cannot overflow
    let w = (area.right().min(u32::from(logical_w)) as u16).saturating_sub(x);
    let h = (area.bottom().min(u32::from(logical_h)) as u16).saturating_sub(y);

    match rotation {
        Rotation::Rotate0 => Rect::new(x, y, w, h),
        Rotation::Rotate90 => Rect::new(width - (y + h), x, h, w),
        Rotation::Rotate180 => Rect::new(width - (x + w), height - (y + h), w, h),
        Rotation::Rotate270 => Rect::new(y, height - (x + w), h, w),
    }
}
