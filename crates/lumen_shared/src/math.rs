//! Small plain-old-data types used by display commands.
//!
//! Both are `Pod` so they can be handed to a platform backend as raw bytes.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// RGBA color with components in `0.0..=1.0`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec4 {
    /// Red
    pub x: f32,
    /// Green
    pub y: f32,
    /// Blue
    pub z: f32,
    /// Alpha
    pub w: f32,
}

impl Vec4 {
    /// Creates a new Vec4
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Opaque black, the default display clear color
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Fully transparent, the default offscreen buffer clear color
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Converts to array
    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Quantizes to 8-bit RGBA, clamping out of range components.
    #[must_use]
    pub fn to_rgba8(self) -> [u8; 4] {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let quantize = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [quantize(self.x), quantize(self.y), quantize(self.z), quantize(self.w)]
    }
}

/// Integer rectangle in window coordinates.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Bottom edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Rect {
    /// Creates a new Rect
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Number of pixels covered
    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether this rectangle lies fully inside a `width` x `height` surface.
    #[must_use]
    pub fn fits_within(self, width: u32, height: u32) -> bool {
        let (Ok(x), Ok(y)) = (u32::try_from(self.x), u32::try_from(self.y)) else {
            return false;
        };
        x.checked_add(self.width).is_some_and(|right| right <= width)
            && y.checked_add(self.height).is_some_and(|top| top <= height)
    }
}
