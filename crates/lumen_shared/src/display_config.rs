//! Per-display configuration carried by `CreateDisplay`.

use crate::ids::{WaylandIviLayerId, WaylandIviSurfaceId};
use crate::math::Vec4;
use serde::{Deserialize, Serialize};

/// Window and context configuration of one display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Window title, also used as log prefix
    pub window_title: String,
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
    /// Window x position
    pub window_position_x: i32,
    /// Window y position
    pub window_position_y: i32,
    /// Fullscreen window
    pub fullscreen: bool,
    /// Initial framebuffer clear color
    pub clear_color: Vec4,
    /// IVI surface id when running under a system compositor
    pub wayland_ivi_surface: Option<WaylandIviSurfaceId>,
    /// IVI layer the surface is placed on
    pub wayland_ivi_layer: Option<WaylandIviLayerId>,
    /// Embedded compositor socket name; `None` disables embedded compositing
    pub embedded_compositor_socket: Option<String>,
    /// Display-specific minimum frame duration in microseconds
    pub min_frame_duration_us: Option<u64>,
    /// Upload effects on a background thread
    pub async_effect_upload: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_title: String::from("lumen"),
            width: 1280,
            height: 480,
            window_position_x: 0,
            window_position_y: 0,
            fullscreen: false,
            clear_color: Vec4::BLACK,
            wayland_ivi_surface: None,
            wayland_ivi_layer: None,
            embedded_compositor_socket: None,
            min_frame_duration_us: None,
            async_effect_upload: true,
        }
    }
}

impl DisplayConfig {
    /// Config with the given window size and defaults for everything else.
    #[must_use]
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_size_keeps_defaults() {
        let config = DisplayConfig::with_size(64, 32);
        assert_eq!((config.width, config.height), (64, 32));
        assert_eq!(config.clear_color, Vec4::BLACK);
        assert!(config.wayland_ivi_surface.is_none());
    }
}
