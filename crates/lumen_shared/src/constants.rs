//! # Renderer Timing Constants
//!
//! Defaults shared by the renderer configuration and the scene producers
//! that need to reason about frame cadence.

use std::time::Duration;

// =============================================================================
// FRAME CADENCE
// =============================================================================

/// Default minimum frame duration of a display loop (60 fps).
pub const DEFAULT_MIN_FRAME_DURATION: Duration = Duration::from_micros(16_667);

/// Upper bound for a framerate limit accepted by the renderer.
pub const MAX_FRAMERATE: f32 = 1_000_000.0;

// =============================================================================
// DISPATCH DIAGNOSTICS
// =============================================================================

/// Dispatch cycles without an event drain before the stuck-event warning.
pub const MAX_DISPATCH_LOOPS_WITHOUT_EVENT_DRAIN: u32 = 300;

/// Default heartbeat interval of renderer-owned threads.
pub const DEFAULT_WATCHDOG_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(1000);
