//! Strongly typed identifiers.
//!
//! Every identifier wraps a small integer but is its own type, so a scene id
//! can never be used where a display handle is expected. "Invalid" values
//! are expressed as `Option::None` at use sites instead of sentinels.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! strong_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Wraps a raw value.
            #[must_use]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            #[must_use]
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

strong_id!(
    /// Handle of one display (window + rendering context).
    DisplayHandle(u32)
);
strong_id!(
    /// Identifier of a published scene.
    SceneId(u64)
);
strong_id!(
    /// Handle of an offscreen buffer owned by one display.
    OffscreenBufferHandle(u32)
);
strong_id!(
    /// Handle of a stream buffer owned by one display.
    StreamBufferHandle(u32)
);
strong_id!(
    /// Handle of an externally filled buffer owned by one display.
    ExternalBufferHandle(u32)
);
strong_id!(
    /// Data provider slot inside a scene.
    DataProviderId(u32)
);
strong_id!(
    /// Data consumer slot inside a scene.
    DataConsumerId(u32)
);
strong_id!(
    /// Wayland IVI surface id, used by the system compositor and stream sources.
    WaylandIviSurfaceId(u32)
);
strong_id!(
    /// Wayland IVI layer id.
    WaylandIviLayerId(u32)
);
