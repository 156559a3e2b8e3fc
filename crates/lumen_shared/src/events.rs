//! Renderer events.
//!
//! An event reports exactly one asynchronous outcome of a dispatched command,
//! or an unsolicited notification from a display. Events are split into two
//! streams: renderer events (displays, buffers, read-back, timings) and scene
//! control events (scene states, flushes, data links).

use crate::ids::{
    DataConsumerId, DataProviderId, DisplayHandle, ExternalBufferHandle, OffscreenBufferHandle,
    SceneId, StreamBufferHandle,
};
use crate::scene::{RendererSceneState, StreamSource};
use std::fmt;
use std::time::Duration;

/// Event type discriminator
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RendererEventType {
    /// Display created
    DisplayCreated,
    /// Display could not be created
    DisplayCreateFailed,
    /// Display destroyed; its handle may be reused
    DisplayDestroyed,
    /// Display could not be destroyed
    DisplayDestroyFailed,
    /// Offscreen buffer created
    OffscreenBufferCreated,
    /// Offscreen buffer could not be created
    OffscreenBufferCreateFailed,
    /// Offscreen buffer destroyed
    OffscreenBufferDestroyed,
    /// Offscreen buffer could not be destroyed
    OffscreenBufferDestroyFailed,
    /// Stream buffer created
    StreamBufferCreated,
    /// Stream buffer could not be created
    StreamBufferCreateFailed,
    /// Stream buffer destroyed
    StreamBufferDestroyed,
    /// Stream buffer could not be destroyed
    StreamBufferDestroyFailed,
    /// External buffer created
    ExternalBufferCreated,
    /// External buffer could not be created
    ExternalBufferCreateFailed,
    /// External buffer destroyed
    ExternalBufferDestroyed,
    /// External buffer could not be destroyed
    ExternalBufferDestroyFailed,
    /// Pixels read back
    ReadPixelsFromFramebuffer,
    /// Pixel read-back failed
    ReadPixelsFromFramebufferFailed,
    /// Window size changed
    WindowResized,
    /// Periodic frame timing report
    FrameTimingReport,
    /// Embedded-compositor surface started streaming
    StreamSurfaceAvailable,
    /// Embedded-compositor surface stopped streaming
    StreamSurfaceUnavailable,
    /// Scene was published (echo of a broadcast)
    ScenePublished,
    /// Scene was unpublished (echo of a broadcast)
    SceneUnpublished,
    /// Scene reached a new state on a display
    SceneStateChanged,
    /// Scene flush was applied
    SceneFlushed,
    /// Data provider declared
    SceneDataProviderCreated,
    /// Data consumer declared
    SceneDataConsumerCreated,
    /// Data link established
    SceneDataLinked,
    /// Data link failed
    SceneDataLinkFailed,
    /// Buffer link established
    SceneDataBufferLinked,
    /// Buffer link failed
    SceneDataBufferLinkFailed,
    /// Consumer unlinked
    SceneDataUnlinked,
    /// Unlink failed
    SceneDataUnlinkFailed,
}

impl RendererEventType {
    /// Whether this type travels on the scene control stream.
    #[must_use]
    pub const fn is_scene_control_event(self) -> bool {
        matches!(
            self,
            Self::ScenePublished
                | Self::SceneUnpublished
                | Self::SceneStateChanged
                | Self::SceneFlushed
                | Self::SceneDataProviderCreated
                | Self::SceneDataConsumerCreated
                | Self::SceneDataLinked
                | Self::SceneDataLinkFailed
                | Self::SceneDataBufferLinked
                | Self::SceneDataBufferLinkFailed
                | Self::SceneDataUnlinked
                | Self::SceneDataUnlinkFailed
        )
    }
}

impl fmt::Display for RendererEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Loop timings of one display over a reporting period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTimings {
    /// Longest loop iteration
    pub max_loop_time: Duration,
    /// Average loop iteration
    pub avg_loop_time: Duration,
    /// Loop iterations in the period
    pub loop_count: u32,
}

/// One renderer outcome.
///
/// Only the fields relevant to `event_type` are set.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererEvent {
    /// Discriminator
    pub event_type: RendererEventType,
    /// Display the event concerns
    pub display_handle: Option<DisplayHandle>,
    /// Scene the event concerns
    pub scene_id: Option<SceneId>,
    /// New scene state
    pub state: Option<RendererSceneState>,
    /// Offscreen buffer concerned
    pub offscreen_buffer: Option<OffscreenBufferHandle>,
    /// Stream buffer concerned
    pub stream_buffer: Option<StreamBufferHandle>,
    /// External buffer concerned
    pub external_buffer: Option<ExternalBufferHandle>,
    /// Stream source concerned
    pub stream_source: Option<StreamSource>,
    /// Provider scene of a data link
    pub provider_scene_id: Option<SceneId>,
    /// Provider slot of a data link
    pub provider_id: Option<DataProviderId>,
    /// Consumer scene of a data link
    pub consumer_scene_id: Option<SceneId>,
    /// Consumer slot of a data link
    pub consumer_id: Option<DataConsumerId>,
    /// Flush index of an applied flush
    pub flush_index: Option<u64>,
    /// Window size for resize events
    pub window_size: Option<(u32, u32)>,
    /// RGBA8 pixels of a read-back
    pub pixel_data: Vec<u8>,
    /// Timings of a frame timing report
    pub frame_timings: Option<FrameTimings>,
}

macro_rules! with_field {
    ($(#[$doc:meta])* $fn_name:ident, $field:ident: $ty:ty) => {
        $(#[$doc])*
        #[must_use]
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

impl RendererEvent {
    /// Event of the given type with no fields set.
    #[must_use]
    pub const fn new(event_type: RendererEventType) -> Self {
        Self {
            event_type,
            display_handle: None,
            scene_id: None,
            state: None,
            offscreen_buffer: None,
            stream_buffer: None,
            external_buffer: None,
            stream_source: None,
            provider_scene_id: None,
            provider_id: None,
            consumer_scene_id: None,
            consumer_id: None,
            flush_index: None,
            window_size: None,
            pixel_data: Vec::new(),
            frame_timings: None,
        }
    }

    with_field!(
        /// Sets the display.
        with_display, display_handle: DisplayHandle
    );
    with_field!(
        /// Sets the scene.
        with_scene, scene_id: SceneId
    );
    with_field!(
        /// Sets the scene state.
        with_state, state: RendererSceneState
    );
    with_field!(
        /// Sets the offscreen buffer.
        with_offscreen_buffer, offscreen_buffer: OffscreenBufferHandle
    );
    with_field!(
        /// Sets the stream buffer.
        with_stream_buffer, stream_buffer: StreamBufferHandle
    );
    with_field!(
        /// Sets the external buffer.
        with_external_buffer, external_buffer: ExternalBufferHandle
    );
    with_field!(
        /// Sets the stream source.
        with_stream_source, stream_source: StreamSource
    );
    with_field!(
        /// Sets the flush index.
        with_flush_index, flush_index: u64
    );
    with_field!(
        /// Sets the window size.
        with_window_size, window_size: (u32, u32)
    );
    with_field!(
        /// Sets the frame timings.
        with_frame_timings, frame_timings: FrameTimings
    );

    /// Sets provider scene and slot.
    #[must_use]
    pub fn with_provider(mut self, scene: SceneId, provider: DataProviderId) -> Self {
        self.provider_scene_id = Some(scene);
        self.provider_id = Some(provider);
        self
    }

    /// Sets consumer scene and slot.
    #[must_use]
    pub fn with_consumer(mut self, scene: SceneId, consumer: DataConsumerId) -> Self {
        self.consumer_scene_id = Some(scene);
        self.consumer_id = Some(consumer);
        self
    }

    /// Sets the read-back pixels.
    #[must_use]
    pub fn with_pixel_data(mut self, pixels: Vec<u8>) -> Self {
        self.pixel_data = pixels;
        self
    }

    /// Scene state change notification.
    #[must_use]
    pub fn scene_state_changed(scene: SceneId, state: RendererSceneState) -> Self {
        Self::new(RendererEventType::SceneStateChanged)
            .with_scene(scene)
            .with_state(state)
    }
}
