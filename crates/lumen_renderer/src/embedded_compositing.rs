//! Stream buffers and the availability of their embedded-compositor sources.

use crate::platform::EmbeddedCompositor;
use lumen_shared::{RendererEvent, RendererEventType, StreamBufferHandle, StreamSource};
use std::collections::{BTreeMap, BTreeSet};

/// Tracks stream buffers of one display and which sources are streaming.
#[derive(Debug, Default)]
pub struct EmbeddedCompositingManager {
    stream_buffers: BTreeMap<StreamBufferHandle, StreamSource>,
    available_sources: BTreeSet<StreamSource>,
}

impl EmbeddedCompositingManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stream buffer. Returns `false` if the handle is taken.
    pub fn create_stream_buffer(&mut self, buffer: StreamBufferHandle, source: StreamSource) -> bool {
        if self.stream_buffers.contains_key(&buffer) {
            return false;
        }
        self.stream_buffers.insert(buffer, source);
        true
    }

    /// Unregisters a stream buffer. Returns `false` for unknown handles.
    pub fn destroy_stream_buffer(&mut self, buffer: StreamBufferHandle) -> bool {
        self.stream_buffers.remove(&buffer).is_some()
    }

    /// Whether a stream buffer exists.
    #[must_use]
    pub fn has_stream_buffer(&self, buffer: StreamBufferHandle) -> bool {
        self.stream_buffers.contains_key(&buffer)
    }

    /// Number of stream buffers.
    #[must_use]
    pub fn stream_buffer_count(&self) -> usize {
        self.stream_buffers.len()
    }

    /// Whether a source currently streams content.
    #[must_use]
    pub fn is_source_available(&self, source: StreamSource) -> bool {
        self.available_sources.contains(&source)
    }

    /// Stream buffers fed by `source`.
    #[must_use]
    pub fn stream_buffers_of_source(&self, source: StreamSource) -> Vec<StreamBufferHandle> {
        self.stream_buffers
            .iter()
            .filter(|(_, s)| **s == source)
            .map(|(buffer, _)| *buffer)
            .collect()
    }

    /// Compares the compositor's surfaces with the known sources and
    /// returns one availability event per change.
    pub fn process_surface_changes(&mut self, compositor: &dyn EmbeddedCompositor) -> Vec<RendererEvent> {
        let connected: BTreeSet<StreamSource> = compositor
            .connected_surfaces()
            .into_iter()
            .map(StreamSource)
            .collect();

        let mut events = Vec::new();
        for lost in self.available_sources.difference(&connected) {
            tracing::info!("stream source {} became unavailable", lost);
            events.push(
                RendererEvent::new(RendererEventType::StreamSurfaceUnavailable)
                    .with_stream_source(*lost),
            );
        }
        for new in connected.difference(&self.available_sources) {
            tracing::info!("stream source {} became available", new);
            events.push(
                RendererEvent::new(RendererEventType::StreamSurfaceAvailable)
                    .with_stream_source(*new),
            );
        }
        self.available_sources = connected;
        events
    }
}
