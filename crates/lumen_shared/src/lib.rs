//! # Lumen Shared
//!
//! Value types exchanged between scene producers and the renderer:
//! strongly typed identifiers, renderer commands and renderer events.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on threading or platform code.
//! Anything that owns a queue, a thread or a GPU context belongs in
//! `lumen_renderer`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod commands;
pub mod constants;
pub mod display_config;
pub mod events;
pub mod ids;
pub mod math;
pub mod scene;

pub use commands::{ClearFlags, LogTopic, LoopMode, RendererCommand, RendererCommandKind, SystemCompositorOp};
pub use constants::{DEFAULT_MIN_FRAME_DURATION, MAX_DISPATCH_LOOPS_WITHOUT_EVENT_DRAIN};
pub use display_config::DisplayConfig;
pub use events::{FrameTimings, RendererEvent, RendererEventType};
pub use ids::{
    DataConsumerId, DataProviderId, DisplayHandle, ExternalBufferHandle, OffscreenBufferHandle,
    SceneId, StreamBufferHandle, WaylandIviLayerId, WaylandIviSurfaceId,
};
pub use math::{Rect, Vec4};
pub use scene::{
    PublicationMode, RendererSceneState, SceneAction, SceneInfo, SceneUpdate, StreamSource,
};
