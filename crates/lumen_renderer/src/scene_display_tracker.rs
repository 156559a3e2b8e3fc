//! # Scene Display Tracker
//!
//! Directory of which display owns which scene.
//!
//! The dispatcher keeps two independent trackers: one fed by commands
//! (`SetSceneMapping`, referenced-scene inference) and used for routing,
//! one fed by events (a scene reaching `Ready`) and used to de-duplicate
//! scene state events. Command flow and event flow observe ownership
//! changes at different times, so they never share one instance.

use lumen_shared::{DisplayHandle, RendererCommand, RendererEventType, SceneId};
use std::collections::HashMap;

/// Maps scenes to their owning display.
#[derive(Debug, Default)]
pub struct SceneDisplayTracker {
    owners: HashMap<SceneId, DisplayHandle>,
}

impl SceneDisplayTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `display` as owner of `scene`, replacing any earlier owner.
    pub fn set_scene_ownership(&mut self, scene: SceneId, display: DisplayHandle) {
        self.owners.insert(scene, display);
    }

    /// Owner of `scene`, `None` while unowned.
    #[must_use]
    pub fn scene_ownership(&self, scene: SceneId) -> Option<DisplayHandle> {
        self.owners.get(&scene).copied()
    }

    /// Forgets every scene owned by `display`.
    pub fn unregister_display(&mut self, display: DisplayHandle) {
        self.owners.retain(|_, owner| *owner != display);
    }

    /// Number of owned scenes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no scene is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Target display of a command.
    ///
    /// - commands naming a display return it, whether or not it exists
    /// - scene-scoped commands return the scene owner, `None` while unowned
    /// - global commands return `None`
    ///
    /// `None` means broadcast.
    #[must_use]
    pub fn determine_display_from_renderer_command(
        &self,
        cmd: &RendererCommand,
    ) -> Option<DisplayHandle> {
        match cmd {
            // scene publication is a global fact every display tracks
            RendererCommand::ScenePublished(_) | RendererCommand::SceneUnpublished(_) => None,

            RendererCommand::ReceiveScene(c) => self.scene_ownership(c.info.scene_id),
            RendererCommand::UpdateScene(c) => self.scene_ownership(c.scene),
            RendererCommand::SetSceneState(c) => self.scene_ownership(c.scene),
            RendererCommand::SetSceneDisplayBufferAssignment(c) => self.scene_ownership(c.scene),
            RendererCommand::LinkData(c) => self.scene_ownership(c.provider_scene),
            RendererCommand::LinkOffscreenBuffer(c) => self.scene_ownership(c.consumer_scene),
            RendererCommand::LinkStreamBuffer(c) => self.scene_ownership(c.consumer_scene),
            RendererCommand::LinkExternalBuffer(c) => self.scene_ownership(c.consumer_scene),
            RendererCommand::UnlinkData(c) => self.scene_ownership(c.consumer_scene),

            RendererCommand::SetSceneMapping(c) => Some(c.display),
            RendererCommand::CreateDisplay(c) => Some(c.display),
            RendererCommand::DestroyDisplay(c) => Some(c.display),
            RendererCommand::CreateOffscreenBuffer(c) => Some(c.display),
            RendererCommand::DestroyOffscreenBuffer(c) => Some(c.display),
            RendererCommand::CreateStreamBuffer(c) => Some(c.display),
            RendererCommand::DestroyStreamBuffer(c) => Some(c.display),
            RendererCommand::CreateExternalBuffer(c) => Some(c.display),
            RendererCommand::DestroyExternalBuffer(c) => Some(c.display),
            RendererCommand::SetClearFlags(c) => Some(c.display),
            RendererCommand::SetExternallyOwnedWindowSize(c) => Some(c.display),
            RendererCommand::ReadPixels(c) => Some(c.display),
            RendererCommand::ConfirmationEcho(c) => Some(c.display),
            RendererCommand::SystemCompositorControl(c) => Some(c.display),

            // broadcast and consolidated per (display, buffer) slot; displays
            // other than the named one ignore it
            RendererCommand::SetClearColor(_)
            | RendererCommand::LogInfo(_)
            | RendererCommand::LogStatistics(_)
            | RendererCommand::SetFrameTimerLimits(_)
            | RendererCommand::SetLimitsFlushesForceApply(_)
            | RendererCommand::SetLimitsFlushesForceUnsubscribe(_)
            | RendererCommand::SetSkippingOfUnmodifiedBuffers(_) => None,
        }
    }

    /// Whether every display emits this event type as an echo of one
    /// broadcast command, so only one display's copy should be reported.
    #[must_use]
    pub const fn is_event_result_of_broadcast_command(event_type: RendererEventType) -> bool {
        matches!(
            event_type,
            RendererEventType::ScenePublished | RendererEventType::SceneUnpublished
        )
    }
}
