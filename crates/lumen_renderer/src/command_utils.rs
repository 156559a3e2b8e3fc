//! # Command Utilities
//!
//! Per-kind policy used by the dispatcher:
//!
//! - which commands may wait in a display stash
//! - how a broadcast command is consolidated into the broadcast stash
//! - which failure event reports a command sent to an unknown display
//!
//! Every decision is an exhaustive match on [`RendererCommandKind`] or
//! [`RendererCommand`], so adding a command kind forces a decision here.

use lumen_shared::commands::{
    CreateExternalBuffer, CreateOffscreenBuffer, CreateStreamBuffer, DestroyExternalBuffer,
    DestroyOffscreenBuffer, DestroyStreamBuffer, LinkData, LinkExternalBuffer,
    LinkOffscreenBuffer, LinkStreamBuffer, ReadPixels, UnlinkData,
};
use lumen_shared::{
    DisplayHandle, OffscreenBufferHandle, RendererCommand, RendererCommandKind, RendererEvent,
    RendererEventType, SceneId,
};

/// Named "current value" slot a broadcast command overwrites.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StashSlot {
    /// Clear color of one buffer of one display
    ClearColor(DisplayHandle, Option<OffscreenBufferHandle>),
    /// Frame time budgets
    FrameTimerLimits,
    /// Force-apply flush limit
    FlushesForceApply,
    /// Force-unsubscribe flush limit
    FlushesForceUnsubscribe,
    /// Skipping of unmodified buffers
    SkippingOfUnmodifiedBuffers,
}

/// How a broadcast command enters the broadcast stash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StashPolicy {
    /// Appended; replayed in order.
    Append,
    /// Replaces the stashed command of the same slot, else appended.
    ReplaceSlot(StashSlot),
    /// Removes the stashed publication of the scene and is not stored itself.
    RetractPublished(SceneId),
    /// Never stashed.
    Skip,
}

/// Consolidation policy of a broadcast command.
#[must_use]
pub fn stash_policy(cmd: &RendererCommand) -> StashPolicy {
    match cmd {
        RendererCommand::ScenePublished(_) => StashPolicy::Append,
        RendererCommand::SceneUnpublished(c) => StashPolicy::RetractPublished(c.scene),

        RendererCommand::SetClearColor(c) => {
            StashPolicy::ReplaceSlot(StashSlot::ClearColor(c.display, c.buffer))
        }
        RendererCommand::SetFrameTimerLimits(_) => {
            StashPolicy::ReplaceSlot(StashSlot::FrameTimerLimits)
        }
        RendererCommand::SetLimitsFlushesForceApply(_) => {
            StashPolicy::ReplaceSlot(StashSlot::FlushesForceApply)
        }
        RendererCommand::SetLimitsFlushesForceUnsubscribe(_) => {
            StashPolicy::ReplaceSlot(StashSlot::FlushesForceUnsubscribe)
        }
        RendererCommand::SetSkippingOfUnmodifiedBuffers(_) => {
            StashPolicy::ReplaceSlot(StashSlot::SkippingOfUnmodifiedBuffers)
        }

        // momentary requests, meaningless to a display created later
        RendererCommand::LogInfo(_) | RendererCommand::LogStatistics(_) => StashPolicy::Skip,

        // broadcast only while their scene is unowned; the owning display
        // receives them again once the scene is mapped
        RendererCommand::ReceiveScene(_)
        | RendererCommand::UpdateScene(_)
        | RendererCommand::SetSceneState(_)
        | RendererCommand::SetSceneDisplayBufferAssignment(_)
        | RendererCommand::LinkData(_)
        | RendererCommand::LinkOffscreenBuffer(_)
        | RendererCommand::LinkStreamBuffer(_)
        | RendererCommand::LinkExternalBuffer(_)
        | RendererCommand::UnlinkData(_) => StashPolicy::Skip,

        // always carry an explicit display, never broadcast
        RendererCommand::SetSceneMapping(_)
        | RendererCommand::CreateDisplay(_)
        | RendererCommand::DestroyDisplay(_)
        | RendererCommand::CreateOffscreenBuffer(_)
        | RendererCommand::DestroyOffscreenBuffer(_)
        | RendererCommand::CreateStreamBuffer(_)
        | RendererCommand::DestroyStreamBuffer(_)
        | RendererCommand::CreateExternalBuffer(_)
        | RendererCommand::DestroyExternalBuffer(_)
        | RendererCommand::SetClearFlags(_)
        | RendererCommand::SetExternallyOwnedWindowSize(_)
        | RendererCommand::ReadPixels(_)
        | RendererCommand::ConfirmationEcho(_)
        | RendererCommand::SystemCompositorControl(_) => StashPolicy::Skip,
    }
}

/// Adds a broadcast command to the broadcast stash following its policy.
pub fn add_and_consolidate_command_to_stash(
    cmd: RendererCommand,
    stash: &mut Vec<RendererCommand>,
) {
    match stash_policy(&cmd) {
        StashPolicy::Append => stash.push(cmd),
        StashPolicy::ReplaceSlot(slot) => {
            let existing = stash
                .iter()
                .position(|stashed| stash_policy(stashed) == StashPolicy::ReplaceSlot(slot));
            match existing {
                Some(index) => stash[index] = cmd,
                None => stash.push(cmd),
            }
        }
        StashPolicy::RetractPublished(scene) => stash.retain(|stashed| {
            !matches!(stashed, RendererCommand::ScenePublished(published) if published.scene == scene)
        }),
        StashPolicy::Skip => {}
    }
}

/// Whether a command addressed to a missing display may wait for it.
#[must_use]
pub const fn is_stash_eligible(kind: RendererCommandKind) -> bool {
    matches!(
        kind,
        RendererCommandKind::SetSceneMapping | RendererCommandKind::SetSceneState
    )
}

/// Whether a batch is worth a dispatch log line.
///
/// Batches of only flushes and log requests arrive every frame.
#[must_use]
pub fn is_batch_log_worthy(cmds: &[RendererCommand]) -> bool {
    cmds.iter().any(|cmd| {
        !matches!(
            cmd.kind(),
            RendererCommandKind::UpdateScene | RendererCommandKind::LogInfo
        )
    })
}

/// Failure event reporting that `cmd` could not reach its display.
///
/// `None` for kinds without a failure event; those are dropped silently.
#[must_use]
pub fn generate_fail_event_for_command(cmd: &RendererCommand) -> Option<RendererEvent> {
    let event = match cmd {
        RendererCommand::DestroyDisplay(c) => {
            RendererEvent::new(RendererEventType::DisplayDestroyFailed).with_display(c.display)
        }
        RendererCommand::CreateOffscreenBuffer(CreateOffscreenBuffer { display, buffer, .. }) => {
            RendererEvent::new(RendererEventType::OffscreenBufferCreateFailed)
                .with_display(*display)
                .with_offscreen_buffer(*buffer)
        }
        RendererCommand::DestroyOffscreenBuffer(DestroyOffscreenBuffer { display, buffer }) => {
            RendererEvent::new(RendererEventType::OffscreenBufferDestroyFailed)
                .with_display(*display)
                .with_offscreen_buffer(*buffer)
        }
        RendererCommand::CreateStreamBuffer(CreateStreamBuffer { display, buffer, source }) => {
            RendererEvent::new(RendererEventType::StreamBufferCreateFailed)
                .with_display(*display)
                .with_stream_buffer(*buffer)
                .with_stream_source(*source)
        }
        RendererCommand::DestroyStreamBuffer(DestroyStreamBuffer { display, buffer }) => {
            RendererEvent::new(RendererEventType::StreamBufferDestroyFailed)
                .with_display(*display)
                .with_stream_buffer(*buffer)
        }
        RendererCommand::CreateExternalBuffer(CreateExternalBuffer { display, buffer }) => {
            RendererEvent::new(RendererEventType::ExternalBufferCreateFailed)
                .with_display(*display)
                .with_external_buffer(*buffer)
        }
        RendererCommand::DestroyExternalBuffer(DestroyExternalBuffer { display, buffer }) => {
            RendererEvent::new(RendererEventType::ExternalBufferDestroyFailed)
                .with_display(*display)
                .with_external_buffer(*buffer)
        }
        RendererCommand::ReadPixels(ReadPixels { display, buffer, .. }) => {
            let event = RendererEvent::new(RendererEventType::ReadPixelsFromFramebufferFailed)
                .with_display(*display);
            match buffer {
                Some(buffer) => event.with_offscreen_buffer(*buffer),
                None => event,
            }
        }
        RendererCommand::LinkData(LinkData {
            provider_scene,
            provider,
            consumer_scene,
            consumer,
        }) => RendererEvent::new(RendererEventType::SceneDataLinkFailed)
            .with_provider(*provider_scene, *provider)
            .with_consumer(*consumer_scene, *consumer),
        RendererCommand::LinkOffscreenBuffer(LinkOffscreenBuffer {
            buffer,
            consumer_scene,
            consumer,
        }) => RendererEvent::new(RendererEventType::SceneDataBufferLinkFailed)
            .with_offscreen_buffer(*buffer)
            .with_consumer(*consumer_scene, *consumer),
        RendererCommand::LinkStreamBuffer(LinkStreamBuffer {
            buffer,
            consumer_scene,
            consumer,
        }) => RendererEvent::new(RendererEventType::SceneDataBufferLinkFailed)
            .with_stream_buffer(*buffer)
            .with_consumer(*consumer_scene, *consumer),
        RendererCommand::LinkExternalBuffer(LinkExternalBuffer {
            buffer,
            consumer_scene,
            consumer,
        }) => RendererEvent::new(RendererEventType::SceneDataBufferLinkFailed)
            .with_external_buffer(*buffer)
            .with_consumer(*consumer_scene, *consumer),
        RendererCommand::UnlinkData(UnlinkData {
            consumer_scene,
            consumer,
        }) => RendererEvent::new(RendererEventType::SceneDataUnlinkFailed)
            .with_consumer(*consumer_scene, *consumer),

        RendererCommand::ScenePublished(_)
        | RendererCommand::SceneUnpublished(_)
        | RendererCommand::ReceiveScene(_)
        | RendererCommand::UpdateScene(_)
        | RendererCommand::SetSceneState(_)
        | RendererCommand::SetSceneMapping(_)
        | RendererCommand::SetSceneDisplayBufferAssignment(_)
        | RendererCommand::CreateDisplay(_)
        | RendererCommand::SetClearFlags(_)
        | RendererCommand::SetClearColor(_)
        | RendererCommand::SetExternallyOwnedWindowSize(_)
        | RendererCommand::ConfirmationEcho(_)
        | RendererCommand::SystemCompositorControl(_)
        | RendererCommand::LogInfo(_)
        | RendererCommand::LogStatistics(_)
        | RendererCommand::SetFrameTimerLimits(_)
        | RendererCommand::SetLimitsFlushesForceApply(_)
        | RendererCommand::SetLimitsFlushesForceUnsubscribe(_)
        | RendererCommand::SetSkippingOfUnmodifiedBuffers(_) => return None,
    };
    Some(event)
}
