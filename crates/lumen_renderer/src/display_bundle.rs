//! # Display Bundle
//!
//! One execution unit per display: an inbound command queue, two outbound
//! event queues and the display state those commands act on.
//!
//! ## Architecture
//!
//! ```text
//!   dispatcher ──push_and_consume_commands──> [command channel]
//!                                                  │
//!                              do_one_loop (display thread or dispatcher)
//!                                                  │
//!                                     execute ─> update ─> render
//!                                                  │
//!   dispatcher <──dispatch_*_events── [renderer events] [scene control events]
//! ```
//!
//! The dispatcher only touches the queues and a few narrow accessors. All
//! other state is owned by whichever thread runs `do_one_loop`.
//!
//! Referenced scenes are mirrored into their own small map so the
//! dispatcher can look up master scenes without waiting for a frame.

use crate::config::RendererConfig;
use crate::embedded_compositing::EmbeddedCompositingManager;
use crate::platform::{EmbeddedCompositor, Platform, PlatformFactory};
use crossbeam_channel::{unbounded, Receiver, Sender};
use lumen_shared::commands::{
    ClearFlags, LinkData, LogInfo, LoopMode, ReadPixels, SetFrameTimerLimits,
};
use lumen_shared::{
    DataConsumerId, DataProviderId, DisplayConfig, DisplayHandle, ExternalBufferHandle,
    FrameTimings, OffscreenBufferHandle, RendererCommand, RendererEvent, RendererEventType,
    RendererSceneState, SceneAction, SceneId, StreamBufferHandle, Vec4,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Execution unit of one display as seen by the dispatcher.
pub trait DisplayBundle: Send + Sync {
    /// Enqueues commands for the display loop. `cmds` is empty on return.
    fn push_and_consume_commands(&self, cmds: &mut Vec<RendererCommand>);

    /// Moves buffered renderer events into `out`.
    fn dispatch_renderer_events(&self, out: &mut Vec<RendererEvent>);

    /// Moves buffered scene control events into `out`.
    fn dispatch_scene_control_events(&self, out: &mut Vec<RendererEvent>);

    /// Runs one loop iteration, then idles for `sleep_time`.
    fn do_one_loop(&self, loop_mode: LoopMode, sleep_time: Duration);

    /// Makes the display's context current on the calling thread.
    fn enable_context(&self);

    /// Master scene embedding `scene` by reference, if any.
    fn find_master_scene_for_referenced_scene(&self, scene: SceneId) -> Option<SceneId>;

    /// Runs `f` on the embedded compositing manager.
    fn with_ec_manager(&self, f: &mut dyn FnMut(&mut EmbeddedCompositingManager));

    /// Runs `f` on the embedded compositor. Returns `false` while the
    /// display has no platform.
    fn with_embedded_compositor(&self, f: &mut dyn FnMut(&mut dyn EmbeddedCompositor)) -> bool;

    /// Whether the platform has a system compositor controller.
    fn has_system_compositor_controller(&self) -> bool;

    /// Stage the loop is currently in; see the `TRACE_*` constants.
    fn trace_id(&self) -> u32;
}

/// Requests scene subscriptions from scene producers.
pub trait SceneEventSender: Send + Sync {
    /// Asks the producer of `scene` to send it to `display`.
    fn subscribe_scene(&self, display: DisplayHandle, scene: SceneId);

    /// Tells the producer of `scene` that `display` no longer needs it.
    fn unsubscribe_scene(&self, display: DisplayHandle, scene: SceneId);
}

/// Sender for setups without scene producers.
#[derive(Debug, Default)]
pub struct NullSceneEventSender;

impl SceneEventSender for NullSceneEventSender {
    fn subscribe_scene(&self, display_handle: DisplayHandle, scene: SceneId) {
        tracing::debug!("no producer to subscribe scene {} for display {}", scene, display_handle);
    }

    fn unsubscribe_scene(&self, display_handle: DisplayHandle, scene: SceneId) {
        tracing::debug!("no producer to unsubscribe scene {} for display {}", scene, display_handle);
    }
}

// =============================================================================
// TRACE IDS
// =============================================================================

/// Loop is idle or sleeping.
pub const TRACE_IDLE: u32 = 0;
/// Executing queued commands.
pub const TRACE_EXECUTING_COMMANDS: u32 = 1;
/// Updating scene states.
pub const TRACE_UPDATING_SCENES: u32 = 2;
/// Rendering and presenting.
pub const TRACE_RENDERING: u32 = 3;
/// Servicing the embedded compositor.
pub const TRACE_EMBEDDED_COMPOSITING: u32 = 4;
/// Publishing events.
pub const TRACE_EMITTING_EVENTS: u32 = 5;

// =============================================================================
// DISPLAY STATE
// =============================================================================

/// Per-scene bookkeeping of one display.
#[derive(Debug, Default)]
struct SceneEntry {
    state: RendererSceneState,
    target: RendererSceneState,
    published: bool,
    mapped_display: Option<DisplayHandle>,
    subscription_requested: bool,
    received: bool,
    flushed: bool,
    last_flush_index: Option<u64>,
    buffer: Option<OffscreenBufferHandle>,
    render_order: i32,
    references: BTreeSet<SceneId>,
    providers: BTreeSet<DataProviderId>,
    consumers: BTreeSet<DataConsumerId>,
}

/// What feeds a linked consumer slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkSource {
    Data(SceneId, DataProviderId),
    Offscreen(OffscreenBufferHandle),
    Stream(StreamBufferHandle),
    External(ExternalBufferHandle),
}

/// Global limits set by broadcast commands.
#[derive(Debug, Default)]
struct Limits {
    frame_timer: Option<SetFrameTimerLimits>,
    flushes_force_apply: Option<u32>,
    flushes_force_unsubscribe: Option<u32>,
    skip_unmodified_buffers: bool,
}

/// Loop timings accumulated over one reporting period.
#[derive(Debug)]
struct FrameTimingAccumulator {
    period_start: Instant,
    max: Duration,
    total: Duration,
    count: u32,
}

impl FrameTimingAccumulator {
    fn new() -> Self {
        Self {
            period_start: Instant::now(),
            max: Duration::ZERO,
            total: Duration::ZERO,
            count: 0,
        }
    }

    fn record(&mut self, loop_time: Duration) {
        self.max = self.max.max(loop_time);
        self.total += loop_time;
        self.count += 1;
    }

    fn snapshot(&self) -> FrameTimings {
        FrameTimings {
            max_loop_time: self.max,
            avg_loop_time: self.total.checked_div(self.count).unwrap_or_default(),
            loop_count: self.count,
        }
    }

    fn take_report(&mut self, period: Duration) -> Option<FrameTimings> {
        if self.period_start.elapsed() < period || self.count == 0 {
            return None;
        }
        let report = self.snapshot();
        *self = Self::new();
        Some(report)
    }
}

/// Referenced scene to master scene, shared with the dispatcher side.
type SceneReferences = Arc<Mutex<BTreeMap<SceneId, SceneId>>>;

/// Everything the display loop mutates.
struct DisplayState {
    display: DisplayHandle,
    config: DisplayConfig,
    renderer_config: RendererConfig,
    platform_factory: Arc<dyn PlatformFactory>,
    scene_event_sender: Arc<dyn SceneEventSender>,
    platform: Option<Box<dyn Platform>>,
    destroyed: bool,
    framebuffer_clear_color: Option<Vec4>,
    ec_manager: EmbeddedCompositingManager,
    scenes: BTreeMap<SceneId, SceneEntry>,
    offscreen_buffers: BTreeMap<OffscreenBufferHandle, (u32, u32)>,
    external_buffers: BTreeSet<ExternalBufferHandle>,
    links: BTreeMap<(SceneId, DataConsumerId), LinkSource>,
    clear_flags: BTreeMap<Option<OffscreenBufferHandle>, ClearFlags>,
    pending_read_pixels: Vec<ReadPixels>,
    limits: Limits,
    timing: FrameTimingAccumulator,
    scene_references: SceneReferences,
    outbox: Vec<RendererEvent>,
}

impl DisplayState {
    fn emit(&mut self, event: RendererEvent) {
        self.outbox.push(event);
    }

    fn emit_for_display(&mut self, event_type: RendererEventType) {
        let display = self.display;
        self.emit(RendererEvent::new(event_type).with_display(display));
    }

    fn execute(&mut self, cmd: RendererCommand) {
        if self.destroyed {
            tracing::debug!("display {} is destroyed, dropping {}", self.display, cmd);
            return;
        }

        match cmd {
            RendererCommand::CreateDisplay(c) => self.create_platform(c.config),
            RendererCommand::DestroyDisplay(_) => self.destroy_platform(),

            RendererCommand::ScenePublished(c) => {
                let entry = self.scenes.entry(c.scene).or_default();
                if entry.published {
                    tracing::warn!("scene {} published twice on display {}", c.scene, self.display);
                    return;
                }
                entry.published = true;
                entry.state = RendererSceneState::Available;
                self.emit(RendererEvent::new(RendererEventType::ScenePublished).with_scene(c.scene));
                self.emit(RendererEvent::scene_state_changed(
                    c.scene,
                    RendererSceneState::Available,
                ));
            }
            RendererCommand::SceneUnpublished(c) => self.unpublish_scene(c.scene),
            RendererCommand::SetSceneMapping(c) => {
                let own_display = self.display;
                let entry = self.scenes.entry(c.scene).or_default();
                if entry.state >= RendererSceneState::Ready && entry.mapped_display != Some(c.display) {
                    tracing::warn!(
                        "scene {} is {} on display {}, cannot remap to display {}",
                        c.scene,
                        entry.state,
                        own_display,
                        c.display
                    );
                    return;
                }
                entry.mapped_display = Some(c.display);
            }
            RendererCommand::SetSceneState(c) => {
                let own_display = self.display;
                let entry = self.scenes.entry(c.scene).or_default();
                if c.state >= RendererSceneState::Ready && entry.mapped_display != Some(own_display) {
                    tracing::debug!(
                        "scene {} requested {} but is not mapped to display {}",
                        c.scene,
                        c.state,
                        own_display
                    );
                }
                entry.target = c.state;
            }
            RendererCommand::SetSceneDisplayBufferAssignment(c) => {
                if let Some(buffer) = c.buffer {
                    if !self.offscreen_buffers.contains_key(&buffer) {
                        tracing::warn!(
                            "cannot assign scene {} to unknown offscreen buffer {}",
                            c.scene,
                            buffer
                        );
                        return;
                    }
                }
                let entry = self.scenes.entry(c.scene).or_default();
                entry.buffer = c.buffer;
                entry.render_order = c.render_order;
            }
            RendererCommand::ReceiveScene(c) => {
                let entry = self.scenes.entry(c.info.scene_id).or_default();
                if !entry.subscription_requested {
                    tracing::debug!(
                        "display {} received scene {} ({}) without subscribing it",
                        self.display,
                        c.info.scene_id,
                        c.info.friendly_name
                    );
                }
                entry.received = true;
            }
            RendererCommand::UpdateScene(c) => self.apply_update(c.scene, c.update),

            RendererCommand::LinkData(c) => self.link_data(&c),
            RendererCommand::LinkOffscreenBuffer(c) => {
                let exists = self.offscreen_buffers.contains_key(&c.buffer);
                let event = RendererEvent::new(RendererEventType::SceneDataBufferLinked)
                    .with_offscreen_buffer(c.buffer);
                self.link_buffer(exists, LinkSource::Offscreen(c.buffer), c.consumer_scene, c.consumer, event);
            }
            RendererCommand::LinkStreamBuffer(c) => {
                let exists = self.ec_manager.has_stream_buffer(c.buffer);
                let event = RendererEvent::new(RendererEventType::SceneDataBufferLinked)
                    .with_stream_buffer(c.buffer);
                self.link_buffer(exists, LinkSource::Stream(c.buffer), c.consumer_scene, c.consumer, event);
            }
            RendererCommand::LinkExternalBuffer(c) => {
                let exists = self.external_buffers.contains(&c.buffer);
                let event = RendererEvent::new(RendererEventType::SceneDataBufferLinked)
                    .with_external_buffer(c.buffer);
                self.link_buffer(exists, LinkSource::External(c.buffer), c.consumer_scene, c.consumer, event);
            }
            RendererCommand::UnlinkData(c) => {
                let event_type = if self.links.remove(&(c.consumer_scene, c.consumer)).is_some() {
                    RendererEventType::SceneDataUnlinked
                } else {
                    RendererEventType::SceneDataUnlinkFailed
                };
                self.emit(RendererEvent::new(event_type).with_consumer(c.consumer_scene, c.consumer));
            }

            RendererCommand::CreateOffscreenBuffer(c) => {
                let created = !self.offscreen_buffers.contains_key(&c.buffer)
                    && self.platform.as_mut().is_some_and(|platform| {
                        platform.create_offscreen_buffer(c.buffer, c.width, c.height, c.sample_count)
                    });
                if created {
                    self.offscreen_buffers.insert(c.buffer, (c.width, c.height));
                }
                let event_type = if created {
                    RendererEventType::OffscreenBufferCreated
                } else {
                    RendererEventType::OffscreenBufferCreateFailed
                };
                let display = self.display;
                self.emit(RendererEvent::new(event_type).with_display(display).with_offscreen_buffer(c.buffer));
            }
            RendererCommand::DestroyOffscreenBuffer(c) => {
                let in_use = self.scenes.values().any(|scene| scene.buffer == Some(c.buffer));
                let destroyed = !in_use
                    && self.offscreen_buffers.remove(&c.buffer).is_some()
                    && self
                        .platform
                        .as_mut()
                        .is_some_and(|platform| platform.destroy_offscreen_buffer(c.buffer));
                if destroyed {
                    self.links.retain(|_, source| *source != LinkSource::Offscreen(c.buffer));
                    self.clear_flags.remove(&Some(c.buffer));
                } else if in_use {
                    tracing::warn!("offscreen buffer {} still has scenes assigned", c.buffer);
                }
                let event_type = if destroyed {
                    RendererEventType::OffscreenBufferDestroyed
                } else {
                    RendererEventType::OffscreenBufferDestroyFailed
                };
                let display = self.display;
                self.emit(RendererEvent::new(event_type).with_display(display).with_offscreen_buffer(c.buffer));
            }
            RendererCommand::CreateStreamBuffer(c) => {
                let event_type = if self.ec_manager.create_stream_buffer(c.buffer, c.source) {
                    RendererEventType::StreamBufferCreated
                } else {
                    RendererEventType::StreamBufferCreateFailed
                };
                let display = self.display;
                self.emit(
                    RendererEvent::new(event_type)
                        .with_display(display)
                        .with_stream_buffer(c.buffer)
                        .with_stream_source(c.source),
                );
            }
            RendererCommand::DestroyStreamBuffer(c) => {
                let event_type = if self.ec_manager.destroy_stream_buffer(c.buffer) {
                    self.links.retain(|_, source| *source != LinkSource::Stream(c.buffer));
                    RendererEventType::StreamBufferDestroyed
                } else {
                    RendererEventType::StreamBufferDestroyFailed
                };
                let display = self.display;
                self.emit(RendererEvent::new(event_type).with_display(display).with_stream_buffer(c.buffer));
            }
            RendererCommand::CreateExternalBuffer(c) => {
                let event_type = if self.platform.is_some() && self.external_buffers.insert(c.buffer) {
                    RendererEventType::ExternalBufferCreated
                } else {
                    RendererEventType::ExternalBufferCreateFailed
                };
                let display = self.display;
                self.emit(RendererEvent::new(event_type).with_display(display).with_external_buffer(c.buffer));
            }
            RendererCommand::DestroyExternalBuffer(c) => {
                let event_type = if self.external_buffers.remove(&c.buffer) {
                    self.links.retain(|_, source| *source != LinkSource::External(c.buffer));
                    RendererEventType::ExternalBufferDestroyed
                } else {
                    RendererEventType::ExternalBufferDestroyFailed
                };
                let display = self.display;
                self.emit(RendererEvent::new(event_type).with_display(display).with_external_buffer(c.buffer));
            }

            RendererCommand::SetClearFlags(c) => {
                self.clear_flags.insert(c.buffer, c.flags);
            }
            RendererCommand::SetClearColor(c) => {
                if c.display != self.display {
                    return;
                }
                match (self.platform.as_mut(), c.buffer) {
                    (Some(platform), buffer) => {
                        if !platform.set_clear_color(buffer, c.color) {
                            tracing::warn!(
                                "display {}: cannot set clear color of unknown buffer {:?}",
                                self.display,
                                buffer
                            );
                        }
                    }
                    (None, None) => self.framebuffer_clear_color = Some(c.color),
                    (None, Some(buffer)) => tracing::warn!(
                        "display {}: clear color for buffer {} before display creation",
                        self.display,
                        buffer
                    ),
                }
            }
            RendererCommand::SetExternallyOwnedWindowSize(c) => {
                if let Some(platform) = self.platform.as_mut() {
                    platform.resize_window(c.width, c.height);
                    let display = self.display;
                    self.emit(
                        RendererEvent::new(RendererEventType::WindowResized)
                            .with_display(display)
                            .with_window_size((c.width, c.height)),
                    );
                }
            }
            RendererCommand::ReadPixels(c) => self.pending_read_pixels.push(c),
            RendererCommand::ConfirmationEcho(c) => {
                tracing::info!("display {} confirmation: {}", self.display, c.text);
            }
            RendererCommand::SystemCompositorControl(c) => {
                match self
                    .platform
                    .as_mut()
                    .and_then(|platform| platform.system_compositor_controller())
                {
                    Some(controller) => {
                        if !controller.apply(&c.op) {
                            tracing::warn!("system compositor rejected {:?}", c.op);
                        }
                    }
                    None => tracing::warn!(
                        "display {} has no system compositor controller, dropping {:?}",
                        self.display,
                        c.op
                    ),
                }
            }

            RendererCommand::LogInfo(c) => self.log_info(&c),
            RendererCommand::LogStatistics(_) => {
                let timings = self.timing.snapshot();
                tracing::info!(
                    "display {} statistics: loops={} avg={:?} max={:?}",
                    self.display,
                    timings.loop_count,
                    timings.avg_loop_time,
                    timings.max_loop_time
                );
            }
            RendererCommand::SetFrameTimerLimits(c) => self.limits.frame_timer = Some(c),
            RendererCommand::SetLimitsFlushesForceApply(c) => {
                self.limits.flushes_force_apply = Some(c.limit);
            }
            RendererCommand::SetLimitsFlushesForceUnsubscribe(c) => {
                self.limits.flushes_force_unsubscribe = Some(c.limit);
            }
            RendererCommand::SetSkippingOfUnmodifiedBuffers(c) => {
                self.limits.skip_unmodified_buffers = c.enable;
            }
        }
    }

    fn create_platform(&mut self, config: DisplayConfig) {
        if self.platform.is_some() {
            tracing::warn!("display {} created twice", self.display);
            return;
        }
        match self.platform_factory.create_platform(&self.renderer_config, &config) {
            Ok(mut platform) => {
                platform.enable_context();
                if let Some(color) = self.framebuffer_clear_color.take() {
                    platform.set_clear_color(None, color);
                }
                tracing::info!(
                    "display {} created ({}x{}, \"{}\")",
                    self.display,
                    config.width,
                    config.height,
                    config.window_title
                );
                self.config = config;
                self.platform = Some(platform);
                self.emit_for_display(RendererEventType::DisplayCreated);
            }
            Err(err) => {
                tracing::error!("display {} could not be created: {}", self.display, err);
                self.destroyed = true;
                self.emit_for_display(RendererEventType::DisplayCreateFailed);
            }
        }
    }

    fn destroy_platform(&mut self) {
        let busy: Vec<SceneId> = self
            .scenes
            .iter()
            .filter(|(_, scene)| scene.state >= RendererSceneState::Ready)
            .map(|(id, _)| *id)
            .collect();
        if !busy.is_empty() {
            tracing::error!(
                "display {} cannot be destroyed while scenes {:?} are ready or rendered",
                self.display,
                busy
            );
            self.emit_for_display(RendererEventType::DisplayDestroyFailed);
            return;
        }

        for (scene, entry) in &self.scenes {
            if entry.subscription_requested {
                self.scene_event_sender.unsubscribe_scene(self.display, *scene);
            }
        }
        self.platform = None;
        self.destroyed = true;
        tracing::info!("display {} destroyed", self.display);
        self.emit_for_display(RendererEventType::DisplayDestroyed);
    }

    fn unpublish_scene(&mut self, scene: SceneId) {
        let Some(entry) = self.scenes.remove(&scene) else {
            tracing::warn!("display {}: unpublish of unknown scene {}", self.display, scene);
            return;
        };
        if entry.subscription_requested {
            self.scene_event_sender.unsubscribe_scene(self.display, scene);
        }
        self.scene_references.lock().retain(|_, master| *master != scene);
        self.links.retain(|(consumer_scene, _), source| {
            *consumer_scene != scene && !matches!(source, LinkSource::Data(provider_scene, _) if *provider_scene == scene)
        });
        self.emit(RendererEvent::new(RendererEventType::SceneUnpublished).with_scene(scene));
        if entry.state != RendererSceneState::Unavailable {
            self.emit(RendererEvent::scene_state_changed(
                scene,
                RendererSceneState::Unavailable,
            ));
        }
    }

    fn apply_update(&mut self, scene: SceneId, update: lumen_shared::SceneUpdate) {
        let Some(entry) = self.scenes.get_mut(&scene) else {
            tracing::warn!("display {}: flush for unknown scene {}", self.display, scene);
            return;
        };
        if !entry.received {
            tracing::warn!(
                "display {}: flush {} for scene {} arrived before the scene itself",
                self.display,
                update.flush_index,
                scene
            );
            return;
        }

        let mut events = Vec::new();
        for action in update.actions {
            match action {
                SceneAction::AddSceneReference { referenced } => {
                    entry.references.insert(referenced);
                    self.scene_references.lock().insert(referenced, scene);
                }
                SceneAction::RemoveSceneReference { referenced } => {
                    entry.references.remove(&referenced);
                    let mut references = self.scene_references.lock();
                    if references.get(&referenced) == Some(&scene) {
                        references.remove(&referenced);
                    }
                }
                SceneAction::CreateDataProvider { provider } => {
                    if entry.providers.insert(provider) {
                        let mut event = RendererEvent::new(RendererEventType::SceneDataProviderCreated)
                            .with_scene(scene);
                        event.provider_id = Some(provider);
                        events.push(event);
                    }
                }
                SceneAction::CreateDataConsumer { consumer } => {
                    if entry.consumers.insert(consumer) {
                        let mut event = RendererEvent::new(RendererEventType::SceneDataConsumerCreated)
                            .with_scene(scene);
                        event.consumer_id = Some(consumer);
                        events.push(event);
                    }
                }
                SceneAction::Opaque(_) => {}
            }
        }
        entry.flushed = true;
        entry.last_flush_index = Some(update.flush_index);
        events.push(
            RendererEvent::new(RendererEventType::SceneFlushed)
                .with_scene(scene)
                .with_flush_index(update.flush_index),
        );
        self.outbox.append(&mut events);
    }

    fn has_consumer(&self, scene: SceneId, consumer: DataConsumerId) -> bool {
        self.scenes
            .get(&scene)
            .is_some_and(|entry| entry.consumers.contains(&consumer))
    }

    fn link_data(&mut self, cmd: &LinkData) {
        let has_provider = self
            .scenes
            .get(&cmd.provider_scene)
            .is_some_and(|entry| entry.providers.contains(&cmd.provider));
        let linked = has_provider && self.has_consumer(cmd.consumer_scene, cmd.consumer);
        if linked {
            self.links.insert(
                (cmd.consumer_scene, cmd.consumer),
                LinkSource::Data(cmd.provider_scene, cmd.provider),
            );
        }
        let event_type = if linked {
            RendererEventType::SceneDataLinked
        } else {
            RendererEventType::SceneDataLinkFailed
        };
        self.emit(
            RendererEvent::new(event_type)
                .with_provider(cmd.provider_scene, cmd.provider)
                .with_consumer(cmd.consumer_scene, cmd.consumer),
        );
    }

    fn link_buffer(
        &mut self,
        buffer_exists: bool,
        source: LinkSource,
        consumer_scene: SceneId,
        consumer: DataConsumerId,
        success: RendererEvent,
    ) {
        let mut event = success.with_consumer(consumer_scene, consumer);
        if buffer_exists && self.has_consumer(consumer_scene, consumer) {
            self.links.insert((consumer_scene, consumer), source);
        } else {
            event.event_type = RendererEventType::SceneDataBufferLinkFailed;
        }
        self.emit(event);
    }

    fn update_scene_states(&mut self) {
        for (scene, entry) in &mut self.scenes {
            if entry.target < entry.state {
                if entry.state == RendererSceneState::Rendered {
                    entry.state = RendererSceneState::Ready;
                    self.outbox.push(RendererEvent::scene_state_changed(*scene, entry.state));
                }
                if entry.state == RendererSceneState::Ready && entry.target < RendererSceneState::Ready {
                    if entry.subscription_requested {
                        self.scene_event_sender.unsubscribe_scene(self.display, *scene);
                    }
                    entry.subscription_requested = false;
                    entry.received = false;
                    entry.flushed = false;
                    entry.state = RendererSceneState::Available;
                    self.outbox.push(RendererEvent::scene_state_changed(*scene, entry.state));
                }
                continue;
            }

            let wants_ready = entry.target >= RendererSceneState::Ready;
            if wants_ready
                && entry.state == RendererSceneState::Available
                && entry.mapped_display == Some(self.display)
            {
                if !entry.subscription_requested {
                    self.scene_event_sender.subscribe_scene(self.display, *scene);
                    entry.subscription_requested = true;
                }
                if entry.received && entry.flushed {
                    entry.state = RendererSceneState::Ready;
                    self.outbox.push(RendererEvent::scene_state_changed(*scene, entry.state));
                }
            }
        }
    }

    fn render(&mut self) {
        let Some(platform) = self.platform.as_mut() else {
            return;
        };
        platform.render_frame();

        for request in std::mem::take(&mut self.pending_read_pixels) {
            let region = if request.full_screen {
                let (width, height) = match request.buffer {
                    Some(buffer) => self.offscreen_buffers.get(&buffer).copied().unwrap_or_default(),
                    None => platform.window_size(),
                };
                lumen_shared::Rect::new(0, 0, width, height)
            } else {
                request.region
            };
            let pixels = platform.read_pixels(request.buffer, region);
            let mut event = match (pixels, &request.file_name) {
                (Some(pixels), None) => RendererEvent::new(RendererEventType::ReadPixelsFromFramebuffer)
                    .with_pixel_data(pixels),
                (Some(pixels), Some(file)) => match std::fs::write(file, &pixels) {
                    Ok(()) => RendererEvent::new(RendererEventType::ReadPixelsFromFramebuffer),
                    Err(err) => {
                        tracing::error!("cannot write pixels to {}: {}", file, err);
                        RendererEvent::new(RendererEventType::ReadPixelsFromFramebufferFailed)
                    }
                },
                (None, _) => RendererEvent::new(RendererEventType::ReadPixelsFromFramebufferFailed),
            }
            .with_display(self.display);
            event.offscreen_buffer = request.buffer;
            self.outbox.push(event);
        }

        platform.swap_buffers();

        for (scene, entry) in &mut self.scenes {
            if entry.state == RendererSceneState::Ready && entry.target == RendererSceneState::Rendered {
                entry.state = RendererSceneState::Rendered;
                self.outbox.push(RendererEvent::scene_state_changed(*scene, entry.state));
            }
        }
    }

    fn service_embedded_compositor(&mut self) {
        let Some(platform) = self.platform.as_mut() else {
            return;
        };
        let compositor = platform.embedded_compositor();
        compositor.handle_requests_from_clients();
        let mut events = self.ec_manager.process_surface_changes(&*compositor);
        self.outbox.append(&mut events);
    }

    fn log_info(&self, cmd: &LogInfo) {
        tracing::info!(
            "display {}: threaded={} running={} loop_mode={:?} min_frame_time={:?} topic={:?}",
            self.display,
            cmd.displays_threaded,
            cmd.display_threads_running,
            cmd.loop_mode,
            cmd.min_frame_time,
            cmd.topic
        );
        let filter = cmd.node_filter.as_str();
        for (scene, entry) in &self.scenes {
            let name = scene.to_string();
            if !filter.is_empty() && !name.contains(filter) {
                continue;
            }
            tracing::info!(
                "  scene {}: state={} target={} mapped={:?} buffer={:?}/{} last_flush={:?}",
                scene,
                entry.state,
                entry.target,
                entry.mapped_display,
                entry.buffer,
                entry.render_order,
                entry.last_flush_index
            );
            if cmd.verbose {
                tracing::info!(
                    "    references={:?} providers={:?} consumers={:?}",
                    entry.references,
                    entry.providers,
                    entry.consumers
                );
            }
        }
        tracing::info!(
            "  offscreen buffers={} stream buffers={} external buffers={} links={} clear flags={:?}",
            self.offscreen_buffers.len(),
            self.ec_manager.stream_buffer_count(),
            self.external_buffers.len(),
            self.links.len(),
            self.clear_flags
        );
        tracing::info!(
            "  limits: frame timer={:?} force apply={:?} force unsubscribe={:?} skip unmodified={}",
            self.limits.frame_timer,
            self.limits.flushes_force_apply,
            self.limits.flushes_force_unsubscribe,
            self.limits.skip_unmodified_buffers
        );
    }
}

// =============================================================================
// PLATFORM DISPLAY BUNDLE
// =============================================================================

/// Display bundle driving a [`Platform`].
pub struct PlatformDisplayBundle {
    display: DisplayHandle,
    command_tx: Sender<Vec<RendererCommand>>,
    command_rx: Receiver<Vec<RendererCommand>>,
    renderer_event_tx: Sender<RendererEvent>,
    renderer_event_rx: Receiver<RendererEvent>,
    scene_control_event_tx: Sender<RendererEvent>,
    scene_control_event_rx: Receiver<RendererEvent>,
    state: Mutex<DisplayState>,
    scene_references: SceneReferences,
    trace_id: AtomicU32,
}

impl PlatformDisplayBundle {
    /// Creates the bundle. The platform itself is created when the
    /// `CreateDisplay` command executes on the display loop.
    #[must_use]
    pub fn new(
        display: DisplayHandle,
        config: DisplayConfig,
        renderer_config: RendererConfig,
        platform_factory: Arc<dyn PlatformFactory>,
        scene_event_sender: Arc<dyn SceneEventSender>,
    ) -> Self {
        let (command_tx, command_rx) = unbounded();
        let (renderer_event_tx, renderer_event_rx) = unbounded();
        let (scene_control_event_tx, scene_control_event_rx) = unbounded();
        let scene_references = SceneReferences::default();
        Self {
            display,
            command_tx,
            command_rx,
            renderer_event_tx,
            renderer_event_rx,
            scene_control_event_tx,
            scene_control_event_rx,
            state: Mutex::new(DisplayState {
                display,
                config,
                renderer_config,
                platform_factory,
                scene_event_sender,
                platform: None,
                destroyed: false,
                framebuffer_clear_color: None,
                ec_manager: EmbeddedCompositingManager::new(),
                scenes: BTreeMap::new(),
                offscreen_buffers: BTreeMap::new(),
                external_buffers: BTreeSet::new(),
                links: BTreeMap::new(),
                clear_flags: BTreeMap::new(),
                pending_read_pixels: Vec::new(),
                limits: Limits::default(),
                timing: FrameTimingAccumulator::new(),
                scene_references: Arc::clone(&scene_references),
                outbox: Vec::new(),
            }),
            scene_references,
            trace_id: AtomicU32::new(TRACE_IDLE),
        }
    }

    /// Display this bundle drives.
    #[must_use]
    pub const fn display(&self) -> DisplayHandle {
        self.display
    }

    /// Current state of a scene on this display.
    #[must_use]
    pub fn scene_state(&self, scene: SceneId) -> RendererSceneState {
        self.state
            .lock()
            .scenes
            .get(&scene)
            .map_or(RendererSceneState::Unavailable, |entry| entry.state)
    }

    fn set_trace(&self, trace: u32) {
        self.trace_id.store(trace, Ordering::Relaxed);
    }

    fn publish(&self, event: RendererEvent) {
        let queue = if event.event_type.is_scene_control_event() {
            &self.scene_control_event_tx
        } else {
            &self.renderer_event_tx
        };
        // receivers live as long as self
        if queue.send(event).is_err() {
            tracing::error!("display {} event queue disconnected", self.display);
        }
    }
}

impl DisplayBundle for PlatformDisplayBundle {
    fn push_and_consume_commands(&self, cmds: &mut Vec<RendererCommand>) {
        if cmds.is_empty() {
            return;
        }
        if self.command_tx.send(std::mem::take(cmds)).is_err() {
            tracing::error!("display {} command queue disconnected", self.display);
        }
    }

    fn dispatch_renderer_events(&self, out: &mut Vec<RendererEvent>) {
        out.extend(self.renderer_event_rx.try_iter());
    }

    fn dispatch_scene_control_events(&self, out: &mut Vec<RendererEvent>) {
        out.extend(self.scene_control_event_rx.try_iter());
    }

    fn do_one_loop(&self, loop_mode: LoopMode, sleep_time: Duration) {
        let loop_start = Instant::now();
        let events = {
            let mut state = self.state.lock();

            self.set_trace(TRACE_EXECUTING_COMMANDS);
            while let Ok(batch) = self.command_rx.try_recv() {
                for cmd in batch {
                    state.execute(cmd);
                }
            }

            if !state.destroyed {
                self.set_trace(TRACE_UPDATING_SCENES);
                state.update_scene_states();

                if loop_mode == LoopMode::UpdateAndRender {
                    self.set_trace(TRACE_RENDERING);
                    state.render();
                }

                self.set_trace(TRACE_EMBEDDED_COMPOSITING);
                state.service_embedded_compositor();

                state.timing.record(loop_start.elapsed());
                if let Some(period) = state.renderer_config.frame_timing_reporting_period() {
                    if let Some(timings) = state.timing.take_report(period) {
                        let display = state.display;
                        state.emit(
                            RendererEvent::new(RendererEventType::FrameTimingReport)
                                .with_display(display)
                                .with_frame_timings(timings),
                        );
                    }
                }
            }

            std::mem::take(&mut state.outbox)
        };

        self.set_trace(TRACE_EMITTING_EVENTS);
        for event in events {
            self.publish(event);
        }

        self.set_trace(TRACE_IDLE);
        if !sleep_time.is_zero() {
            std::thread::sleep(sleep_time);
        }
    }

    fn enable_context(&self) {
        if let Some(platform) = self.state.lock().platform.as_mut() {
            if !platform.enable_context() {
                tracing::error!("display {}: failed to enable context", self.display);
            }
        }
    }

    fn find_master_scene_for_referenced_scene(&self, scene: SceneId) -> Option<SceneId> {
        self.scene_references.lock().get(&scene).copied()
    }

    fn with_ec_manager(&self, f: &mut dyn FnMut(&mut EmbeddedCompositingManager)) {
        f(&mut self.state.lock().ec_manager);
    }

    fn with_embedded_compositor(&self, f: &mut dyn FnMut(&mut dyn EmbeddedCompositor)) -> bool {
        let mut state = self.state.lock();
        match state.platform.as_mut() {
            Some(platform) => {
                f(platform.embedded_compositor());
                true
            }
            None => false,
        }
    }

    fn has_system_compositor_controller(&self) -> bool {
        self.state
            .lock()
            .platform
            .as_ref()
            .is_some_and(|platform| platform.has_system_compositor_controller())
    }

    fn trace_id(&self) -> u32 {
        self.trace_id.load(Ordering::Relaxed)
    }
}
