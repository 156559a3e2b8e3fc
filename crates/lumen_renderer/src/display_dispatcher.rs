//! # Display Dispatcher
//!
//! Routes renderer commands to per-display execution units and merges
//! their events back into two caller-facing streams.
//!
//! ## Routing
//!
//! ```text
//!   command ──preprocess──> classify (command-side SceneDisplayTracker)
//!                               │
//!        ┌──────────────────────┼──────────────────────────┐
//!   live display          missing display              no display
//!   pending list      stash (mapping/state) or        copy to every live
//!                     injected failure event          display + broadcast
//!                                                      stash (consolidated)
//! ```
//!
//! At the end of a batch every non-empty pending list is handed to its
//! display as one atomic enqueue.
//!
//! ## Locking
//!
//! One mutex guards the live-display map, both trackers and both stashes.
//! A second one guards the injected events. Display threads never touch
//! either; they only see their own command and event queues.
//!
//! ## Threading
//!
//! The first `CreateDisplay` or `do_one_loop` fixes the dispatcher in
//! unthreaded mode; `start_display_threads_updating` on an undecided
//! dispatcher fixes it in threaded mode. Once fixed, the mode never
//! changes, and calls belonging to the other mode panic.

use crate::command_utils::{
    add_and_consolidate_command_to_stash, generate_fail_event_for_command, is_batch_log_worthy,
    is_stash_eligible,
};
use crate::config::RendererConfig;
use crate::display_bundle::DisplayBundle;
use crate::display_factory::DisplayFactory;
use crate::display_thread::DisplayThreadControl;
use crate::embedded_compositing::EmbeddedCompositingManager;
use crate::platform::EmbeddedCompositor;
use crate::scene_display_tracker::SceneDisplayTracker;
use lumen_shared::{
    DisplayHandle, LoopMode, RendererCommand, RendererEvent, RendererEventType,
    RendererSceneState, SceneId,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How displays are driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadingMode {
    /// No display created and no loop run yet.
    #[default]
    Undecided,
    /// The caller drives all displays through [`DisplayDispatcher::do_one_loop`].
    Unthreaded,
    /// Every display runs on its own thread.
    Threaded,
}

/// Dispatcher-side aggregate of one live display.
struct Display {
    bundle: Arc<dyn DisplayBundle>,
    thread: Option<Box<dyn DisplayThreadControl>>,
    pending_commands: Vec<RendererCommand>,
    last_frame_counter: u64,
}

/// Everything guarded by the displays-access lock.
struct DispatcherState {
    displays: BTreeMap<DisplayHandle, Display>,
    tracker_for_commands: SceneDisplayTracker,
    tracker_for_events: SceneDisplayTracker,
    stashed_commands: BTreeMap<DisplayHandle, Vec<RendererCommand>>,
    stashed_broadcast: Vec<RendererCommand>,
    min_frame_durations: BTreeMap<DisplayHandle, Duration>,
    threading: ThreadingMode,
    updating: bool,
    loop_mode: LoopMode,
    force_context_enable_next_loop: bool,
    loops_since_event_drain: u32,
    stuck_check_loops: u64,
    last_stuck_check: Instant,
    potentially_stuck: Vec<DisplayHandle>,
}

#[derive(Default)]
struct InjectedEvents {
    renderer: Vec<RendererEvent>,
    scene_control: Vec<RendererEvent>,
}

/// Multi-display command router.
pub struct DisplayDispatcher {
    config: RendererConfig,
    factory: Box<dyn DisplayFactory>,
    state: Mutex<DispatcherState>,
    injected: Mutex<InjectedEvents>,
}

impl DisplayDispatcher {
    /// Creates a dispatcher without displays.
    #[must_use]
    pub fn new(config: RendererConfig, factory: Box<dyn DisplayFactory>) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(DispatcherState {
                displays: BTreeMap::new(),
                tracker_for_commands: SceneDisplayTracker::new(),
                tracker_for_events: SceneDisplayTracker::new(),
                stashed_commands: BTreeMap::new(),
                stashed_broadcast: Vec::new(),
                min_frame_durations: BTreeMap::new(),
                threading: ThreadingMode::Undecided,
                updating: false,
                loop_mode: LoopMode::default(),
                force_context_enable_next_loop: false,
                loops_since_event_drain: 0,
                stuck_check_loops: 0,
                last_stuck_check: Instant::now(),
                potentially_stuck: Vec::new(),
            }),
            injected: Mutex::new(InjectedEvents::default()),
        }
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Routes a batch of commands. `cmds` is empty on return.
    ///
    /// # Panics
    ///
    /// Panics on a `CreateDisplay` for a live display handle.
    pub fn dispatch_commands(&self, cmds: &mut Vec<RendererCommand>) {
        let log_commands = is_batch_log_worthy(cmds);
        if log_commands {
            tracing::info!("dispatching {} commands (scene updates not logged)", cmds.len());
        }

        let mut state = self.state.lock();
        for mut cmd in cmds.drain(..) {
            if log_commands && !matches!(cmd, RendererCommand::UpdateScene(_)) {
                tracing::info!("dispatching command [{}]", cmd);
            }
            self.preprocess_command(&mut state, &mut cmd);
            self.dispatch_command(&mut state, cmd);
        }

        for display in state.displays.values_mut() {
            if !display.pending_commands.is_empty() {
                display.bundle.push_and_consume_commands(&mut display.pending_commands);
            }
        }

        state.loops_since_event_drain += 1;
        if state.loops_since_event_drain > self.config.max_dispatch_loops_without_event_drain {
            tracing::warn!(
                "no renderer events dispatched in more than {} loops, drain events regularly",
                state.loops_since_event_drain
            );
            state.loops_since_event_drain = 0;
        }

        self.check_stuck_displays(&mut state);
    }

    fn preprocess_command(&self, state: &mut DispatcherState, cmd: &mut RendererCommand) {
        match cmd {
            RendererCommand::CreateDisplay(c) => self.create_display(state, c.display, &c.config),
            RendererCommand::SetSceneMapping(c) => {
                state.tracker_for_commands.set_scene_ownership(c.scene, c.display);
            }
            RendererCommand::ReceiveScene(c) => {
                let scene = c.info.scene_id;
                if state.tracker_for_commands.scene_ownership(scene).is_none() {
                    Self::infer_referenced_scene_ownership(state, scene);
                }
            }
            RendererCommand::LogInfo(c) => {
                c.displays_threaded = state.threading == ThreadingMode::Threaded;
                c.display_threads_running = state.updating;
                c.loop_mode = state.loop_mode;
            }
            _ => {}
        }
    }

    fn infer_referenced_scene_ownership(state: &mut DispatcherState, scene: SceneId) {
        tracing::info!("missing display ownership of scene {}, assuming a referenced scene", scene);
        let masters: Vec<SceneId> = state
            .displays
            .values()
            .filter_map(|display| display.bundle.find_master_scene_for_referenced_scene(scene))
            .collect();

        for master in masters {
            match state.tracker_for_commands.scene_ownership(master) {
                Some(owner) => {
                    tracing::info!(
                        "found master scene {} of referenced scene {}, assigning it to display {}",
                        master,
                        scene,
                        owner
                    );
                    state.tracker_for_commands.set_scene_ownership(scene, owner);
                }
                None => tracing::warn!(
                    "master scene {} of referenced scene {} has no display",
                    master,
                    scene
                ),
            }
        }

        if state.tracker_for_commands.scene_ownership(scene).is_none() {
            tracing::error!("could not find master scene for referenced scene {}", scene);
        }
    }

    fn create_display(
        &self,
        state: &mut DispatcherState,
        handle: DisplayHandle,
        config: &lumen_shared::DisplayConfig,
    ) {
        assert!(
            !state.displays.contains_key(&handle),
            "display {handle} created twice"
        );
        if state.threading == ThreadingMode::Undecided {
            state.threading = ThreadingMode::Unthreaded;
        }
        if let Some(us) = config.min_frame_duration_us {
            // an explicit set_min_frame_duration wins over the display config
            state
                .min_frame_durations
                .entry(handle)
                .or_insert(Duration::from_micros(us));
        }

        tracing::info!("creating display bundle for display {}", handle);
        let bundle = self.factory.create_display_bundle(handle, config, &self.config);

        let thread = if state.threading == ThreadingMode::Threaded {
            let min_frame_duration = self.min_frame_duration_locked(state, handle);
            tracing::info!("creating update/render thread for display {}", handle);
            match self.factory.create_display_thread(
                handle,
                Arc::clone(&bundle),
                min_frame_duration,
                &self.config,
            ) {
                Ok(thread) => {
                    thread.set_loop_mode(state.loop_mode);
                    thread.set_min_frame_duration(min_frame_duration);
                    if state.updating {
                        thread.start_updating();
                    }
                    Some(thread)
                }
                Err(err) => {
                    tracing::error!("display {} not created: {}", handle, err);
                    self.inject_renderer_event(
                        RendererEvent::new(RendererEventType::DisplayCreateFailed).with_display(handle),
                    );
                    return;
                }
            }
        } else {
            None
        };

        let mut replay: Vec<RendererCommand> =
            state.stashed_broadcast.iter().map(RendererCommand::copy).collect();
        tracing::info!(
            "pushing {} stashed broadcast commands to new display {}",
            replay.len(),
            handle
        );
        bundle.push_and_consume_commands(&mut replay);

        let mut own = state.stashed_commands.remove(&handle).unwrap_or_default();
        tracing::info!("pushing {} stashed commands to new display {}", own.len(), handle);
        bundle.push_and_consume_commands(&mut own);

        state.displays.insert(
            handle,
            Display {
                bundle,
                thread,
                pending_commands: Vec::new(),
                last_frame_counter: 0,
            },
        );
    }

    fn dispatch_command(&self, state: &mut DispatcherState, cmd: RendererCommand) {
        match state.tracker_for_commands.determine_display_from_renderer_command(&cmd) {
            Some(target) => {
                if let Some(display) = state.displays.get_mut(&target) {
                    display.pending_commands.push(cmd);
                } else if is_stash_eligible(cmd.kind()) {
                    tracing::info!(
                        "display {} does not exist yet, stashing command [{}]",
                        target,
                        cmd
                    );
                    state.stashed_commands.entry(target).or_default().push(cmd);
                } else {
                    tracing::error!("cannot dispatch command, display {} unknown: [{}]", target, cmd);
                    match generate_fail_event_for_command(&cmd) {
                        Some(event) if event.event_type.is_scene_control_event() => {
                            self.inject_scene_control_event(event);
                        }
                        Some(event) => self.inject_renderer_event(event),
                        None => {}
                    }
                }
            }
            None => {
                self.broadcast_command(state, cmd);
            }
        }
    }

    fn broadcast_command(&self, state: &mut DispatcherState, cmd: RendererCommand) {
        if !cmd.kind().is_copyable() {
            if !state.displays.is_empty() {
                tracing::error!("dropping [{}]: its scene has no display and it cannot be broadcast", cmd);
            }
            return;
        }

        let handles: Vec<DisplayHandle> = state.displays.keys().copied().collect();
        for handle in handles {
            let mut copy = cmd.copy();
            if let RendererCommand::LogInfo(log) = &mut copy {
                log.min_frame_time = Some(self.min_frame_duration_locked(state, handle));
            }
            if let Some(display) = state.displays.get_mut(&handle) {
                display.pending_commands.push(copy);
            }
        }

        add_and_consolidate_command_to_stash(cmd, &mut state.stashed_broadcast);
    }

    fn check_stuck_displays(&self, state: &mut DispatcherState) {
        if state.threading != ThreadingMode::Threaded || !state.updating {
            return;
        }
        state.stuck_check_loops += 1;
        if state.stuck_check_loops <= self.config.stuck_display_check_period()
            || state.last_stuck_check.elapsed() < self.config.watchdog_notification_interval()
        {
            return;
        }
        state.stuck_check_loops = 0;
        state.last_stuck_check = Instant::now();
        state.potentially_stuck.clear();

        for (handle, display) in &mut state.displays {
            let Some(thread) = display.thread.as_ref() else {
                continue;
            };
            let frame_counter = thread.frame_counter();
            if frame_counter == display.last_frame_counter {
                let trace_id = display.bundle.trace_id();
                tracing::warn!(
                    "display {} potentially stuck at trace id {}",
                    handle,
                    trace_id
                );
                state.potentially_stuck.push(*handle);
            }
            display.last_frame_counter = frame_counter;
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Appends renderer events of all displays, then injected ones.
    pub fn dispatch_renderer_events(&self, events: &mut Vec<RendererEvent>) {
        let removed = {
            let mut state = self.state.lock();
            let first = state.displays.keys().next().copied();
            let mut destroyed = Vec::new();
            let mut buffer = Vec::new();

            for (handle, display) in &state.displays {
                display.bundle.dispatch_renderer_events(&mut buffer);
                for event in buffer.drain(..) {
                    if matches!(
                        event.event_type,
                        RendererEventType::DisplayDestroyed | RendererEventType::DisplayCreateFailed
                    ) {
                        debug_assert_eq!(event.display_handle, Some(*handle));
                        destroyed.push(*handle);
                    }
                    if Self::is_redundant_broadcast_echo(&event, *handle, first) {
                        continue;
                    }
                    events.push(event);
                }
            }

            let mut removed = Vec::with_capacity(destroyed.len());
            for handle in destroyed {
                tracing::info!("display {} gone, removing it", handle);
                state.tracker_for_commands.unregister_display(handle);
                state.tracker_for_events.unregister_display(handle);
                removed.extend(state.displays.remove(&handle));
            }

            if state.threading != ThreadingMode::Threaded && !removed.is_empty() {
                state.force_context_enable_next_loop = true;
            }
            state.loops_since_event_drain = 0;
            removed
        };
        // joins display threads outside the lock
        drop(removed);

        events.append(&mut self.injected.lock().renderer);
    }

    /// Appends scene control events of all displays, then injected ones.
    ///
    /// State changes of a scene are forwarded from its owning display only.
    /// A scene is owned by the display on which it last became `Ready`;
    /// while unowned, the first display speaks for all.
    pub fn dispatch_scene_control_events(&self, events: &mut Vec<RendererEvent>) {
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            let first = state.displays.keys().next().copied();
            let mut buffer = Vec::new();

            for (handle, display) in &state.displays {
                display.bundle.dispatch_scene_control_events(&mut buffer);
                for event in buffer.drain(..) {
                    if event.event_type == RendererEventType::SceneStateChanged {
                        if let Some(scene) = event.scene_id {
                            if event.state == Some(RendererSceneState::Ready) {
                                state.tracker_for_events.set_scene_ownership(scene, *handle);
                            }
                            let from_owner = match state.tracker_for_events.scene_ownership(scene) {
                                Some(owner) => owner == *handle,
                                None => first == Some(*handle),
                            };
                            if !from_owner {
                                tracing::info!(
                                    "filtering state change of scene {} to {:?} from non-owner display {}",
                                    scene,
                                    event.state,
                                    handle
                                );
                                continue;
                            }
                        }
                    } else if Self::is_redundant_broadcast_echo(&event, *handle, first) {
                        continue;
                    }
                    events.push(event);
                }
            }
            state.loops_since_event_drain = 0;
        }

        events.append(&mut self.injected.lock().scene_control);
    }

    fn is_redundant_broadcast_echo(
        event: &RendererEvent,
        from: DisplayHandle,
        first: Option<DisplayHandle>,
    ) -> bool {
        SceneDisplayTracker::is_event_result_of_broadcast_command(event.event_type)
            && first != Some(from)
    }

    /// Queues a renderer event for the next drain.
    pub fn inject_renderer_event(&self, event: RendererEvent) {
        self.injected.lock().renderer.push(event);
    }

    /// Queues a scene control event for the next drain.
    pub fn inject_scene_control_event(&self, event: RendererEvent) {
        self.injected.lock().scene_control.push(event);
    }

    // =========================================================================
    // LOOP CONTROL
    // =========================================================================

    /// Runs one update/render step of every display on the calling thread.
    ///
    /// `sleep_time` is spent once per call, after the last display.
    ///
    /// # Panics
    ///
    /// Panics if display threads were started.
    pub fn do_one_loop(&self, sleep_time: Duration) {
        let (displays, loop_mode, switch_context) = {
            let mut state = self.state.lock();
            assert!(
                state.threading != ThreadingMode::Threaded,
                "do_one_loop called while displays run on their own threads"
            );
            state.threading = ThreadingMode::Unthreaded;

            let switch_context = state.displays.len() > 1 || state.force_context_enable_next_loop;
            state.force_context_enable_next_loop = false;
            let displays: Vec<(DisplayHandle, Arc<dyn DisplayBundle>)> = state
                .displays
                .iter()
                .map(|(handle, display)| (*handle, Arc::clone(&display.bundle)))
                .collect();
            (displays, state.loop_mode, switch_context)
        };

        let count = displays.len();
        for (index, (handle, bundle)) in displays.into_iter().enumerate() {
            let _span = tracing::debug_span!("display", id = %handle).entered();
            if switch_context {
                bundle.enable_context();
            }
            let sleep = if index + 1 == count { sleep_time } else { Duration::ZERO };
            bundle.do_one_loop(loop_mode, sleep);
        }
        if count == 0 && !sleep_time.is_zero() {
            std::thread::sleep(sleep_time);
        }
    }

    /// Starts the loops of all display threads, current and future.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher already runs unthreaded, even with no
    /// displays left.
    pub fn start_display_threads_updating(&self) {
        let mut state = self.state.lock();
        assert!(
            state.threading != ThreadingMode::Unthreaded,
            "display threads started after displays were created unthreaded"
        );
        state.threading = ThreadingMode::Threaded;
        state.updating = true;
        for display in state.displays.values() {
            if let Some(thread) = &display.thread {
                thread.start_updating();
            }
        }
        tracing::info!("display threads updating");
    }

    /// Parks all display threads. Threads stay alive.
    ///
    /// # Panics
    ///
    /// Panics if displays run unthreaded.
    pub fn stop_display_threads_updating(&self) {
        let mut state = self.state.lock();
        assert!(
            state.displays.values().all(|display| display.thread.is_some()),
            "stopping display threads of unthreaded displays"
        );
        state.updating = false;
        for thread in state.displays.values().filter_map(|display| display.thread.as_ref()) {
            thread.stop_updating();
        }
        tracing::info!("display threads stopped updating");
    }

    /// Sets the loop mode of all displays, current and future.
    pub fn set_loop_mode(&self, mode: LoopMode) {
        let mut state = self.state.lock();
        state.loop_mode = mode;
        for thread in state.displays.values().filter_map(|display| display.thread.as_ref()) {
            thread.set_loop_mode(mode);
        }
    }

    /// Sets the minimum frame duration of `display`, live or future.
    pub fn set_min_frame_duration(&self, duration: Duration, display: DisplayHandle) {
        let mut state = self.state.lock();
        state.min_frame_durations.insert(display, duration);
        if let Some(thread) = state.displays.get(&display).and_then(|d| d.thread.as_ref()) {
            thread.set_min_frame_duration(duration);
        }
    }

    /// Minimum frame duration of `display`; the configured default if unset.
    #[must_use]
    pub fn min_frame_duration(&self, display: DisplayHandle) -> Duration {
        let state = self.state.lock();
        self.min_frame_duration_locked(&state, display)
    }

    fn min_frame_duration_locked(&self, state: &DispatcherState, display: DisplayHandle) -> Duration {
        state
            .min_frame_durations
            .get(&display)
            .copied()
            .unwrap_or_else(|| self.config.default_min_frame_duration())
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Configuration the dispatcher was created with.
    #[must_use]
    pub const fn renderer_config(&self) -> &RendererConfig {
        &self.config
    }

    /// Handles of all live displays, ascending.
    #[must_use]
    pub fn displays(&self) -> Vec<DisplayHandle> {
        self.state.lock().displays.keys().copied().collect()
    }

    /// Dispatch cycles since events were last drained.
    #[must_use]
    pub fn loops_since_event_drain(&self) -> u32 {
        self.state.lock().loops_since_event_drain
    }

    /// Display threads whose frame counter did not move between the last
    /// two stuck checks.
    #[must_use]
    pub fn potentially_stuck_displays(&self) -> Vec<DisplayHandle> {
        self.state.lock().potentially_stuck.clone()
    }

    /// Current threading mode.
    #[must_use]
    pub fn threading_mode(&self) -> ThreadingMode {
        self.state.lock().threading
    }

    /// Whether display threads are looping.
    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.state.lock().updating
    }

    /// Current loop mode.
    #[must_use]
    pub fn loop_mode(&self) -> LoopMode {
        self.state.lock().loop_mode
    }

    /// Runs `f` on the embedded compositing manager of `display`.
    ///
    /// `None` if the display does not exist.
    ///
    /// # Panics
    ///
    /// Panics in threaded mode.
    pub fn with_ec_manager<R>(
        &self,
        display: DisplayHandle,
        f: impl FnOnce(&mut EmbeddedCompositingManager) -> R,
    ) -> Option<R> {
        let bundle = self.unthreaded_bundle(display)?;
        let mut f = Some(f);
        let mut result = None;
        bundle.with_ec_manager(&mut |manager: &mut EmbeddedCompositingManager| {
            if let Some(f) = f.take() {
                result = Some(f(manager));
            }
        });
        result
    }

    /// Runs `f` on the embedded compositor of `display`.
    ///
    /// `None` if the display does not exist or has no platform yet.
    ///
    /// # Panics
    ///
    /// Panics in threaded mode.
    pub fn with_embedded_compositor<R>(
        &self,
        display: DisplayHandle,
        f: impl FnOnce(&mut dyn EmbeddedCompositor) -> R,
    ) -> Option<R> {
        let bundle = self.unthreaded_bundle(display)?;
        let mut f = Some(f);
        let mut result = None;
        bundle.with_embedded_compositor(&mut |compositor: &mut dyn EmbeddedCompositor| {
            if let Some(f) = f.take() {
                result = Some(f(compositor));
            }
        });
        result
    }

    /// Whether the first display has a system compositor controller.
    ///
    /// # Panics
    ///
    /// Panics in threaded mode or without displays.
    #[must_use]
    pub fn has_system_compositor_controller(&self) -> bool {
        let state = self.state.lock();
        assert!(
            state.threading != ThreadingMode::Threaded,
            "system compositor query while displays are threaded"
        );
        let Some(display) = state.displays.values().next() else {
            panic!("system compositor query without displays");
        };
        display.bundle.has_system_compositor_controller()
    }

    fn unthreaded_bundle(&self, display: DisplayHandle) -> Option<Arc<dyn DisplayBundle>> {
        let state = self.state.lock();
        assert!(
            state.threading != ThreadingMode::Threaded,
            "display internals accessed while displays are threaded"
        );
        state.displays.get(&display).map(|d| Arc::clone(&d.bundle))
    }
}
